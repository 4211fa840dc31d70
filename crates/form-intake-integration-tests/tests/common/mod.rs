//! Common test utilities for form intake integration tests
//!
//! The service is assembled with the real HTTP adapters, all pointed at one
//! `wiremock` server that stands in for Graph, the email API and the CDP.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use form_intake_api::{create_router, AppState, ServiceConfig, ServiceMetrics};
use form_intake_core::adapters::{GraphListStore, HttpCdpClient, HttpEmailSender};
use form_intake_core::{
    sign_payload, IntakePipeline, IntakeSinks, ListStore, MappingTable, TableFieldMapper,
    WebhookSecret,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SECRET: &str = "integration-secret";
pub const FORM_ID: &str = "tryout-form";
pub const LIST_ID: &str = "tryout-registrations";
pub const WEBHOOK_PATH: &str = "/webhooks/typeform";

pub const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";
pub const ITEMS_PATH: &str = "/v1.0/sites/site-1/lists/tryout-registrations/items";
pub const EMAIL_PATH: &str = "/emails";
pub const CDP_PATH: &str = "/applicants";

/// Mapping table shipped with the service.
pub fn shipped_mapping_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/field-mapping.yaml")
}

// ============================================================================
// Service assembly
// ============================================================================

/// Configuration with every downstream pointed at `server`.
pub fn service_config(server: &MockServer) -> ServiceConfig {
    let mut config = ServiceConfig::default();

    config.intake.webhook_secret = Some(SECRET.to_string());
    config.intake.expected_form_id = Some(FORM_ID.to_string());
    config.intake.list_id = Some(LIST_ID.to_string());
    config.intake.mapping_file = shipped_mapping_path();

    config.list_store.authority = server.uri();
    config.list_store.tenant_id = "tenant-1".to_string();
    config.list_store.client_id = "client-1".to_string();
    config.list_store.client_secret = "client-secret".to_string();
    config.list_store.site_id = "site-1".to_string();
    config.list_store.graph_base_url = format!("{}/v1.0", server.uri());

    config.email.base_url = server.uri();
    config.email.api_key = "email-key".to_string();

    config.cdp.base_url = server.uri();
    config.cdp.api_key = "cdp-key".to_string();

    config
}

/// Router built from `config` with the real adapters.
pub fn build_router(config: ServiceConfig) -> Router {
    let list_store = Arc::new(GraphListStore::new(config.list_store.clone()).unwrap());
    build_router_with_list_store(config, list_store)
}

/// Router built from `config` with the real optional adapters and the given
/// list store.
pub fn build_router_with_list_store(
    config: ServiceConfig,
    list_store: Arc<dyn ListStore>,
) -> Router {
    let table = MappingTable::from_yaml_file(&config.intake.mapping_file).unwrap();
    config
        .intake
        .attribution_keys
        .validate_against(&table)
        .unwrap();
    let mapper = Arc::new(TableFieldMapper::new(table).unwrap());

    let sinks = IntakeSinks::new(
        list_store,
        Arc::new(HttpEmailSender::new(config.email.clone()).unwrap()),
        Arc::new(HttpCdpClient::new(config.cdp.clone()).unwrap()),
    );
    let pipeline = IntakePipeline::new(config.intake.pipeline_settings(), mapper, sinks);

    create_router(AppState::new(config, pipeline, ServiceMetrics::new().unwrap()))
}

// ============================================================================
// Downstream mocks
// ============================================================================

pub async fn mount_graph(server: &MockServer, item_id: &str) {
    mount_graph_token(server).await;
    Mock::given(method("POST"))
        .and(path(ITEMS_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": item_id })))
        .mount(server)
        .await;
}

pub async fn mount_graph_failure(server: &MockServer, status: u16) {
    mount_graph_token(server).await;
    Mock::given(method("POST"))
        .and(path(ITEMS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string("list unavailable"))
        .mount(server)
        .await;
}

async fn mount_graph_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "graph-token"
        })))
        .mount(server)
        .await;
}

pub async fn mount_email(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(EMAIL_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "id": "email-1" })))
        .mount(server)
        .await;
}

pub async fn mount_cdp(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(CDP_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Everything downstream succeeds.
pub async fn mount_healthy_downstream(server: &MockServer) {
    mount_graph(server, "101").await;
    mount_email(server, 200).await;
    mount_cdp(
        server,
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "applicantId": "app-9",
            "flowsTriggered": ["tryout-welcome"]
        })),
    )
    .await;
}

/// Bodies of the requests `server` received on `request_path`.
pub async fn received_bodies(server: &MockServer, request_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == request_path)
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

// ============================================================================
// Deliveries
// ============================================================================

/// A complete tryout registration.
pub fn registration(hidden: Value) -> Value {
    json!({
        "event_id": "01HZX",
        "event_type": "form_response",
        "form_response": {
            "form_id": FORM_ID,
            "token": "resp-token-1",
            "submitted_at": "2024-03-05T18:30:00Z",
            "hidden": hidden,
            "definition": { "id": FORM_ID, "title": "Spring Tryouts" },
            "answers": [
                { "type": "text", "text": "Alex", "field": { "id": "q1", "ref": "first_name", "type": "short_text" } },
                { "type": "text", "text": "Morgan", "field": { "id": "q2", "ref": "last_name", "type": "short_text" } },
                { "type": "email", "email": "alex@example.com", "field": { "id": "q3", "ref": "email", "type": "email" } },
                { "type": "date", "date": "2008-06-01", "field": { "id": "q4", "ref": "date_of_birth", "type": "date" } },
                { "type": "choices", "choices": { "labels": ["Midfield", "Defense"] }, "field": { "id": "q5", "ref": "position_preference", "type": "multiple_choice" } },
                { "type": "boolean", "boolean": true, "field": { "id": "q6", "ref": "guardian_consent", "type": "yes_no" } }
            ]
        }
    })
}

/// Remove the answer for `question_ref`.
pub fn without_answer(mut payload: Value, question_ref: &str) -> Value {
    if let Some(answers) = payload["form_response"]["answers"].as_array_mut() {
        answers.retain(|answer| answer["field"]["ref"] != question_ref);
    }
    payload
}

pub fn signed_request(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = sign_payload(&body, &WebhookSecret::new(SECRET)).unwrap();
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("typeform-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn unsigned_request(payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("typeform-signature", "sha256=bm90LWEtcmVhbC1zaWduYXR1cmU=")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

/// Send one request and decode the JSON response.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
