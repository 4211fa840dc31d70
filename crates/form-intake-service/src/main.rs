//! # Form Intake Service
//!
//! Binary entry point for the form intake HTTP service.
//!
//! This executable:
//! - Loads configuration from files and `FI__` environment variables
//! - Initializes structured logging
//! - Loads the field-mapping table and builds the downstream adapters
//! - Starts the HTTP server from form-intake-api
//!
//! Exit codes: 1 bind failure, 2 server failure, 3 configuration error.

use anyhow::Context;
use form_intake_api::{start_server, LoggingConfig, ServiceConfig};
use form_intake_core::adapters::{GraphListStore, HttpCdpClient, HttpEmailSender};
use form_intake_core::{
    CdpSync, DisabledCdpSync, DisabledEmailSender, EmailSender, IntakePipeline, IntakeSinks,
    ListStore, MappingTable, SinkError, TableFieldMapper, UnconfiguredListStore,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIGURATION_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() {
    // Logging depends on configuration, so load first and report afterwards.
    let loaded = ServiceConfig::load();

    init_logging(
        loaded
            .as_ref()
            .map(|config| &config.logging)
            .unwrap_or(&LoggingConfig::default()),
    );

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Form Intake Service");

    let config = match loaded.and_then(|config| config.validate().map(|()| config)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
    };

    let pipeline = match build_pipeline(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to build intake pipeline; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
    };

    info!(
        host = %config.server.host,
        port = config.server.port,
        endpoint = %config.webhook.endpoint_path,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(config, pipeline).await {
        error!(error = %e, "Server terminated with an error");
        std::process::exit(e.exit_code());
    }
}

// ============================================================================
// Private helpers
// ============================================================================

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "form_intake_service={level},form_intake_api={level},form_intake_core={level},tower_http=debug",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the mapping table and wire the sinks into a pipeline.
fn build_pipeline(config: &ServiceConfig) -> anyhow::Result<IntakePipeline> {
    let intake = &config.intake;

    let table = MappingTable::from_yaml_file(&intake.mapping_file).with_context(|| {
        format!(
            "failed to load field mapping from {}",
            intake.mapping_file.display()
        )
    })?;
    intake
        .attribution_keys
        .validate_against(&table)
        .context("attribution keys conflict with the field mapping")?;
    let mapper = TableFieldMapper::new(table).context("field mapping is invalid")?;

    if intake.list_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
        warn!("No list id configured; every delivery will be answered with 500");
    }

    let sinks = IntakeSinks::new(
        build_list_store(config),
        build_email_sender(config),
        build_cdp_sync(config),
    );

    info!(
        dispatch_mode = ?intake.dispatch_mode,
        forward_attribution = intake.forward_attribution,
        "Intake pipeline configured"
    );

    let pipeline = IntakePipeline::new(intake.pipeline_settings(), Arc::new(mapper), sinks);
    if !pipeline.verifies_signatures() {
        warn!("No webhook secret configured; signature verification is disabled");
    }

    Ok(pipeline)
}

fn build_list_store(config: &ServiceConfig) -> Arc<dyn ListStore> {
    match GraphListStore::new(config.list_store.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "List store unavailable; deliveries will fail until configured");
            Arc::new(UnconfiguredListStore)
        }
    }
}

fn build_email_sender(config: &ServiceConfig) -> Arc<dyn EmailSender> {
    if !config.email.enabled {
        info!("Confirmation email disabled");
        return Arc::new(DisabledEmailSender);
    }

    match HttpEmailSender::new(config.email.clone()) {
        Ok(sender) => Arc::new(sender),
        Err(e) => {
            log_disabled_sink(&e);
            Arc::new(DisabledEmailSender)
        }
    }
}

fn build_cdp_sync(config: &ServiceConfig) -> Arc<dyn CdpSync> {
    if !config.cdp.enabled {
        info!("CDP sync disabled");
        return Arc::new(DisabledCdpSync);
    }

    match HttpCdpClient::new(config.cdp.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log_disabled_sink(&e);
            Arc::new(DisabledCdpSync)
        }
    }
}

fn log_disabled_sink(e: &SinkError) {
    warn!(
        service = e.service(),
        error = %e,
        "Optional sink is enabled but not usable; continuing without it"
    );
}
