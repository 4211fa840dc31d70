//! # Downstream Adapters
//!
//! HTTP implementations of the sink traits in [`crate::sinks`].

use crate::sinks::SinkError;
use std::time::Duration;

pub mod cdp_client;
pub mod email_sender;
pub mod graph_list_store;

pub use cdp_client::{CdpClientConfig, HttpCdpClient};
pub use email_sender::{EmailSenderConfig, HttpEmailSender};
pub use graph_list_store::{GraphListStore, GraphListStoreConfig};

/// Longest error body kept for logs.
const MAX_ERROR_BODY: usize = 512;

fn build_http_client(service: &str, timeout: Duration) -> Result<reqwest::Client, SinkError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("form-intake/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SinkError::Transport {
            service: service.to_string(),
            message: format!("Failed to build HTTP client: {}", e),
        })
}

fn transport_error(service: &str, err: reqwest::Error) -> SinkError {
    SinkError::Transport {
        service: service.to_string(),
        message: err.to_string(),
    }
}

/// Turn a non-success response into a [`SinkError::Status`].
async fn status_error(service: &str, response: reqwest::Response) -> SinkError {
    let status = response.status().as_u16();
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    SinkError::Status {
        service: service.to_string(),
        status,
        message,
    }
}

fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
