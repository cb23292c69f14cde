use crate::config::ServiceConfig;
use crate::degradation::{operation, Operation};
use crate::error::BoxError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Build the shared HTTP client used by all probes
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Successful probe result
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub endpoint: String,
    pub status_code: u16,
}

/// HTTP health probe against one telemetry backend. Fed to the registry
/// as an opaque operation; the resilience core never looks inside.
#[derive(Debug, Clone)]
pub struct ExporterProbe {
    client: reqwest::Client,
    service: String,
    endpoint: String,
    health_path: String,
    expected_status: u16,
}

impl ExporterProbe {
    pub fn new(
        client: reqwest::Client,
        service: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            service: service.into(),
            endpoint: endpoint.into(),
            health_path: "/".to_string(),
            expected_status: 200,
        }
    }

    pub fn from_service(client: reqwest::Client, config: &ServiceConfig) -> Self {
        Self {
            client,
            service: config.name.clone(),
            endpoint: config.endpoint.clone(),
            health_path: config.health_path.clone(),
            expected_status: config.expected_status,
        }
    }

    /// Same probe pointed at a different endpoint, e.g. a fallback
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if self.health_path.starts_with('/') {
            format!("{}{}", endpoint, self.health_path)
        } else {
            format!("{}/{}", endpoint, self.health_path)
        }
    }

    /// Issue the health request and classify the response. Any transport
    /// error or unexpected status is a failure.
    pub async fn check(&self) -> std::result::Result<ProbeReport, BoxError> {
        let url = self.url();
        debug!(service = %self.service, url = %url, "Probing backend health");

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();

        if status == self.expected_status {
            Ok(ProbeReport {
                endpoint: self.endpoint.clone(),
                status_code: status,
            })
        } else {
            Err(format!("unexpected status {status} from {url}").into())
        }
    }

    /// Package this probe as a protected operation
    pub fn into_operation(self) -> Operation<ProbeReport> {
        let probe = Arc::new(self);
        operation(move || {
            let probe = probe.clone();
            async move { probe.check().await }
        })
    }
}
