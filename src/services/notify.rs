//! Outbound notification relay.
//!
//! Every final task outcome is posted to the external import-manager API.
//! The relay is strictly best-effort: network failures and non-200
//! responses are logged and swallowed, never raised to the task.

use crate::models::payload::RequestPayload;
use chrono::Local;
use std::time::Duration;
use tracing::{error, info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the external import-manager endpoint.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    endpoint: Option<String>,
    edmo_code: Option<i64>,
    api_version: Option<String>,
    production: bool,
}

impl Notifier {
    pub fn new(
        endpoint: Option<String>,
        edmo_code: Option<i64>,
        api_version: Option<String>,
        production: bool,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            edmo_code,
            api_version,
            production,
        }
    }

    /// Stamp the payload and POST it to the import manager.
    ///
    /// With the backdoor flag set, or outside production mode, the payload
    /// is only logged. Returns whether the call was delivered.
    pub async fn post(&self, payload: &mut RequestPayload, backdoor: bool) -> bool {
        if payload.edmo_code.is_none() {
            payload.edmo_code = self.edmo_code;
        }
        payload.datetime = Some(Local::now().format("%Y%m%dT%H:%M:%S").to_string());
        if payload.api_function.is_empty() {
            payload.api_function = "unknown_function".into();
        }
        payload.api_function.push_str("_ready");
        payload.version = self.api_version.clone();

        if backdoor {
            warn!("backdoor enabled: notification suppressed");
            info!(
                "payload: {}",
                serde_json::to_string(payload).unwrap_or_default()
            );
            return false;
        }

        if !self.production {
            warn!("not in production: notification suppressed");
            info!(
                "payload: {}",
                serde_json::to_string(payload).unwrap_or_default()
            );
            return false;
        }

        let Some(uri) = self.endpoint.as_deref() else {
            error!("invalid external APIs URI");
            return false;
        };

        let response = self
            .client
            .post(uri)
            .timeout(NOTIFY_TIMEOUT)
            .json(&*payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("called POST on external APIs (status: {}, uri: {})", resp.status(), uri);
                true
            }
            Ok(resp) => {
                error!(
                    "failed to call external APIs (status: {}, uri: {})",
                    resp.status(),
                    uri
                );
                false
            }
            Err(err) => {
                error!("failed to call external APIs ({err}, uri: {uri})");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn suppressed_outside_production() {
        let notifier = Notifier::new(None, Some(1234), Some("1.0".into()), false);
        let mut payload = RequestPayload {
            api_function: "delete_orders".into(),
            ..Default::default()
        };
        let delivered = notifier.post(&mut payload, false).await;
        assert!(!delivered);
        assert_eq!(payload.api_function, "delete_orders_ready");
        assert_eq!(payload.edmo_code, Some(1234));
        assert!(payload.datetime.is_some());
    }

    #[tokio::test]
    async fn backdoor_suppresses_even_in_production() {
        let notifier = Notifier::new(Some("http://127.0.0.1:1".into()), None, None, true);
        let mut payload = RequestPayload::default();
        assert!(!notifier.post(&mut payload, true).await);
    }
}
