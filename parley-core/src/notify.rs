//! Best-effort "session finished" beacon sent when the user ends a session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TerminationNotifier {
    api_base: String,
    client: reqwest::Client,
}

impl TerminationNotifier {
    pub fn new(api_base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "notifier client build failed, using defaults");
                reqwest::Client::new()
            });
        Self {
            api_base: api_base.into(),
            client,
        }
    }

    /// `{api_base}/api/interview/{id}/finish`.
    pub fn finish_url(&self, session_id: &str) -> String {
        format!(
            "{}/api/interview/{}/finish",
            self.api_base.trim_end_matches('/'),
            session_id
        )
    }

    /// POST the beacon and wait for the answer.
    ///
    /// # Errors
    /// `ParleyError::Notify` on transport failure or a non-success status.
    pub async fn send(&self, session_id: &str) -> Result<()> {
        let url = self.finish_url(session_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ParleyError::Notify(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Notify(format!("{url} returned {status}")));
        }
        info!(session_id, "session finish acknowledged");
        Ok(())
    }

    /// Fire and forget. Failures are logged, never surfaced. The handle only
    /// matters to callers that must not exit before the request lands.
    pub fn notify(&self, session_id: &str) -> JoinHandle<()> {
        let notifier = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&session_id).await {
                warn!(error = %e, session_id, "session finish notification failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_url_tolerates_trailing_slash() {
        let n = TerminationNotifier::new("http://localhost:8000/");
        assert_eq!(
            n.finish_url("abc"),
            "http://localhost:8000/api/interview/abc/finish"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error_not_a_panic() {
        let n = TerminationNotifier::new("http://127.0.0.1:9");
        assert!(matches!(n.send("x").await, Err(ParleyError::Notify(_))));
    }
}
