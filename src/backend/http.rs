use super::{decode_start, decode_status, error_message, JobBackend, StartAck, StatusReport};
use crate::config::MonitorConfig;
use crate::error::BackendError;
use crate::model::JobKind;
use anyhow::{Context, Result};

/// Build the shared HTTP client: per-request timeout and user agent from config.
pub(crate) fn build_http_client(cfg: &MonitorConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.request_timeout)
        .build()
        .context("failed to build HTTP client")
}

/// Read a response body, turning non-2xx answers into errors. A server message in an
/// error body wins over the bare status code.
pub(crate) async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, BackendError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(match error_message(&body) {
            Some(msg) => BackendError::Application(msg),
            None => BackendError::Status(status.as_u16()),
        });
    }
    Ok(body.to_vec())
}

pub(crate) struct HttpBackend {
    http: reqwest::Client,
    cfg: MonitorConfig,
}

impl HttpBackend {
    pub fn new(cfg: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(cfg)?,
            cfg: cfg.clone(),
        })
    }
}

impl JobBackend for HttpBackend {
    async fn start(&self, kind: JobKind) -> Result<StartAck, BackendError> {
        let url = self.cfg.url(&self.cfg.endpoints(kind).start);
        tracing::debug!(%kind, %url, "start request");
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let body = read_body(resp).await?;
        decode_start(&body)
    }

    async fn status(&self, kind: JobKind) -> Result<StatusReport, BackendError> {
        let url = self.cfg.url(&self.cfg.endpoints(kind).status);
        tracing::trace!(%kind, %url, "status request");
        let resp = self.http.get(url).send().await?;
        let body = read_body(resp).await?;
        decode_status(&body)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{serve, serve_silent};
    use super::*;
    use std::time::Duration;

    fn cfg_for(base_url: String) -> MonitorConfig {
        MonitorConfig {
            base_url,
            request_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_and_status_round_trip_over_http() {
        let base = serve(vec![
            (
                200,
                r#"{"status":"success","data":{"success":true,"estimated_duration":"2 min"}}"#
                    .to_string(),
            ),
            (
                200,
                r#"{"status":"success","data":{"running":true,"message":"lote 1"}}"#.to_string(),
            ),
        ])
        .await;
        let backend = HttpBackend::new(&cfg_for(base)).unwrap();

        let ack = backend.start(JobKind::ReEvaluation).await.unwrap();
        assert_eq!(ack.estimated_duration.as_deref(), Some("2 min"));

        let st = backend.status(JobKind::ReEvaluation).await.unwrap();
        assert!(st.running);
        assert_eq!(st.message, "lote 1");
    }

    #[tokio::test]
    async fn non_success_status_surfaces_server_message() {
        let base = serve(vec![
            (500, r#"{"message":"worker crashed"}"#.to_string()),
            (503, "unavailable".to_string()),
        ])
        .await;
        let backend = HttpBackend::new(&cfg_for(base)).unwrap();

        let err = backend.start(JobKind::DataIngestion).await.unwrap_err();
        assert_eq!(err.server_message(), Some("worker crashed"));

        let err = backend.status(JobKind::DataIngestion).await.unwrap_err();
        assert!(matches!(err, BackendError::Status(503)));
    }

    #[tokio::test]
    async fn hung_request_times_out() {
        let base = serve_silent().await;
        let backend = HttpBackend::new(&cfg_for(base)).unwrap();
        let err = backend.status(JobKind::DataIngestion).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout), "got {err:?}");
    }
}
