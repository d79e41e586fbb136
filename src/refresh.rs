//! Full data refresh run after a job settles.
//!
//! The reloader only knows the `DataRefresher` trait, so the refresh mechanism can be
//! swapped without touching the job state machine.

use crate::backend::{build_http_client, read_body};
use crate::config::MonitorConfig;
use crate::error::BackendError;
use crate::model::RefreshSummary;
use anyhow::Result;
use futures::future::join_all;
use serde::Deserialize;
use std::future::Future;

pub trait DataRefresher: Send + Sync + 'static {
    fn refetch_all(&self) -> impl Future<Output = Result<RefreshSummary, BackendError>> + Send;
}

/// `{success, data: [...]}` list response of the dashboard collections.
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn count_items(body: &[u8]) -> Result<usize, BackendError> {
    let list: ListResponse =
        serde_json::from_slice(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    match (list.success, list.data) {
        (true, Some(items)) => Ok(items.len()),
        _ => Err(BackendError::Application(
            list.message
                .or(list.error)
                .unwrap_or_else(|| "collection request failed".to_string()),
        )),
    }
}

/// Re-fetches every configured collection concurrently.
pub(crate) struct HttpRefresher {
    http: reqwest::Client,
    cfg: MonitorConfig,
}

impl HttpRefresher {
    pub fn new(cfg: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(cfg)?,
            cfg: cfg.clone(),
        })
    }

    async fn fetch_count(&self, collection: &str) -> Result<usize, BackendError> {
        let resp = self.http.get(self.cfg.url(collection)).send().await?;
        let body = read_body(resp).await?;
        count_items(&body)
    }
}

impl DataRefresher for HttpRefresher {
    /// Collections load independently; the refresh only fails when none of them loads.
    async fn refetch_all(&self) -> Result<RefreshSummary, BackendError> {
        let results = join_all(self.cfg.collections.iter().map(|c| async move {
            (c.clone(), self.fetch_count(c).await)
        }))
        .await;

        let mut summary = RefreshSummary::default();
        let mut last_err = None;
        for (name, res) in results {
            match res {
                Ok(n) => {
                    tracing::debug!(collection = %name, items = n, "collection reloaded");
                    summary.collections.push((name, n));
                }
                Err(e) => {
                    tracing::warn!(collection = %name, error = %e, "collection reload failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if summary.collections.is_empty() => Err(e),
            _ => Ok(summary),
        }
    }
}
