use crate::errors::ApiError;
use crate::export::{to_csv, to_json_rows};
use crate::metrics::{QUERIES_TOTAL, QUERY_LATENCY_SECONDS, STORE_FAILURES_TOTAL};
use crate::store::TelemetryStore;
use crate::validate::{parse_format, parse_limit, require_device_id, ExportFormat};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

pub const MAX_QUERY_LIMIT: usize = 1000;

/// Raw query-string parameters of `GET /telemetry`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryParams {
    pub device_id: Option<String>,
    pub limit: Option<String>,
    pub format: Option<String>,
}

/// Rendered query result
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    Json(Vec<Value>),
    Csv(String),
}

/// Read path: a bounded, newest-first window of one device's records.
pub struct QueryHandler {
    store: Arc<dyn TelemetryStore>,
    max_limit: usize,
}

impl QueryHandler {
    pub fn new(store: Arc<dyn TelemetryStore>, max_limit: usize) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    pub async fn query_params(&self, params: &TelemetryParams) -> Result<Export, ApiError> {
        let device_id = require_device_id(params.device_id.as_deref())?;
        let limit = parse_limit(params.limit.as_deref())?;
        let format = parse_format(params.format.as_deref())?;
        self.query(device_id, limit, format).await
    }

    /// Device existence is not checked: an unknown device reads as empty.
    pub async fn query(
        &self,
        device_id: &str,
        limit: usize,
        format: ExportFormat,
    ) -> Result<Export, ApiError> {
        if device_id.is_empty() {
            return Err(ApiError::bad_request("Missing deviceId query parameter."));
        }
        if limit == 0 {
            return Err(ApiError::bad_request("limit must be a positive integer."));
        }
        let limit = limit.min(self.max_limit);

        QUERIES_TOTAL.with_label_values(&[format.as_str()]).inc();
        let start = Instant::now();
        let records = self
            .store
            .query_recent(device_id, limit)
            .await
            .map_err(|e| {
                STORE_FAILURES_TOTAL.inc();
                error!("Telemetry query for device {} failed: {}", device_id, e);
                ApiError::from(e)
            })?;
        QUERY_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

        debug!(
            "Read {} records for device {} (limit {})",
            records.len(),
            device_id,
            limit
        );

        Ok(match format {
            ExportFormat::Json => Export::Json(to_json_rows(&records)),
            ExportFormat::Csv => Export::Csv(to_csv(&records)),
        })
    }
}
