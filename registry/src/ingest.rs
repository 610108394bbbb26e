use crate::errors::ApiError;
use crate::metrics::{
    ACCEPTED_SUBMISSIONS_TOTAL, APPEND_LATENCY_SECONDS, REJECTED_SUBMISSIONS_TOTAL,
    STORE_FAILURES_TOTAL, SUBMISSIONS_TOTAL,
};
use crate::store::{DeviceDirectory, TelemetryStore};
use crate::validate::{parse_object, split_submission, validate_fields, ApiKey};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Marker for a stored submission; the caller gets no record id back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

/// Write path: authenticates a submission and appends one record.
pub struct IngestionHandler {
    directory: Arc<dyn DeviceDirectory>,
    store: Arc<dyn TelemetryStore>,
}

impl IngestionHandler {
    pub fn new(directory: Arc<dyn DeviceDirectory>, store: Arc<dyn TelemetryStore>) -> Self {
        Self { directory, store }
    }

    /// Handles a raw request body carrying `API-Key` next to the readings.
    pub async fn submit_body(&self, body: &[u8]) -> Result<Accepted, ApiError> {
        match parse_object(body) {
            Ok(object) => {
                let (key, payload) = split_submission(object);
                self.submit(key, payload).await
            }
            Err(e) => {
                SUBMISSIONS_TOTAL.inc();
                let result = Err(e);
                record_outcome(&result);
                result
            }
        }
    }

    pub async fn submit(
        &self,
        key: ApiKey,
        payload: Map<String, Value>,
    ) -> Result<Accepted, ApiError> {
        SUBMISSIONS_TOTAL.inc();
        let result = self.process(key, payload).await;
        record_outcome(&result);
        result
    }

    async fn process(
        &self,
        key: ApiKey,
        payload: Map<String, Value>,
    ) -> Result<Accepted, ApiError> {
        if key == ApiKey::Missing {
            return Err(ApiError::Unauthorized(
                "Missing API-Key in request body.".to_string(),
            ));
        }

        let fields = validate_fields(payload)?;

        let device = match key {
            ApiKey::Provided(key) => self.directory.lookup(&key).await.map_err(|e| {
                STORE_FAILURES_TOTAL.inc();
                error!("Device lookup failed: {}", e);
                ApiError::from(e)
            })?,
            _ => None,
        };
        let Some(device) = device else {
            return Err(ApiError::Forbidden("Invalid API Key.".to_string()));
        };

        let start = Instant::now();
        let record_id = self.store.append(&device.id, fields).await.map_err(|e| {
            STORE_FAILURES_TOTAL.inc();
            error!("Telemetry append for device {} failed: {}", device.id, e);
            ApiError::from(e)
        })?;
        APPEND_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

        debug!("Stored record {} for device {}", record_id, device.id);
        Ok(Accepted)
    }
}

fn record_outcome(result: &Result<Accepted, ApiError>) {
    match result {
        Ok(_) => ACCEPTED_SUBMISSIONS_TOTAL.inc(),
        Err(e) => {
            REJECTED_SUBMISSIONS_TOTAL
                .with_label_values(&[e.reason()])
                .inc();
            if !matches!(e, ApiError::Internal(_)) {
                warn!("Rejected telemetry submission: {}", e);
            }
        }
    }
}
