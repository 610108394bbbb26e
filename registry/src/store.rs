//! Collaborator interfaces for device lookup and telemetry persistence.
//!
//! Handlers receive these as trait objects at construction time so the
//! in-memory backend can stand in for PostgreSQL.

use crate::errors::Result;
use crate::model::{Device, DeviceUpdate, Fields, NewDevice, TelemetryRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only view used to authenticate submissions.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Resolve the device whose secret equals `key`.
    async fn lookup(&self, key: &str) -> Result<Option<Device>>;
}

/// Operator-facing device management.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>>;

    async fn register_device(&self, device: NewDevice) -> Result<Device>;

    /// Returns `None` when no device has this id.
    async fn update_device(&self, id: &str, update: DeviceUpdate) -> Result<Option<Device>>;

    /// Returns whether a device was removed.
    async fn remove_device(&self, id: &str) -> Result<bool>;
}

/// Append-only, per-device telemetry log.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Stores `fields` under `device_id`, assigning the record id and
    /// timestamp. Returns the record id.
    async fn append(&self, device_id: &str, fields: Fields) -> Result<String>;

    /// Up to `limit` records of `device_id`, newest first.
    async fn query_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TelemetryRecord>>;
}

/// The three collaborator handles, usually backed by one store.
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn DeviceDirectory>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub telemetry: Arc<dyn TelemetryStore>,
}

impl Backends {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: DeviceDirectory + DeviceRegistry + TelemetryStore + 'static,
    {
        Self {
            directory: store.clone(),
            registry: store.clone(),
            telemetry: store,
        }
    }
}
