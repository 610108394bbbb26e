use crate::auth::constant_time_eq;
use crate::errors::{Error, Result};
use crate::model::{Device, DeviceUpdate, Fields, NewDevice, TelemetryRecord};
use crate::store::{DeviceDirectory, DeviceRegistry, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct TelemetryLog {
    // Per device, oldest first.
    by_device: HashMap<String, Vec<TelemetryRecord>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl TelemetryLog {
    /// Wall clock, nudged forward so timestamps never repeat or go back.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

/// Process-local backend for tests and database-less runs.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<Vec<Device>>,
    telemetry: RwLock<TelemetryLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a device with a fixed id.
    #[cfg(test)]
    pub async fn insert_device(&self, device: Device) {
        let mut devices = self.devices.write().await;
        devices.retain(|d| d.id != device.id);
        devices.push(device);
    }

    #[cfg(test)]
    pub async fn record_count(&self) -> usize {
        self.telemetry
            .read()
            .await
            .by_device
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl DeviceDirectory for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<Device>> {
        let devices = self.devices.read().await;
        let mut found = None;
        // Every secret is compared so timing does not reveal the match position.
        for device in devices.iter() {
            if constant_time_eq(&device.secret, key) && found.is_none() {
                found = Some(device.clone());
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.read().await.clone())
    }

    async fn register_device(&self, device: NewDevice) -> Result<Device> {
        let mut devices = self.devices.write().await;
        let id = Uuid::new_v4().simple().to_string();
        let secret = device.secret.unwrap_or_else(|| id.clone());

        if devices.iter().any(|d| d.secret == secret) {
            return Err(Error::Conflict("apiKey already in use".to_string()));
        }

        let device = Device {
            id,
            name: device.name,
            secret,
            location: device.location,
        };
        devices.push(device.clone());
        Ok(device)
    }

    async fn update_device(&self, id: &str, update: DeviceUpdate) -> Result<Option<Device>> {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.iter_mut().find(|d| d.id == id) else {
            return Ok(None);
        };

        device.name = update.name;
        if update.location.is_some() {
            device.location = update.location;
        }
        Ok(Some(device.clone()))
    }

    async fn remove_device(&self, id: &str) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|d| d.id != id);
        Ok(devices.len() != before)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn append(&self, device_id: &str, fields: Fields) -> Result<String> {
        let mut log = self.telemetry.write().await;
        let record = TelemetryRecord {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            fields,
            timestamp: log.next_timestamp(),
        };
        let id = record.id.clone();
        log.by_device
            .entry(device_id.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }

    async fn query_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TelemetryRecord>> {
        let log = self.telemetry.read().await;
        Ok(log
            .by_device
            .get(device_id)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
