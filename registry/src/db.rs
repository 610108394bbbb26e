use crate::errors::{Error, Result};
use crate::model::{Device, DeviceUpdate, FieldValue, Fields, Location, NewDevice, TelemetryRecord};
use crate::store::{DeviceDirectory, DeviceRegistry, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub async fn make_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// PostgreSQL-backed device directory and telemetry log
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: String,
    name: String,
    secret: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Device {
            id: row.id,
            name: row.name,
            secret: row.secret,
            location,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TelemetryRow {
    id: Uuid,
    device_id: String,
    fields: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<TelemetryRow> for TelemetryRecord {
    type Error = Error;

    fn try_from(row: TelemetryRow) -> Result<Self> {
        let stored: Map<String, Value> = serde_json::from_str(&row.fields)?;
        // Only scalars are ever written; anything else is kept as its JSON text.
        let fields = Fields::from_object(stored, |value| {
            let text = value.to_string();
            FieldValue::from_json(value).unwrap_or(FieldValue::Text(text))
        });

        Ok(TelemetryRecord {
            id: row.id.to_string(),
            device_id: row.device_id,
            fields,
            timestamp: row.recorded_at,
        })
    }
}

fn conflict_or(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Error::Conflict("apiKey already in use".to_string())
        }
        _ => Error::Database(err),
    }
}

#[async_trait]
impl DeviceDirectory for PgStore {
    async fn lookup(&self, key: &str) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, secret, latitude, longitude FROM devices WHERE secret = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Device::from))
    }
}

#[async_trait]
impl DeviceRegistry for PgStore {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, secret, latitude, longitude FROM devices ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn register_device(&self, device: NewDevice) -> Result<Device> {
        let id = Uuid::new_v4().simple().to_string();
        let secret = device.secret.unwrap_or_else(|| id.clone());

        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            INSERT INTO devices (id, name, secret, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, secret, latitude, longitude
            "#,
        )
        .bind(&id)
        .bind(&device.name)
        .bind(&secret)
        .bind(device.location.map(|l| l.latitude))
        .bind(device.location.map(|l| l.longitude))
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_or)?;

        Ok(row.into())
    }

    async fn update_device(&self, id: &str, update: DeviceUpdate) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            UPDATE devices
            SET name = $2,
                latitude = COALESCE($3, latitude),
                longitude = COALESCE($4, longitude)
            WHERE id = $1
            RETURNING id, name, secret, latitude, longitude
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.location.map(|l| l.latitude))
        .bind(update.location.map(|l| l.longitude))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Device::from))
    }

    async fn remove_device(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn append(&self, device_id: &str, fields: Fields) -> Result<String> {
        let id = Uuid::new_v4();
        // Bound as text and cast, since a JSONB parameter would reorder the keys.
        let payload = serde_json::to_string(&fields)?;

        sqlx::query("INSERT INTO telemetry (id, device_id, fields) VALUES ($1, $2, $3::json)")
            .bind(id)
            .bind(device_id)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(id.to_string())
    }

    async fn query_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TelemetryRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, TelemetryRow>(
            r#"
            SELECT id, device_id, fields::text AS fields, recorded_at
            FROM telemetry
            WHERE device_id = $1
            ORDER BY recorded_at DESC, seq DESC
            LIMIT $2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TelemetryRecord::try_from).collect()
    }
}
