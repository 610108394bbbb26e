use crate::errors::ApiError;
use crate::model::{DeviceUpdate, FieldValue, Fields, Location, NewDevice};
use serde_json::{Map, Value};

/// Body field carrying the device key; never stored.
pub const API_KEY_FIELD: &str = "API-Key";
/// Keys synthesized on read.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "timestamp"];
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Device key as found in a submission body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiKey {
    Missing,
    Provided(String),
    /// Present but not a string; treated like an unknown key.
    Malformed,
}

impl ApiKey {
    pub fn from_field(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => ApiKey::Missing,
            Some(Value::String(s)) if s.is_empty() => ApiKey::Missing,
            Some(Value::String(s)) => ApiKey::Provided(s),
            Some(_) => ApiKey::Malformed,
        }
    }
}

/// Export rendering requested by a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Parses a request body that must be a JSON object.
pub fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::bad_request("Request body must be a JSON object.")),
    }
}

/// Splits the submission body into its key and telemetry payload.
pub fn split_submission(mut body: Map<String, Value>) -> (ApiKey, Map<String, Value>) {
    let key = ApiKey::from_field(body.shift_remove(API_KEY_FIELD));
    (key, body)
}

/// Turns a raw payload into storable fields.
pub fn validate_fields(payload: Map<String, Value>) -> Result<Fields, ApiError> {
    let fields = Fields::try_from_object(payload, |key, value| {
        if RESERVED_FIELDS.contains(&key) {
            return Err(ApiError::BadRequest(format!(
                "Field '{}' is reserved.",
                key
            )));
        }
        FieldValue::from_json(value).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Field '{}' must be a string, number, boolean or null.",
                key
            ))
        })
    })?;

    if fields.is_empty() {
        return Err(ApiError::bad_request("Missing telemetry data."));
    }
    Ok(fields)
}

pub fn require_device_id(raw: Option<&str>) -> Result<&str, ApiError> {
    match raw {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ApiError::bad_request("Missing deviceId query parameter.")),
    }
}

/// Coerces the `limit` query parameter; missing or empty means the default.
pub fn parse_limit(raw: Option<&str>) -> Result<usize, ApiError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_QUERY_LIMIT),
        Some(raw) => raw,
    };

    match raw.parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ApiError::BadRequest(format!(
            "limit must be a positive integer, got '{}'.",
            raw
        ))),
    }
}

pub fn parse_format(raw: Option<&str>) -> Result<ExportFormat, ApiError> {
    match raw {
        None | Some("") | Some("json") => Ok(ExportFormat::Json),
        Some("csv") => Ok(ExportFormat::Csv),
        Some(other) => Err(ApiError::BadRequest(format!(
            "Unsupported format '{}', expected json or csv.",
            other
        ))),
    }
}

pub fn require_id_param(raw: Option<&str>) -> Result<&str, ApiError> {
    match raw {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ApiError::bad_request("Missing device ID in query string.")),
    }
}

fn require_name(body: &Map<String, Value>) -> Result<String, ApiError> {
    match body.get("name") {
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        _ => Err(ApiError::bad_request("Missing name in request body.")),
    }
}

/// Accepts a JSON number or a numeric string.
fn parse_coordinate(name: &str, value: &Value) -> Result<f64, ApiError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("{} must be a number.", name)))
}

fn parse_location(body: &Map<String, Value>) -> Result<Option<Location>, ApiError> {
    let present = |key: &str| body.get(key).filter(|v| !v.is_null());

    match (present("latitude"), present("longitude")) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) => {
            let latitude = parse_coordinate("latitude", lat)?;
            let longitude = parse_coordinate("longitude", lon)?;
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(ApiError::bad_request("Coordinates out of range."));
            }
            Ok(Some(Location {
                latitude,
                longitude,
            }))
        }
        _ => Err(ApiError::bad_request(
            "latitude and longitude must be provided together.",
        )),
    }
}

pub fn parse_new_device(body: &Map<String, Value>) -> Result<NewDevice, ApiError> {
    let name = require_name(body)?;
    let location = parse_location(body)?;
    let secret = match body.get("apiKey") {
        None | Some(Value::Null) => None,
        Some(Value::String(key)) if !key.is_empty() => Some(key.clone()),
        Some(_) => return Err(ApiError::bad_request("apiKey must be a non-empty string.")),
    };

    Ok(NewDevice {
        name,
        location,
        secret,
    })
}

pub fn parse_device_update(body: &Map<String, Value>) -> Result<DeviceUpdate, ApiError> {
    Ok(DeviceUpdate {
        name: require_name(body)?,
        location: parse_location(body)?,
    })
}
