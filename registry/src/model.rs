use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::convert::Infallible;

/// Geographic position of a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Registered telemetry source
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Key a device presents in the `API-Key` field of its submissions.
    pub secret: String,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub name: String,
    pub location: Option<Location>,
    /// Explicit API key. The device id is used when absent.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub name: String,
    /// Replaces the stored location when present.
    pub location: Option<Location>,
}

/// Public view of a device, without its secret.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            latitude: device.location.map(|l| l.latitude),
            longitude: device.location.map(|l| l.longitude),
        }
    }
}

/// Response to a registration: the only place the API key is echoed back.
#[derive(Debug, Serialize)]
pub struct RegisteredDevice {
    #[serde(flatten)]
    pub device: DeviceView,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

impl From<&Device> for RegisteredDevice {
    fn from(device: &Device) -> Self {
        Self {
            device: DeviceView::from(device),
            api_key: device.secret.clone(),
        }
    }
}

/// A single scalar reading. Nested objects and arrays are not representable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl FieldValue {
    /// Returns `None` for objects and arrays.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(FieldValue::Null),
            Value::Bool(b) => Some(FieldValue::Bool(b)),
            Value::Number(n) => Some(FieldValue::Number(n)),
            Value::String(s) => Some(FieldValue::Text(s)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Plain text rendering used for export cells; `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Number(n) => Some(number_text(n)),
            FieldValue::Text(s) => Some(s.clone()),
        }
    }
}

// Integral floats print without a fractional part (22.0 -> "22") up to 1e21,
// past which the exponent form is kept with an explicit sign (1e+21).
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => {
            if f == 0.0 {
                "0".to_string()
            } else {
                format!("{:.0}", f)
            }
        }
        _ => {
            let text = n.to_string();
            match text.split_once('e') {
                Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                    format!("{}e+{}", mantissa, exponent)
                }
                _ => text,
            }
        }
    }
}

/// Telemetry readings in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a JSON object entry by entry, stopping at the first error.
    ///
    /// Object keys are already unique, so entries are appended as they come.
    pub fn try_from_object<E>(
        object: Map<String, Value>,
        mut convert: impl FnMut(&str, Value) -> Result<FieldValue, E>,
    ) -> Result<Self, E> {
        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            let value = convert(&key, value)?;
            entries.push((key, value));
        }
        Ok(Fields(entries))
    }

    pub fn from_object(
        object: Map<String, Value>,
        mut convert: impl FnMut(Value) -> FieldValue,
    ) -> Self {
        let fields = Self::try_from_object(object, |_, value| Ok::<_, Infallible>(convert(value)));
        match fields {
            Ok(fields) => fields,
            Err(never) => match never {},
        }
    }

    /// Inserts or replaces `key`, keeping the position of an existing key.
    #[cfg(test)]
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
impl FromIterator<(String, FieldValue)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One immutable, store-timestamped set of readings
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub id: String,
    pub device_id: String,
    pub fields: Fields,
    pub timestamp: DateTime<Utc>,
}
