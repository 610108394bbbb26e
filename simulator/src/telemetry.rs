use rand::Rng;
use serde::Serialize;

/// Body of a `POST /telemetry` submission
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    #[serde(rename = "API-Key")]
    pub api_key: String,
    pub temperature: f64,
    pub humidity: f64,
    pub battery: f64,
}

pub fn generate(rng: &mut impl Rng, api_key: String) -> Submission {
    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(-50.0..100.0) // 5% outliers
    } else {
        rng.gen_range(15.0..35.0)
    };

    let humidity = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..100.0)
    } else {
        rng.gen_range(30.0..80.0)
    };

    let battery = if rng.gen_bool(0.02) {
        rng.gen_range(0.0..20.0) // 2% low battery
    } else {
        rng.gen_range(20.0..100.0)
    };

    Submission {
        api_key,
        temperature,
        humidity,
        battery,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_body() {
        let submission = generate(&mut rand::thread_rng(), "abc123".to_string());
        let body = serde_json::to_value(&submission).unwrap();

        assert_eq!(body["API-Key"], "abc123");
        assert!(body["battery"].as_f64().unwrap() >= 0.0);
        assert_eq!(body.as_object().unwrap().len(), 4);
    }
}
