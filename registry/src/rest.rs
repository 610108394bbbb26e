use crate::auth::require_admin_token;
use crate::config::Config;
use crate::errors::ApiError;
use crate::ingest::IngestionHandler;
use crate::metrics::gather_metrics;
use crate::model::{DeviceView, RegisteredDevice};
use crate::query::{Export, QueryHandler, TelemetryParams};
use crate::store::{Backends, DeviceRegistry};
use crate::validate::{parse_device_update, parse_new_device, parse_object, require_id_param};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    ingest: Arc<IngestionHandler>,
    query: Arc<QueryHandler>,
    registry: Arc<dyn DeviceRegistry>,
    admin_token: Arc<str>,
}

impl AppState {
    pub fn new(backends: Backends, config: &Config) -> Self {
        Self {
            ingest: Arc::new(IngestionHandler::new(
                backends.directory,
                backends.telemetry.clone(),
            )),
            query: Arc::new(QueryHandler::new(
                backends.telemetry,
                config.max_query_limit,
            )),
            registry: backends.registry,
            admin_token: Arc::from(config.admin_token.as_str()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceIdQuery {
    id: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/telemetry", get(get_telemetry).post(post_telemetry))
        .route(
            "/devices",
            get(list_devices)
                .post(create_device)
                .put(update_device)
                .delete(delete_device),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler() -> String {
    gather_metrics()
}

async fn post_telemetry(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    state.ingest.submit_body(&body).await?;
    Ok((StatusCode::ACCEPTED, "Accepted").into_response())
}

async fn get_telemetry(
    State(state): State<AppState>,
    params: Result<Query<TelemetryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let response = match state.query.query_params(&params).await? {
        Export::Json(rows) => Json(rows).into_response(),
        Export::Csv(body) => ([(header::CONTENT_TYPE, "text/csv")], body).into_response(),
    };
    Ok(response)
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = state.registry.list_devices().await?;
    Ok(Json(devices.iter().map(DeviceView::from).collect()))
}

async fn create_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RegisteredDevice>), ApiError> {
    require_admin_token(&headers, &state.admin_token)?;
    let new_device = parse_new_device(&parse_object(&body)?)?;

    let device = state.registry.register_device(new_device).await?;
    info!("Registered device {} ({})", device.id, device.name);
    Ok((StatusCode::CREATED, Json(RegisteredDevice::from(&device))))
}

async fn update_device(
    State(state): State<AppState>,
    params: Result<Query<DeviceIdQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeviceView>, ApiError> {
    require_admin_token(&headers, &state.admin_token)?;
    let Query(params) = params?;
    let id = require_id_param(params.id.as_deref())?;
    let update = parse_device_update(&parse_object(&body)?)?;

    match state.registry.update_device(id, update).await? {
        Some(device) => {
            info!("Updated device {}", device.id);
            Ok(Json(DeviceView::from(&device)))
        }
        None => Err(ApiError::NotFound("Unknown device.".to_string())),
    }
}

async fn delete_device(
    State(state): State<AppState>,
    params: Result<Query<DeviceIdQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin_token(&headers, &state.admin_token)?;
    let Query(params) = params?;
    let id = require_id_param(params.id.as_deref())?;

    if state.registry.remove_device(id).await? {
        info!("Deleted device {}", id);
    }
    Ok(StatusCode::NO_CONTENT)
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(source) => {
                error!("API error: {}", source);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_client_error() {
            debug!("API error: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tests::{device, UnavailableStore};
    use crate::memory::MemoryStore;
    use crate::query::MAX_QUERY_LIMIT;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn config() -> Config {
        Config {
            http_addr: "127.0.0.1:0".to_string(),
            database_url: None,
            db_max_connections: 1,
            db_acquire_timeout_secs: 1,
            admin_token: TOKEN.to_string(),
            max_query_limit: MAX_QUERY_LIMIT,
        }
    }

    async fn app() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        store.insert_device(device("abc123")).await;
        let state = AppState::new(Backends::from_store(store.clone()), &config());
        (store, create_router(state))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, String) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header("X-Auth-Token", token);
        }
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_submit_then_query() {
        let (_, app) = app().await;

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123", "temp": 22})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "Accepted");

        let (status, _, body) = send(
            &app,
            Method::GET,
            "/telemetry?deviceId=abc123&limit=1",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rows: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["temp"], json!(22));
    }

    #[tokio::test]
    async fn test_submit_without_key() {
        let (store, app) = app().await;
        let (status, _, body) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"temp": 22})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Unauthorized: Missing API-Key in request body.");
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_status_codes() {
        let (store, app) = app().await;

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bad Request: Missing telemetry data.");

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "unknown", "temp": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Forbidden: Invalid API Key.");

        let (status, _, _) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123", "nested": {"x": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_query_csv() {
        let (_, app) = app().await;
        for body in [json!({"API-Key": "abc123", "a": 1}), json!({"API-Key": "abc123", "b": 2})] {
            let (status, _, _) = send(&app, Method::POST, "/telemetry", None, Some(body)).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        let (status, headers, body) = send(
            &app,
            Method::GET,
            "/telemetry?deviceId=abc123&format=csv",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "id,b,timestamp,a");
        assert!(lines[1].ends_with(','));
    }

    #[tokio::test]
    async fn test_query_unknown_device() {
        let (_, app) = app().await;

        let (status, _, body) =
            send(&app, Method::GET, "/telemetry?deviceId=ghost", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");

        let (status, headers, body) = send(
            &app,
            Method::GET,
            "/telemetry?deviceId=ghost&format=csv",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_query_missing_device_id() {
        let (_, app) = app().await;
        let (status, _, body) = send(&app, Method::GET, "/telemetry", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bad Request: Missing deviceId query parameter.");
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let (_, app) = app().await;
        let (status, _, _) = send(&app, Method::PATCH, "/telemetry", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_store_outage_is_500() {
        let unavailable = Arc::new(UnavailableStore);
        let backends = Backends {
            directory: unavailable.clone(),
            registry: Arc::new(MemoryStore::new()),
            telemetry: unavailable,
        };
        let app = create_router(AppState::new(backends, &config()));

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123", "temp": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");

        let (status, _, _) =
            send(&app, Method::GET, "/telemetry?deviceId=abc123", None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_device_lifecycle() {
        let (_, app) = app().await;

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/devices",
            Some(TOKEN),
            Some(json!({"name": "Garden", "latitude": 40.4, "longitude": -3.7})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Value = serde_json::from_str(&body).unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["apiKey"], json!(id));
        assert_eq!(created["latitude"], json!(40.4));

        // the generated key authenticates submissions
        let (status, _, _) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": id, "soil": 0.4})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _, body) = send(&app, Method::GET, "/devices", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let devices: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.get("apiKey").is_none()));

        let uri = format!("/devices?id={}", id);
        let (status, _, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(TOKEN),
            Some(json!({"name": "Garden north"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let updated: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(updated["name"], json!("Garden north"));
        assert_eq!(updated["longitude"], json!(-3.7));

        let (status, _, _) = send(&app, Method::DELETE, &uri, Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(
            &app,
            Method::PUT,
            &uri,
            Some(TOKEN),
            Some(json!({"name": "gone"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_query_string() {
        let (_, app) = app().await;

        let (status, _, body) = send(
            &app,
            Method::GET,
            "/telemetry?deviceId=abc123&deviceId=other",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Bad Request: "), "{}", body);

        let (status, _, body) = send(
            &app,
            Method::DELETE,
            "/devices?id=a&id=b",
            Some(TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Bad Request: "), "{}", body);
    }

    #[tokio::test]
    async fn test_delete_unknown_device_is_no_content() {
        let (_, app) = app().await;
        let (status, _, body) = send(
            &app,
            Method::DELETE,
            "/devices?id=ghost",
            Some(TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (_, _, body) = send(&app, Method::GET, "/devices", None, None).await;
        let devices: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (_, app) = app().await;

        let (status, _, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _, _) = send(&app, Method::GET, "/metrics", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deleted_device_telemetry_stays_queryable() {
        let (_, app) = app().await;

        let (status, _, _) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123", "temp": 19})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _, _) = send(
            &app,
            Method::DELETE,
            "/devices?id=abc123",
            Some(TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, body) =
            send(&app, Method::GET, "/telemetry?deviceId=abc123", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let rows: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["temp"], json!(19));

        // the key no longer authenticates
        let (status, _, _) = send(
            &app,
            Method::POST,
            "/telemetry",
            None,
            Some(json!({"API-Key": "abc123", "temp": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_device_mutations_need_token() {
        let (_, app) = app().await;

        let (status, _, _) = send(
            &app,
            Method::POST,
            "/devices",
            None,
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(
            &app,
            Method::DELETE,
            "/devices?id=abc123",
            Some("wrong"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_device_validation() {
        let (_, app) = app().await;

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/devices",
            Some(TOKEN),
            Some(json!({"latitude": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bad Request: Missing name in request body.");

        let (status, _, body) = send(
            &app,
            Method::PUT,
            "/devices",
            Some(TOKEN),
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bad Request: Missing device ID in query string.");

        let (status, _, _) = send(
            &app,
            Method::POST,
            "/devices",
            Some(TOKEN),
            Some(json!({"name": "dup", "apiKey": "abc123"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
