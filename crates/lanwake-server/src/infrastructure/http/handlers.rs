//! Route logic, kept free of axum extractors so it can be called directly
//! from tests.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::join_all;
use lanwake_core::MacAddress;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::ApiState;
use crate::application::wake_device::WakeDeviceError;

const PRESENCE_DISABLED: &str = "presence tracking is disabled in the configuration file";
const SCAN_DISABLED: &str = "presence scanning is disabled in the configuration file";
const UNKNOWN_DEVICE: &str = "the given MAC address is not defined in the configuration file";

/// Status code plus optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "error": message.into() })),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub mac: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MacBody {
    mac: Option<String>,
}

fn to_json(value: impl serde::Serialize) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn parse_body(body: &[u8]) -> Result<MacBody, ApiResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(MacBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiResponse::error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}

fn parse_mac(mac: &str) -> Result<MacAddress, ApiResponse> {
    MacAddress::parse(mac).map_err(|e| ApiResponse::error(StatusCode::BAD_REQUEST, e.to_string()))
}

/// `GET /status[?mac=MAC]`
///
/// - 501 presence disabled
/// - 400 `mac` unparseable or not configured
/// - 204 configured but never seen
/// - 200 one record, or every record in seed order
pub fn status(state: &ApiState, mac: Option<&str>) -> ApiResponse {
    let Some(table) = &state.table else {
        return ApiResponse::error(StatusCode::NOT_IMPLEMENTED, PRESENCE_DISABLED);
    };

    let Some(mac) = mac else {
        return to_json(table.get_all());
    };
    let mac = match parse_mac(mac) {
        Ok(mac) => mac,
        Err(response) => return response,
    };

    match table.get(&mac) {
        None => ApiResponse::error(StatusCode::BAD_REQUEST, UNKNOWN_DEVICE),
        Some(device) if device.ip.is_none() => ApiResponse::empty(StatusCode::NO_CONTENT),
        Some(device) => to_json(device),
    }
}

/// `POST /wake {"mac": MAC}`
///
/// - 200 `{"error": null}` once the datagram is sent
/// - 400 missing or malformed MAC (nothing sent)
/// - 500 send failure, with its detail
pub async fn wake(state: &ApiState, body: &[u8]) -> ApiResponse {
    let mac = match parse_body(body) {
        Ok(MacBody { mac: Some(mac) }) => mac,
        Ok(MacBody { mac: None }) => {
            return ApiResponse::error(StatusCode::BAD_REQUEST, "missing \"mac\" in request body")
        }
        Err(response) => return response,
    };

    match state.waker.wake(&mac).await {
        Ok(_) => ApiResponse::ok(json!({ "error": null })),
        Err(WakeDeviceError::InvalidAddress(e)) => {
            ApiResponse::error(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(WakeDeviceError::Send(e)) => {
            ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `POST /update [{"mac": MAC}]`
///
/// - 501 presence or scanning disabled
/// - 400 malformed or unknown MAC
/// - 200 the refreshed record, or every record after refreshing all
pub async fn update(state: &ApiState, body: &[u8]) -> ApiResponse {
    let Some(table) = &state.table else {
        return ApiResponse::error(StatusCode::NOT_IMPLEMENTED, PRESENCE_DISABLED);
    };
    if state.scanners.is_empty() {
        return ApiResponse::error(StatusCode::NOT_IMPLEMENTED, SCAN_DISABLED);
    }
    let request = match parse_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match request.mac {
        Some(mac) => {
            let mac = match parse_mac(&mac) {
                Ok(mac) => mac,
                Err(response) => return response,
            };
            if !table.contains(&mac) {
                return ApiResponse::error(StatusCode::BAD_REQUEST, UNKNOWN_DEVICE);
            }
            join_all(state.scanners.iter().map(|s| s.refresh_device(mac))).await;
            match table.get(&mac) {
                Some(device) => to_json(device),
                None => ApiResponse::error(StatusCode::BAD_REQUEST, UNKNOWN_DEVICE),
            }
        }
        None => {
            debug!(scanners = state.scanners.len(), "refreshing every device");
            join_all(state.scanners.iter().map(|s| s.refresh_all())).await;
            to_json(table.get_all())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
