//! HTTP backend client
//!
//! One reqwest client serves as both the identifier source and the upload
//! transport. Every JSON response goes through [`decode_response`], which
//! either yields a fully decoded value or a typed [`ApiError`], never a
//! partially filled object.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracer_core::effects::{IdentifierSourceEffects, UploadTransportEffects};
use tracer_core::{ExportedEncounter, IdentifierBatch, TempId, Timestamp, TracerError, UploadBatch};
use tracing::{debug, warn};

/// Backend failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The response had no body
    #[error("empty response")]
    EmptyData,

    /// The request never produced a response
    #[error("network error: {message}")]
    Network {
        /// Underlying transport message
        message: String,
    },

    /// The body was not the expected shape
    #[error("decoding error: {message}")]
    Decoding {
        /// Decoder message
        message: String,
    },

    /// The request body could not be encoded
    #[error("encoding error: {message}")]
    Encoding {
        /// Encoder message
        message: String,
    },

    /// Any status other than 200
    #[error("HTTP status {status}: {message}")]
    Not200 {
        /// HTTP status code
        status: u16,
        /// Response body, lossily decoded
        message: String,
    },

    /// The backend answered with an explicit failure status
    #[error("{endpoint} reported FAILURE")]
    Rejected {
        /// Endpoint that refused
        endpoint: &'static str,
    },
}

impl From<ApiError> for TracerError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Decoding { .. } | ApiError::Encoding { .. } => {
                TracerError::serialization(err.to_string())
            }
            _ => TracerError::network(err.to_string()),
        }
    }
}

/// Backend endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPath {
    /// PIN shown to the user during contact-tracer handshakes
    GetHandshakePin,
    /// Batch of broadcast identifiers
    GetTempIds,
    /// Exchange an upload code for a token
    GetUploadToken,
    /// Submit encounter records
    UploadData,
}

impl ApiPath {
    /// Path segment appended to the base URL
    pub fn as_str(self) -> &'static str {
        match self {
            ApiPath::GetHandshakePin => "getHandshakePin",
            ApiPath::GetTempIds => "getTempIDs",
            ApiPath::GetUploadToken => "getUploadToken",
            ApiPath::UploadData => "uploadData",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ResponseStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

#[derive(Debug, Deserialize)]
struct BasicResponse {
    status: ResponseStatus,
}

#[derive(Debug, Deserialize)]
struct HandshakePinResponse {
    pin: String,
    status: ResponseStatus,
}

#[derive(Debug, Deserialize)]
struct TempIdWire {
    #[serde(rename = "tempID")]
    temp_id: String,
    #[serde(rename = "startTime")]
    start_time: f64,
    #[serde(rename = "expiryTime")]
    expiry_time: f64,
}

#[derive(Debug, Deserialize)]
struct TempIdsResponse {
    #[serde(rename = "refreshTime")]
    refresh_time: f64,
    status: ResponseStatus,
    #[serde(rename = "tempIDs")]
    temp_ids: Vec<TempIdWire>,
}

impl TempIdsResponse {
    fn into_batch(self) -> Result<IdentifierBatch, ApiError> {
        if self.status == ResponseStatus::Failure {
            return Err(ApiError::Rejected {
                endpoint: ApiPath::GetTempIds.as_str(),
            });
        }
        let identifiers = self
            .temp_ids
            .into_iter()
            .map(|wire| {
                TempId::new(
                    wire.temp_id,
                    Timestamp::from_secs_f64(wire.start_time),
                    Timestamp::from_secs_f64(wire.expiry_time),
                )
            })
            .collect();
        IdentifierBatch::new(identifiers, Timestamp::from_secs_f64(self.refresh_time)).map_err(
            |e| ApiError::Decoding {
                message: format!("malformed identifier batch: {e}"),
            },
        )
    }
}

#[derive(Debug, Deserialize)]
struct UploadTokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct UploadBody<'a> {
    uid: &'a str,
    #[serde(rename = "uploadToken")]
    upload_token: &'a str,
    traces: Vec<ExportedEncounter>,
    events: Vec<ExportedEncounter>,
}

/// Decode a response body into `R`, checking status first
pub fn decode_response<R: DeserializeOwned>(status: u16, body: &[u8]) -> Result<R, ApiError> {
    if status != 200 {
        let message = if body.is_empty() {
            "None".to_string()
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        warn!(status, "backend returned non-200 status");
        return Err(ApiError::Not200 { status, message });
    }
    if body.is_empty() {
        return Err(ApiError::EmptyData);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Decoding {
        message: e.to_string(),
    })
}

/// Device uid shared between the agent and the HTTP client.
///
/// Changing it through any clone is visible to all of them.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    uid: Arc<RwLock<String>>,
}

impl DeviceIdentity {
    /// Start with `uid`
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: Arc::new(RwLock::new(uid.into())),
        }
    }

    /// Replace the uid
    pub fn set(&self, uid: impl Into<String>) {
        *self.uid.write() = uid.into();
    }

    /// Current uid
    pub fn get(&self) -> String {
        self.uid.read().clone()
    }
}

/// reqwest client for the tracing backend
#[derive(Debug, Clone)]
pub struct HttpTraceClient {
    base_url: String,
    identity: DeviceIdentity,
    client: reqwest::Client,
}

impl HttpTraceClient {
    /// Client with a default reqwest configuration
    pub fn new(base_url: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self::with_client(base_url, identity, reqwest::Client::new())
    }

    /// Client reusing a caller-configured reqwest client
    pub fn with_client(
        base_url: impl Into<String>,
        identity: DeviceIdentity,
        client: reqwest::Client,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            identity,
            client,
        }
    }

    /// Full URL for `path`
    pub fn endpoint(&self, path: ApiPath) -> String {
        format!("{}/{}", self.base_url, path.as_str())
    }

    /// Shared device identity
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn get<R: DeserializeOwned>(
        &self,
        path: ApiPath,
        query: &[(&str, &str)],
    ) -> Result<R, ApiError> {
        let uid = self.identity.get();
        let response = self
            .client
            .get(self.endpoint(path))
            .query(query)
            .query(&[("uid", uid.as_str())])
            .send()
            .await
            .map_err(network)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network)?;
        debug!(endpoint = path.as_str(), status, bytes = body.len(), "backend response");
        decode_response(status, &body)
    }

    /// Fetch a batch of broadcast identifiers
    pub async fn temp_ids(&self) -> Result<IdentifierBatch, ApiError> {
        let response: TempIdsResponse = self.get(ApiPath::GetTempIds, &[]).await?;
        response.into_batch()
    }

    /// Exchange an upload code for a token
    pub async fn upload_token(&self, code: &str) -> Result<String, ApiError> {
        let response: UploadTokenResponse =
            self.get(ApiPath::GetUploadToken, &[("data", code)]).await?;
        Ok(response.token)
    }

    /// Fetch the handshake PIN for this device
    pub async fn handshake_pin(&self) -> Result<String, ApiError> {
        let response: HandshakePinResponse = self.get(ApiPath::GetHandshakePin, &[]).await?;
        if response.status == ResponseStatus::Failure {
            return Err(ApiError::Rejected {
                endpoint: ApiPath::GetHandshakePin.as_str(),
            });
        }
        Ok(response.pin)
    }

    /// Submit an upload batch
    pub async fn upload_data(&self, batch: &UploadBatch, uid: &str) -> Result<(), ApiError> {
        let body = upload_body(batch, uid)?;
        let response = self
            .client
            .post(self.endpoint(ApiPath::UploadData))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(network)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network)?;
        let response: BasicResponse = decode_response(status, &body)?;
        match response.status {
            ResponseStatus::Success => Ok(()),
            ResponseStatus::Failure => Err(ApiError::Rejected {
                endpoint: ApiPath::UploadData.as_str(),
            }),
        }
    }
}

fn upload_body(batch: &UploadBatch, uid: &str) -> Result<Vec<u8>, ApiError> {
    let body = UploadBody {
        uid,
        upload_token: &batch.upload_token,
        traces: batch.exported_records(),
        events: batch.exported_events(),
    };
    serde_json::to_vec(&body).map_err(|e| ApiError::Encoding {
        message: e.to_string(),
    })
}

fn network(err: reqwest::Error) -> ApiError {
    ApiError::Network {
        message: err.to_string(),
    }
}

#[async_trait]
impl IdentifierSourceEffects for HttpTraceClient {
    async fn fetch_batch(&self) -> Result<IdentifierBatch, TracerError> {
        Ok(self.temp_ids().await?)
    }
}

#[async_trait]
impl UploadTransportEffects for HttpTraceClient {
    async fn exchange_code(&self, code: &str) -> Result<String, TracerError> {
        Ok(self.upload_token(code).await?)
    }

    async fn submit(&self, batch: &UploadBatch, device_uid: &str) -> Result<(), TracerError> {
        Ok(self.upload_data(batch, device_uid).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_core::{LifecycleEvent, LifecycleEventKind, ProximityRecord};

    #[test]
    fn temp_ids_decode_into_a_batch() {
        let body = br#"{
            "refreshTime": 1700000600,
            "status": "SUCCESS",
            "tempIDs": [
                {"tempID": "a", "startTime": 1700000000, "expiryTime": 1700000900},
                {"tempID": "b", "startTime": 1700000900, "expiryTime": 1700001800.5}
            ]
        }"#;
        let response: TempIdsResponse = decode_response(200, body).unwrap();
        let batch = response.into_batch().unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.refresh_at(), Timestamp::from_secs(1_700_000_600));
        let head = batch.head().unwrap();
        assert_eq!(head.token, "a");
        assert_eq!(head.valid_until, Timestamp::from_secs(1_700_000_900));
    }

    #[test]
    fn non_200_is_reported_with_body() {
        let err = decode_response::<UploadTokenResponse>(403, b"bad code").unwrap_err();
        assert_eq!(
            err,
            ApiError::Not200 {
                status: 403,
                message: "bad code".into()
            }
        );
        assert!(matches!(TracerError::from(err), TracerError::Network { .. }));
    }

    #[test]
    fn malformed_bodies_never_decode_partially() {
        assert_eq!(
            decode_response::<UploadTokenResponse>(200, b"").unwrap_err(),
            ApiError::EmptyData
        );
        let err = decode_response::<UploadTokenResponse>(200, br#"{"tok":"x"}"#).unwrap_err();
        assert!(matches!(err, ApiError::Decoding { .. }));
        assert!(matches!(
            TracerError::from(err),
            TracerError::Serialization { .. }
        ));
    }

    #[test]
    fn failure_status_and_bad_batches_are_rejected() {
        let body = br#"{"refreshTime": 0, "status": "FAILURE", "tempIDs": []}"#;
        let response: TempIdsResponse = decode_response(200, body).unwrap();
        assert!(matches!(
            response.into_batch(),
            Err(ApiError::Rejected { .. })
        ));

        let body = br#"{"refreshTime": 0, "status": "SUCCESS", "tempIDs": []}"#;
        let response: TempIdsResponse = decode_response(200, body).unwrap();
        assert!(matches!(
            response.into_batch(),
            Err(ApiError::Decoding { .. })
        ));
    }

    #[test]
    fn handshake_pin_decodes() {
        let response: HandshakePinResponse =
            decode_response(200, br#"{"pin": "A1B2C3", "status": "SUCCESS"}"#).unwrap();
        assert_eq!(response.pin, "A1B2C3");
        assert_eq!(response.status, ResponseStatus::Success);
    }

    #[test]
    fn upload_body_carries_traces_and_events() {
        let batch = UploadBatch {
            upload_token: "token-1".into(),
            records: vec![ProximityRecord::observed(
                Timestamp::from_secs(5),
                "Pixel 7",
                -40.0,
                None,
            )],
            events: vec![LifecycleEvent {
                timestamp: Timestamp::from_secs(1),
                kind: LifecycleEventKind::ScanningStarted,
            }],
            protocol_version: 2,
            organization_id: "hyperjump".into(),
        };
        let bytes = upload_body(&batch, "device-9").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["uid"], "device-9");
        assert_eq!(value["uploadToken"], "token-1");
        assert_eq!(value["traces"][0]["timestamp"], 5);
        assert_eq!(value["events"][0]["msg"], "Scanning started");
    }

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let client = HttpTraceClient::new("https://trace.example/", DeviceIdentity::new("u"));
        assert_eq!(
            client.endpoint(ApiPath::GetTempIds),
            "https://trace.example/getTempIDs"
        );
        client.identity().set("v");
        assert_eq!(client.identity().get(), "v");
    }
}
