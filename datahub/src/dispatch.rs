//! Request dispatch: one hub call per invocation.
//!
//! The dispatcher owns the body rules for every request the client makes:
//! JSON in and out by default, and for item content an optional
//! encrypt-on-write / decrypt-on-read path keyed by the configured password.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DatahubConfig;
use crate::crypto::Cipher;
use crate::error::{DatahubError, Result};
use crate::http::{HttpClient, HubRequest, Method, RequestBody};

/// What a request carries, which decides whether encryption applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Metadata calls: always JSON
    PlainJson,
    /// Channel item content: encrypted when a password is configured
    EncryptedItem,
}

/// A successful (2xx) hub response with its body decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct HubResponse {
    pub status: u16,
    pub body: Value,
}

/// Builds and sends hub requests.
#[derive(Clone)]
pub struct Dispatcher {
    http: Arc<dyn HttpClient>,
    cipher: Arc<dyn Cipher>,
    password: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(config: &DatahubConfig, http: Arc<dyn HttpClient>, cipher: Arc<dyn Cipher>) -> Self {
        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        Self {
            http,
            cipher,
            password: config.encryption_password.clone(),
            headers,
            timeout: config.request_timeout,
        }
    }

    pub fn encrypts(&self) -> bool {
        self.password.is_some()
    }

    /// Send one request and decode the response.
    ///
    /// Non-2xx responses become [`DatahubError::Status`]. Nothing is retried.
    #[tracing::instrument(skip_all, fields(method = %method, url = %url))]
    pub async fn dispatch(
        &self,
        url: &str,
        method: Method,
        payload: Option<&Value>,
        kind: RequestKind,
    ) -> Result<HubResponse> {
        let password = match kind {
            RequestKind::EncryptedItem => self.password.as_deref(),
            RequestKind::PlainJson => None,
        };

        let body = match method {
            Method::Get | Method::Delete => None,
            Method::Post | Method::Put => match payload {
                Some(payload) => Some(self.encode_body(payload, password)?),
                None => None,
            },
        };

        let request = HubRequest {
            method,
            url: url.to_string(),
            body,
            headers: self.headers.clone(),
            timeout: self.timeout,
        };

        let response = self.http.execute(&request).await?;

        if !response.is_success() {
            debug!(status = response.status, "Hub rejected request");
            return Err(DatahubError::Status {
                status: response.status,
                body: response.body,
            });
        }

        let body = match (method, password) {
            (Method::Get, Some(password)) => self.decode_item(&response.body, password)?,
            _ => parse_lenient(&response.body),
        };

        Ok(HubResponse {
            status: response.status,
            body,
        })
    }

    fn encode_body(&self, payload: &Value, password: Option<&str>) -> Result<RequestBody> {
        match password {
            Some(password) => {
                let Value::String(plaintext) = payload else {
                    return Err(DatahubError::InvalidRequest(
                        "Content must be stringified when encrypting".to_string(),
                    ));
                };
                debug!("Encrypting item");
                Ok(RequestBody::Raw(self.cipher.encrypt(plaintext, password)?))
            }
            None => Ok(RequestBody::Json(serde_json::to_string(payload)?)),
        }
    }

    fn decode_item(&self, raw: &str, password: &str) -> Result<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => {
                warn!("Got unencrypted payload");
                Ok(parsed)
            }
            Err(_) => {
                debug!("Decrypting item");
                Ok(Value::String(self.cipher.decrypt(raw, password)?))
            }
        }
    }
}

/// JSON when it parses, the raw text otherwise, `null` for an empty body.
fn parse_lenient(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
