//! One request/response cycle per Conduit call.
//!
//! # Design
//! `build_call` turns a method name and parameter tree into an `HttpRequest`
//! and `parse_call` turns an `HttpResponse` into the envelope's `result`.
//! Both are pure. `call` runs them around a single `HttpExecutor::execute`.
//!
//! The caller's parameters are borrowed and never modified; the auth entry is
//! added to a fresh copy. Together with an executor created up front, this
//! makes one connection safe to share between threads.

use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::config::{BodyEncoding, ConnectionConfig};
use crate::envelope::Envelope;
use crate::error::{ConduitError, Result};
use crate::http::{HttpExecutor, HttpRequest, HttpResponse, UreqExecutor, FORM_CONTENT_TYPE};

/// Top-level parameter key reserved for authentication.
pub const AUTH_KEY: &str = "__conduit__";

/// Parameters of a single call.
pub type Params = Map<String, Value>;

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Upper bound for this call, replacing the connection's timeout. A call
    /// that exceeds it fails with a timeout `TransportError`.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Abstracts the connection to a Conduit API endpoint.
#[derive(Debug, Clone)]
pub struct ConduitConnection<E = UreqExecutor> {
    config: ConnectionConfig,
    executor: E,
}

impl ConduitConnection<UreqExecutor> {
    pub fn new(config: ConnectionConfig) -> Self {
        let executor = UreqExecutor::new(config.timeout());
        Self { config, executor }
    }
}

impl<E: HttpExecutor> ConduitConnection<E> {
    pub fn with_executor(config: ConnectionConfig, executor: E) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Calls `method` with `params`, authenticating with `token` when given.
    pub fn call(&self, method: &str, params: &Params, token: Option<&str>) -> Result<Value> {
        self.call_with(method, params, token, &CallOptions::default())
    }

    pub fn call_with(
        &self,
        method: &str,
        params: &Params,
        token: Option<&str>,
        options: &CallOptions,
    ) -> Result<Value> {
        let request = self.build_call(method, params, token)?;
        let timeout = options.timeout.unwrap_or(self.config.timeout());

        let start = Instant::now();
        let response = self
            .executor
            .execute(&request, Some(timeout))
            .map_err(|source| ConduitError::Transport {
                method: method.to_string(),
                source,
            })?;
        debug!(
            method,
            status = response.status,
            elapsed_ms = start.elapsed().as_micros() as f64 / 1000.0,
            "conduit call completed"
        );

        self.parse_call(method, response)
    }

    /// Builds the POST for `method`. Fails before any I/O on a malformed
    /// method name or a caller-supplied `__conduit__` entry.
    pub fn build_call(&self, method: &str, params: &Params, token: Option<&str>) -> Result<HttpRequest> {
        validate_method(method)?;
        if params.contains_key(AUTH_KEY) {
            return Err(ConduitError::InvalidArgument(format!(
                "parameter `{AUTH_KEY}` is reserved for authentication"
            )));
        }

        trace!(
            method,
            keys = ?params.keys().collect::<Vec<_>>(),
            authenticated = token.is_some(),
            "building conduit call"
        );

        let json = match token {
            Some(token) => {
                let mut outgoing = params.clone();
                outgoing.insert(AUTH_KEY.to_string(), json!({ "token": token }));
                serde_json::to_string(&outgoing)
            }
            None => serde_json::to_string(params),
        }
        .map_err(|e| ConduitError::Serialization(e.to_string()))?;

        let body = match self.config.body_encoding() {
            BodyEncoding::PercentEncoded => url::form_urlencoded::Serializer::new(String::new())
                .append_pair("params", &json)
                .finish(),
            BodyEncoding::Raw => format!("params={json}"),
        };

        Ok(HttpRequest {
            url: format!("{}{method}", self.config.api_url()),
            headers: vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
            body,
        })
    }

    /// Interprets a response to `method`, returning the envelope's `result`.
    ///
    /// An envelope carrying an error is a `Remote` error whatever the status.
    /// Any other non-2xx response is an `Http` error, and a 2xx body that is
    /// not an envelope is a `Decode` error.
    pub fn parse_call(&self, method: &str, response: HttpResponse) -> Result<Value> {
        trace!(method, status = response.status, body = %response.body, "conduit response");
        let success = (200..300).contains(&response.status);

        let envelope = match parse_envelope(&response.body) {
            Ok(envelope) => envelope,
            Err(reason) if !success => {
                trace!(method, %reason, "non-success status without an envelope");
                return Err(http_error(method, response));
            }
            Err(reason) => {
                let reason = match response.header("content-type") {
                    Some(content_type) => format!("{reason} (content-type {content_type})"),
                    None => reason,
                };
                return Err(ConduitError::decode(method, "conduit envelope", reason));
            }
        };

        if envelope.is_error() {
            return Err(ConduitError::Remote {
                method: method.to_string(),
                error_code: envelope.error_code,
                error_info: envelope.error_info,
            });
        }
        if !success {
            return Err(http_error(method, response));
        }
        Ok(envelope.result)
    }
}

fn http_error(method: &str, response: HttpResponse) -> ConduitError {
    ConduitError::Http {
        method: method.to_string(),
        status: response.status,
        body: response.body,
    }
}

const ENVELOPE_KEYS: [&str; 3] = ["result", "error_code", "error_info"];

fn parse_envelope(body: &str) -> std::result::Result<Envelope, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let Some(object) = value.as_object() else {
        return Err("response body is not a JSON object".to_string());
    };
    if !ENVELOPE_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err("response object has none of result, error_code, error_info".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Method names are dotted identifiers such as `maniphest.edit`.
fn validate_method(method: &str) -> Result<()> {
    let well_formed = !method.is_empty()
        && method
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if well_formed {
        Ok(())
    } else {
        Err(ConduitError::InvalidArgument(format!(
            "malformed conduit method name `{method}`"
        )))
    }
}
