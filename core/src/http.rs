//! HTTP transport types and the executor seam.
//!
//! # Design
//! `ConduitConnection` builds `HttpRequest` values and parses `HttpResponse`
//! values as plain data; an `HttpExecutor` performs the actual exchange in
//! between. `UreqExecutor` is the production executor. Tests substitute
//! their own to count calls or simulate failures without a network.

use std::time::Duration;

use tracing::trace;

use crate::error::{TransportError, TransportErrorKind};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// A Conduit call described as plain data. Always sent as a POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// An HTTP response described as plain data.
///
/// The body has been read completely by the time this value exists, so no
/// connection resources are attached to it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Performs one HTTP exchange.
///
/// Implementations must be usable from several threads at once and must
/// release every per-request resource before returning, on success and on
/// failure alike.
pub trait HttpExecutor: Send + Sync {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError>;
}

/// `HttpExecutor` backed by a single reusable `ureq::Agent`.
///
/// The agent is created once at construction and shared by every call.
/// Non-2xx statuses are returned as data; interpreting them is the
/// connection's job.
#[derive(Debug, Clone)]
pub struct UreqExecutor {
    agent: ureq::Agent,
}

impl UreqExecutor {
    pub fn new(timeout: Duration) -> Self {
        trace!(?timeout, "creating HTTP agent");
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl HttpExecutor for UreqExecutor {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self.agent.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = timeout {
            builder = builder.config().timeout_global(Some(timeout)).build();
        }

        // The response (and its connection) is dropped at the end of this
        // scope whichever way the read goes.
        let mut response = builder
            .send(request.body.as_bytes())
            .map_err(|e| transport_error(TransportErrorKind::Send, e))?;

        let status = response.status().as_u16();
        // Headers that are not visible ASCII are skipped.
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| transport_error(TransportErrorKind::Read, e))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(kind: TransportErrorKind, err: ureq::Error) -> TransportError {
    let kind = if matches!(err, ureq::Error::Timeout(_)) {
        TransportErrorKind::Timeout
    } else {
        kind
    };
    TransportError::with_source(kind, err)
}
