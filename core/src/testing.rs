//! Scripted `HttpExecutor` for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpExecutor, HttpRequest, HttpResponse};

/// Replays queued responses in order and records every request it sees.
#[derive(Debug, Default)]
pub(crate) struct ScriptedExecutor {
    replies: Mutex<VecDeque<Result<HttpResponse, TransportErrorKind>>>,
    requests: Mutex<Vec<(HttpRequest, Option<Duration>)>>,
}

impl ScriptedExecutor {
    pub(crate) fn push_json(&self, status: u16, body: Value) {
        self.replies.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }));
    }

    pub(crate) fn push_failure(&self, kind: TransportErrorKind) {
        self.replies.lock().unwrap().push_back(Err(kind));
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn timeouts(&self) -> Vec<Option<Duration>> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    /// Parameter tree of the most recent request.
    pub(crate) fn last_params(&self) -> Value {
        let requests = self.requests.lock().unwrap();
        let (request, _) = requests.last().expect("no request was sent");
        form_params(&request.body)
    }

    pub(crate) fn last_url(&self) -> String {
        let requests = self.requests.lock().unwrap();
        requests.last().expect("no request was sent").0.url.clone()
    }
}

impl HttpExecutor for ScriptedExecutor {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push((request.clone(), timeout));
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(kind)) => Err(TransportError::new(kind, "scripted failure")),
            None => Err(TransportError::new(TransportErrorKind::Send, "no scripted reply")),
        }
    }
}

/// Decodes the JSON carried in a percent-encoded `params=` body.
pub(crate) fn form_params(body: &str) -> Value {
    let (_, json) = url::form_urlencoded::parse(body.as_bytes())
        .find(|(key, _)| key == "params")
        .expect("body has no params field");
    serde_json::from_str(&json).expect("params is not JSON")
}
