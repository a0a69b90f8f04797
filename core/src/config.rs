//! Connection settings for a Conduit endpoint.

use std::time::Duration;

use crate::error::{ConduitError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How the JSON parameter blob is placed in the `params` form field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyEncoding {
    /// `params=<percent-encoded json>`, a well-formed form body.
    #[default]
    PercentEncoded,
    /// `params=<json>` with the JSON bytes copied verbatim, for servers that
    /// depend on the historical unescaped body.
    Raw,
}

/// Immutable settings for one `ConduitConnection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    api_url: String,
    token: Option<String>,
    timeout: Duration,
    body_encoding: BodyEncoding,
}

impl ConnectionConfig {
    /// Normalizes `base_url` by stripping trailing slashes and appending `/api/`.
    pub fn new(base_url: &str) -> Self {
        Self {
            api_url: format!("{}/api/", base_url.trim_end_matches('/')),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            body_encoding: BodyEncoding::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_body_encoding(mut self, body_encoding: BodyEncoding) -> Self {
        self.body_encoding = body_encoding;
        self
    }

    /// Reads `CONDUIT_URL` (required), `CONDUIT_TOKEN`, `CONDUIT_TIMEOUT_SECS`
    /// and `CONDUIT_RAW_BODY` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("CONDUIT_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConduitError::InvalidArgument("CONDUIT_URL is not set".to_string()))?;
        let mut config = Self::new(base_url.trim());

        if let Some(token) = lookup("CONDUIT_TOKEN").filter(|t| !t.is_empty()) {
            config = config.with_token(token);
        }
        if let Some(secs) = lookup("CONDUIT_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ConduitError::InvalidArgument(format!("CONDUIT_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("CONDUIT_RAW_BODY") {
            if matches!(raw.trim(), "1" | "true" | "yes") {
                config = config.with_body_encoding(BodyEncoding::Raw);
            }
        }
        Ok(config)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn body_encoding(&self) -> BodyEncoding {
        self.body_encoding
    }
}
