//! Blocking client for Phabricator's Conduit API.
//!
//! # Overview
//! Every Conduit method is a POST to `<base>/api/<method>` whose form body
//! carries one `params` field holding a JSON parameter tree. Every response
//! is an envelope of `{result, error_code, error_info}`.
//!
//! # Design
//! - `ConduitConnection` performs one request/response cycle per call. It
//!   builds and parses plain-data `HttpRequest`/`HttpResponse` values so the
//!   wire format is testable without a network; an `HttpExecutor` performs
//!   the exchange.
//! - `PhabConduit` maps typed operations (ping, user lookup, project query,
//!   task info and edit) onto `call`.
//! - `AvatarProvider` is the glue a code-review host uses to turn a user into
//!   an avatar URL.
//! - Connections hold no mutable state, so one instance can serve many
//!   threads.

pub mod avatar;
pub mod conduit;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use avatar::{AvatarConfig, AvatarError, AvatarProvider, UserIdentity};
pub use conduit::{PhabConduit, Selection, TaskTransaction};
pub use config::{BodyEncoding, ConnectionConfig};
pub use connection::{CallOptions, ConduitConnection, Params};
pub use envelope::Envelope;
pub use error::{ConduitError, Result, TransportError, TransportErrorKind};
pub use http::{HttpExecutor, HttpRequest, HttpResponse, UreqExecutor};
pub use types::{Ping, ProjectInfo, TaskEdit, TaskInfo, User};
