//! Registry access
//!
//! This module provides the pieces that talk to a remote registry: reference
//! parsing, the transport chain, the authenticating client, warning handling
//! and the registry/repository handles built on top of them.

pub mod auth;
pub mod reference;
pub mod remote;
pub mod transport;
pub mod warning;

pub use auth::{AuthCache, AuthClient, AuthClientBuilder, Challenge, Scheme, parse_challenge, repository_scope};
pub use reference::Reference;
pub use remote::{Registry, Repository};
pub use transport::{
    DebugTransport, HttpTransport, RetryPolicy, RetryTransport, Transport, TransportWrapper, format_headers,
};
pub use warning::{Warning, WarningDeduplicator, WarningHandler, parse_warning};
