//! Client side of the remote repository HTTP API.
//!
//! Builds the `api2` endpoint URLs for a repo/path/file tuple, performs the
//! authenticated requests, lists directories, and resolves the "prefetch"
//! indirection some endpoints use: a successful response whose body is a
//! quoted URL pointing at the real transfer endpoint.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod resolver;
pub mod types;

pub use client::{ApiClient, ClientOptions};
pub use endpoints::TransferRequest;
pub use error::ApiError;
pub use resolver::{
    Prefetch, RedirectResolver, RedirectTracker, parse_embedded_url, redirect_target,
};
pub use types::{Dirent, DirentKind};

/// Re-exported so downstream crates name URLs without a direct `url` dependency.
pub use reqwest::Url;
