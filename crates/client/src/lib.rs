//! Authenticated HTTP client with single-flight token refresh
//!
//! [`AuthClient`] issues requests with the session's bearer token. When a
//! response comes back 401 it asks the shared [`SessionManager`] for a refresh
//! (one refresh at a time, shared by every caller that needs it), then retries
//! the request once with the new token.

pub mod api;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod session;
pub mod storage;
pub mod types;

pub use api::{Product, ProductPage, ProductQuery};
pub use client::{AuthClient, AuthClientBuilder};
pub use config::ClientConfig;
pub use cookies::SessionCookies;
pub use error::{ClientError, Result};
pub use session::{AuthStatus, SessionManager};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{CredentialMode, Credentials, RequestDescriptor};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
