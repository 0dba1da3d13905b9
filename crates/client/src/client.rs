//! Authenticated request client

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::SessionManager;
use crate::storage::{FileStore, KeyValueStore};
use crate::types::{CredentialMode, Credentials, LoginRequest, RequestDescriptor};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP client that attaches session credentials and recovers from expired
/// access tokens with a single shared refresh and one retry
#[derive(Clone)]
pub struct AuthClient {
    config: Arc<ClientConfig>,
    session: SessionManager,
    /// Client without a cookie jar
    http: Client,
    /// Client sharing the session cookie jar
    credentialed: Client,
    origin: url::Origin,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.config.base_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a client for `base_url` with default configuration
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL is invalid
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> AuthClientBuilder {
        AuthClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Effective configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Per-request timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Session shared by this client
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Issue the request described by `descriptor` and return its JSON body.
    ///
    /// A 401 triggers a token refresh (shared with any concurrent caller) and
    /// exactly one retry with the new access token.
    ///
    /// The session token is only attached to URLs with the base URL's origin.
    /// Other origins get the caller's headers alone, and a 401 from them is a
    /// plain `RequestFailed`.
    ///
    /// # Errors
    ///
    /// `Network`/`Timeout` for transport failures, `RequestFailed` for other
    /// non-success statuses, `RefreshFailed` when the refresh after a 401
    /// fails, `RetryFailed` when the retry still fails, `Serialization` when
    /// the body is not JSON
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Value> {
        self.execute_as(descriptor).await
    }

    /// Like [`execute`](Self::execute), deserializing the body into `T`
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute)
    pub async fn execute_as<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<T> {
        let url = self.config.resolve(&descriptor.endpoint)?;
        // The session token never leaves the base URL's origin
        let same_origin = url.origin() == self.origin;
        let bearer = if same_origin {
            self.session.is_authenticated().map(|creds| creds.bearer())
        } else {
            None
        };

        let response = self.send(descriptor, &url, bearer.as_deref(), None).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && same_origin {
            warn!(method = %descriptor.method, url = %url, "Request unauthorized, refreshing token");
            let creds = self.session.refresh().await?;

            let retry = self
                .send(descriptor, &url, None, Some(&creds.bearer()))
                .await?;
            let retry_status = retry.status();
            if !retry_status.is_success() {
                warn!(url = %url, "Retry after token refresh failed with status {retry_status}");
                return Err(ClientError::RetryFailed {
                    status: retry_status.as_u16(),
                });
            }
            return Ok(retry.json().await?);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(ClientError::from_status(status, message));
        }

        Ok(response.json().await?)
    }

    /// Like [`execute`](Self::execute), abandoned as soon as `cancel` fires.
    ///
    /// Cancelling only abandons this caller; a refresh it started or joined
    /// keeps running and still stores the new tokens.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the token fires first, otherwise see [`execute`](Self::execute)
    pub async fn execute_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(endpoint = %descriptor.endpoint, "Request cancelled");
                Err(ClientError::Cancelled)
            }
            result = self.execute(descriptor) => result,
        }
    }

    /// Log in with username and password. The response becomes the session's
    /// credentials and is persisted.
    ///
    /// A 401 here is reported as `RequestFailed`; it never triggers a refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the response carries no access
    /// token, or the credentials cannot be persisted
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials> {
        let url = self.config.resolve(&self.config.login_path)?;
        debug!(url = %url, "Logging in");

        let response = self
            .credentialed
            .post(url)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
                expires_in_mins: self.config.expires_in_mins,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            warn!("Login rejected with status {status}");
            return Err(ClientError::from_status(status, message));
        }

        let creds: Credentials = response.json().await?;
        if creds.is_empty() {
            return Err(ClientError::from_status(
                status,
                "login response carried no access token".to_string(),
            ));
        }

        let session = self.session.clone();
        let stored = creds.clone();
        tokio::task::spawn_blocking(move || session.set_credentials(stored))
            .await
            .map_err(|e| ClientError::Storage(format!("credential write failed: {e}")))??;
        info!("Logged in");
        Ok(creds)
    }

    /// End the session; see [`SessionManager::logout`]
    ///
    /// # Errors
    ///
    /// Returns an error if the stored credentials cannot be removed
    pub fn logout(&self) -> Result<()> {
        self.session.logout()
    }

    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        session_bearer: Option<&str>,
        retry_bearer: Option<&str>,
    ) -> Result<Response> {
        let headers = build_headers(descriptor, session_bearer, retry_bearer)?;
        let client = if self.sends_cookies(descriptor.credential_mode.unwrap_or_default(), url) {
            &self.credentialed
        } else {
            &self.http
        };

        debug!(method = %descriptor.method, url = %url, retry = retry_bearer.is_some(), "Sending request");
        let mut request = client
            .request(descriptor.method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = &descriptor.body {
            request = request.body(body.clone());
        }

        Ok(request.send().await?)
    }

    fn sends_cookies(&self, mode: CredentialMode, url: &Url) -> bool {
        match mode {
            CredentialMode::Omit => false,
            CredentialMode::Include => true,
            CredentialMode::SameOrigin => url.origin() == self.origin,
        }
    }
}

/// Default content type, then the session bearer, then caller headers; later
/// entries replace earlier ones. A retry bearer replaces whatever
/// `Authorization` the caller supplied.
fn build_headers(
    descriptor: &RequestDescriptor,
    session_bearer: Option<&str>,
    retry_bearer: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    if let Some(bearer) = session_bearer {
        headers.insert(header::AUTHORIZATION, header_value(bearer)?);
    }

    for (name, value) in &descriptor.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Configuration(format!("invalid header name {name}: {e}")))?;
        headers.insert(name, header_value(value)?);
    }

    if let Some(bearer) = retry_bearer {
        headers.insert(header::AUTHORIZATION, header_value(bearer)?);
    }

    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::Configuration(format!("invalid header value: {e}")))
}

/// Builder for [`AuthClient`]
#[derive(Default)]
pub struct AuthClientBuilder {
    config: Option<ClientConfig>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    session: Option<SessionManager>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl AuthClientBuilder {
    /// Start from a full configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout, overriding `timeout_secs` from the
    /// configuration. Sub-second values are kept as given; zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Use an existing session instead of creating one
    pub fn session(mut self, session: SessionManager) -> Self {
        self.session = Some(session);
        self
    }

    /// Storage for a newly created session (defaults to the configured file)
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no base URL was given or it is invalid
    pub fn build(self) -> Result<AuthClient> {
        let base_url = self
            .base_url
            .or_else(|| self.config.as_ref().map(|c| c.base_url.clone()))
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        let mut config = self.config.unwrap_or_default();
        config.base_url = base_url.trim_end_matches('/').to_string();
        let timeout = match self.timeout {
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
            None => config.timeout(),
        };
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        let origin = config.base()?.origin();

        let session = match self.session {
            Some(session) => session,
            None => {
                let store = self
                    .store
                    .unwrap_or_else(|| Arc::new(FileStore::new(&config.storage_path)));
                SessionManager::with_timeout(&config, store, timeout)?
            }
        };

        let http = client_builder(&config, timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let credentialed = client_builder(&config, timeout)
            .cookie_provider(session.cookies())
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(AuthClient {
            config: Arc::new(config),
            session,
            http,
            credentialed,
            origin,
            timeout,
        })
    }
}

fn client_builder(config: &ClientConfig, timeout: Option<Duration>) -> ClientBuilder {
    let mut builder = ClientBuilder::new().user_agent(config.user_agent.clone());
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
}
