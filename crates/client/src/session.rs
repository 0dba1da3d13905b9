//! Session manager: credentials, single-flight token refresh and logout
//!
//! One [`SessionManager`] is created per process and handed to every
//! [`AuthClient`](crate::AuthClient). Cloning is cheap; all clones share the
//! same credentials, refresh marker, cookie jar and status channel.
//!
//! At most one refresh runs at a time. A caller that needs a refresh while one
//! is in flight awaits the same shared future, so every such caller observes
//! the same outcome. The refresh runs as a spawned task and removes its own
//! marker when it resolves, so neither a failed refresh nor a caller that gave
//! up waiting blocks later attempts.

use crate::config::ClientConfig;
use crate::cookies::SessionCookies;
use crate::error::{ClientError, Result};
use crate::storage::{FileStore, KeyValueStore};
use crate::types::{Credentials, RefreshRequest, RefreshResponse};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether the surrounding application should treat the user as logged in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
}

type RefreshOutcome = std::result::Result<Credentials, String>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlightRefresh {
    id: u64,
    future: SharedRefresh,
}

struct SessionInner {
    credentials: RwLock<Option<Credentials>>,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    cookies: Arc<SessionCookies>,
    http: reqwest::Client,
    refresh_url: reqwest::Url,
    expires_in_mins: u32,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_refresh_id: AtomicU64,
    /// Bumped on login and logout so a refresh started in an older session
    /// cannot write its result into a newer one
    epoch: AtomicU64,
    status_tx: watch::Sender<AuthStatus>,
}

/// Owner of the process-wide authentication state
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("storage_key", &self.inner.storage_key)
            .field("refresh_url", &self.inner.refresh_url.as_str())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session backed by the file store configured in `config`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the refresh endpoint is invalid
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config, Arc::new(FileStore::new(&config.storage_path)))
    }

    /// Create a session over an explicit store. Credentials already present in
    /// the store are loaded immediately.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the refresh endpoint is invalid or the HTTP
    /// client cannot be built
    pub fn new(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_timeout(config, store, config.timeout())
    }

    /// Like [`new`](Self::new) with an explicit timeout for the refresh call
    /// instead of the configured `timeout_secs`
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new)
    pub fn with_timeout(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let refresh_url = config.resolve(&config.refresh_path)?;
        let cookies = Arc::new(SessionCookies::new());

        // The refresh call is always credentialed
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .cookie_provider(cookies.clone());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        let (status_tx, _) = watch::channel(AuthStatus::Unauthenticated);

        let session = Self {
            inner: Arc::new(SessionInner {
                credentials: RwLock::new(None),
                store,
                storage_key: config.storage_key.clone(),
                cookies,
                http,
                refresh_url,
                expires_in_mins: config.expires_in_mins,
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                status_tx,
            }),
        };
        session.is_authenticated();
        Ok(session)
    }

    /// Currently cached credentials, without consulting storage
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached credentials if present and non-empty, otherwise whatever the
    /// durable store holds (which is then cached). `None` if neither has
    /// usable credentials.
    pub fn is_authenticated(&self) -> Option<Credentials> {
        if let Some(creds) = self.credentials()
            && !creds.is_empty()
        {
            return Some(creds);
        }

        let stored = self.inner.store.get(&self.inner.storage_key)?;
        let creds = match serde_json::from_str::<Credentials>(&stored) {
            Ok(creds) if !creds.is_empty() => creds,
            Ok(_) => return None,
            Err(e) => {
                warn!("Ignoring unparseable stored credentials: {e}");
                return None;
            }
        };

        debug!("Loaded credentials from storage");
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(creds.clone());
        self.publish(AuthStatus::Authenticated);
        Some(creds)
    }

    /// Guard form of [`is_authenticated`](Self::is_authenticated)
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` when no credentials are available
    pub fn require_credentials(&self) -> Result<Credentials> {
        self.is_authenticated().ok_or(ClientError::NotAuthenticated)
    }

    /// Replace the session credentials, e.g. after login. Persists them, drops
    /// any in-flight refresh marker and publishes [`AuthStatus::Authenticated`].
    ///
    /// Blocks on storage I/O; async callers should run it on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be persisted; the cached
    /// credentials are left unchanged in that case
    pub fn set_credentials(&self, creds: Credentials) -> Result<()> {
        {
            let mut current = self
                .inner
                .credentials
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.persist(&creds)?;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *current = Some(creds);
        }
        // A refresh started for the previous credentials can only fail now
        self.in_flight_slot().take();
        self.publish(AuthStatus::Authenticated);
        Ok(())
    }

    /// Refresh the token pair, joining an in-flight refresh if there is one.
    ///
    /// On success the new credentials are already cached and persisted.
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` if there is no refresh token, the refresh
    /// endpoint fails or returns an incomplete token pair, or the session
    /// ended while the refresh was running
    pub async fn refresh(&self) -> Result<Credentials> {
        self.start_or_join_refresh()
            .await
            .map_err(ClientError::RefreshFailed)
    }

    /// Returns true while a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.in_flight_slot().is_some()
    }

    /// End the session: drop credentials, storage entry and cookies, then
    /// publish [`AuthStatus::Unauthenticated`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage entry cannot be removed; in-memory
    /// state is cleared regardless
    pub fn logout(&self) -> Result<()> {
        {
            let mut current = self
                .inner
                .credentials
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *current = None;
        }
        self.in_flight_slot().take();
        self.inner.cookies.clear();
        let removed = self.inner.store.remove(&self.inner.storage_key);

        self.publish(AuthStatus::Unauthenticated);
        info!("Session logged out");
        removed
    }

    /// Current status
    pub fn status(&self) -> AuthStatus {
        *self.inner.status_tx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Cookie jar shared by all credentialed requests of this session
    pub fn cookies(&self) -> Arc<SessionCookies> {
        self.inner.cookies.clone()
    }

    fn in_flight_slot(&self) -> std::sync::MutexGuard<'_, Option<InFlightRefresh>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start_or_join_refresh(&self) -> SharedRefresh {
        let mut slot = self.in_flight_slot();
        if let Some(in_flight) = slot.as_ref() {
            debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
            return in_flight.future.clone();
        }

        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        // The refresh runs as its own task so it completes even when every
        // caller awaiting it has been dropped
        let task = {
            let session = self.clone();
            tokio::spawn(async move {
                let outcome = session.run_refresh(epoch).await;
                session.finish_refresh(id);
                outcome
            })
        };
        let session = self.clone();
        let future = async move {
            task.await.unwrap_or_else(|e| {
                session.finish_refresh(id);
                Err(format!("refresh task failed: {e}"))
            })
        }
        .boxed()
        .shared();

        debug!(refresh_id = id, "Starting token refresh");
        *slot = Some(InFlightRefresh {
            id,
            future: future.clone(),
        });
        future
    }

    fn finish_refresh(&self, id: u64) {
        let mut slot = self.in_flight_slot();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
    }

    async fn run_refresh(&self, epoch: u64) -> RefreshOutcome {
        let current = self
            .is_authenticated()
            .filter(|creds| !creds.refresh_token.is_empty())
            .ok_or_else(|| "no refresh token available".to_string())?;

        let response = self
            .inner
            .http
            .post(self.inner.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: current.refresh_token.clone(),
                expires_in_mins: self.inner.expires_in_mins,
            })
            .send()
            .await
            .map_err(|e| {
                warn!("Token refresh request failed: {e}");
                e.to_string()
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Token refresh rejected with status {status}");
            return Err(format!("refresh endpoint returned {status}"));
        }

        let tokens: RefreshResponse = response.json().await.map_err(|e| {
            warn!("Token refresh returned an unreadable body: {e}");
            format!("malformed refresh response: {e}")
        })?;
        if !tokens.is_complete() {
            warn!("Token refresh response is missing tokens");
            return Err("refresh response is missing tokens".to_string());
        }

        let refreshed = current.rotated(tokens);
        let session = self.clone();
        let refreshed = tokio::task::spawn_blocking(move || session.commit_refresh(epoch, refreshed))
            .await
            .map_err(|e| format!("refresh commit failed: {e}"))??;

        info!("Access token refreshed");
        Ok(refreshed)
    }

    /// Persist and cache refreshed credentials unless the session changed
    /// since the refresh started. Blocks on storage I/O.
    fn commit_refresh(&self, epoch: u64, refreshed: Credentials) -> RefreshOutcome {
        let mut creds = self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            warn!("Discarding token refresh that outlived its session");
            return Err("session ended during refresh".to_string());
        }
        self.persist(&refreshed).map_err(|e| e.to_string())?;
        *creds = Some(refreshed.clone());
        Ok(refreshed)
    }

    fn persist(&self, creds: &Credentials) -> Result<()> {
        let data = serde_json::to_string(creds)?;
        self.inner.store.set(&self.inner.storage_key, &data)
    }

    fn publish(&self, status: AuthStatus) {
        self.inner.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}
