//! Clearable cookie jar for credentialed requests

use reqwest::Url;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest_cookie_store::CookieStoreMutex;
use std::sync::{MutexGuard, PoisonError};

/// Session cookies shared by every credentialed request of a session.
///
/// Storage and matching follow RFC 6265 (domain, path, `Secure`, expiry);
/// this wrapper only adds the ability to drop everything on logout.
#[derive(Debug, Default)]
pub struct SessionCookies {
    jar: CookieStoreMutex,
}

impl SessionCookies {
    /// Create an empty jar
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cookie
    pub fn clear(&self) {
        self.store().clear();
    }

    /// Number of unexpired cookies held across all domains
    pub fn len(&self) -> usize {
        self.store().iter_unexpired().count()
    }

    /// Returns true if the jar holds no cookies
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self) -> MutexGuard<'_, reqwest_cookie_store::CookieStore> {
        self.jar.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar.set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}
