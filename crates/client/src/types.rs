//! Request and response types for the authenticated client

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access and refresh tokens plus whatever else the login endpoint returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Remaining login response fields (`id`, `username`, ...), kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    /// Create credentials from a token pair
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            extra: Map::new(),
        }
    }

    /// Credentials without an access token are treated as absent
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty()
    }

    /// Copy of these credentials with the token pair rotated
    pub fn rotated(&self, tokens: RefreshResponse) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            extra: self.extra.clone(),
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Whether a request carries the session cookie jar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// Never send cookies
    Omit,
    /// Send cookies only to the configured base URL's origin
    #[default]
    SameOrigin,
    /// Always send cookies
    Include,
}

impl std::str::FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "omit" => Ok(Self::Omit),
            "same-origin" => Ok(Self::SameOrigin),
            "include" => Ok(Self::Include),
            other => Err(format!("unknown credential mode: {other}")),
        }
    }
}

/// Everything needed to issue one outbound call
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Absolute URL, or a path starting with `/` resolved against the base URL
    pub endpoint: String,
    pub method: Method,
    /// Applied in order after the defaults; later entries win
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub credential_mode: Option<CredentialMode>,
}

impl RequestDescriptor {
    /// Create a descriptor for the given method and endpoint
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: Vec::new(),
            body: None,
            credential_mode: None,
        }
    }

    /// GET descriptor
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// POST descriptor
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        Ok(self.body(serde_json::to_string(value)?))
    }

    /// Set the credential mode
    #[must_use]
    pub fn credentials(mut self, mode: CredentialMode) -> Self {
        self.credential_mode = Some(mode);
        self
    }
}

/// Body sent to the refresh endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub expires_in_mins: u32,
}

/// Token pair returned by the refresh endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl RefreshResponse {
    /// Both tokens must be non-empty to be usable
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

/// Body sent to the login endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub expires_in_mins: u32,
}
