use serde::Deserialize;

/// Where the per-user preference API lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    base_url: String,
}

impl Default for ApiConfig {
    /// Falls back to the local development backend when no `API_BASE_URL`
    /// was baked in at build time.  Hosts normally inject the real URL at
    /// runtime through [`crate::config::AppConfig`].
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::from_url("http://localhost"))
    }
}

impl ApiConfig {
    /// Create a new ApiConfig from the API_BASE_URL environment variable
    pub fn new() -> Result<Self, &'static str> {
        if let Some(url) = option_env!("API_BASE_URL") {
            Ok(Self::from_url(url))
        } else {
            Err("API_BASE_URL environment variable is not set")
        }
    }

    /// Create a new ApiConfig from a URL string
    pub fn from_url(url: &str) -> Self {
        Self { base_url: url.trim_end_matches('/').to_string() }
    }

    /// Get the base URL for all API calls
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Get a full API URL for a given path
    pub fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url(), path)
    }
}
