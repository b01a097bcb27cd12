use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use super::config::ApiConfig;
use crate::auth::TokenProvider;
use crate::error::PersistenceError;
use crate::models::{Snapshot, SnapshotStamp};
use crate::persistence::PersistentStore;

#[derive(Serialize, Deserialize)]
struct ThemeBody {
    theme: String,
}

// REST client for the per-user preference API
pub struct ApiClient<T: TokenProvider> {
    config: ApiConfig,
    tokens: T,
}

impl<T: TokenProvider> ApiClient<T> {
    pub fn new(config: ApiConfig, tokens: T) -> Self {
        Self { config, tokens }
    }

    pub(crate) fn user_url(&self, user_id: &str, rest: &str) -> String {
        self.config.url(&format!("/preferences/{}{}", encode_segment(user_id), rest))
    }

    /// Issue a request and return the response body.  `Ok(None)` means the
    /// resource does not exist yet (404).
    async fn fetch_json(
        &self,
        url: &str,
        method: &str,
        body: Option<&str>,
    ) -> Result<Option<String>, PersistenceError> {
        use web_sys::{Headers, Request, RequestInit, RequestMode, Response};

        let opts = RequestInit::new();
        opts.set_method(method);
        opts.set_mode(RequestMode::Cors);

        let headers = Headers::new().map_err(js_error)?;

        // Always attach the Authorization header when a token is present.
        if let Some(token) = self.tokens.bearer_token() {
            headers
                .append("Authorization", &format!("Bearer {}", token))
                .map_err(js_error)?;
        }

        if let Some(data) = body {
            opts.set_body(&JsValue::from_str(data));
            headers.append("Content-Type", "application/json").map_err(js_error)?;
        }
        opts.set_headers(&headers);

        let request = Request::new_with_str_and_init(url, &opts).map_err(js_error)?;

        let window = web_sys::window()
            .ok_or_else(|| PersistenceError::Unavailable("no global window".into()))?;
        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(js_error)?;
        let resp: Response = resp_value.dyn_into().map_err(js_error)?;

        if !resp.ok() {
            let status = resp.status();
            tracing::debug!(url, status, "request failed");
            return match status {
                404 => Ok(None),
                401 | 403 => Err(PersistenceError::Unauthorized),
                _ => Err(PersistenceError::Http { status, message: resp.status_text() }),
            };
        }

        // Body as text; the caller decodes JSON.
        let text = JsFuture::from(resp.text().map_err(js_error)?)
            .await
            .map_err(js_error)?;
        Ok(Some(text.as_string().unwrap_or_default()))
    }

    async fn get<D: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<D>, PersistenceError> {
        match self.fetch_json(url, "GET", None).await? {
            Some(text) if !text.trim().is_empty() && text.trim() != "null" => {
                Ok(Some(serde_json::from_str(&text)?))
            }
            _ => Ok(None),
        }
    }

    async fn put<S: Serialize + ?Sized>(
        &self,
        url: &str,
        value: &S,
    ) -> Result<(), PersistenceError> {
        let body = serde_json::to_string(value)?;
        self.fetch_json(url, "PUT", Some(&body)).await.map(|_| ())
    }
}

impl<T: TokenProvider> PersistentStore for ApiClient<T> {
    async fn load_layout(&self, user_id: &str) -> Result<Option<Snapshot>, PersistenceError> {
        self.get(&self.user_url(user_id, "/layout")).await
    }

    async fn save_layout(
        &self,
        user_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PersistenceError> {
        self.put(&self.user_url(user_id, "/layout"), snapshot).await
    }

    async fn load_layout_stamp(
        &self,
        user_id: &str,
    ) -> Result<Option<SnapshotStamp>, PersistenceError> {
        self.get(&self.user_url(user_id, "/layout/version")).await
    }

    async fn load_theme(&self, user_id: &str) -> Result<Option<String>, PersistenceError> {
        let body: Option<ThemeBody> = self.get(&self.user_url(user_id, "/theme")).await?;
        Ok(body.map(|b| b.theme))
    }

    async fn save_theme(&self, user_id: &str, theme: &str) -> Result<(), PersistenceError> {
        self.put(&self.user_url(user_id, "/theme"), &ThemeBody { theme: theme.to_string() }).await
    }

    async fn load_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        let path = format!("/components/{}", encode_segment(instance_id));
        self.get(&self.user_url(user_id, &path)).await
    }

    async fn save_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
        state: &Value,
    ) -> Result<(), PersistenceError> {
        let path = format!("/components/{}", encode_segment(instance_id));
        self.put(&self.user_url(user_id, &path), state).await
    }

    async fn load_preference(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        let path = format!("/settings/{}", encode_segment(key));
        self.get(&self.user_url(user_id, &path)).await
    }

    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), PersistenceError> {
        let path = format!("/settings/{}", encode_segment(key));
        self.put(&self.user_url(user_id, &path), value).await
    }
}

fn js_error(err: JsValue) -> PersistenceError {
    PersistenceError::Network(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

/// Percent-encode a single path segment (RFC 3986 unreserved set kept).
pub(crate) fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
