use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::Config;
use crate::errors::Error;
use crate::refresh::{
    Clock, HttpRefresher, RefreshCoordinator, RefreshScheduler, Refresher, SessionExpiredHook,
    SystemClock,
};
use crate::token::{MemoryTokenStore, TokenStore};

/// Authenticated HTTP client for the admin API.
///
/// Every outbound request carries the current access token as a bearer header.
/// A 401 triggers (or joins) a single refresh cycle and the request is
/// replayed exactly once with the new token; a second 401 ends the session.
/// Callers receive either the successful response or a normalized [`Error`];
/// they must not layer their own retry-on-401 logic on top.
///
/// The handle is cheap to clone; clones share the token store, scheduler and
/// refresh coordinator. Construct it inside a tokio runtime: the proactive
/// refresh timer is a spawned task.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    scheduler: Arc<RefreshScheduler>,
    coordinator: Arc<RefreshCoordinator>,
}

pub struct AuthClientBuilder {
    config: Config,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn Refresher>>,
    clock: Option<Arc<dyn Clock>>,
    on_session_expired: Option<SessionExpiredHook>,
}

impl AuthClientBuilder {
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Invoked on unrecoverable auth failure, after the token store has been
    /// cleared and the refresh timer cancelled.
    pub fn on_session_expired<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_session_expired = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<AuthClient, Error> {
        let base_url = self.config.normalized_base_url();
        reqwest::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new(self.config.access_token.clone())));
        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpRefresher::new(&self.config)?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let scheduler = Arc::new(RefreshScheduler::new(
            store.clone(),
            clock,
            self.config.refresh_margin(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresher,
            scheduler.clone(),
            self.on_session_expired,
        ));
        scheduler.bind(Arc::downgrade(&coordinator));

        Ok(AuthClient {
            http: reqwest::Client::new(),
            base_url,
            store,
            scheduler,
            coordinator,
        })
    }
}

impl AuthClient {
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> AuthClientBuilder {
        AuthClientBuilder {
            config,
            store: None,
            refresher: None,
            clock: None,
            on_session_expired: None,
        }
    }

    /// Installs the access token handed out at login and arms the proactive
    /// refresh timer.
    pub fn begin_session(&self, token: &str) {
        self.store.set(token);
        self.scheduler.schedule();
    }

    /// Logout: disarms the timer and forgets the token. Does not run the
    /// session-expired hook; the caller initiated this teardown.
    pub fn end_session(&self) {
        self.scheduler.cancel();
        self.store.clear();
    }

    pub fn current_token(&self) -> Option<String> {
        self.store.get()
    }

    pub fn refresh_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Sends a request through the interceptor chain.
    ///
    /// Returns the successful response untouched. Non-401 failures bypass the
    /// refresh machinery and are normalized into [`Error`].
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response, Error> {
        let mut request = builder.build()?;
        if let Some(token) = self.store.get() {
            attach_bearer(&mut request, &token)?;
        }
        // Cloned up front; the clone is the one-shot replay budget.
        let replay = request.try_clone();

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return normalize(response).await;
        }

        let Some(mut replay) = replay else {
            warn!("401 on a request with a non-replayable body; not retrying");
            return Err(Error::Unexpected(StatusCode::UNAUTHORIZED));
        };
        warn!(path = %replay.url().path(), "401 received; refreshing access token");

        let token = self.coordinator.refresh().await?;
        attach_bearer(&mut replay, &token)?;
        let response = self.http.execute(replay).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // The freshly minted token was rejected too; a second refresh
            // could loop forever, so the session ends here.
            warn!("replayed request rejected with 401 again; expiring session");
            self.coordinator.expire_session();
            return Err(Error::SessionExpired);
        }
        normalize(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.execute(self.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::POST, path).json(body))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::PUT, path).json(body))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::PATCH, path).json(body))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.execute(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}

fn attach_bearer(request: &mut Request, token: &str) -> Result<(), Error> {
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| Error::Config("access token contains non-header characters".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

async fn normalize(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match server_message(&body) {
        Some(message) => Err(Error::Server(status, message)),
        None => Err(Error::Unexpected(status)),
    }
}

/// Extracts the `message` field the API uses for structured errors. Validation
/// failures carry an array of messages; those are joined into one line.
fn server_message(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct Payload {
        message: serde_json::Value,
    }

    let payload: Payload = serde_json::from_str(body).ok()?;
    match payload.message {
        serde_json::Value::String(message) => Some(message),
        serde_json::Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|item| item.as_str()).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_message_is_extracted() {
        assert_eq!(
            server_message(r#"{"message":"Product not found"}"#).as_deref(),
            Some("Product not found")
        );
    }

    #[test]
    fn validation_messages_are_joined() {
        assert_eq!(
            server_message(r#"{"message":["name is required","price must be positive"]}"#)
                .as_deref(),
            Some("name is required; price must be positive")
        );
    }

    #[test]
    fn unstructured_bodies_yield_none() {
        assert_eq!(server_message("<html>bad gateway</html>"), None);
        assert_eq!(server_message(r#"{"error":"nope"}"#), None);
        assert_eq!(server_message(r#"{"message":42}"#), None);
        assert_eq!(server_message(""), None);
    }
}
