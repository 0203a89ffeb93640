use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::Error;

pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>>;

/// Transport that mints a new access token from the refresh credential.
pub trait Refresher: Send + Sync {
    fn refresh(&self) -> RefreshFuture<'_>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// Calls `POST {base_url}{refresh_path}` on a dedicated client.
///
/// The refresh credential travels as an HttpOnly cookie, so this client keeps
/// its own cookie jar and never goes through the bearer interceptor. Routing
/// refresh calls through the main client would recurse on a 401.
pub struct HttpRefresher {
    http: reqwest::Client,
    refresh_url: String,
}

impl HttpRefresher {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            refresh_url: config.refresh_url(),
        })
    }
}

impl Refresher for HttpRefresher {
    fn refresh(&self) -> RefreshFuture<'_> {
        Box::pin(async move {
            let response = self.http.post(&self.refresh_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                warn!(status = %status, "refresh endpoint rejected the credential");
                return Err(Error::Unexpected(status));
            }
            let payload: RefreshResponse = response.json().await?;
            info!("access token refreshed (len={})", payload.access_token.len());
            Ok(payload.access_token)
        })
    }
}
