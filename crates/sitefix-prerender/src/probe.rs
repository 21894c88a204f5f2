//! HTTP readiness probe for the preview server.

use std::time::Duration;

use sitefix_core::{Result, SiteFixError};
use tracing::trace;

/// Issues a single GET per check against the server's base URL.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SiteFixError::Http(format!("cannot build probe client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` once the server answers with anything below 500. A 404 still
    /// means the server is listening.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => {
                let status = resp.status();
                trace!(url = %self.url, status = %status, "probe response");
                !status.is_server_error()
            }
            Err(e) => {
                trace!(url = %self.url, error = %e, "probe failed");
                false
            }
        }
    }
}
