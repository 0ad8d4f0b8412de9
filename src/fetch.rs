use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};

use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Downloads asset bytes. Blocking; called on the processing thread.
pub trait AssetFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Must be built (and dropped) outside an async context.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| anyhow::anyhow!("build asset http client: {err}"))?;
        Ok(Self { client })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let fail = |reason: String| MigrateError::AssetFetchFailure {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, "sqsp-migrate/0.1")
            .header(ACCEPT, "image/*,*/*;q=0.8")
            .send()
            .map_err(|err| fail(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("http status {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());
        let bytes = response.bytes().map_err(|err| fail(err.to_string()))?;
        if bytes.is_empty() {
            return Err(fail("empty response body".to_owned()));
        }

        tracing::debug!(url, bytes = bytes.len(), ?content_type, "fetched asset");
        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
