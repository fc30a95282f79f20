use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use crate::error::{SyncError, SyncResult};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction so
/// `execute` never has to fail on them.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> SyncResult<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| SyncError::Network(format!("invalid api key header name: {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| SyncError::Network(format!("invalid api key value: {e}")))?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// `Authorization: Bearer <key>`.
    pub fn bearer(inner: C, key: &str) -> SyncResult<Self> {
        Self::new(inner, "Authorization", &format!("Bearer {key}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}
