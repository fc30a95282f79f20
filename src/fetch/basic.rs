use super::client::HttpClient;
use async_trait::async_trait;

/// Plain reqwest-backed client.
#[derive(Debug, Clone, Default)]
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self(client)
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
