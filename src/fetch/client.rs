use async_trait::async_trait;
use reqwest::{Request, Response};

/// HTTP transport used to pull remote sources; swapped out in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
