//! Source retrieval: local files or `http(s)` URLs.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// GETs `url` and returns the body, failing on a non-success status.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("GET {url} returned status {status}");
    }
    Ok(resp.bytes().await?.to_vec())
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Loads a source from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(client))]
pub async fn read_location<C: HttpClient>(client: &C, location: &str) -> Result<Vec<u8>> {
    let bytes = if is_remote(location) {
        fetch_bytes(client, location).await?
    } else {
        tokio::fs::read(location)
            .await
            .with_context(|| format!("failed to read '{location}'"))?
    };
    debug!(bytes = bytes.len(), "Source read");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl HttpClient for NeverCalled {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            panic!("local reads must not hit the network");
        }
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.org/stations.json"));
        assert!(is_remote("http://localhost/rain.csv"));
        assert!(!is_remote("data/rain.csv"));
        assert!(!is_remote("/tmp/https.csv"));
    }

    #[tokio::test]
    async fn test_read_local_file() {
        let path = std::env::temp_dir().join("granularity_fuse_fetch_local.txt");
        std::fs::write(&path, b"id,dtg\n").unwrap();

        let bytes = read_location(&NeverCalled, path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"id,dtg\n");

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let result = read_location(&NeverCalled, "/definitely/not/here.csv").await;
        assert!(result.is_err());
    }
}
