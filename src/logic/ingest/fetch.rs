//! Feed Fetching
//!
//! Blocking HTTP fetch with a per-feed timeout so one hanging source can
//! never stall the rest of the cycle. The `FeedFetch` trait is the seam
//! tests use to replace the network.

use std::time::Duration;

use super::FeedError;

pub trait FeedFetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FeedError>;
}

pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl FeedFetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FeedError> {
        let response = ureq::get(url)
            .timeout(self.timeout)
            .call()
            .map_err(|e| FeedError::Http(e.to_string()))?;

        response
            .into_string()
            .map_err(|e| FeedError::Http(e.to_string()))
    }
}
