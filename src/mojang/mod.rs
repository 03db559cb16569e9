/// Remote identity and texture adapters
///
/// HTTP implementations of the resolution collaborators: username lookups,
/// profile texture loading and the external fallback provider. Every
/// request waits on a shared politeness limiter first.
pub mod client;
pub mod external;
pub mod profile;

pub use client::MojangClient;
pub use external::HttpExternalFallback;

use crate::{
    config::HttpConfig,
    error::{EngineError, EngineResult, FetchError},
    metrics,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Map an HTTP status onto the fetch failure taxonomy
///
/// `Ok` for any 2xx other than 204.
pub fn classify_status(status: u16, retry_after: Option<&str>) -> Result<(), FetchError> {
    match status {
        204 | 404 => Err(FetchError::NotFound(format!("HTTP {}", status))),
        200..=299 => Ok(()),
        429 => Err(FetchError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }),
        500..=599 => Err(FetchError::Network(format!("Server error {}", status))),
        _ => Err(FetchError::Internal(format!("Unexpected status {}", status))),
    }
}

/// Rate-limited HTTP client shared by the adapters
#[derive(Clone)]
pub struct RemoteHttp {
    client: reqwest::Client,
    limiter: Arc<DirectLimiter>,
}

impl RemoteHttp {
    pub fn new(config: &HttpConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::HttpClient(format!("Failed to create HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            EngineError::Config("Outbound request rate must be positive".to_string())
        })?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    /// GET `url`, classifying transport errors and non-success statuses
    pub async fn get(&self, endpoint: &'static str, url: &str) -> Result<Response, FetchError> {
        self.limiter.until_ready().await;
        let response = self.client.get(url).send().await.map_err(|e| {
            metrics::record_remote_transport_error(endpoint);
            FetchError::from(e)
        })?;
        Self::check(endpoint, response)
    }

    /// HEAD `url`, true on success and false when the remote has nothing there
    pub async fn probe(&self, endpoint: &'static str, url: &str) -> Result<bool, FetchError> {
        self.limiter.until_ready().await;
        let response = self.client.head(url).send().await.map_err(|e| {
            metrics::record_remote_transport_error(endpoint);
            FetchError::from(e)
        })?;

        match Self::check(endpoint, response) {
            Ok(_) => Ok(true),
            Err(FetchError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
    ) -> Result<T, FetchError> {
        self.get(endpoint, url)
            .await?
            .json::<T>()
            .await
            .map_err(|e| FetchError::Internal(format!("Malformed {} response: {}", endpoint, e)))
    }

    pub async fn get_bytes(&self, endpoint: &'static str, url: &str) -> Result<Vec<u8>, FetchError> {
        let bytes = self.get(endpoint, url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    fn check(endpoint: &'static str, response: Response) -> Result<Response, FetchError> {
        let status = response.status();
        metrics::record_remote_request(endpoint, status.as_u16());

        if status == StatusCode::OK {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        classify_status(status.as_u16(), retry_after)?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(200, None).is_ok());
        assert!(matches!(classify_status(204, None), Err(FetchError::NotFound(_))));
        assert!(matches!(classify_status(404, None), Err(FetchError::NotFound(_))));
        assert!(matches!(classify_status(503, None), Err(FetchError::Network(_))));
        assert!(matches!(classify_status(400, None), Err(FetchError::Internal(_))));
        assert!(matches!(classify_status(302, None), Err(FetchError::Internal(_))));
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        assert_eq!(
            classify_status(429, Some("120")),
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(120))
            })
        );
        // HTTP-date form is not parsed, the cooldown floor applies instead
        assert_eq!(
            classify_status(429, Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            Err(FetchError::RateLimited { retry_after: None })
        );
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let config = HttpConfig {
            requests_per_second: 0,
            ..HttpConfig::default()
        };
        assert!(matches!(RemoteHttp::new(&config), Err(EngineError::Config(_))));
    }
}
