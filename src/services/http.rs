use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::error::{SyncError, SyncResult};
use crate::services::retry::{retry, RetryPolicy};

/// A reqwest client plus the retry policy shared by the source fetchers.
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
    policy: RetryPolicy,
}

impl JsonClient {
    pub fn new(config: &HttpConfig, policy: RetryPolicy) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(JsonClient { client, policy })
    }

    #[cfg(test)]
    pub fn for_tests(max_attempts: u32) -> Self {
        let config = HttpConfig {
            timeout: std::time::Duration::from_secs(5),
            user_agent: "campus-sync-tests".to_string(),
        };
        JsonClient {
            client: Client::builder()
                .timeout(config.timeout)
                .user_agent(config.user_agent)
                .build()
                .unwrap(),
            policy: RetryPolicy::immediate(max_attempts),
        }
    }

    /// GET `url` and decode the JSON body, retrying transient failures.
    /// Every failure is reported as [`SyncError::Fetch`] naming `url`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        self.fetch(url, query)
            .await
            .map_err(|e| SyncError::fetch(url, e))
    }

    /// Like [`get_json`](Self::get_json) but a 404 yields `Ok(None)`.
    pub async fn get_optional_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SyncResult<Option<T>> {
        match self.fetch(url, query).await {
            Ok(value) => Ok(Some(value)),
            Err(SyncError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(SyncError::fetch(url, e)),
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        retry(
            &format!("GET {}", url),
            &self.policy,
            SyncError::is_transient,
            || async move {
                let response = self.client.get(url).query(query).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(SyncError::HttpStatus {
                        endpoint: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                response.json::<T>().await.map_err(|e| {
                    if e.is_decode() {
                        SyncError::Decode(e.to_string())
                    } else {
                        SyncError::Request(e)
                    }
                })
            },
        )
        .await
    }
}
