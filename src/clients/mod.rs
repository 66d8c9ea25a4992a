//! Upstream service clients
//!
//! Ledger, partner directory and webhooks, custody, and profile lookups.
//! Each concern is an async trait so rails can be exercised against mocks;
//! the HTTP implementations share one small JSON transport.

pub mod custody;
pub mod ledger;
#[cfg(test)]
pub mod mock;
pub mod partner;
pub mod profile;

pub use custody::{CustodyClient, HttpCustodyClient};
pub use ledger::{AgentDirectory, HttpLedgerClient, LedgerAccount, LedgerClient};
pub use partner::{HttpPartnerClient, PartnerClient};
pub use profile::{HttpProfileClient, ProfileClient};

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::ServiceEndpoint;

#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("{service} unreachable: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned {status}: {message}")]
    Remote {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} sent an unreadable response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

/// JSON-over-HTTP transport for one upstream service
#[derive(Clone)]
pub struct ServiceHttp {
    service: &'static str,
    client: reqwest::Client,
    base_url: String,
    retries: usize,
}

impl ServiceHttp {
    pub fn new(service: &'static str, endpoint: &ServiceEndpoint) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(endpoint.timeout_ms))
            .build()
            .map_err(|e| ClientError::Transport {
                service,
                message: e.to_string(),
            })?;
        Ok(Self {
            service,
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            retries: endpoint.retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(&self, e: reqwest::Error) -> ClientError {
        ClientError::Transport {
            service: self.service,
            message: e.to_string(),
        }
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Remote {
                service: self.service,
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>().await.map_err(|e| ClientError::Decode {
            service: self.service,
            message: e.to_string(),
        })
    }

    /// POST a command. Not retried: the upstream dedupes on our reference,
    /// but a blind retry would still hide the first attempt's outcome.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.decode(resp).await
    }

    /// GET a resource, retrying transport errors and 5xx with a short backoff
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        self.get_optional(path, query)
            .await?
            .ok_or_else(|| ClientError::Remote {
                service: self.service,
                status: 404,
                message: format!("{path} not found"),
            })
    }

    /// GET a resource; 404 maps to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ClientError> {
        let mut attempt = 0usize;
        loop {
            let result = self.client.get(self.url(path)).query(query).send().await;
            let retryable = match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => return Ok(None),
                Ok(resp) if resp.status().is_server_error() => {
                    tracing::warn!(
                        service = self.service,
                        path,
                        status = resp.status().as_u16(),
                        attempt,
                        "upstream server error"
                    );
                    self.decode::<T>(resp).await.map(Some)
                }
                Ok(resp) => return self.decode(resp).await.map(Some),
                Err(e) => Err(self.transport(e)),
            };

            attempt += 1;
            if attempt > self.retries {
                return retryable;
            }
            let backoff = 50u64 * (1 << attempt.min(5));
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_strips_trailing_slash() {
        let http = ServiceHttp::new(
            "ledger",
            &ServiceEndpoint {
                base_url: "http://ledger.local/".into(),
                timeout_ms: 1000,
                retries: 0,
            },
        )
        .unwrap();
        assert_eq!(http.url("/v1/balances"), "http://ledger.local/v1/balances");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let http = ServiceHttp::new(
            "profile",
            &ServiceEndpoint {
                base_url: "http://127.0.0.1:9".into(),
                timeout_ms: 200,
                retries: 0,
            },
        )
        .unwrap();
        let err = http
            .get::<serde_json::Value>("/v1/profiles/user/1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport { service: "profile", .. }));
    }
}
