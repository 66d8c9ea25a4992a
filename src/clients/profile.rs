//! Profile lookups (stored phone numbers and bank accounts)

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ClientError, ServiceHttp};
use crate::config::ServiceEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    Agent,
    Partner,
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnerType::User => "user",
            OwnerType::Agent => "agent",
            OwnerType::Partner => "partner",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bank_account: Option<String>,
}

#[async_trait]
pub trait ProfileClient: Send + Sync {
    async fn fetch_profile(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> Result<Option<Profile>, ClientError>;
}

pub struct HttpProfileClient {
    http: ServiceHttp,
}

impl HttpProfileClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ClientError> {
        Ok(Self {
            http: ServiceHttp::new("profile", endpoint)?,
        })
    }
}

#[async_trait]
impl ProfileClient for HttpProfileClient {
    async fn fetch_profile(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> Result<Option<Profile>, ClientError> {
        self.http
            .get_optional(&format!("/v1/profiles/{owner_type}/{owner_id}"), &[])
            .await
    }
}
