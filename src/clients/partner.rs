//! Partner directory and partner webhooks
//!
//! Partners are external payment providers (mobile money, banks). The
//! directory lists who offers a service; the webhook hands a settled request
//! over to the partner for the off-ledger leg.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ClientError, ServiceHttp};
use crate::config::ServiceEndpoint;
use crate::request::types::UserId;
use crate::resolver::destination::DestinationKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub services: Vec<String>,
    /// Currency the partner's users enter amounts in
    #[serde(default)]
    pub local_currency: Option<String>,
    /// Local units per settlement unit
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,
    /// Where the partner pays out to, or collects from
    #[serde(default = "default_destination_kind")]
    pub destination_kind: DestinationKind,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_destination_kind() -> DestinationKind {
    DestinationKind::Phone
}

fn default_active() -> bool {
    true
}

impl Partner {
    pub fn offers(&self, service: &str) -> bool {
        self.services.iter().any(|s| s.eq_ignore_ascii_case(service))
    }
}

/// Webhook body sent once the ledger leg has moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartnerInitiation {
    pub partner_id: String,
    pub transaction_ref: String,
    pub user_id: UserId,
    pub destination: String,
    pub destination_kind: DestinationKind,
    /// Settlement-currency amount
    pub amount: Decimal,
    pub currency: String,
    pub original_amount: Decimal,
    pub original_currency: String,
    pub exchange_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerAck {
    pub transaction_id: String,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

#[async_trait]
pub trait PartnerClient: Send + Sync {
    async fn get_partners_by_service(&self, service: &str) -> Result<Vec<Partner>, ClientError>;

    async fn initiate_deposit(&self, req: &PartnerInitiation) -> Result<PartnerAck, ClientError>;

    async fn initiate_withdrawal(
        &self,
        req: &PartnerInitiation,
    ) -> Result<PartnerAck, ClientError>;
}

pub struct HttpPartnerClient {
    http: ServiceHttp,
}

impl HttpPartnerClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ClientError> {
        Ok(Self {
            http: ServiceHttp::new("partner", endpoint)?,
        })
    }
}

#[async_trait]
impl PartnerClient for HttpPartnerClient {
    async fn get_partners_by_service(&self, service: &str) -> Result<Vec<Partner>, ClientError> {
        self.http
            .get_optional("/v1/partners", &[("service", service.to_string())])
            .await
            .map(Option::unwrap_or_default)
    }

    async fn initiate_deposit(&self, req: &PartnerInitiation) -> Result<PartnerAck, ClientError> {
        self.http
            .post(&format!("/v1/partners/{}/deposits", req.partner_id), req)
            .await
    }

    async fn initiate_withdrawal(
        &self,
        req: &PartnerInitiation,
    ) -> Result<PartnerAck, ClientError> {
        self.http
            .post(&format!("/v1/partners/{}/withdrawals", req.partner_id), req)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partner_defaults() {
        let p: Partner = serde_json::from_str(
            r#"{"id":"mpesa-ke","name":"M-Pesa","services":["mpesa"],"local_currency":"KES","exchange_rate":"130"}"#,
        )
        .unwrap();
        assert!(p.active);
        assert_eq!(p.destination_kind, DestinationKind::Phone);
        assert!(p.offers("MPESA"));
        assert!(!p.offers("airtel"));
        assert_eq!(p.exchange_rate, Some(Decimal::from(130)));
    }
}
