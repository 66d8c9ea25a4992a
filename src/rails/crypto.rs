//! Crypto rail
//!
//! Outbound only. The destination address decides the path:
//! - an address held by another user of the platform settles as an internal
//!   ledger transfer between the two users
//! - anything else is an on-chain withdrawal: the user is debited against
//!   the system liquidity account, then custody broadcasts the transaction

use tracing::{error, info};

use super::executor::{Outcome, SettlementExecutor};
use super::{Intake, RailServices, SettlementIntent};
use crate::clients::ClientError;
use crate::clients::custody::{CustodyWithdrawal, Wallet};
use crate::clients::ledger::LedgerAccount;
use crate::error::SettlementError;
use crate::money::{self, Precision};
use crate::request::types::OpsMetadata;
use crate::request::{Direction, Movement, NewRequest, Quote, RailDetails, SettlementRequest};
use crate::resolver::address::Chain;

pub const SERVICE: &str = "crypto";

fn custody_error(e: ClientError) -> SettlementError {
    SettlementError::Custody(e.to_string())
}

/// Whether `wallet` holds the canonical `address`
fn holds_address(wallet: &Wallet, address: &str) -> bool {
    match wallet.chain.canonical_address(&wallet.address) {
        Ok(own) => own == address,
        // Custody may hold forms this service does not validate
        Err(_) => wallet.address == address,
    }
}

/// Custody wallet at `address`, trying the canonical form first
async fn wallet_at(
    services: &RailServices,
    address: &str,
    entered: &str,
) -> Result<Option<Wallet>, SettlementError> {
    let found = services
        .custody
        .get_wallet_by_address(address)
        .await
        .map_err(custody_error)?;
    if found.is_some() || entered == address {
        return Ok(found);
    }
    services
        .custody
        .get_wallet_by_address(entered)
        .await
        .map_err(custody_error)
}

pub async fn build(
    services: &RailServices,
    intake: &Intake,
    intent: &SettlementIntent,
) -> Result<NewRequest, SettlementError> {
    if intake.direction == Direction::Deposit {
        return Err(SettlementError::CryptoDepositUnsupported);
    }

    let asset = intent.currency.trim().to_ascii_uppercase();
    let chain = match intent.chain.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(name) => name.parse::<Chain>()?,
        None => Chain::default_for_asset(&asset).ok_or_else(|| {
            SettlementError::InvalidPayload(format!("chain is required for {asset}"))
        })?,
    };
    let decimals = chain
        .asset_decimals(&asset)
        .ok_or_else(|| SettlementError::UnsupportedAsset(format!("{asset} on {chain}")))?;
    let conversion = money::identity(intent.amount, Precision::Crypto)?;

    let entered = intent
        .destination
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or(SettlementError::MissingDestination)?;
    let address = chain.canonical_address(entered)?;

    let own_wallets = services
        .custody
        .get_user_wallets(intake.user_id)
        .await
        .map_err(custody_error)?;
    if own_wallets.iter().any(|w| holds_address(w, &address)) {
        return Err(SettlementError::SelfTransfer);
    }
    if !own_wallets.iter().any(|w| w.holds(chain, &asset)) {
        return Err(SettlementError::WalletNotFound(format!("{asset} on {chain}")));
    }

    let sender = LedgerAccount::user(intake.user_id, &asset);
    let recipient = wallet_at(services, &address, entered).await?;

    let (movement, details) = match recipient {
        Some(wallet) => {
            if wallet.user_id == intake.user_id {
                return Err(SettlementError::SelfTransfer);
            }
            if !wallet.holds(chain, &asset) {
                return Err(SettlementError::AssetMismatch(format!(
                    "destination holds {} on {}, not {asset} on {chain}",
                    wallet.asset, wallet.chain
                )));
            }
            (
                Movement::Transfer {
                    from: sender,
                    to: LedgerAccount::user(wallet.user_id, &asset),
                },
                RailDetails::CryptoInternal {
                    chain,
                    asset: asset.clone(),
                    address: address.clone(),
                    recipient_user_id: wallet.user_id,
                },
            )
        }
        None => {
            let smallest = money::to_smallest_unit(conversion.amount, decimals)?;
            (
                Movement::Transfer {
                    from: sender,
                    to: LedgerAccount::liquidity(&asset),
                },
                RailDetails::CryptoExternal {
                    chain,
                    asset: asset.clone(),
                    address: address.clone(),
                    decimals,
                    amount_smallest_unit: smallest.to_string(),
                },
            )
        }
    };

    Ok(NewRequest {
        request_ref: intake.request_ref,
        cid: intake.cid.clone(),
        user_id: intake.user_id,
        direction: intake.direction,
        service: SERVICE.to_string(),
        amount: conversion.amount,
        currency: asset.clone(),
        quote: Quote {
            original_amount: intent.amount,
            original_currency: asset,
            exchange_rate: conversion.rate,
        },
        agent_external_id: None,
        partner_id: None,
        destination: Some(address),
        movement,
        details,
        expires_at: intake.expires_at,
    })
}

pub async fn settle_internal(exec: &SettlementExecutor, record: &SettlementRequest) -> Outcome {
    match exec.move_value(record).await {
        Ok(receipt) => Outcome::Completed {
            receipt,
            ops: OpsMetadata::new(),
        },
        Err(e) => Outcome::LedgerFailed(e.to_string()),
    }
}

pub async fn settle_external(
    exec: &SettlementExecutor,
    record: &SettlementRequest,
    chain: Chain,
    asset: &str,
    address: &str,
    amount_smallest_unit: &str,
) -> Outcome {
    let receipt = match exec.move_value(record).await {
        Ok(receipt) => receipt,
        Err(e) => return Outcome::LedgerFailed(e.to_string()),
    };

    let withdrawal = CustodyWithdrawal {
        accounting_tx_id: receipt.receipt_code.clone(),
        idempotency_key: record.request_ref.to_string(),
        user_id: record.user_id,
        chain,
        asset: asset.to_string(),
        amount: amount_smallest_unit.to_string(),
        to_address: address.to_string(),
    };
    match exec.services().custody.withdraw(&withdrawal).await {
        Ok(custody) => {
            info!(
                request_ref = %record.request_ref,
                custody_tx_id = %custody.transaction_id,
                %chain,
                "On-chain withdrawal submitted"
            );
            Outcome::BlockchainInitiated { receipt, custody }
        }
        Err(e) => {
            error!(request_ref = %record.request_ref, error = %e, "Custody rejected withdrawal");
            Outcome::BlockchainFailed {
                receipt,
                error: e.to_string(),
            }
        }
    }
}
