//! Stripe webhook verification and event handling.
//!
//! The `Stripe-Signature` header carries `t=<unix ts>,v1=<hex hmac>`; the HMAC-SHA256 is
//! computed over `"{t}.{raw body}"` with the endpoint's signing secret.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{row_into, to_row, DataGateway, Filter, GatewayError, Table};
use crate::models::payment::{PaymentRecordRow, PaymentStatus, PaymentType};
use crate::models::profile::SubscriptionStatus;

type HmacSha256 = Hmac<Sha256>;

/// Events older than this are rejected as possible replays.
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for timestamps in the future.
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing Stripe-Signature header")]
    MissingHeader,

    #[error("malformed Stripe-Signature header")]
    Malformed,

    #[error("event timestamp outside the tolerance window ({0}s)")]
    OutsideTolerance(i64),

    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=...,v1=...[,v1=...]`; unknown schemes such as `v0` are ignored.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        if header.trim().is_empty() {
            return Err(SignatureError::MissingHeader);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part.split_once('=').ok_or(SignatureError::Malformed)?;
            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse::<i64>()
                            .map_err(|_| SignatureError::Malformed)?,
                    )
                }
                "v1" => signatures
                    .push(hex::decode(value.trim()).map_err(|_| SignatureError::Malformed)?),
                _ => {}
            }
        }

        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Ok(Self {
                timestamp,
                signatures,
            }),
            _ => Err(SignatureError::Malformed),
        }
    }
}

/// Checks the header against the payload at time `now` (unix seconds).
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let header = SignatureHeader::parse(header)?;

    let age = now - header.timestamp;
    if age > MAX_TIMESTAMP_AGE_SECS || age < -MAX_FUTURE_TOLERANCE_SECS {
        warn!(
            event_timestamp = header.timestamp,
            age_secs = age,
            "Webhook timestamp outside tolerance"
        );
        return Err(SignatureError::OutsideTolerance(age));
    }

    let expected = compute_signature(secret, header.timestamp, payload);
    let matched = header
        .signatures
        .iter()
        .any(|candidate| expected.as_slice().ct_eq(candidate.as_slice()).into());

    if matched {
        Ok(())
    } else {
        warn!("Invalid webhook signature");
        Err(SignatureError::Mismatch)
    }
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
struct CompletedCheckout {
    id: String,
    customer: Option<String>,
    subscription: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: CheckoutMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutMetadata {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeletedSubscription {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewPaymentRecord<'a> {
    user_id: Uuid,
    stripe_customer_id: Option<&'a str>,
    stripe_subscription_id: Option<&'a str>,
    amount: f64,
    currency: &'a str,
    status: PaymentStatus,
    payment_type: PaymentType,
    metadata: Value,
}

/// What a webhook event did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    UpgradedToPremium,
    DowngradedToFree,
    Ignored,
}

/// Applies a verified event to profiles and payment records.
pub async fn handle_event(
    gateway: &dyn DataGateway,
    event: &StripeEvent,
) -> Result<WebhookAction, GatewayError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let Ok(session) = serde_json::from_value::<CompletedCheckout>(event.data.object.clone())
            else {
                warn!(event_id = %event.id, "Unparseable checkout session in webhook");
                return Ok(WebhookAction::Ignored);
            };
            complete_checkout(gateway, &event.id, session).await
        }
        "customer.subscription.deleted" => {
            let Ok(subscription) =
                serde_json::from_value::<DeletedSubscription>(event.data.object.clone())
            else {
                warn!(event_id = %event.id, "Unparseable subscription in webhook");
                return Ok(WebhookAction::Ignored);
            };
            let changes = to_row(&serde_json::json!({
                "subscription_status": SubscriptionStatus::Free.as_str(),
                "updated_at": Utc::now(),
            }))?;
            let updated = gateway
                .update(
                    Table::Profiles,
                    &Filter::new().eq("stripe_subscription_id", subscription.id.as_str()),
                    changes,
                )
                .await?;
            info!(subscription_id = %subscription.id, updated, "Subscription cancelled");
            Ok(WebhookAction::DowngradedToFree)
        }
        other => {
            info!(event_id = %event.id, event_type = other, "Ignoring webhook event");
            Ok(WebhookAction::Ignored)
        }
    }
}

async fn complete_checkout(
    gateway: &dyn DataGateway,
    event_id: &str,
    session: CompletedCheckout,
) -> Result<WebhookAction, GatewayError> {
    let Some(user_id) = session
        .metadata
        .user_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
    else {
        warn!(event_id, session_id = %session.id, "Checkout session without a valid userId");
        return Ok(WebhookAction::Ignored);
    };

    let changes = to_row(&serde_json::json!({
        "subscription_status": SubscriptionStatus::Premium.as_str(),
        "stripe_customer_id": session.customer,
        "stripe_subscription_id": session.subscription,
        "updated_at": Utc::now(),
    }))?;
    gateway
        .update(Table::Profiles, &Filter::new().eq("id", user_id), changes)
        .await?;

    let record = NewPaymentRecord {
        user_id,
        stripe_customer_id: session.customer.as_deref(),
        stripe_subscription_id: session.subscription.as_deref(),
        amount: session.amount_total.unwrap_or(0) as f64 / 100.0,
        currency: session.currency.as_deref().unwrap_or("usd"),
        status: PaymentStatus::Succeeded,
        payment_type: PaymentType::Subscription,
        metadata: serde_json::json!({ "checkout_session_id": session.id }),
    };
    let payment: PaymentRecordRow =
        row_into(gateway.insert(Table::PaymentRecords, to_row(&record)?).await?)?;

    info!(%user_id, payment_id = %payment.id, amount = payment.amount, "Upgraded profile to premium");
    Ok(WebhookAction::UpgradedToPremium)
}

#[cfg(test)]
pub(crate) fn sign_for_test(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={timestamp},v1={}",
        hex::encode(compute_signature(secret, timestamp, payload))
    )
}
