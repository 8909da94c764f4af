//! Stripe REST client: checkout sessions and subscription lookup.
//!
//! Requests are form-encoded against the Stripe API with the secret key as bearer token.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stripe API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: String,
}

/// Parameters for a subscription checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub price_id: &'a str,
    pub user_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_base_url(secret_key, STRIPE_API_BASE)
    }

    pub fn with_base_url(secret_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, PaymentError> {
        let params = [
            ("mode", "subscription"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", request.price_id),
            ("line_items[0][quantity]", "1"),
            ("metadata[userId]", request.user_id),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("allow_promotion_codes", "true"),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        let session: CheckoutSession = read_json(response).await?;
        info!(session_id = %session.id, user_id = %request.user_id, "Created checkout session");
        Ok(session)
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PaymentError> {
        let response = self
            .http
            .get(format!("{}/v1/subscriptions/{subscription_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        read_json(response).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    error!(status = status.as_u16(), %message, "Stripe API error");
    Err(PaymentError::Api {
        status: status.as_u16(),
        message,
    })
}
