//! Axum route handlers for the Billing API.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::plans::{Plan, PREMIUM};
use crate::billing::stripe::{CheckoutRequest, Subscription};
use crate::billing::webhook::{handle_event, verify_signature, SignatureError, StripeEvent, WebhookAction};
use crate::billing::usage::load_profile;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub user_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub action: WebhookAction,
}

/// POST /api/v1/billing/checkout
///
/// Starts a Stripe checkout for the premium plan.
pub async fn handle_create_checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let stripe = state.stripe_client()?;
    let price_id = state
        .config
        .stripe_premium_price_id
        .as_deref()
        .ok_or_else(|| AppError::ServiceUnavailable("Premium price is not configured".to_string()))?;

    if body.success_url.trim().is_empty() || body.cancel_url.trim().is_empty() {
        return Err(AppError::Validation(
            "success_url and cancel_url are required".to_string(),
        ));
    }

    // Checkout only for users that exist.
    load_profile(state.gateway.as_ref(), body.user_id).await?;

    let user_id = body.user_id.to_string();
    let session = stripe
        .create_checkout_session(&CheckoutRequest {
            price_id,
            user_id: &user_id,
            success_url: &body.success_url,
            cancel_url: &body.cancel_url,
        })
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
        plan: PREMIUM,
    }))
}

/// GET /api/v1/billing/subscriptions/:id
pub async fn handle_get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state.stripe_client()?.get_subscription(&subscription_id).await?;
    Ok(Json(subscription))
}

/// POST /api/v1/billing/webhook
///
/// Verifies the Stripe signature over the raw body before parsing anything.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::ServiceUnavailable("Webhook secret is not configured".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    verify_signature(secret, &body, signature, chrono::Utc::now().timestamp()).map_err(
        |err| match err {
            SignatureError::MissingHeader | SignatureError::Malformed => {
                AppError::Validation(err.to_string())
            }
            SignatureError::OutsideTolerance(_) | SignatureError::Mismatch => {
                AppError::Unauthorized(format!("webhook rejected: {err}"))
            }
        },
    )?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {e}")))?;

    let action = handle_event(state.gateway.as_ref(), &event).await?;

    Ok(Json(WebhookResponse {
        received: true,
        action,
    }))
}
