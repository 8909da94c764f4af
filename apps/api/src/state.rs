use std::sync::Arc;

use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::errors::AppError;
use crate::gateway::DataGateway;
use crate::llm_client::LlmClient;
use crate::storage::ObjectStorage;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn DataGateway>,
    /// CV upload bucket; also receives backup snapshots.
    pub storage: Arc<dyn ObjectStorage>,
    pub llm: LlmClient,
    /// `None` when `STRIPE_SECRET_KEY` is unset; billing routes then answer 503.
    pub stripe: Option<StripeClient>,
    pub config: Config,
}

impl AppState {
    pub fn stripe_client(&self) -> Result<&StripeClient, AppError> {
        self.stripe.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("Payments are not configured".to_string())
        })
    }
}
