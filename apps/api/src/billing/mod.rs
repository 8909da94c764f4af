//! Billing: subscription plans, Stripe checkout and webhooks, and monthly usage gating.

pub mod handlers;
pub mod plans;
pub mod stripe;
pub mod usage;
pub mod webhook;
