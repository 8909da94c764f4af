//! Insights: AI-generated CV analysis, interview questions and CV optimization.

pub mod generator;
pub mod handlers;
pub mod prompts;
