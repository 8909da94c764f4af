pub mod documents;
pub mod insights;
pub mod payment;
pub mod profile;
pub mod session;
