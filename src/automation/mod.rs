//! Payment Automation Module
//!
//! Policy-gated auto-approval for allow-listed sellers, driven by amounts
//! parsed from incoming payment notifications.

mod gateway;

pub use gateway::{AutomationGateway, AutomationOutcome};
