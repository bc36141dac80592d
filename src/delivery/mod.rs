//! Delivery Module
//!
//! Sends purchased or free batches to buyers and removes them again once
//! their retention period is over.

mod service;


pub use service::{DeliveryReport, DeliveryService, retention_label};
