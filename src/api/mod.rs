//! API Module
//!
//! This module handles the HTTP surface of the service.
//! It provides the webhook that payment-notification forwarders call and the
//! health endpoints.

mod amount;
mod server;


pub use amount::extract_amount;
pub use server::{AppState, SECRET_HEADER, Server, router};
