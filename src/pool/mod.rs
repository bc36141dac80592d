//! Amount Pool Module
//!
//! This module allocates the per-purchase payable amounts:
//! - A unique amount slightly above the batch price for every open payment
//! - Release of that amount when the payment is resolved or expires

mod amount_pool;

pub use amount_pool::{AmountPool, PaymentRequest};
