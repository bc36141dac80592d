//! Batch Publishing Module
//!
//! This module handles everything about a published batch itself:
//! - BatchEngine: publishes a creator's draft as a free or paid batch
//! - Links: share links carrying the batch id, and payment page links

mod engine;
mod link;

pub use engine::{BatchEngine, is_upi_address};
pub use link::{LinkBuilder, parse_batch_id};
