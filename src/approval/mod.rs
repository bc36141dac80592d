//! Approval Workflow Module
//!
//! This module implements the purchase state machine:
//! - Workflow: buyer request, confirmation, seller approval or decline
//! - Jobs: handlers for the expiry and cleanup timers
//! - Notices: texts and controls shown to buyers and sellers

mod jobs;
mod notices;
mod workflow;

#[cfg(test)]
mod tests;

pub use notices::Control;
pub use workflow::{AccessOutcome, ApprovalWorkflow, Resolution};
