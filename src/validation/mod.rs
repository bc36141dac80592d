//! Access Validation Module
//!
//! This module decides whether a buyer may receive a batch at all.
//! Currently that is the optional channel-membership requirement.

mod membership;

pub use membership::{MembershipGate, MembershipWatch, WatchOutcome};
