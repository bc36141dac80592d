//! This crate implements a pay-per-link file distribution service.
//! Sellers publish batches of files behind share links; buyers get free
//! batches straight away and unlock paid ones by paying a unique amount that
//! a seller, or automation acting for a trusted seller, then approves.

pub mod types; // Records and ids shared by every component.
pub mod error; // Crate-wide error taxonomy.
pub mod config; // Loads the TOML configuration.
pub mod registry; // Durable store for batches, payments, sessions and jobs.
pub mod pool; // Allocates unique payable amounts.
pub mod scheduler; // Durable timers and the dispatcher that fires them.
pub mod session; // Drafts and edit sessions.
pub mod batch; // Publishing and share links.
pub mod channel; // Messaging channel interface.
pub mod delivery; // Sends batches to buyers and cleans up afterwards.
pub mod validation; // Channel-membership gate.
pub mod approval; // Purchase state machine.
pub mod automation; // Allow-listed automatic approval.
pub mod api; // HTTP webhook and health endpoints.

#[cfg(test)]
mod testing;

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use config::Config;
pub use error::{Error, Result};
pub use approval::ApprovalWorkflow;
