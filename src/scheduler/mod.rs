//! Job Scheduling Module
//!
//! Durable timers for everything that has to happen later:
//! - ExpireConfirmation: a buyer never pressed "I have paid"
//! - ExpireApproval: a seller never approved or declined
//! - DeleteDelivered: delivered messages reach the end of their retention
//!
//! Jobs are rows in the registry, so pending timers survive a restart.

mod dispatcher;
mod policies;
mod scheduler;


pub use dispatcher::{Dispatcher, JobHandler, TickReport};
pub use policies::{Lateness, MisfirePolicy};
pub use scheduler::{CancelOutcome, JobScheduler};
