//! Record Registry Module
//!
//! Durable storage for batches, pending payments, sessions and scheduled jobs.
//! Each record kind has its own submodule adding methods to [`Registry`].

mod batches;
mod database;
mod jobs;
mod payments;
mod sessions;

pub use database::Registry;

#[cfg(test)]
mod tests;
