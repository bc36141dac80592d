//! Membership Gate Module
//!
//! Optional requirement that buyers belong to a channel before receiving
//! anything. A buyer who is not a member gets a join prompt, and a watch task
//! re-checks a bounded number of times so the request continues by itself
//! once they have joined.

use crate::channel::{Membership, MessageChannel};
use crate::config::MembershipConfig;
use crate::types::UserId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a membership watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The user joined and the continuation ran
    Joined,
    /// Every attempt came back "not a member"
    GaveUp,
    Cancelled,
}

/// Running re-check task
pub struct MembershipWatch {
    cancel: CancellationToken,
    handle: JoinHandle<WatchOutcome>,
}

impl MembershipWatch {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to end
    pub async fn join(self) -> WatchOutcome {
        self.handle.await.unwrap_or(WatchOutcome::Cancelled)
    }
}

#[derive(Clone)]
pub struct MembershipGate {
    channel: Arc<dyn MessageChannel>,
    required: Option<String>,
    attempts: u32,
    interval: Duration,
}

impl MembershipGate {
    pub fn new(channel: Arc<dyn MessageChannel>, config: &MembershipConfig) -> Self {
        Self {
            channel,
            required: config.channel.clone().filter(|c| !c.trim().is_empty()),
            attempts: config.check_attempts,
            interval: Duration::from_secs(config.check_interval_secs),
        }
    }

    /// Channel buyers must join, if any
    pub fn required_channel(&self) -> Option<&str> {
        self.required.as_deref()
    }

    /// Whether `user` may proceed
    ///
    /// Always true when no channel is required. A failed lookup counts as
    /// "not a member" so the buyer is asked to join rather than let through.
    pub async fn is_member(&self, user: UserId) -> bool {
        let Some(channel) = self.required.as_deref() else {
            return true;
        };
        match self.channel.get_chat_member(channel, user).await {
            Ok(Membership::Member) => true,
            Ok(Membership::NotMember) => false,
            Err(e) => {
                warn!("Membership check for {} in {} failed: {}", user, channel, e);
                false
            }
        }
    }

    /// Re-checks `user` until they join, attempts run out or the watch is cancelled
    ///
    /// # Arguments
    /// * `user` - Buyer who was shown the join prompt
    /// * `on_joined` - Continuation run once, as soon as membership is seen
    pub fn watch<F, Fut>(&self, user: UserId, on_joined: F) -> MembershipWatch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let gate = self.clone();

        let handle = tokio::spawn(async move {
            for attempt in 1..=gate.attempts {
                if gate.is_member(user).await {
                    debug!("{} joined after {} checks", user, attempt);
                    on_joined().await;
                    return WatchOutcome::Joined;
                }
                tokio::select! {
                    _ = token.cancelled() => return WatchOutcome::Cancelled,
                    _ = tokio::time::sleep(gate.interval) => {}
                }
            }
            debug!("Gave up waiting for {} to join", user);
            WatchOutcome::GaveUp
        });

        MembershipWatch { cancel, handle }
    }
}
