//! Misfire Policy Module
//!
//! Decides what happens to a job whose firing time passed while nothing was
//! running (process down, dispatcher stalled).

use chrono::{DateTime, Duration, Utc};

/// How late a job is when it gets picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lateness {
    /// Late by no more than the grace period
    WithinGrace,
    /// Late by more than the grace period
    BeyondGrace,
}

/// Overdue jobs always fire; the grace period only separates routine
/// scheduling delay from a real misfire worth a warning.
#[derive(Debug, Clone, Copy)]
pub struct MisfirePolicy {
    grace: Duration,
}

impl MisfirePolicy {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn classify(&self, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Lateness {
        if now - fire_at > self.grace {
            Lateness::BeyondGrace
        } else {
            Lateness::WithinGrace
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lateness_is_measured_against_grace() {
        let policy = MisfirePolicy::new(Duration::seconds(300));
        let now = Utc::now();
        assert_eq!(policy.classify(now, now), Lateness::WithinGrace);
        assert_eq!(
            policy.classify(now - Duration::seconds(300), now),
            Lateness::WithinGrace
        );
        assert_eq!(
            policy.classify(now - Duration::hours(2), now),
            Lateness::BeyondGrace
        );
    }
}
