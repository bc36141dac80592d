//! Configuration Module
//!
//! This module defines all configuration structures for paylink.
//! Configuration is loaded from TOML files and parsed using serde.
//! Every section has defaults, so a file only needs the keys it changes.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::UserId;

/// Largest accepted `payment.amount_offset_cap`.
pub const MAX_AMOUNT_OFFSET_CAP: u32 = 500;

/// Environment variable that overrides `automation.secret`.
pub const AUTOMATION_SECRET_ENV: &str = "PAYLINK_AUTOMATION_SECRET";

/// Longest accepted window, TTL, retention, grace or lease: one year.
pub const MAX_PERIOD_SECS: i64 = 366 * 24 * 3600;

/// Longest accepted dispatcher poll interval: one minute.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// `minutes`/`hours`/`seconds` scaled to seconds and clamped into `0..=MAX_PERIOD_SECS`
fn period_secs(value: i64, unit_secs: i64) -> i64 {
    value.saturating_mul(unit_secs).clamp(0, MAX_PERIOD_SECS)
}

fn period(value: i64, unit_secs: i64) -> chrono::Duration {
    chrono::Duration::seconds(period_secs(value, unit_secs))
}

fn std_period(value: u64, unit_secs: i64) -> Duration {
    let value = i64::try_from(value).unwrap_or(i64::MAX);
    Duration::from_secs(period_secs(value, unit_secs).unsigned_abs())
}

/// Main configuration structure
///
/// # Example TOML
/// ```toml
/// [api]
/// host = "0.0.0.0"
/// port = 8080
///
/// [database]
/// url = "sqlite://paylink.db"
///
/// [payment]
/// amount_offset_cap = 99
/// confirmation_window_minutes = 30
///
/// [automation]
/// secret = "change-me"
/// trusted_owners = [2098589219]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    pub delivery: DeliveryConfig,
    pub scheduler: SchedulerConfig,
    pub sessions: SessionConfig,
    pub automation: AutomationConfig,
    pub links: LinkConfig,
    pub membership: MembershipConfig,
}

/// HTTP server configuration
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
///
/// # Fields
/// - `url`: sqlx SQLite URL (e.g., "sqlite://paylink.db" or "sqlite::memory:")
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://paylink.db".to_string(),
        }
    }
}

/// Paid-purchase configuration
///
/// # Fields
/// - `amount_offset_cap`: How many one-cent offsets above the base price may be handed out
/// - `confirmation_window_minutes`: Time the buyer has to press "I have paid"
/// - `approval_window_hours`: Time the seller has to approve or decline
/// - `payment_page_url`: Page the "Pay Now" control points at
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub amount_offset_cap: u32,
    pub confirmation_window_minutes: i64,
    pub approval_window_hours: i64,
    pub payment_page_url: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            amount_offset_cap: 99,
            confirmation_window_minutes: 30,
            approval_window_hours: 24,
            payment_page_url: "https://example.invalid/pay".to_string(),
        }
    }
}

impl PaymentConfig {
    pub fn confirmation_window(&self) -> chrono::Duration {
        period(self.confirmation_window_minutes, 60)
    }

    pub fn approval_window(&self) -> chrono::Duration {
        period(self.approval_window_hours, 3600)
    }
}

/// Delivery retention configuration
///
/// Delivered messages are deleted from the buyer's chat once retention elapses.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub free_retention_minutes: u64,
    pub paid_retention_hours: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            free_retention_minutes: 30,
            paid_retention_hours: 24,
        }
    }
}

impl DeliveryConfig {
    pub fn free_retention(&self) -> Duration {
        std_period(self.free_retention_minutes, 60)
    }

    pub fn paid_retention(&self) -> Duration {
        std_period(self.paid_retention_hours, 3600)
    }
}

/// Job dispatcher configuration
///
/// # Fields
/// - `poll_interval_ms`: How often the dispatcher looks for due jobs
/// - `misfire_grace_secs`: Lateness tolerated before a firing is reported as a misfire
/// - `lease_secs`: How long a claimed job stays invisible to other dispatchers
/// - `batch_limit`: Maximum jobs fired per poll
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub misfire_grace_secs: i64,
    pub lease_secs: i64,
    pub batch_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            misfire_grace_secs: 300,
            lease_secs: 120,
            batch_limit: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    pub fn misfire_grace(&self) -> chrono::Duration {
        period(self.misfire_grace_secs, 1)
    }

    pub fn lease(&self) -> chrono::Duration {
        period(self.lease_secs, 1)
    }
}

/// Draft and edit session inactivity limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub draft_ttl_minutes: i64,
    pub edit_ttl_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            draft_ttl_minutes: 60,
            edit_ttl_minutes: 30,
        }
    }
}

impl SessionConfig {
    pub fn draft_ttl(&self) -> chrono::Duration {
        period(self.draft_ttl_minutes, 60)
    }

    pub fn edit_ttl(&self) -> chrono::Duration {
        period(self.edit_ttl_minutes, 60)
    }
}

/// Automation webhook configuration
///
/// # Fields
/// - `secret`: Shared secret expected in the `X-Automation-Secret` header
/// - `trusted_owners`: Sellers whose payments automation may approve
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub secret: String,
    pub trusted_owners: Vec<i64>,
}

impl AutomationConfig {
    pub fn trusted(&self) -> impl Iterator<Item = UserId> + '_ {
        self.trusted_owners.iter().copied().map(UserId)
    }
}

/// Share link configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub bot_username: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bot_username: "paylink_bot".to_string(),
        }
    }
}

/// Channel membership gate
///
/// When `channel` is unset every buyer passes the gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub channel: Option<String>,
    pub check_attempts: u32,
    pub check_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            channel: None,
            check_attempts: 6,
            check_interval_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was read, parsed and validated
    /// * `Err` if the file couldn't be read, the TOML is invalid or a value is out of range
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;

        if let Ok(secret) = std::env::var(AUTOMATION_SECRET_ENV) {
            config.automation.secret = secret;
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let payment = &self.payment;
        let delivery = &self.delivery;
        let scheduler = &self.scheduler;
        let sessions = &self.sessions;
        let minutes = MAX_PERIOD_SECS / 60;
        let hours = MAX_PERIOD_SECS / 3600;

        within("payment.amount_offset_cap", payment.amount_offset_cap, 1, MAX_AMOUNT_OFFSET_CAP)?;
        within("payment.confirmation_window_minutes", payment.confirmation_window_minutes, 1, minutes)?;
        within("payment.approval_window_hours", payment.approval_window_hours, 1, hours)?;
        within("delivery.free_retention_minutes", delivery.free_retention_minutes, 1, minutes.unsigned_abs())?;
        within("delivery.paid_retention_hours", delivery.paid_retention_hours, 1, hours.unsigned_abs())?;
        within("scheduler.poll_interval_ms", scheduler.poll_interval_ms, 1, MAX_POLL_INTERVAL_MS)?;
        within("scheduler.misfire_grace_secs", scheduler.misfire_grace_secs, 0, MAX_PERIOD_SECS)?;
        within("scheduler.lease_secs", scheduler.lease_secs, 1, MAX_PERIOD_SECS)?;
        // A zero limit would lease nothing and every timer would stall
        within("scheduler.batch_limit", scheduler.batch_limit, 1, u32::MAX)?;
        within("sessions.draft_ttl_minutes", sessions.draft_ttl_minutes, 1, minutes)?;
        within("sessions.edit_ttl_minutes", sessions.edit_ttl_minutes, 1, minutes)?;
        Ok(())
    }
}

fn within<T>(key: &str, value: T, min: T, max: T) -> anyhow::Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        anyhow::bail!("{} must be within {}..={}, got {}", key, min, max, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.payment.amount_offset_cap, 99);
        assert_eq!(config.delivery.free_retention(), Duration::from_secs(30 * 60));
        assert_eq!(config.payment.approval_window(), chrono::Duration::hours(24));
        assert!(config.membership.channel.is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::parse(
            r#"
            [payment]
            amount_offset_cap = 500

            [automation]
            secret = "s3cret"
            trusted_owners = [7, 9]
            "#,
        )
        .unwrap();
        assert_eq!(config.payment.amount_offset_cap, 500);
        assert_eq!(config.automation.secret, "s3cret");
        assert_eq!(
            config.automation.trusted().collect::<Vec<_>>(),
            vec![UserId(7), UserId(9)]
        );
    }

    #[test]
    fn test_offset_cap_out_of_range_is_rejected() {
        assert!(Config::parse("[payment]\namount_offset_cap = 0").is_err());
        assert!(Config::parse("[payment]\namount_offset_cap = 501").is_err());
    }

    #[test]
    fn test_stalling_scheduler_settings_are_rejected() {
        assert!(Config::parse("[scheduler]\nbatch_limit = 0").is_err());
        assert!(Config::parse("[scheduler]\npoll_interval_ms = 0").is_err());
        assert!(Config::parse("[scheduler]\nlease_secs = 0").is_err());
        assert!(Config::parse("[scheduler]\nmisfire_grace_secs = -1").is_err());
    }

    #[test]
    fn test_out_of_range_periods_are_rejected() {
        for content in [
            "[sessions]\ndraft_ttl_minutes = 9223372036854775807",
            "[sessions]\nedit_ttl_minutes = 0",
            "[payment]\nconfirmation_window_minutes = 0",
            "[payment]\napproval_window_hours = 9223372036854775807",
            "[delivery]\nfree_retention_minutes = 0",
            "[delivery]\npaid_retention_hours = 9223372036854775807",
        ] {
            let err = Config::parse(content).unwrap_err();
            assert!(err.to_string().contains("must be within"), "{content}: {err}");
        }
    }

    #[test]
    fn test_period_helpers_never_panic_on_unchecked_values() {
        let mut config = Config::default();
        config.sessions.draft_ttl_minutes = i64::MAX;
        config.delivery.paid_retention_hours = u64::MAX;
        config.scheduler.lease_secs = i64::MIN;
        assert_eq!(config.sessions.draft_ttl(), chrono::Duration::seconds(MAX_PERIOD_SECS));
        assert_eq!(
            config.delivery.paid_retention(),
            Duration::from_secs(MAX_PERIOD_SECS as u64)
        );
        assert_eq!(config.scheduler.lease(), chrono::Duration::zero());
    }
}
