//! Link Module
//!
//! A batch is addressed by its id embedded in a deep link into the bot:
//! `https://t.me/<bot>?start=<batch_id>`. Holding the link is the only access
//! control for free batches.

use crate::types::{BatchId, Payee};
use rust_decimal::Decimal;

/// Builds share links for one bot account
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    bot_username: String,
}

impl LinkBuilder {
    pub fn new(bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into(),
        }
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    pub fn share_link(&self, batch_id: &BatchId) -> String {
        format!(
            "https://t.me/{}?start={}",
            self.bot_username,
            urlencoding::encode(batch_id.as_str())
        )
    }

    /// URL of the external payment page prefilled for one purchase
    ///
    /// # Arguments
    /// * `page_url` - Base URL of the payment page
    /// * `amount` - The purchase's unique amount
    /// * `payee` - Where the money goes
    pub fn payment_page_link(&self, page_url: &str, amount: Decimal, payee: &Payee) -> String {
        format!(
            "{}?amount={}&upi={}&name={}&bot={}",
            page_url,
            urlencoding::encode(&amount.to_string()),
            urlencoding::encode(&payee.reference),
            urlencoding::encode(&payee.name),
            urlencoding::encode(&self.bot_username),
        )
    }
}

/// Extracts a batch id from either a bare id or a share link
///
/// # Returns
/// `None` if the input is neither a plausible id nor a link carrying a
/// `start` parameter
pub fn parse_batch_id(input: &str) -> Option<BatchId> {
    let input = input.trim();
    let raw = match input.split_once('?') {
        Some((_, query)) => query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "start")
            .and_then(|(_, value)| urlencoding::decode(value).ok())?
            .into_owned(),
        None => input.to_string(),
    };

    let plausible = !raw.is_empty()
        && raw.len() <= 64
        && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    plausible.then(|| BatchId::new(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_share_link_round_trips() {
        let links = LinkBuilder::new("filebot");
        let id = BatchId::new("abc123xyz789");
        let link = links.share_link(&id);
        assert_eq!(link, "https://t.me/filebot?start=abc123xyz789");
        assert_eq!(parse_batch_id(&link), Some(id));
    }

    #[test]
    fn test_bare_id_is_accepted() {
        assert_eq!(
            parse_batch_id("  abc123  "),
            Some(BatchId::new("abc123"))
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_batch_id(""), None);
        assert_eq!(parse_batch_id("not an id"), None);
        assert_eq!(parse_batch_id("https://t.me/filebot?foo=bar"), None);
    }

    #[test]
    fn test_payment_page_link_encodes_values() {
        let links = LinkBuilder::new("filebot");
        let payee = Payee {
            reference: "shop@upi".into(),
            name: "Jane Doe".into(),
        };
        let link = links.payment_page_link(
            "https://pay.example/checkout",
            Decimal::from_str("10.01").unwrap(),
            &payee,
        );
        assert_eq!(
            link,
            "https://pay.example/checkout?amount=10.01&upi=shop%40upi&name=Jane%20Doe&bot=filebot"
        );
    }
}
