//! Messages sent to buyers and sellers, and the controls attached to them

use crate::channel::{Action, OutgoingMessage};
use crate::delivery::DeliveryReport;
use crate::types::{BatchId, FileBatch, PaymentId, PendingPayment, Provenance};

/// Inline control pressed by a buyer or seller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Buyer says the money was sent
    Paid(PaymentId),
    Approve(PaymentId),
    Decline(PaymentId),
    /// Buyer says they joined the required channel
    CheckJoin(BatchId),
}

impl Control {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(id) = data.strip_prefix("i_paid_") {
            return Some(Control::Paid(PaymentId::new(id)));
        }
        if let Some(id) = data.strip_prefix("approve_") {
            return Some(Control::Approve(PaymentId::new(id)));
        }
        if let Some(id) = data.strip_prefix("decline_") {
            return Some(Control::Decline(PaymentId::new(id)));
        }
        data.strip_prefix("check_join_")
            .map(|id| Control::CheckJoin(BatchId::new(id)))
    }

    pub fn data(&self) -> String {
        match self {
            Control::Paid(id) => format!("i_paid_{id}"),
            Control::Approve(id) => format!("approve_{id}"),
            Control::Decline(id) => format!("decline_{id}"),
            Control::CheckJoin(id) => format!("check_join_{id}"),
        }
    }
}

pub fn invalid_link() -> OutgoingMessage {
    OutgoingMessage::text("❌ This link is invalid or the files were removed.")
}

pub fn busy() -> OutgoingMessage {
    OutgoingMessage::text(
        "⏳ Too many purchases are in progress right now. Please try again in a few minutes.",
    )
}

pub fn join_prompt(channel: &str, batch_id: &BatchId) -> OutgoingMessage {
    let handle = channel.trim_start_matches('@');
    OutgoingMessage::text(format!(
        "🔒 Join {channel} to get these files, then press the button below."
    ))
    .with_action(Action::url("Join channel", format!("https://t.me/{handle}")))
    .with_action(Action::callback(
        "I have joined",
        Control::CheckJoin(batch_id.clone()).data(),
    ))
}

pub fn still_not_member(channel: &str) -> OutgoingMessage {
    OutgoingMessage::text(format!("You have not joined {channel} yet."))
}

pub fn payment_instructions(
    payment: &PendingPayment,
    window_minutes: i64,
    pay_url: String,
) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "💳 To unlock these files pay exactly ₹{amount}.\n\n\
         The amount is unique to your purchase, so pay it to the paisa.\n\
         Press \"I Have Paid\" within {window_minutes} minutes of paying.",
        amount = payment.unique_amount,
    ))
    .with_action(Action::url("Pay Now", pay_url))
    .with_action(Action::callback(
        "I Have Paid",
        Control::Paid(payment.id.clone()).data(),
    ))
}

pub fn payment_gone() -> OutgoingMessage {
    OutgoingMessage::text("⌛ This payment request has expired or was already handled.")
}

pub fn awaiting_seller(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "🕐 Thanks! The seller is checking your payment of ₹{}. You will get the files once it is approved.",
        payment.unique_amount
    ))
}

pub fn seller_prompt(payment: &PendingPayment, batch: &FileBatch) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "🔔 New payment to verify\n\n\
         Buyer: {buyer}\n\
         Batch: {batch}\n\
         Amount: ₹{amount}\n\n\
         Approve only after the exact amount shows up in your account.",
        buyer = payment.buyer,
        batch = batch.id,
        amount = payment.unique_amount,
    ))
    .with_action(Action::callback(
        "✅ Approve",
        Control::Approve(payment.id.clone()).data(),
    ))
    .with_action(Action::callback(
        "❌ Decline",
        Control::Decline(payment.id.clone()).data(),
    ))
}

pub fn automated_notice(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "🤖 Your payment of ₹{} was verified automatically.",
        payment.unique_amount
    ))
}

pub fn seller_summary(
    payment: &PendingPayment,
    provenance: Provenance,
    report: &DeliveryReport,
) -> OutgoingMessage {
    let delivery = if report.success {
        format!("Delivered all {} files.", report.total)
    } else {
        format!(
            "⚠️ Delivery incomplete: the buyer received {} of {} files.",
            report.delivered_count, report.total
        )
    };
    OutgoingMessage::text(format!(
        "✅ Payment of ₹{} from {} approved.\nResolved by: {}\n{}",
        payment.unique_amount, payment.buyer, provenance, delivery
    ))
}

pub fn declined_buyer(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "❌ The seller could not verify your payment of ₹{}. Contact them if you believe this is a mistake.",
        payment.unique_amount
    ))
}

pub fn declined_seller(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Declined payment of ₹{} from {}.",
        payment.unique_amount, payment.buyer
    ))
}

pub fn confirmation_expired(share_link: String) -> OutgoingMessage {
    OutgoingMessage::text(
        "⌛ Your payment window has closed. Open the link again to get a new payment amount.",
    )
    .with_action(Action::url("Start again", share_link))
}

pub fn approval_expired_buyer(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "⌛ The seller did not review your payment of ₹{} in time. Contact them with your payment details.",
        payment.unique_amount
    ))
}

pub fn approval_expired_seller(payment: &PendingPayment) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "⌛ The payment of ₹{} from {} expired without a decision.",
        payment.unique_amount, payment.buyer
    ))
}

pub fn batch_gone() -> OutgoingMessage {
    OutgoingMessage::text("❌ The files for this purchase no longer exist. Contact the seller.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_parse_back() {
        let controls = [
            Control::Paid(PaymentId::new("p1")),
            Control::Approve(PaymentId::new("p2")),
            Control::Decline(PaymentId::new("p3")),
            Control::CheckJoin(BatchId::new("b1")),
        ];
        for control in controls {
            assert_eq!(Control::parse(&control.data()), Some(control));
        }
        assert_eq!(Control::parse("unknown_x"), None);
    }
}
