//! Turns one persisted event into per-recipient pushes.
//!
//! Nothing in here returns an error: every per-recipient failure is recorded
//! in the returned report and logged, and the remaining recipients are still
//! attempted. The triggering write has already committed by the time any of
//! these run.

use crate::db::models::Conversation;
use crate::messages::MessageView;
use crate::push::PushProvider;

use super::events::ReceiptPayload;
use super::{BroadcastOutcome, Hub, ServerEvent};

/// What happened to one new message's fan-out.
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Members other than the sender with the conversation open.
    pub viewing: Vec<String>,
    /// Members other than the sender without it open.
    pub not_viewing: Vec<String>,
    /// The live `message` push to the conversation's room.
    pub live: BroadcastOutcome,
    /// Notify targets that got a live `notification` push.
    pub notified: Vec<String>,
    /// Notify targets with no open connection, handed to the push provider.
    pub pushed: Vec<String>,
}

/// Fan out a freshly persisted message.
///
/// The live push goes to every room subscriber but the sender regardless of
/// active view. A secondary notification goes to each recipient who is not
/// viewing the conversation and has not muted it.
pub fn fan_out_new_message(
    hub: &Hub,
    push: &dyn PushProvider,
    conversation: &Conversation,
    message: &MessageView,
    title: &str,
    body: &str,
) -> FanoutReport {
    let sender = message.sender_id.as_str();
    let mut report = FanoutReport::default();

    for member in conversation.members.iter().filter(|m| m.as_str() != sender) {
        if hub.active.is_active(member, &conversation.id) {
            report.viewing.push(member.clone());
        } else {
            report.not_viewing.push(member.clone());
        }
    }

    report.live = hub.broadcast(
        &conversation.id,
        &ServerEvent::Message(message.clone()),
        Some(sender),
    );

    // A viewer whose connections all turned out closed has had their view
    // cleared by the hub, and falls back to notification like anyone else.
    let (still_viewing, gone): (Vec<String>, Vec<String>) = std::mem::take(&mut report.viewing)
        .into_iter()
        .partition(|member| hub.active.is_active(member, &conversation.id));
    report.viewing = still_viewing;
    report.not_viewing.extend(gone);

    let notification = ServerEvent::Notification {
        title: title.to_string(),
        body: body.to_string(),
        conversation_id: conversation.id.clone(),
        message_id: message.id.clone(),
        sender_id: message.sender_id.clone(),
    };

    for target in report
        .not_viewing
        .iter()
        .filter(|r| !conversation.is_muted_by(r))
    {
        match hub.send_to(target, &notification) {
            Ok(_) => report.notified.push(target.clone()),
            Err(failure) => {
                tracing::debug!(
                    user_id = %target,
                    reason = %failure,
                    "No live connection for notification, using push provider"
                );
                push.send(target, title, body);
                report.pushed.push(target.clone());
            }
        }
    }

    if !report.live.failed.is_empty() {
        tracing::warn!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            failed = report.live.failed.len(),
            "Live message push partially failed"
        );
    }

    report
}

/// Tell every room subscriber, sender included, that a message was tombstoned.
pub fn fan_out_deleted(hub: &Hub, conversation_id: &str, message_id: &str) -> BroadcastOutcome {
    let outcome = hub.broadcast(
        conversation_id,
        &ServerEvent::MessageDeleted {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            deleted_for_everyone: true,
        },
        None,
    );

    if !outcome.failed.is_empty() {
        tracing::warn!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            failed = outcome.failed.len(),
            "Delete notice partially failed"
        );
    }
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Delivered,
    Read,
}

/// Tell a message's sender that a recipient received or read it.
/// Receipts go to the sender only, never to the room.
pub fn send_receipt(hub: &Hub, sender_id: &str, receipt: Receipt, payload: ReceiptPayload) -> bool {
    let event = match receipt {
        Receipt::Delivered => ServerEvent::DeliveryReceipt(payload),
        Receipt::Read => ServerEvent::ReadReceipt(payload),
    };

    match hub.send_to(sender_id, &event) {
        Ok(_) => true,
        Err(failure) => {
            tracing::debug!(user_id = %sender_id, reason = %failure, "Receipt not delivered");
            false
        }
    }
}

/// Announce a new conversation to each of its members.
pub fn announce_conversation(hub: &Hub, conversation: &Conversation) {
    let event = ServerEvent::ConversationCreated {
        conversation: conversation.clone(),
    };
    for member in &conversation.members {
        if let Err(failure) = hub.send_to(member, &event) {
            tracing::debug!(
                user_id = %member,
                conversation_id = %conversation.id,
                reason = %failure,
                "Conversation announcement not delivered"
            );
        }
    }
}
