//! Snapshot transform: raw store records to domain entities, and timestamps
//! to display strings.
//!
//! Decoding never waits on the store. A message whose send time has not been
//! assigned yet decodes with `sent_at = Pending`; only records missing
//! required fields are refused.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use duet_shared::constants::{
    CONVERSATIONS_COLLECTION, MESSAGES_COLLECTION, PENDING_TIMESTAMP_LABEL, UNKNOWN_LAST_SEEN_LABEL,
    USERS_COLLECTION,
};
use duet_shared::{ConversationId, MessageId, Timestamp, UserEmail};
use duet_store::Document;

use crate::error::{ClientError, Result};
use crate::models::{Conversation, Message, User};

#[derive(Deserialize)]
struct RawMessage {
    conversation_id: String,
    text: String,
    user: String,
    #[serde(default)]
    sent_at: Option<Value>,
}

#[derive(Deserialize)]
struct RawConversation {
    users: Vec<String>,
}

#[derive(Deserialize)]
struct RawUser {
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    last_seen: Option<Value>,
}

fn decode<T: for<'de> Deserialize<'de>>(collection: &'static str, doc: &Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| ClientError::Decode {
        collection,
        id: doc.id.to_string(),
        reason: e.to_string(),
    })
}

/// Anything that is not a valid timestamp counts as not yet assigned.
fn lenient_timestamp(value: Option<&Value>) -> Option<Timestamp> {
    value.map(|v| Timestamp::from_value(v).unwrap_or(Timestamp::Pending))
}

pub fn message_from_document(doc: &Document) -> Result<Message> {
    let raw: RawMessage = decode(MESSAGES_COLLECTION, doc)?;
    Ok(Message {
        id: MessageId(doc.id.0.clone()),
        conversation_id: ConversationId(raw.conversation_id),
        text: raw.text,
        sent_at: lenient_timestamp(raw.sent_at.as_ref()).unwrap_or(Timestamp::Pending),
        user: UserEmail(raw.user),
    })
}

pub fn conversation_from_document(doc: &Document) -> Result<Conversation> {
    let raw: RawConversation = decode(CONVERSATIONS_COLLECTION, doc)?;
    Ok(Conversation {
        id: ConversationId(doc.id.0.clone()),
        users: raw.users.into_iter().map(UserEmail).collect(),
    })
}

/// User records are keyed by email, so the document id is the address.
pub fn user_from_document(doc: &Document) -> Result<User> {
    let raw: RawUser = decode(USERS_COLLECTION, doc)?;
    Ok(User {
        email: UserEmail(doc.id.0.clone()),
        photo_url: raw.photo_url,
        last_seen: lenient_timestamp(raw.last_seen.as_ref()),
    })
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Render a timestamp for display in the local time zone.
pub fn format_timestamp(ts: Option<&Timestamp>) -> String {
    format_timestamp_at(ts, &Local::now())
}

/// Render `ts` relative to `now`, in `now`'s time zone: `HH:MM` for the
/// same calendar day, a date otherwise. No timestamp renders as an empty
/// string and a pending one as a placeholder.
pub fn format_timestamp_at<Tz>(ts: Option<&Timestamp>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match ts {
        None => String::new(),
        Some(Timestamp::Pending) => PENDING_TIMESTAMP_LABEL.to_string(),
        Some(Timestamp::Resolved(at)) => format_instant(at, now),
    }
}

fn format_instant<Tz>(at: &DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let local = at.with_timezone(&now.timezone());
    if local.date_naive() == now.date_naive() {
        local.format("%H:%M").to_string()
    } else {
        local.format("%-d %b %Y, %H:%M").to_string()
    }
}

/// Last-seen line for a recipient header. `"unknown"` until a resolved
/// value is available.
pub fn last_seen_label(last_seen: Option<&Timestamp>) -> String {
    last_seen_label_at(last_seen, &Local::now())
}

pub fn last_seen_label_at<Tz>(last_seen: Option<&Timestamp>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match last_seen {
        Some(Timestamp::Resolved(at)) => format_instant(at, now),
        _ => UNKNOWN_LAST_SEEN_LABEL.to_string(),
    }
}
