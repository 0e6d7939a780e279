//! Chat widget completion messages
//!
//! The embedded chat posts `{type: "completion", data: {...}}` once the
//! visitor has left their details. Only the shape is checked here; the
//! widget itself lives elsewhere.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::ContactInfo;
use crate::error::{ReinoError, Result};
use crate::store::{MutationOutcome, StateStore};

const COMPLETION_TYPE: &str = "completion";
const DEFAULT_METHOD: &str = "typebot";

#[derive(Debug, Deserialize)]
struct CompletionData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    method: Option<String>,
}

/// Parse a raw cross-window message.
///
/// `Ok(None)` for messages of any other type (the page receives plenty of
/// unrelated traffic); `Err` for completion messages with a bad shape.
pub fn parse_completion(raw: &str) -> Result<Option<ContactInfo>> {
    let message: Value = serde_json::from_str(raw)?;
    parse_completion_value(&message)
}

pub fn parse_completion_value(message: &Value) -> Result<Option<ContactInfo>> {
    match message.get("type").and_then(Value::as_str) {
        Some(COMPLETION_TYPE) => {}
        other => {
            debug!(message_type = ?other, "ignoring chat message");
            return Ok(None);
        }
    }

    let data = message
        .get("data")
        .ok_or_else(|| ReinoError::Validation("completion message has no data".to_string()))?;
    let data: CompletionData = serde_json::from_value(data.clone())?;

    if !data.completed {
        return Err(ReinoError::Validation(
            "completion message not marked completed".to_string(),
        ));
    }

    let name = data.name.trim().to_string();
    if name.is_empty() {
        return Err(ReinoError::Validation("contact name is empty".to_string()));
    }

    let email = data.email.trim().to_lowercase();
    validate_email(&email)?;

    let phone = normalize_phone(&data.phone)?;

    Ok(Some(ContactInfo {
        name,
        email,
        phone,
        method: data
            .method
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_METHOD.to_string()),
        completed_at: parse_timestamp(data.timestamp.as_ref())?,
    }))
}

/// Parse and, for a valid completion, record the contact in the store
pub fn apply_completion(store: &StateStore, raw: &str) -> Result<Option<ContactInfo>> {
    let Some(contact) = parse_completion(raw)? else {
        return Ok(None);
    };
    info!(method = %contact.method, "chat completion received");
    if let MutationOutcome::Rejected(err) = store.set_contact(contact.clone(), "chat:completion") {
        return Err(err);
    }
    Ok(Some(contact))
}

fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ReinoError::Validation(format!("invalid email: '{}'", email)))
    }
}

/// Digits only; 10-13 digits covers BR landline/mobile with or without +55
fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if (10..=13).contains(&digits.len()) {
        Ok(digits)
    } else {
        Err(ReinoError::Validation(format!("invalid phone: '{}'", raw)))
    }
}

/// RFC 3339 string or epoch milliseconds; missing means now
fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>> {
    match value {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ReinoError::Validation(format!("invalid timestamp '{}': {}", s, e))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| ReinoError::Validation(format!("invalid timestamp {}", n))),
        Some(other) => Err(ReinoError::Validation(format!(
            "invalid timestamp {}",
            other
        ))),
    }
}
