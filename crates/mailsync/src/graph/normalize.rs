//! Graph API response normalization
//!
//! Converts raw Graph message resources to canonical [`Message`] records.
//! A missing required field is a validation failure, never a partial record.

use chrono::{DateTime, Utc};

use super::api::{GraphMessage, Recipient};
use crate::error::SyncError;
use crate::models::{EmailAddress, Message, MessageBody, MessageId, UserId};

/// Normalize a Graph message owned by `owner` to a canonical Message
pub fn normalize_message(raw: GraphMessage, owner: &UserId) -> Result<Message, SyncError> {
    let id = required(raw.id, None, "id")?;
    let mid = Some(id.as_str());

    let received_raw = required(raw.received_date_time, mid, "receivedDateTime")?;
    let received_at = parse_received_at(&received_raw)
        .ok_or_else(|| SyncError::validation(mid, format!("unparseable receivedDateTime `{}`", received_raw)))?;

    let subject = required(raw.subject, mid, "subject")?;
    let body_preview = required(raw.body_preview, mid, "bodyPreview")?;

    let body = required(raw.body, mid, "body")?;
    let body = MessageBody::new(
        required(body.content, mid, "body.content")?,
        required(body.content_type, mid, "body.contentType")?,
    );

    let is_read = required(raw.is_read, mid, "isRead")?;
    let sender = normalize_recipient(required(raw.sender, mid, "sender")?, mid, "sender")?;

    let to_recipients = required(raw.to_recipients, mid, "toRecipients")?
        .into_iter()
        .enumerate()
        .map(|(i, r)| normalize_recipient(r, mid, &format!("toRecipients[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Message::builder(MessageId::new(id.clone()), owner.clone())
        .received_at(received_at)
        .subject(subject)
        .body_preview(body_preview)
        .body(body)
        .is_read(is_read)
        .sender(sender)
        .to_recipients(to_recipients)
        .build())
}

fn normalize_recipient(
    recipient: Recipient,
    message_id: Option<&str>,
    path: &str,
) -> Result<EmailAddress, SyncError> {
    let email = required(
        recipient.email_address,
        message_id,
        &format!("{}.emailAddress", path),
    )?;
    Ok(EmailAddress::new(
        required(email.name, message_id, &format!("{}.emailAddress.name", path))?,
        required(email.address, message_id, &format!("{}.emailAddress.address", path))?,
    ))
}

fn required<T>(value: Option<T>, message_id: Option<&str>, field: &str) -> Result<T, SyncError> {
    value.ok_or_else(|| SyncError::validation(message_id, format!("missing field `{}`", field)))
}

/// Graph timestamps are ISO 8601 in UTC, usually with a `Z` suffix
fn parse_received_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> GraphMessage {
        serde_json::from_value(value).unwrap()
    }

    fn complete() -> serde_json::Value {
        json!({
            "id": "AAMkAGI2",
            "receivedDateTime": "2024-03-01T09:30:00Z",
            "subject": "Quarterly report",
            "bodyPreview": "Please find attached",
            "body": { "contentType": "html", "content": "<p>Please find attached</p>" },
            "isRead": false,
            "sender": { "emailAddress": { "name": "Dana", "address": "dana@contoso.com" } },
            "toRecipients": [
                { "emailAddress": { "name": "Alex", "address": "alex@contoso.com" } },
                { "emailAddress": { "name": "", "address": "team@contoso.com" } }
            ]
        })
    }

    #[test]
    fn test_normalize_complete_message() {
        let owner = UserId::new("u1");
        let msg = normalize_message(raw(complete()), &owner).unwrap();

        assert_eq!(msg.id.as_str(), "AAMkAGI2");
        assert_eq!(msg.user_id, owner);
        assert_eq!(msg.received_at.to_rfc3339(), "2024-03-01T09:30:00+00:00");
        assert_eq!(msg.subject, "Quarterly report");
        assert_eq!(msg.body.content_type, "html");
        assert!(!msg.is_read);
        assert_eq!(msg.sender.address, "dana@contoso.com");
        assert_eq!(msg.to_recipients.len(), 2);
        assert_eq!(msg.to_recipients[1].name, "");
        assert_eq!(msg.to_recipients[1].address, "team@contoso.com");
    }

    #[test]
    fn test_empty_strings_are_accepted() {
        let mut value = complete();
        value["subject"] = json!("");
        value["bodyPreview"] = json!("");
        let msg = normalize_message(raw(value), &UserId::new("u1")).unwrap();
        assert_eq!(msg.subject, "");
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let mut value = complete();
        value.as_object_mut().unwrap().remove("id");
        let err = normalize_message(raw(value), &UserId::new("u1")).unwrap_err();
        match err {
            SyncError::Validation { message_id, reason } => {
                assert_eq!(message_id, None);
                assert!(reason.contains("`id`"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_subject_is_rejected() {
        let mut value = complete();
        value["subject"] = serde_json::Value::Null;
        let err = normalize_message(raw(value), &UserId::new("u1")).unwrap_err();
        assert!(err.to_string().contains("AAMkAGI2"));
        assert!(err.to_string().contains("`subject`"));
    }

    #[test]
    fn test_missing_recipient_address_names_the_path() {
        let mut value = complete();
        value["toRecipients"][1]["emailAddress"]
            .as_object_mut()
            .unwrap()
            .remove("address");
        let err = normalize_message(raw(value), &UserId::new("u1")).unwrap_err();
        assert!(err.to_string().contains("toRecipients[1].emailAddress.address"));
    }

    #[test]
    fn test_missing_sender_is_rejected() {
        let mut value = complete();
        value.as_object_mut().unwrap().remove("sender");
        assert!(matches!(
            normalize_message(raw(value), &UserId::new("u1")),
            Err(SyncError::Validation { .. })
        ));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let mut value = complete();
        value["receivedDateTime"] = json!("yesterday");
        let err = normalize_message(raw(value), &UserId::new("u1")).unwrap_err();
        assert!(err.to_string().contains("unparseable receivedDateTime"));
    }

    #[test]
    fn test_parse_received_at_with_offset() {
        let dt = parse_received_at("2024-03-01T10:30:00+01:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T09:30:00+00:00");
    }
}
