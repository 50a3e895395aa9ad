use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ChatMessage, Sender};
use crate::db::queries;
use crate::utils::errors::{AppError, AppResult};

pub const MAX_MESSAGE_LEN: usize = 2_000;

/// One row of the admin inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub unread_count: usize,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
}

pub fn validate_message(message: &str) -> AppResult<&str> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("Message must not be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(format!(
            "Message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(trimmed)
}

/// Groups messages into one thread per user, ordered by latest activity.
/// Unread counts only include messages the user sent.
pub fn summarize_inbox(
    messages: &[ChatMessage],
    identities: &HashMap<Uuid, (Option<String>, Option<String>)>,
) -> Vec<ChatThread> {
    let mut threads: HashMap<Uuid, ChatThread> = HashMap::new();

    for msg in messages {
        let thread = threads.entry(msg.user_id).or_insert_with(|| {
            let (email, full_name) = identities.get(&msg.user_id).cloned().unwrap_or_default();
            ChatThread {
                user_id: msg.user_id,
                email,
                full_name,
                unread_count: 0,
                last_message: msg.message.clone(),
                last_message_time: msg.created_at,
            }
        });
        if msg.created_at > thread.last_message_time {
            thread.last_message = msg.message.clone();
            thread.last_message_time = msg.created_at;
        }
        if msg.sender == Sender::User.as_str() && !msg.is_read {
            thread.unread_count += 1;
        }
    }

    let mut out: Vec<ChatThread> = threads.into_values().collect();
    out.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    out
}

pub async fn inbox(pool: &PgPool) -> AppResult<Vec<ChatThread>> {
    let messages = queries::list_all_chat(pool).await?;
    if messages.is_empty() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<Uuid> = messages.iter().map(|m| m.user_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let identities = queries::profile_identities(pool, &ids).await?;
    Ok(summarize_inbox(&messages, &identities))
}

pub async fn send(pool: &PgPool, user_id: Uuid, message: &str, sender: Sender) -> AppResult<ChatMessage> {
    let text = validate_message(message)?;
    Ok(queries::insert_chat(pool, user_id, text, sender).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(user: Uuid, text: &str, sender: Sender, read: bool, mins_ago: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            user_id: user,
            message: text.into(),
            sender: sender.as_str().into(),
            is_read: read,
            created_at: Utc::now() - Duration::minutes(mins_ago),
        }
    }

    #[test]
    fn threads_group_by_user_and_count_unread_user_messages() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let messages = vec![
            msg(alice, "hello?", Sender::User, false, 10),
            msg(alice, "anyone?", Sender::User, false, 5),
            msg(alice, "hi!", Sender::Admin, false, 4),
            msg(bob, "thanks", Sender::User, true, 1),
        ];
        let ids = HashMap::from([(alice, (Some("a@x.io".to_string()), Some("Alice".to_string())))]);

        let threads = summarize_inbox(&messages, &ids);
        assert_eq!(threads.len(), 2);

        assert_eq!(threads[0].user_id, bob);
        assert_eq!(threads[0].unread_count, 0);
        assert!(threads[0].email.is_none());

        assert_eq!(threads[1].user_id, alice);
        assert_eq!(threads[1].unread_count, 2);
        assert_eq!(threads[1].last_message, "hi!");
        assert_eq!(threads[1].full_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn empty_inbox() {
        assert!(summarize_inbox(&[], &HashMap::new()).is_empty());
    }

    #[test]
    fn message_validation() {
        assert_eq!(validate_message("  hi  ").unwrap(), "hi");
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }
}
