use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, UserId};

/// A directory entry. Immutable once fetched; the engine never edits the
/// fields of a contact it did not create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: UserId,
    pub name: String,
    pub surname: String,
}

impl ContactRecord {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, surname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            surname: surname.into(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }
}

/// A persisted direct message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub sent_at_unix_millis: u64,
}

impl MessageRecord {
    /// Whether this message was authored by `user`, which decides the
    /// sent-vs-received presentation side.
    pub fn is_sent_by(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }
}

/// Append input. `sent_at_unix_millis` is assigned by the timeline service,
/// never by the original caller, so same-pair ordering stays monotonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub sent_at_unix_millis: u64,
}

pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_joins_name_and_surname() {
        let contact = ContactRecord::new("u1", "Ana", "Lee");
        assert_eq!(contact.display_name(), "Ana Lee");
    }

    #[test]
    fn sent_side_follows_the_sender_id() {
        let message = MessageRecord {
            id: MessageId::new_v7(),
            sender_id: UserId::new("alice"),
            receiver_id: UserId::new("bob"),
            body: "hi".to_string(),
            sent_at_unix_millis: 1,
        };

        assert!(message.is_sent_by(&UserId::new("alice")));
        assert!(!message.is_sent_by(&UserId::new("bob")));
    }
}
