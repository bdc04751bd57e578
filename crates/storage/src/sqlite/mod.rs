use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CorruptRecencyDocumentSnafu, CreateSqliteDirectorySnafu, SerializeRecencyDocumentSnafu,
    SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu,
    SqliteQuerySnafu, StorageError, StorageResult, TimestampOutOfRangeSnafu,
};
use super::ids::{MessageId, UserId};
use super::types::{ContactRecord, MessageRecord, NewMessage, unix_now_millis};
use super::{DirectoryStore, RecencyStore, TimelineStore};

pub const MEMORY_DATABASE_LOCATION: &str = ":memory:";

/// Document store backed by a local SQLite file.
///
/// One pool connection keeps writes serialized at the store boundary and
/// keeps an in-memory database alive for the whole store lifetime.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn list_contacts(&self) -> StorageResult<Vec<ContactRecord>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, surname FROM contacts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "directory-list-contacts",
        })?;

        Ok(rows.into_iter().map(ContactRow::into_record).collect())
    }

    async fn ensure_contact(&self, record: ContactRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO contacts (id, name, surname) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(&record.surname)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "directory-ensure-contact",
        })?;

        Ok(())
    }
}

#[async_trait]
impl TimelineStore for SqliteStore {
    async fn messages_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> StorageResult<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, receiver_id, body, sent_at FROM messages \
             WHERE (sender_id = ?1 AND receiver_id = ?2) \
                OR (sender_id = ?2 AND receiver_id = ?1) \
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "timeline-messages-between",
        })?;

        rows.into_iter()
            .map(|row| row.into_record("timeline-messages-between-row"))
            .collect()
    }

    async fn last_sent_at(&self, a: &UserId, b: &UserId) -> StorageResult<Option<u64>> {
        let latest = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(sent_at) FROM messages \
             WHERE (sender_id = ?1 AND receiver_id = ?2) \
                OR (sender_id = ?2 AND receiver_id = ?1)",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_one(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "timeline-last-sent-at",
        })?;

        latest
            .map(|value| db_to_millis(value, "timeline-last-sent-at-value"))
            .transpose()
    }

    async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord> {
        let id = MessageId::new_v7();
        let sent_at = millis_to_db(input.sent_at_unix_millis, "timeline-append-sent-at")?;

        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, body, sent_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(input.sender_id.as_str())
        .bind(input.receiver_id.as_str())
        .bind(&input.body)
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "timeline-append-message",
        })?;

        Ok(MessageRecord {
            id,
            sender_id: input.sender_id,
            receiver_id: input.receiver_id,
            body: input.body,
            sent_at_unix_millis: input.sent_at_unix_millis,
        })
    }
}

#[async_trait]
impl RecencyStore for SqliteStore {
    async fn load_recency(&self, owner: &UserId) -> StorageResult<Vec<ContactRecord>> {
        let document = sqlx::query_scalar::<_, String>(
            "SELECT contacts_json FROM recency WHERE owner_id = ?",
        )
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "recency-load",
        })?;

        let Some(document) = document else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&document).context(CorruptRecencyDocumentSnafu {
            stage: "recency-load-parse",
            owner: owner.to_string(),
        })
    }

    async fn store_recency(
        &self,
        owner: &UserId,
        contacts: &[ContactRecord],
    ) -> StorageResult<()> {
        let document = serde_json::to_string(contacts).context(SerializeRecencyDocumentSnafu {
            stage: "recency-store-serialize",
            owner: owner.to_string(),
        })?;
        let updated_at = millis_to_db(unix_now_millis(), "recency-store-updated-at")?;

        sqlx::query(
            "INSERT INTO recency (owner_id, contacts_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(owner_id) DO UPDATE SET \
                 contacts_json = excluded.contacts_json, \
                 updated_at = excluded.updated_at",
        )
        .bind(owner.as_str())
        .bind(document)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "recency-store-write",
        })?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: String,
    name: String,
    surname: String,
}

impl ContactRow {
    fn into_record(self) -> ContactRecord {
        ContactRecord::new(self.id, self.name, self.surname)
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    body: String,
    sent_at: i64,
}

impl MessageRow {
    fn into_record(self, stage: &'static str) -> StorageResult<MessageRecord> {
        let id = MessageId::parse(&self.id).map_err(|error| StorageError::CorruptMessageRow {
            stage,
            message_id: self.id.clone(),
            details: error.to_string(),
        })?;
        let sent_at_unix_millis = db_to_millis(self.sent_at, stage)?;

        Ok(MessageRecord {
            id,
            sender_id: UserId::new(self.sender_id),
            receiver_id: UserId::new(self.receiver_id),
            body: self.body,
            sent_at_unix_millis,
        })
    }
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    // Plain paths get their parent directory created; URL forms and the
    // in-memory location are handed to sqlx as-is.
    if database_location == MEMORY_DATABASE_LOCATION
        || database_location.starts_with("sqlite:")
    {
        return Ok(());
    }

    if let Some(parent) = Path::new(database_location).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-ensure-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location == MEMORY_DATABASE_LOCATION {
        return "sqlite::memory:".to_string();
    }

    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}

fn millis_to_db(value: u64, stage: &'static str) -> StorageResult<i64> {
    i64::try_from(value).ok().context(TimestampOutOfRangeSnafu { stage, value })
}

fn db_to_millis(value: i64, stage: &'static str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::CorruptMessageRow {
        stage,
        message_id: String::new(),
        details: format!("negative sent_at {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_memory_store() -> SqliteStore {
        SqliteStore::open(MEMORY_DATABASE_LOCATION).await.unwrap()
    }

    fn new_message(sender: &str, receiver: &str, body: &str, sent_at: u64) -> NewMessage {
        NewMessage {
            sender_id: UserId::new(sender),
            receiver_id: UserId::new(receiver),
            body: body.to_string(),
            sent_at_unix_millis: sent_at,
        }
    }

    #[tokio::test]
    async fn ensure_contact_is_insert_if_absent() {
        let store = open_memory_store().await;

        store
            .ensure_contact(ContactRecord::new("u1", "Ana", "Lee"))
            .await
            .unwrap();
        store
            .ensure_contact(ContactRecord::new("u1", "Renamed", "Entry"))
            .await
            .unwrap();

        let contacts = store.list_contacts().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Ana");
    }

    #[tokio::test]
    async fn pair_membership_covers_both_directions_and_nothing_else() {
        let store = open_memory_store().await;
        let base = unix_now_millis();

        store.append_message(new_message("a", "b", "one", base)).await.unwrap();
        store.append_message(new_message("b", "a", "two", base + 1)).await.unwrap();
        store.append_message(new_message("a", "c", "other", base + 2)).await.unwrap();

        let timeline = store
            .messages_between(&UserId::new("a"), &UserId::new("b"))
            .await
            .unwrap();

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].body, "one");
        assert_eq!(timeline[1].body, "two");
    }

    #[tokio::test]
    async fn last_sent_at_tracks_the_pair_maximum() {
        let store = open_memory_store().await;
        let a = UserId::new("a");
        let b = UserId::new("b");

        assert_eq!(store.last_sent_at(&a, &b).await.unwrap(), None);

        store.append_message(new_message("a", "b", "one", 100)).await.unwrap();
        store.append_message(new_message("b", "a", "two", 250)).await.unwrap();

        assert_eq!(store.last_sent_at(&a, &b).await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn recency_document_roundtrips_and_defaults_to_empty() {
        let store = open_memory_store().await;
        let owner = UserId::new("owner");

        assert!(store.load_recency(&owner).await.unwrap().is_empty());

        let contacts = vec![
            ContactRecord::new("u2", "Ana", "Lee"),
            ContactRecord::new("u3", "Bo", "Ek"),
        ];
        store.store_recency(&owner, &contacts).await.unwrap();

        assert_eq!(store.load_recency(&owner).await.unwrap(), contacts);

        // Whole-document replacement, not append.
        let reordered = vec![contacts[1].clone(), contacts[0].clone()];
        store.store_recency(&owner, &reordered).await.unwrap();
        assert_eq!(store.load_recency(&owner).await.unwrap(), reordered);
    }
}
