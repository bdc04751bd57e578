pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

use async_trait::async_trait;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, UserId};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{ContactRecord, MessageRecord, NewMessage, unix_now_millis};

/// Directory collaborator: the full set of registered users. The engine
/// retrieves the whole set and filters client-side, so the only query shape
/// a backend must support is "give me everything".
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn list_contacts(&self) -> StorageResult<Vec<ContactRecord>>;

    /// Insert the record if no contact with the same id exists. Used to sync
    /// the signed-in user into the directory on session open.
    async fn ensure_contact(&self, record: ContactRecord) -> StorageResult<()>;
}

/// Timeline collaborator: an append-only message record store queryable by
/// unordered two-party membership and ordered by send time.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// All messages whose `{sender_id, receiver_id}` as a set equals
    /// `{a, b}`, ascending by `sent_at_unix_millis` with id tie-breaks.
    async fn messages_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> StorageResult<Vec<MessageRecord>>;

    /// Latest persisted send time for the pair, used to seed the monotonic
    /// assignment floor after a restart.
    async fn last_sent_at(&self, a: &UserId, b: &UserId) -> StorageResult<Option<u64>>;

    async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord>;
}

/// Recency collaborator: one document per owner holding the serialized
/// ordered contact list. Writes replace the whole document because the
/// backing store has no native list-splice operation.
#[async_trait]
pub trait RecencyStore: Send + Sync {
    /// Returns an empty list for an owner with no document yet; a brand-new
    /// owner is not an error.
    async fn load_recency(&self, owner: &UserId) -> StorageResult<Vec<ContactRecord>>;

    async fn store_recency(
        &self,
        owner: &UserId,
        contacts: &[ContactRecord],
    ) -> StorageResult<()>;
}

pub trait DocumentStore: DirectoryStore + TimelineStore + RecencyStore {}

impl<T> DocumentStore for T where T: DirectoryStore + TimelineStore + RecencyStore {}
