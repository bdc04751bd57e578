use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::ids::{MessageId, UserId};
use super::types::{ContactRecord, MessageRecord, NewMessage};
use super::{DirectoryStore, RecencyStore, TimelineStore};

/// In-memory document store for tests and the QA runner.
///
/// Outage flags let callers exercise every transport-failure path in the
/// engine's error taxonomy without a real backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    directory_reads: AtomicUsize,
}

#[derive(Debug, Default)]
struct Inner {
    contacts: BTreeMap<String, ContactRecord>,
    messages: Vec<MessageRecord>,
    recency: BTreeMap<String, Vec<ContactRecord>>,
    outages: Outages,
}

#[derive(Debug, Default, Clone, Copy)]
struct Outages {
    directory: bool,
    timeline: bool,
    recency: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_contacts(&self, contacts: impl IntoIterator<Item = ContactRecord>) {
        let mut inner = self.inner.lock().unwrap();
        for contact in contacts {
            inner.contacts.insert(contact.id.to_string(), contact);
        }
    }

    pub fn set_directory_outage(&self, down: bool) {
        self.inner.lock().unwrap().outages.directory = down;
    }

    pub fn set_timeline_outage(&self, down: bool) {
        self.inner.lock().unwrap().outages.timeline = down;
    }

    pub fn set_recency_outage(&self, down: bool) {
        self.inner.lock().unwrap().outages.recency = down;
    }

    /// How many times the directory has been asked for the full contact set.
    /// Lets tests assert the empty-query guard never reaches the store.
    pub fn directory_reads(&self) -> usize {
        self.directory_reads.load(Ordering::SeqCst)
    }
}

fn outage(stage: &'static str) -> StorageError {
    StorageError::Unavailable {
        stage,
        details: "injected outage".to_string(),
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn list_contacts(&self) -> StorageResult<Vec<ContactRecord>> {
        self.directory_reads.fetch_add(1, Ordering::SeqCst);

        let inner = self.inner.lock().unwrap();
        if inner.outages.directory {
            return Err(outage("memory-directory-list"));
        }

        Ok(inner.contacts.values().cloned().collect())
    }

    async fn ensure_contact(&self, record: ContactRecord) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.outages.directory {
            return Err(outage("memory-directory-ensure"));
        }

        inner
            .contacts
            .entry(record.id.to_string())
            .or_insert(record);
        Ok(())
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn messages_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> StorageResult<Vec<MessageRecord>> {
        let inner = self.inner.lock().unwrap();
        if inner.outages.timeline {
            return Err(outage("memory-timeline-load"));
        }

        let mut timeline: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|message| pair_matches(message, a, b))
            .cloned()
            .collect();
        timeline.sort_by(|left, right| {
            left.sent_at_unix_millis
                .cmp(&right.sent_at_unix_millis)
                .then_with(|| left.id.cmp(&right.id))
        });

        Ok(timeline)
    }

    async fn last_sent_at(&self, a: &UserId, b: &UserId) -> StorageResult<Option<u64>> {
        let inner = self.inner.lock().unwrap();
        if inner.outages.timeline {
            return Err(outage("memory-timeline-last-sent-at"));
        }

        Ok(inner
            .messages
            .iter()
            .filter(|message| pair_matches(message, a, b))
            .map(|message| message.sent_at_unix_millis)
            .max())
    }

    async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord> {
        let mut inner = self.inner.lock().unwrap();
        if inner.outages.timeline {
            return Err(outage("memory-timeline-append"));
        }

        let record = MessageRecord {
            id: MessageId::new_v7(),
            sender_id: input.sender_id,
            receiver_id: input.receiver_id,
            body: input.body,
            sent_at_unix_millis: input.sent_at_unix_millis,
        };
        inner.messages.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl RecencyStore for MemoryStore {
    async fn load_recency(&self, owner: &UserId) -> StorageResult<Vec<ContactRecord>> {
        let inner = self.inner.lock().unwrap();
        if inner.outages.recency {
            return Err(outage("memory-recency-load"));
        }

        Ok(inner.recency.get(owner.as_str()).cloned().unwrap_or_default())
    }

    async fn store_recency(
        &self,
        owner: &UserId,
        contacts: &[ContactRecord],
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.outages.recency {
            return Err(outage("memory-recency-store"));
        }

        inner.recency.insert(owner.to_string(), contacts.to_vec());
        Ok(())
    }
}

fn pair_matches(message: &MessageRecord, a: &UserId, b: &UserId) -> bool {
    (&message.sender_id == a && &message.receiver_id == b)
        || (&message.sender_id == b && &message.receiver_id == a)
}
