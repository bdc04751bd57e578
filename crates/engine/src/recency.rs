use std::sync::Arc;

use palaver_storage::{ContactRecord, RecencyStore, UserId};
use snafu::ResultExt;

use crate::error::{EngineResult, RecencyPersistFailedSnafu};

/// The owner's prior-conversation list, most-recent-first, persisted as one
/// document after every mutation.
///
/// Promotion is the only mutation path; both selection and send-success go
/// through it, so there is a single piece of merge logic to get right.
pub struct RecencyTracker {
    store: Arc<dyn RecencyStore>,
    owner: UserId,
    entries: Vec<ContactRecord>,
}

impl RecencyTracker {
    pub fn new(store: Arc<dyn RecencyStore>, owner: UserId) -> Self {
        Self {
            store,
            owner,
            entries: Vec::new(),
        }
    }

    /// The current in-memory order. Always valid for rendering, even while
    /// the persisted copy lags behind after a failed write.
    pub fn entries(&self) -> &[ContactRecord] {
        &self.entries
    }

    /// Loads the persisted list. A brand-new owner simply gets an empty
    /// list; only transport failures are errors.
    pub async fn load(&mut self) -> EngineResult<&[ContactRecord]> {
        let loaded = self
            .store
            .load_recency(&self.owner)
            .await
            .context(RecencyPersistFailedSnafu {
                stage: "recency-load",
            })?;

        self.entries = loaded;
        Ok(&self.entries)
    }

    /// Moves `contact` to the front, dropping any earlier entry with the
    /// same id, and persists the full list. The in-memory reorder always
    /// takes effect; an `Err` only means the persisted copy lags.
    pub async fn promote(&mut self, contact: ContactRecord) -> EngineResult<()> {
        let already_first = self
            .entries
            .first()
            .is_some_and(|front| front.id == contact.id);

        if !already_first {
            self.entries.retain(|entry| entry.id != contact.id);
            self.entries.insert(0, contact);
        }

        let persist = self
            .store
            .store_recency(&self.owner, &self.entries)
            .await
            .context(RecencyPersistFailedSnafu {
                stage: "recency-promote-persist",
            });

        if let Err(error) = persist {
            tracing::warn!(
                owner = %self.owner,
                "recency order kept in memory but not persisted: {error}"
            );
            return Err(error);
        }

        Ok(())
    }
}
