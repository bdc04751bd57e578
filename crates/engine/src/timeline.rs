use std::collections::HashMap;
use std::sync::Arc;

use palaver_storage::{MessageRecord, NewMessage, TimelineStore, UserId, unix_now_millis};
use snafu::ResultExt;
use tokio::sync::Mutex;

use crate::error::{
    EngineError, EngineResult, SendFailedSnafu, TimelineUnavailableSnafu, ValidationSnafu,
};

/// Loads and extends the message history between two parties.
///
/// Send times are assigned here, never by the caller: each append gets
/// `max(now, previous + 1)` for its unordered pair, so sequential sends are
/// strictly increasing even when the wall clock stalls or steps backwards.
pub struct TimelineService {
    store: Arc<dyn TimelineStore>,
    // Last assigned send time per pair. The lock is held across the append
    // so in-flight sends serialize and can never collide on a timestamp.
    floors: Mutex<HashMap<PairKey, u64>>,
}

impl TimelineService {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self {
            store,
            floors: Mutex::new(HashMap::new()),
        }
    }

    /// The full pair history, ascending by send time. A transport failure
    /// surfaces as `TimelineUnavailable` and must leave whatever the caller
    /// already rendered untouched.
    pub async fn load(&self, a: &UserId, b: &UserId) -> EngineResult<Vec<MessageRecord>> {
        ensure_party(a, "timeline-load")?;
        ensure_party(b, "timeline-load")?;

        self.store
            .messages_between(a, b)
            .await
            .context(TimelineUnavailableSnafu {
                stage: "timeline-load",
            })
    }

    /// Persists a message and returns it for the caller to splice onto its
    /// in-memory timeline. Nothing is appended anywhere unless persistence
    /// is confirmed.
    pub async fn send(
        &self,
        from: &UserId,
        to: &UserId,
        body: &str,
    ) -> EngineResult<MessageRecord> {
        ensure_party(from, "timeline-send")?;
        ensure_party(to, "timeline-send")?;
        let body = body.trim();
        if body.is_empty() {
            return ValidationSnafu {
                stage: "timeline-send",
                reason: "message body is empty",
            }
            .fail();
        }

        let key = PairKey::new(from, to);
        let mut floors = self.floors.lock().await;
        let floor = match floors.get(&key) {
            Some(&assigned) => assigned,
            // First send for this pair since construction: seed from the
            // store so a restart never reuses a persisted timestamp.
            None => self
                .store
                .last_sent_at(from, to)
                .await
                .context(SendFailedSnafu {
                    stage: "timeline-send-seed-floor",
                })?
                .unwrap_or(0),
        };
        let sent_at = unix_now_millis().max(floor + 1);

        let record = self
            .store
            .append_message(NewMessage {
                sender_id: from.clone(),
                receiver_id: to.clone(),
                body: body.to_string(),
                sent_at_unix_millis: sent_at,
            })
            .await
            .context(SendFailedSnafu {
                stage: "timeline-send-append",
            })?;

        // Advance the floor only for confirmed appends.
        floors.insert(key, sent_at);
        Ok(record)
    }
}

fn ensure_party(id: &UserId, stage: &'static str) -> EngineResult<()> {
    if id.is_blank() {
        return Err(EngineError::Validation {
            stage,
            reason: "missing party id",
        });
    }
    Ok(())
}

/// Unordered pair key: both directions of a conversation share one floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(String, String);

impl PairKey {
    fn new(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a.as_str() <= b.as_str() {
            (a, b)
        } else {
            (b, a)
        };
        Self(low.to_string(), high.to_string())
    }
}
