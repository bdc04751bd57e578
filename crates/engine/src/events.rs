use palaver_storage::{ContactRecord, MessageRecord, UserId};

use crate::directory::SearchOutcome;

/// Notifications the session controller emits for a bound view to react to.
///
/// Events are one-way: the controller has already applied the corresponding
/// state change by the time an event is observable, so a renderer can either
/// react incrementally or re-read a snapshot.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A non-empty query was accepted and the debounce window armed.
    SearchStarted { query: String },
    /// The active query resolved; stale results are discarded, never
    /// reported.
    SearchCompleted {
        query: String,
        outcome: SearchOutcome,
    },
    /// The query was cleared; the directory was not contacted.
    SearchCleared,
    /// The directory collaborator failed; the view degrades to "no results".
    SearchFailed { query: String },
    ConversationOpened { contact: ContactRecord },
    SelectionCleared,
    /// The timeline for the still-selected contact finished loading.
    TimelineLoaded {
        contact_id: UserId,
        messages: Vec<MessageRecord>,
    },
    /// The timeline collaborator failed; previously rendered messages stay.
    TimelineUnavailable { contact_id: UserId },
    /// A send was persisted and spliced onto the in-memory timeline.
    MessageSent { message: MessageRecord },
    /// The recency order changed (selection or send promotion).
    RecencyChanged { contacts: Vec<ContactRecord> },
    /// The in-memory recency order advanced but persistence failed; the
    /// stored copy lags until the next successful promotion.
    RecencyPersistLagged,
}
