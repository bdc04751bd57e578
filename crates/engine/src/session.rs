use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use palaver_storage::{
    ContactRecord, DirectoryStore, MessageRecord, RecencyStore, TimelineStore,
};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::directory::{DirectoryIndex, SearchOutcome};
use crate::error::{EngineResult, ValidationSnafu};
use crate::events::SessionEvent;
use crate::identity::IdentityProvider;
use crate::recency::RecencyTracker;
use crate::settings::SessionSettings;
use crate::timeline::TimelineService;

/// Where the directory search currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    /// No query; the directory is inert.
    Idle,
    /// A non-empty query is debouncing or in flight.
    Searching,
    ResultsShown,
    NoResults,
}

/// Point-in-time copy of the session for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub search_phase: SearchPhase,
    pub query: String,
    pub search: SearchOutcome,
    pub selected: Option<ContactRecord>,
    pub messages: Vec<MessageRecord>,
    pub recency: Vec<ContactRecord>,
}

/// The stateful orchestrator a view binds to: owns the selection, the
/// search text, the rendered timeline, and the recency order, and is the
/// only writer of all four.
///
/// Every method takes `&self`; state lives behind one async lock, so the
/// session can be shared across tasks while staying single-writer in
/// effect. Results of superseded work (a replaced query, a load for a
/// conversation the user already left) are discarded, never applied late.
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    current_user: ContactRecord,
    directory: DirectoryIndex,
    timeline: TimelineService,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    search_generation: AtomicU64,
    timeline_generation: AtomicU64,
    events: UnboundedSender<SessionEvent>,
}

struct SessionState {
    search_phase: SearchPhase,
    query: String,
    search_limit: usize,
    search: SearchOutcome,
    pending_search: Option<JoinHandle<()>>,
    selected: Option<ContactRecord>,
    messages: Vec<MessageRecord>,
    recency: RecencyTracker,
}

impl ChatSession {
    /// Builds a session for the signed-in user: loads the persisted recency
    /// list once and syncs the user's own record into the directory.
    /// Fails only when nobody is signed in; collaborator outages at open
    /// degrade to an empty view.
    pub async fn open(
        directory: Arc<dyn DirectoryStore>,
        timeline: Arc<dyn TimelineStore>,
        recency: Arc<dyn RecencyStore>,
        identity: &dyn IdentityProvider,
        settings: SessionSettings,
    ) -> EngineResult<(Self, UnboundedReceiver<SessionEvent>)> {
        let Some(profile) = identity.current_profile() else {
            return ValidationSnafu {
                stage: "session-open",
                reason: "no signed-in user",
            }
            .fail();
        };
        if profile.id.is_blank() {
            return ValidationSnafu {
                stage: "session-open",
                reason: "signed-in user has a blank id",
            }
            .fail();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let directory = DirectoryIndex::new(directory);

        if let Err(error) = directory.sync_contact(profile.clone()).await {
            tracing::warn!("signed-in user not synced into directory: {error}");
        }

        let mut recency = RecencyTracker::new(recency, profile.id.clone());
        match recency.load().await {
            Ok(entries) => {
                let _ = events_tx.send(SessionEvent::RecencyChanged {
                    contacts: entries.to_vec(),
                });
            }
            Err(error) => tracing::warn!("chat history unavailable at open: {error}"),
        }

        let search_limit = settings.search_page_step;
        let inner = Arc::new(SessionInner {
            current_user: profile,
            directory,
            timeline: TimelineService::new(timeline),
            settings,
            state: Mutex::new(SessionState {
                search_phase: SearchPhase::Idle,
                query: String::new(),
                search_limit,
                search: SearchOutcome::empty(),
                pending_search: None,
                selected: None,
                messages: Vec::new(),
                recency,
            }),
            search_generation: AtomicU64::new(0),
            timeline_generation: AtomicU64::new(0),
            events: events_tx,
        });

        Ok((Self { inner }, events_rx))
    }

    pub fn current_user(&self) -> &ContactRecord {
        &self.inner.current_user
    }

    /// Updates the search text. A pending debounce is cancelled, not just
    /// ignored; an empty query resets to idle without touching the
    /// directory; anything else arms a fresh debounce window.
    pub async fn set_search_query(&self, query: &str) {
        let mut state = self.inner.state.lock().await;
        if let Some(pending) = state.pending_search.take() {
            pending.abort();
        }

        state.query = query.to_string();
        state.search_limit = self.inner.settings.search_page_step;

        if query.trim().is_empty() {
            // Invalidate a task that was already past its timer.
            self.inner.search_generation.fetch_add(1, Ordering::SeqCst);
            state.search_phase = SearchPhase::Idle;
            state.search = SearchOutcome::empty();
            self.inner.emit(SessionEvent::SearchCleared);
            return;
        }

        state.search_phase = SearchPhase::Searching;
        let generation = self.inner.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query_text = state.query.clone();
        let limit = state.search_limit;
        self.inner.emit(SessionEvent::SearchStarted {
            query: query_text.clone(),
        });

        let inner = Arc::clone(&self.inner);
        state.pending_search = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(inner.settings.search_debounce_ms)).await;
            inner.run_search(generation, query_text, limit).await;
        }));
    }

    /// Raises the page limit by one step and re-runs the current query
    /// immediately; an explicit request skips the debounce window.
    pub async fn show_more_results(&self) {
        let (generation, query, limit) = {
            let mut state = self.inner.state.lock().await;
            if state.query.trim().is_empty() {
                return;
            }
            if let Some(pending) = state.pending_search.take() {
                pending.abort();
            }
            state.search_limit += self.inner.settings.search_page_step;
            state.search_phase = SearchPhase::Searching;
            let generation = self.inner.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
            (generation, state.query.clone(), state.search_limit)
        };

        self.inner.run_search(generation, query, limit).await;
    }

    /// Cancels a pending debounced search when the search input loses
    /// focus. Already-shown results stay visible.
    pub async fn search_blurred(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(pending) = state.pending_search.take() {
            pending.abort();
        }
        self.inner.search_generation.fetch_add(1, Ordering::SeqCst);

        if state.search_phase == SearchPhase::Searching {
            state.search_phase = if state.search.results.is_empty() {
                SearchPhase::Idle
            } else {
                SearchPhase::ResultsShown
            };
        }
    }

    /// Opens the conversation with `contact`: the previous timeline is
    /// discarded, and recency promotion and the timeline fetch proceed
    /// concurrently.
    pub async fn select_contact(&self, contact: ContactRecord) {
        let generation = {
            let mut state = self.inner.state.lock().await;
            state.selected = Some(contact.clone());
            // A timeline is never cached across selections.
            state.messages.clear();
            let generation = self.inner.timeline_generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.emit(SessionEvent::ConversationOpened {
                contact: contact.clone(),
            });
            generation
        };

        futures::join!(
            self.inner.promote_and_notify(contact.clone()),
            self.inner.load_timeline(contact, generation),
        );
    }

    /// Sends `body` to the selected contact. The message is spliced onto
    /// the in-memory timeline only after the store confirmed persistence,
    /// and the contact is promoted again so recency reflects the latest
    /// activity.
    pub async fn send_message(&self, body: &str) -> EngineResult<MessageRecord> {
        let contact = {
            let state = self.inner.state.lock().await;
            let Some(contact) = state.selected.clone() else {
                return ValidationSnafu {
                    stage: "session-send",
                    reason: "no conversation open",
                }
                .fail();
            };
            contact
        };

        let message = self
            .inner
            .timeline
            .send(&self.inner.current_user.id, &contact.id, body)
            .await?;

        {
            let mut state = self.inner.state.lock().await;
            // Splice only while the same conversation is still open.
            if state
                .selected
                .as_ref()
                .is_some_and(|selected| selected.id == contact.id)
            {
                state.messages.push(message.clone());
            }
            self.inner.emit(SessionEvent::MessageSent {
                message: message.clone(),
            });
        }

        self.inner.promote_and_notify(contact).await;
        Ok(message)
    }

    pub async fn clear_selection(&self) {
        let mut state = self.inner.state.lock().await;
        if state.selected.take().is_some() {
            state.messages.clear();
            self.inner.timeline_generation.fetch_add(1, Ordering::SeqCst);
            self.inner.emit(SessionEvent::SelectionCleared);
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        SessionSnapshot {
            search_phase: state.search_phase,
            query: state.query.clone(),
            search: state.search.clone(),
            selected: state.selected.clone(),
            messages: state.messages.clone(),
            recency: state.recency.entries().to_vec(),
        }
    }
}

impl SessionInner {
    async fn run_search(&self, generation: u64, query: String, limit: usize) {
        // Skip the fetch when the query already moved on during the timer.
        if self.search_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let outcome = self
            .directory
            .search(&query, &self.current_user.id, limit)
            .await;

        let mut state = self.state.lock().await;
        // Last-query-wins: aborting handles a sleeping task, this guard
        // handles one that was already past its timer when superseded.
        if self.search_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match outcome {
            Ok(outcome) => {
                state.search_phase = if outcome.results.is_empty() {
                    SearchPhase::NoResults
                } else {
                    SearchPhase::ResultsShown
                };
                state.search = outcome.clone();
                self.emit(SessionEvent::SearchCompleted { query, outcome });
            }
            Err(error) => {
                tracing::error!("directory search failed: {error}");
                state.search_phase = SearchPhase::NoResults;
                state.search = SearchOutcome::empty();
                self.emit(SessionEvent::SearchFailed { query });
            }
        }
    }

    async fn load_timeline(&self, contact: ContactRecord, generation: u64) {
        let loaded = self.timeline.load(&self.current_user.id, &contact.id).await;

        let mut state = self.state.lock().await;
        // A slow load for a conversation the user already left is dropped.
        if self.timeline_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match loaded {
            Ok(messages) => {
                state.messages = messages.clone();
                self.emit(SessionEvent::TimelineLoaded {
                    contact_id: contact.id,
                    messages,
                });
            }
            Err(error) => {
                tracing::error!(contact = %contact.id, "timeline load failed: {error}");
                self.emit(SessionEvent::TimelineUnavailable {
                    contact_id: contact.id,
                });
            }
        }
    }

    async fn promote_and_notify(&self, contact: ContactRecord) {
        let mut state = self.state.lock().await;
        match state.recency.promote(contact).await {
            Ok(()) => {
                let contacts = state.recency.entries().to_vec();
                self.emit(SessionEvent::RecencyChanged { contacts });
            }
            // The tracker already logged the failure; the in-memory order
            // is current, only the persisted copy lags.
            Err(_) => self.emit(SessionEvent::RecencyPersistLagged),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is rendering.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use palaver_storage::{MemoryStore, StorageResult, UserId};

    use super::*;
    use crate::identity::FixedIdentity;

    fn me() -> ContactRecord {
        ContactRecord::new("u1", "Mara", "Voss")
    }

    fn ana() -> ContactRecord {
        ContactRecord::new("u2", "Ana", "Lee")
    }

    fn bo() -> ContactRecord {
        ContactRecord::new("u3", "Bo", "Ek")
    }

    fn test_settings() -> SessionSettings {
        SessionSettings {
            search_debounce_ms: 100,
            search_page_step: 5,
            database_location: ":memory:".to_string(),
        }
    }

    async fn open_session(
        store: Arc<MemoryStore>,
    ) -> (ChatSession, UnboundedReceiver<SessionEvent>) {
        ChatSession::open(
            store.clone(),
            store.clone(),
            store,
            &FixedIdentity::signed_in(me()),
            test_settings(),
        )
        .await
        .unwrap()
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_contacts([ana(), bo(), ContactRecord::new("u4", "Anders", "Berg")]);
        store
    }

    async fn next_completed(events: &mut UnboundedReceiver<SessionEvent>) -> (String, SearchOutcome) {
        loop {
            match events.recv().await.expect("event stream ended") {
                SessionEvent::SearchCompleted { query, outcome } => return (query, outcome),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn opening_requires_a_signed_in_user() {
        let store = Arc::new(MemoryStore::new());
        let result = ChatSession::open(
            store.clone(),
            store.clone(),
            store,
            &FixedIdentity::signed_out(),
            test_settings(),
        )
        .await;

        assert!(matches!(
            result.err(),
            Some(crate::error::EngineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn opening_syncs_the_signed_in_user_into_the_directory() {
        let store = Arc::new(MemoryStore::new());
        let _session = open_session(store.clone()).await;

        let contacts = store.list_contacts().await.unwrap();
        assert_eq!(contacts, vec![me()]);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_settles_before_the_directory_is_queried() {
        let store = seeded_store();
        let (session, mut events) = open_session(store.clone()).await;
        let reads_before = store.directory_reads();

        session.set_search_query("An").await;
        assert_eq!(session.snapshot().await.search_phase, SearchPhase::Searching);

        let (query, outcome) = next_completed(&mut events).await;
        assert_eq!(query, "An");
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(store.directory_reads(), reads_before + 1);
        assert_eq!(
            session.snapshot().await.search_phase,
            SearchPhase::ResultsShown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_newest_query_always_wins() {
        let store = seeded_store();
        let (session, mut events) = open_session(store.clone()).await;

        session.set_search_query("A").await;
        session.set_search_query("Bo").await;

        let (query, outcome) = next_completed(&mut events).await;
        assert_eq!(query, "Bo");
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id.as_str(), "u3");

        // The superseded query produced no completion and only one fetch
        // ever reached the directory.
        assert_eq!(store.directory_reads(), 1);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.search.results[0].id.as_str(), "u3");
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_query_goes_idle_without_a_fetch() {
        let store = seeded_store();
        let (session, _events) = open_session(store.clone()).await;

        session.set_search_query("An").await;
        session.set_search_query("").await;
        // Give any leaked timer a chance to fire before asserting.
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(store.directory_reads(), 0);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.search_phase, SearchPhase::Idle);
        assert!(snapshot.search.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn an_unmatched_query_reports_no_results() {
        let store = seeded_store();
        let (session, mut events) = open_session(store).await;

        session.set_search_query("Zz").await;
        let (_, outcome) = next_completed(&mut events).await;
        assert_eq!(outcome.total_matches, 0);
        assert_eq!(session.snapshot().await.search_phase, SearchPhase::NoResults);
    }

    #[tokio::test(start_paused = true)]
    async fn a_directory_outage_degrades_to_no_results() {
        let store = seeded_store();
        let (session, mut events) = open_session(store.clone()).await;
        store.set_directory_outage(true);

        session.set_search_query("An").await;
        loop {
            match events.recv().await.expect("event stream ended") {
                SessionEvent::SearchFailed { query } => {
                    assert_eq!(query, "An");
                    break;
                }
                SessionEvent::SearchCompleted { .. } => panic!("failure reported as success"),
                _ => continue,
            }
        }
        assert_eq!(session.snapshot().await.search_phase, SearchPhase::NoResults);
    }

    #[tokio::test(start_paused = true)]
    async fn show_more_widens_the_same_query_without_a_new_debounce() {
        let store = seeded_store();
        // A one-result page makes the widening observable.
        let settings = SessionSettings {
            search_page_step: 1,
            ..test_settings()
        };
        let (session, mut events) = ChatSession::open(
            store.clone(),
            store.clone(),
            store.clone(),
            &FixedIdentity::signed_in(me()),
            settings,
        )
        .await
        .unwrap();

        session.set_search_query("An").await;
        let (_, outcome) = next_completed(&mut events).await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.total_matches, 2);

        session.show_more_results().await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.search.results.len(), 2);
    }

    #[tokio::test]
    async fn selecting_promotes_and_loads_the_timeline() {
        let store = seeded_store();
        let (session, _events) = open_session(store.clone()).await;

        session.select_contact(ana()).await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.selected, Some(ana()));
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.recency, vec![ana()]);

        // The promotion is persisted, not only in memory.
        assert_eq!(store.load_recency(&UserId::new("u1")).await.unwrap(), vec![ana()]);
    }

    #[tokio::test]
    async fn sending_appends_after_persistence_and_promotes_again() {
        let store = seeded_store();
        let (session, _events) = open_session(store.clone()).await;

        session.select_contact(ana()).await;
        session.select_contact(bo()).await;
        session.send_message("hi bo").await.unwrap();
        session.select_contact(ana()).await;
        let sent = session.send_message("hi ana").await.unwrap();

        assert!(sent.is_sent_by(&UserId::new("u1")));
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.messages, vec![sent]);
        // Ana was promoted again by the send and leads Bo.
        assert_eq!(snapshot.recency, vec![ana(), bo()]);
    }

    #[tokio::test]
    async fn a_failed_send_leaves_the_timeline_alone() {
        let store = seeded_store();
        let (session, _events) = open_session(store.clone()).await;
        session.select_contact(ana()).await;
        session.send_message("kept").await.unwrap();

        store.set_timeline_outage(true);
        let error = session.send_message("dropped").await.unwrap_err();
        assert!(matches!(
            error,
            crate::error::EngineError::SendFailed { .. }
        ));

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].body, "kept");
    }

    #[tokio::test]
    async fn sending_without_a_selection_is_rejected_before_io() {
        let store = seeded_store();
        let (session, _events) = open_session(store.clone()).await;
        store.set_timeline_outage(true);

        let error = session.send_message("hello").await.unwrap_err();
        assert!(matches!(
            error,
            crate::error::EngineError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn leaving_a_conversation_discards_its_timeline() {
        let store = seeded_store();
        let (session, _events) = open_session(store).await;

        session.select_contact(ana()).await;
        session.send_message("hi").await.unwrap();
        session.clear_selection().await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.selected, None);
        assert!(snapshot.messages.is_empty());

        // Re-selecting reloads from the store rather than a cache.
        session.select_contact(ana()).await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].body, "hi");
    }

    #[tokio::test]
    async fn a_recency_outage_degrades_but_keeps_the_session_order() {
        let store = seeded_store();
        let (session, mut events) = open_session(store.clone()).await;
        store.set_recency_outage(true);

        session.select_contact(ana()).await;

        let mut lagged = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::RecencyPersistLagged) {
                lagged = true;
            }
        }
        assert!(lagged);
        assert_eq!(session.snapshot().await.recency, vec![ana()]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_stale_timeline_load_is_discarded() {
        use async_trait::async_trait;
        use palaver_storage::NewMessage;

        /// Timeline store whose reads stall long enough to be superseded.
        struct SlowTimeline {
            inner: Arc<MemoryStore>,
        }

        #[async_trait]
        impl TimelineStore for SlowTimeline {
            async fn messages_between(
                &self,
                a: &UserId,
                b: &UserId,
            ) -> StorageResult<Vec<MessageRecord>> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.inner.messages_between(a, b).await
            }

            async fn last_sent_at(&self, a: &UserId, b: &UserId) -> StorageResult<Option<u64>> {
                self.inner.last_sent_at(a, b).await
            }

            async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord> {
                self.inner.append_message(input).await
            }
        }

        let store = seeded_store();
        store
            .append_message(NewMessage {
                sender_id: UserId::new("u1"),
                receiver_id: UserId::new("u2"),
                body: "for ana".to_string(),
                sent_at_unix_millis: 1,
            })
            .await
            .unwrap();

        let slow = Arc::new(SlowTimeline {
            inner: store.clone(),
        });
        let (session, _events) = ChatSession::open(
            store.clone(),
            slow,
            store.clone(),
            &FixedIdentity::signed_in(me()),
            test_settings(),
        )
        .await
        .unwrap();
        let session = Arc::new(session);

        // Start opening Ana, then move to Bo before Ana's load resolves.
        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.select_contact(ana()).await })
        };
        tokio::task::yield_now().await;
        session.select_contact(bo()).await;
        first.await.unwrap();

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.selected, Some(bo()));
        // Ana's slow result must not overwrite Bo's empty timeline.
        assert!(snapshot.messages.is_empty());
    }
}
