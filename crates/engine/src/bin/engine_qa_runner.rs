use std::env;
use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

use palaver::{
    ChatSession, DirectoryIndex, EngineError, FixedIdentity, SessionEvent, SessionSettings,
    TimelineService,
};
use palaver_storage::{
    ContactRecord, DocumentStore, MemoryStore, RecencyStore, SqliteStore, StorageError, UserId,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    SearchPrefixPolicy,
    EmptyQueryGuard,
    LastQueryWins,
    SendAndReload,
    RecencyPromotion,
    DegradedRecency,
    SessionScenario,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "search_prefix_policy" => Some(Self::SearchPrefixPolicy),
            "empty_query_guard" => Some(Self::EmptyQueryGuard),
            "last_query_wins" => Some(Self::LastQueryWins),
            "send_and_reload" => Some(Self::SendAndReload),
            "recency_promotion" => Some(Self::RecencyPromotion),
            "degraded_recency" => Some(Self::DegradedRecency),
            "session_scenario" => Some(Self::SessionScenario),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SearchPrefixPolicy => "search_prefix_policy",
            Self::EmptyQueryGuard => "empty_query_guard",
            Self::LastQueryWins => "last_query_wins",
            Self::SendAndReload => "send_and_reload",
            Self::RecencyPromotion => "recency_promotion",
            Self::DegradedRecency => "degraded_recency",
            Self::SessionScenario => "session_scenario",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("engine call failed in '{scenario}': {source}"))]
    EngineCall {
        stage: &'static str,
        scenario: &'static str,
        source: EngineError,
    },
    #[snafu(display("storage call failed in '{scenario}': {source}"))]
    StorageCall {
        stage: &'static str,
        scenario: &'static str,
        source: StorageError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("scenario '{scenario}' timed out waiting for an event"))]
    EventTimeout {
        stage: &'static str,
        scenario: &'static str,
    },
}

fn parse_args(raw_args: Vec<String>) -> Result<RunnerArgs, RunnerError> {
    let mut scenario = None;
    let mut db_path = None;
    let mut cursor = raw_args.into_iter();

    while let Some(arg) = cursor.next() {
        match arg.as_str() {
            "--scenario" => {
                let value = cursor.next().ok_or(RunnerError::MissingArgumentValue {
                    stage: "parse-args-scenario",
                    arg: "--scenario",
                })?;
                scenario = Some(Scenario::parse(&value).ok_or(RunnerError::UnknownScenario {
                    stage: "parse-args-scenario-value",
                    raw: value,
                })?);
            }
            "--db" => {
                db_path = Some(cursor.next().ok_or(RunnerError::MissingArgumentValue {
                    stage: "parse-args-db",
                    arg: "--db",
                })?);
            }
            other => {
                return Err(RunnerError::UnknownArgument {
                    stage: "parse-args-unknown",
                    raw: other.to_string(),
                });
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.ok_or(RunnerError::MissingScenario {
            stage: "parse-args-missing-scenario",
        })?,
        db_path,
    })
}

fn ensure(scenario: &'static str, condition: bool, reason: &str) -> Result<(), RunnerError> {
    if condition {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "qa-check",
            scenario,
            reason: reason.to_string(),
        }
        .fail()
    }
}

fn me() -> ContactRecord {
    ContactRecord::new("qa_user_1", "Mara", "Voss")
}

fn ana() -> ContactRecord {
    ContactRecord::new("qa_user_2", "Ana", "Lee")
}

fn seeded_memory_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed_contacts([
        ana(),
        ContactRecord::new("qa_user_3", "Ana", "Jones"),
        ContactRecord::new("qa_user_4", "Ana", "Smith"),
        ContactRecord::new("qa_user_5", "Juan", "Anders"),
        ContactRecord::new("qa_user_6", "Bo", "Ek"),
    ]);
    store
}

async fn open_session(
    store: Arc<MemoryStore>,
) -> Result<
    (
        ChatSession,
        tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ),
    RunnerError,
> {
    ChatSession::open(
        store.clone(),
        store.clone(),
        store,
        &FixedIdentity::signed_in(me()),
        SessionSettings::default(),
    )
    .await
    .context(EngineCallSnafu {
        stage: "qa-open-session",
        scenario: "session_open",
    })
}

async fn next_search_completed(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    scenario: &'static str,
) -> Result<(String, usize), RunnerError> {
    let deadline = Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout(deadline, events.recv())
            .await
            .map_err(|_| RunnerError::EventTimeout {
                stage: "qa-await-search-completed",
                scenario,
            })?;
        match event {
            Some(SessionEvent::SearchCompleted { query, outcome }) => {
                return Ok((query, outcome.results.len()));
            }
            Some(_) => continue,
            None => {
                return ScenarioFailedSnafu {
                    stage: "qa-await-search-completed",
                    scenario,
                    reason: "event stream ended".to_string(),
                }
                .fail();
            }
        }
    }
}

async fn run_search_prefix_policy() -> Result<(), RunnerError> {
    const SCENARIO: &str = "search_prefix_policy";
    let store = seeded_memory_store();
    let index = DirectoryIndex::new(store);
    let caller = UserId::new("qa_caller");

    let outcome = index
        .search("An", &caller, 10)
        .await
        .context(EngineCallSnafu {
            stage: "qa-search-first-token",
            scenario: SCENARIO,
        })?;
    ensure(
        SCENARIO,
        outcome.total_matches == 3,
        "'An' should prefix-match the three Anas and skip Juan",
    )?;

    let outcome = index
        .search("An Sm", &caller, 10)
        .await
        .context(EngineCallSnafu {
            stage: "qa-search-two-tokens",
            scenario: SCENARIO,
        })?;
    ensure(
        SCENARIO,
        outcome.results.len() == 1 && outcome.results[0].surname == "Smith",
        "'An Sm' should keep Ana Smith and drop Ana Jones",
    )?;

    Ok(())
}

async fn run_empty_query_guard() -> Result<(), RunnerError> {
    const SCENARIO: &str = "empty_query_guard";
    let store = seeded_memory_store();
    let index = DirectoryIndex::new(store.clone());

    let outcome = index
        .search("   ", &UserId::new("qa_caller"), 5)
        .await
        .context(EngineCallSnafu {
            stage: "qa-search-empty",
            scenario: SCENARIO,
        })?;
    ensure(
        SCENARIO,
        outcome.results.is_empty() && outcome.total_matches == 0,
        "an empty query should produce the empty outcome",
    )?;
    ensure(
        SCENARIO,
        store.directory_reads() == 0,
        "an empty query should never contact the directory",
    )
}

async fn run_last_query_wins() -> Result<(), RunnerError> {
    const SCENARIO: &str = "last_query_wins";
    let store = seeded_memory_store();
    let (session, mut events) = open_session(store.clone()).await?;

    session.set_search_query("A").await;
    session.set_search_query("Bo").await;

    let (query, result_count) = next_search_completed(&mut events, SCENARIO).await?;
    ensure(
        SCENARIO,
        query == "Bo",
        "the completion must belong to the newest query",
    )?;
    ensure(SCENARIO, result_count == 1, "'Bo' matches exactly one contact")?;
    ensure(
        SCENARIO,
        store.directory_reads() == 1,
        "the superseded query must never reach the directory",
    )
}

async fn run_send_and_reload<S>(store: Arc<S>, scenario: &'static str) -> Result<(), RunnerError>
where
    S: DocumentStore + 'static,
{
    let service = TimelineService::new(store.clone());
    let alice = UserId::new("qa_alice");
    let bob = UserId::new("qa_bob");
    let eve = UserId::new("qa_eve");

    for body in ["first", "second", "third"] {
        service
            .send(&alice, &bob, body)
            .await
            .context(EngineCallSnafu {
                stage: "qa-send",
                scenario,
            })?;
    }
    service.send(&alice, &eve, "noise").await.context(EngineCallSnafu {
        stage: "qa-send-noise",
        scenario,
    })?;

    // A fresh service sees exactly the pair history, in call order.
    let reloaded = TimelineService::new(store);
    let timeline = reloaded.load(&bob, &alice).await.context(EngineCallSnafu {
        stage: "qa-reload",
        scenario,
    })?;
    let bodies: Vec<&str> = timeline.iter().map(|message| message.body.as_str()).collect();
    ensure(
        scenario,
        bodies == ["first", "second", "third"],
        "reloading must return the pair history in send order",
    )?;
    ensure(
        scenario,
        timeline
            .windows(2)
            .all(|pair| pair[0].sent_at_unix_millis < pair[1].sent_at_unix_millis),
        "sequential sends must carry strictly increasing send times",
    )
}

async fn run_recency_promotion<S>(store: Arc<S>, scenario: &'static str) -> Result<(), RunnerError>
where
    S: DocumentStore + 'static,
{
    let owner = UserId::new("qa_owner");
    let mut tracker = palaver::RecencyTracker::new(store.clone(), owner.clone());

    tracker.promote(ana()).await.context(EngineCallSnafu {
        stage: "qa-promote-ana",
        scenario,
    })?;
    tracker.promote(me()).await.context(EngineCallSnafu {
        stage: "qa-promote-me",
        scenario,
    })?;
    tracker.promote(ana()).await.context(EngineCallSnafu {
        stage: "qa-promote-ana-again",
        scenario,
    })?;

    let persisted = store.load_recency(&owner).await.context(StorageCallSnafu {
        stage: "qa-load-recency",
        scenario,
    })?;
    let ids: Vec<&str> = persisted.iter().map(|entry| entry.id.as_str()).collect();
    ensure(
        scenario,
        ids == [ana().id.as_str(), me().id.as_str()],
        "repeated promotion must keep one entry per contact, newest first",
    )
}

async fn run_degraded_recency() -> Result<(), RunnerError> {
    const SCENARIO: &str = "degraded_recency";
    let store = seeded_memory_store();
    let (session, mut events) = open_session(store.clone()).await?;
    store.set_recency_outage(true);

    session.select_contact(ana()).await;

    let mut lagged = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::RecencyPersistLagged) {
            lagged = true;
        }
    }
    ensure(
        SCENARIO,
        lagged,
        "a persistence outage must be reported as a lagging copy",
    )?;

    let snapshot = session.snapshot().await;
    ensure(
        SCENARIO,
        snapshot.recency == vec![ana()],
        "the in-session order must advance despite the outage",
    )
}

async fn run_session_scenario() -> Result<(), RunnerError> {
    const SCENARIO: &str = "session_scenario";
    let store = seeded_memory_store();
    let (session, _events) = open_session(store.clone()).await?;

    session.select_contact(ana()).await;
    let snapshot = session.snapshot().await;
    ensure(
        SCENARIO,
        snapshot.recency.first() == Some(&ana()),
        "selection must put the contact at the front of the history",
    )?;

    session.send_message("hi").await.context(EngineCallSnafu {
        stage: "qa-session-send",
        scenario: SCENARIO,
    })?;

    let snapshot = session.snapshot().await;
    ensure(SCENARIO, snapshot.messages.len() == 1, "one sent message")?;
    let message = &snapshot.messages[0];
    ensure(
        SCENARIO,
        message.sender_id == me().id && message.receiver_id == ana().id && message.body == "hi",
        "the sent message must carry the two parties and the body",
    )?;
    ensure(
        SCENARIO,
        snapshot.recency == vec![ana()],
        "sending must not duplicate the history entry",
    )?;

    // A second session for the same owner sees the persisted history.
    let (reopened, _events) = open_session(store).await?;
    reopened.select_contact(ana()).await;
    let snapshot = reopened.snapshot().await;
    ensure(
        SCENARIO,
        snapshot.recency == vec![ana()] && snapshot.messages.len() == 1,
        "history and timeline must survive a reload",
    )
}

async fn run_scenario(scenario: Scenario, db_path: Option<&str>) -> Result<(), RunnerError> {
    match scenario {
        Scenario::SearchPrefixPolicy => run_search_prefix_policy().await,
        Scenario::EmptyQueryGuard => run_empty_query_guard().await,
        Scenario::LastQueryWins => run_last_query_wins().await,
        Scenario::SendAndReload => match db_path {
            Some(path) => {
                let store = SqliteStore::open(path).await.context(StorageCallSnafu {
                    stage: "qa-open-sqlite",
                    scenario: "send_and_reload",
                })?;
                run_send_and_reload(Arc::new(store), "send_and_reload").await
            }
            None => run_send_and_reload(Arc::new(MemoryStore::new()), "send_and_reload").await,
        },
        Scenario::RecencyPromotion => match db_path {
            Some(path) => {
                let store = SqliteStore::open(path).await.context(StorageCallSnafu {
                    stage: "qa-open-sqlite",
                    scenario: "recency_promotion",
                })?;
                run_recency_promotion(Arc::new(store), "recency_promotion").await
            }
            None => {
                run_recency_promotion(Arc::new(MemoryStore::new()), "recency_promotion").await
            }
        },
        Scenario::DegradedRecency => run_degraded_recency().await,
        Scenario::SessionScenario => run_session_scenario().await,
        Scenario::All => {
            run_search_prefix_policy().await?;
            run_empty_query_guard().await?;
            run_last_query_wins().await?;
            run_send_and_reload(Arc::new(MemoryStore::new()), "send_and_reload").await?;
            run_recency_promotion(Arc::new(MemoryStore::new()), "recency_promotion").await?;
            run_degraded_recency().await?;
            run_session_scenario().await
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = match parse_args(env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("qa: {error}");
            eprintln!(
                "usage: engine_qa_runner --scenario <name|all> [--db <sqlite-path>]"
            );
            std::process::exit(2);
        }
    };

    match run_scenario(args.scenario, args.db_path.as_deref()).await {
        Ok(()) => {
            tracing::info!(scenario = args.scenario.name(), "qa scenario passed");
            println!("qa: scenario '{}' passed", args.scenario.name());
        }
        Err(error) => {
            eprintln!("qa: {error}");
            std::process::exit(1);
        }
    }
}
