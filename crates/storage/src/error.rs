use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("message id '{raw}' is not a valid uuid"))]
    InvalidMessageId {
        stage: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to configure sqlite pragma '{pragma}'"))]
    SqlitePragma {
        stage: &'static str,
        pragma: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("timestamp {value} does not fit the sqlite integer column"))]
    TimestampOutOfRange {
        stage: &'static str,
        value: u64,
    },
    #[snafu(display("message row {message_id} is corrupt: {details}"))]
    CorruptMessageRow {
        stage: &'static str,
        message_id: String,
        details: String,
    },
    #[snafu(display("recency document for owner '{owner}' is corrupt"))]
    CorruptRecencyDocument {
        stage: &'static str,
        owner: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to serialize recency document for owner '{owner}'"))]
    SerializeRecencyDocument {
        stage: &'static str,
        owner: String,
        source: serde_json::Error,
    },
    #[snafu(display("store unavailable at {stage}: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
