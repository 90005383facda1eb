// crates/draftgate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store Core
// Description: Connection management, schema, and transaction scoping.
// Purpose: Open the database once and hand out serialized write sessions.
// Dependencies: draftgate-core, rusqlite, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteStore`] owns one write connection behind a mutex. Every mutation
//! runs through [`SqliteStore::with_session`], which opens an immediate
//! transaction, commits on success, and rolls back on error. Holding the
//! session across a whole pipeline stage is what gives stages their
//! no-partial-writes guarantee.
//!
//! The schema is versioned through a `store_meta` table; initialization is
//! idempotent and safe to run from every process at startup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use draftgate_core::TransitionError;
use rusqlite::Connection;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store operation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; the API maps them onto
///   HTTP statuses.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced run does not exist for the tenant.
    #[error("run not found")]
    RunNotFound,
    /// The referenced project does not exist for the tenant.
    #[error("project not found")]
    ProjectNotFound,
    /// A state machine rule rejected the requested transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// A uniqueness rule rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Retry was requested for a run that is not failed or blocked.
    #[error("cannot retry run in status {status}; retry is only allowed for failed or blocked runs")]
    RetryNotAllowed {
        /// Status the run currently holds.
        status: String,
    },
    /// The database reported an error.
    #[error("store db error: {0}")]
    Db(String),
    /// Stored data failed to decode.
    #[error("store data invalid: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err.to_string())
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for opening the store.
///
/// # Invariants
/// - `path` must resolve to a file path, not a directory.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds for every connection.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Creates a configuration with the default busy timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable store handle shared by the API and the worker.
///
/// # Invariants
/// - All writes are serialized through the single write connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    /// Serialized write connection.
    write: Arc<Mutex<Connection>>,
    /// Read connection kept off the write path.
    read: Arc<Mutex<Connection>>,
    /// Store configuration, reused to open side connections.
    config: SqliteStoreConfig,
}

/// One open write transaction over the store.
///
/// # Invariants
/// - Lives strictly inside a [`SqliteStore::with_session`] call; commit and
///   rollback are decided by the closure outcome.
pub struct StoreSession<'conn> {
    /// Underlying transaction.
    pub(crate) tx: Transaction<'conn>,
}

impl StoreSession<'_> {
    /// Returns the transaction as a connection for query execution.
    pub(crate) fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl SqliteStore {
    /// Opens the store, applying pragmas and initializing the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened or the
    /// schema cannot be initialized.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, StoreError> {
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        let read_connection = open_connection(&config)?;
        Ok(Self {
            write: Arc::new(Mutex::new(connection)),
            read: Arc::new(Mutex::new(read_connection)),
            config,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Runs a closure inside one immediate write transaction.
    ///
    /// Commits when the closure returns `Ok`; rolls back otherwise. This is
    /// the stage-transaction boundary: a stage that fails leaves no rows.
    ///
    /// # Errors
    ///
    /// Returns the closure error, or [`StoreError::Db`] when the
    /// transaction itself cannot be started or committed.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&mut StoreSession<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.write.lock().map_err(|_| {
            StoreError::Db("store write connection poisoned by a prior panic".to_string())
        })?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut session = StoreSession {
            tx,
        };
        match f(&mut session) {
            Ok(value) => {
                session.tx.commit().map_err(|err| StoreError::Db(err.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back.
                drop(session);
                Err(err)
            }
        }
    }

    /// Runs a closure against the read connection, off the write path.
    ///
    /// # Errors
    ///
    /// Returns the closure error, or [`StoreError::Db`] when the read
    /// connection is unavailable.
    pub fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.read.lock().map_err(|_| {
            StoreError::Db("store read connection poisoned by a prior panic".to_string())
        })?;
        f(&guard)
    }
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Opens a configured connection against the store path.
pub(crate) fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, StoreError> {
    if let Some(parent) = config.path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|err| StoreError::Db(err.to_string()))?;
    }
    let connection =
        Connection::open(&config.path).map_err(|err| StoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies journal, sync, and timeout pragmas.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), StoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| StoreError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA journal_mode = wal;")
        .map_err(|err| StoreError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA synchronous = normal;")
        .map_err(|err| StoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| StoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Initializes or upgrades the schema, tracked through `store_meta`.
fn initialize_schema(connection: &mut Connection) -> Result<(), StoreError> {
    let tx = connection.transaction().map_err(|err| StoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| StoreError::Db(err.to_string()))?;
    let version: Option<i64> = {
        use rusqlite::OptionalExtension;
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?
    };
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| StoreError::Db(err.to_string()))?;
            tx.execute_batch(CREATE_TABLES_V1).map_err(|err| StoreError::Db(err.to_string()))?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(StoreError::Corrupt(format!(
                "unsupported schema version {other} (supported: {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit().map_err(|err| StoreError::Db(err.to_string()))?;
    Ok(())
}

/// Version 1 schema.
const CREATE_TABLES_V1: &str = "CREATE TABLE IF NOT EXISTS projects (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    last_run_id TEXT,
    last_run_status TEXT,
    last_activity_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, name)
);
CREATE TABLE IF NOT EXISTS runs (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    status TEXT NOT NULL,
    current_stage TEXT,
    budgets_json TEXT NOT NULL DEFAULT '{}',
    usage_json TEXT NOT NULL DEFAULT '{}',
    failure_reason TEXT,
    error_code TEXT,
    started_at INTEGER,
    finished_at INTEGER,
    cancel_requested_at INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0,
    question TEXT NOT NULL,
    output_type TEXT NOT NULL DEFAULT 'report',
    client_request_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    FOREIGN KEY (tenant_id, project_id)
        REFERENCES projects(tenant_id, id) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_runs_client_request
    ON runs (tenant_id, project_id, client_request_id)
    WHERE client_request_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_runs_tenant_status
    ON runs (tenant_id, status, created_at);
CREATE TABLE IF NOT EXISTS jobs (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_created
    ON jobs (status, created_at);
CREATE TABLE IF NOT EXISTS run_events (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    event_number INTEGER NOT NULL,
    ts INTEGER NOT NULL,
    stage TEXT,
    event_type TEXT NOT NULL DEFAULT 'log',
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    payload_json TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, run_id, event_number),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_run_events_run_number
    ON run_events (tenant_id, run_id, event_number);
CREATE TABLE IF NOT EXISTS run_sections (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    section_id TEXT NOT NULL,
    title TEXT NOT NULL,
    goal TEXT NOT NULL,
    section_order INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, run_id, section_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS outline_notes (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    section_id TEXT NOT NULL,
    notes_json TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, run_id, section_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS section_evidence (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    section_id TEXT NOT NULL,
    snippet_id TEXT NOT NULL,
    PRIMARY KEY (tenant_id, run_id, section_id, snippet_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS draft_sections (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    section_id TEXT NOT NULL,
    text TEXT NOT NULL,
    section_summary TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, run_id, section_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS section_reviews (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    section_id TEXT NOT NULL,
    verdict TEXT NOT NULL,
    issues_json TEXT NOT NULL DEFAULT '[]',
    reviewed_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, run_id, section_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS artifacts (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    run_id TEXT,
    artifact_type TEXT NOT NULL,
    blob_ref TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, run_id, artifact_type),
    FOREIGN KEY (tenant_id, project_id)
        REFERENCES projects(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS sources (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    title TEXT NOT NULL,
    authors_json TEXT NOT NULL DEFAULT '[]',
    year INTEGER,
    venue TEXT,
    doi TEXT,
    arxiv_id TEXT,
    url TEXT,
    origin TEXT,
    cited_by_count INTEGER,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, canonical_id)
);
CREATE TABLE IF NOT EXISTS run_sources (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 0,
    origin TEXT,
    PRIMARY KEY (tenant_id, run_id, source_id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS snapshots (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    snapshot_version INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    blob_ref TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, source_id, snapshot_version),
    FOREIGN KEY (tenant_id, source_id)
        REFERENCES sources(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS snippets (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    snapshot_id TEXT NOT NULL,
    snippet_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    char_start INTEGER NOT NULL DEFAULT 0,
    char_end INTEGER NOT NULL DEFAULT 0,
    sha256 TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    FOREIGN KEY (tenant_id, snapshot_id)
        REFERENCES snapshots(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS snippet_embeddings (
    tenant_id TEXT NOT NULL,
    snippet_id TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    dims INTEGER NOT NULL,
    embedding_json TEXT NOT NULL,
    PRIMARY KEY (tenant_id, snippet_id, embedding_model),
    FOREIGN KEY (tenant_id, snippet_id)
        REFERENCES snippets(tenant_id, id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS source_embeddings (
    tenant_id TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    embedding_dim INTEGER NOT NULL,
    embedding_json TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, canonical_id, embedding_model)
);
CREATE TABLE IF NOT EXISTS run_checkpoints (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    payload_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id),
    FOREIGN KEY (tenant_id, run_id)
        REFERENCES runs(tenant_id, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_run_checkpoints_run_stage
    ON run_checkpoints (tenant_id, run_id, stage, created_at);";

// ============================================================================
// SECTION: JSON Helpers
// ============================================================================

/// Decodes a stored JSON column, failing closed on corruption.
pub(crate) fn decode_json(raw: &str, column: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw)
        .map_err(|err| StoreError::Corrupt(format!("column {column} holds invalid JSON: {err}")))
}

/// Encodes a JSON column for storage.
pub(crate) fn encode_json(value: &serde_json::Value) -> String {
    value.to_string()
}
