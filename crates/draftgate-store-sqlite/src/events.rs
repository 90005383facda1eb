// crates/draftgate-store-sqlite/src/events.rs
// ============================================================================
// Module: Event Log Store
// Description: Dense monotonic event append and ordered readers.
// Purpose: Make in-flight pipeline progress observable mid-stage.
// Dependencies: draftgate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Event numbers are allocated as `max(event_number) + 1` per run inside
//! whichever write transaction performs the append, so the sequence is dense
//! and strictly increasing. Two append paths exist on purpose:
//!
//! - [`StoreSession::append_event`] joins the caller's transaction, used by
//!   lifecycle writers whose event must commit atomically with a row change.
//! - [`SqliteEventSink`] opens a dedicated connection and commits each
//!   append on its own, used by stage instrumentation so readers see
//!   progress before the stage transaction ends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::EventId;
use draftgate_core::EventLevel;
use draftgate_core::EventSink;
use draftgate_core::EventSinkError;
use draftgate_core::NewRunEvent;
use draftgate_core::RunEvent;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_core::event_types;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use rusqlite::params;

use crate::store::SqliteStore;
use crate::store::SqliteStoreConfig;
use crate::store::StoreError;
use crate::store::StoreSession;
use crate::store::decode_json;
use crate::store::encode_json;
use crate::store::open_connection;

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps one `run_events` row.
pub(crate) fn event_from_row(row: &Row<'_>) -> Result<RunEvent, StoreError> {
    let level_raw: String = row.get("level")?;
    let level = EventLevel::parse(&level_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown event level {level_raw}")))?;
    let stage_raw: Option<String> = row.get("stage")?;
    let payload_raw: String = row.get("payload_json")?;
    Ok(RunEvent {
        id: EventId::new(row.get::<_, String>("id")?),
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        run_id: RunId::new(row.get::<_, String>("run_id")?),
        event_number: row.get("event_number")?,
        ts: Timestamp::from_unix_millis(row.get("ts")?),
        stage: stage_raw.as_deref().and_then(Stage::parse),
        event_type: row.get("event_type")?,
        level,
        message: row.get("message")?,
        payload: decode_json(&payload_raw, "payload_json")?,
    })
}

// ============================================================================
// SECTION: Append
// ============================================================================

/// Appends one event on an open connection or transaction.
///
/// Verifies the run exists, applies the finished-run guard, allocates the
/// next dense `event_number`, and touches the project's activity marker.
pub(crate) fn append_event_on(
    conn: &Connection,
    event: &NewRunEvent,
) -> Result<RunEvent, StoreError> {
    let run_row: Option<(String, String)> = conn
        .query_row(
            "SELECT project_id, status FROM runs WHERE tenant_id = ?1 AND id = ?2",
            params![event.tenant_id.as_str(), event.run_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((project_id, status_raw)) = run_row else {
        return Err(StoreError::RunNotFound);
    };
    let status = RunStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown run status {status_raw}")))?;
    if status.is_finished() && !event.allow_finished {
        return Err(StoreError::Conflict("cannot append events to a finished run".to_string()));
    }

    let next_number: i64 = conn.query_row(
        "SELECT COALESCE(MAX(event_number), 0) + 1 FROM run_events
         WHERE tenant_id = ?1 AND run_id = ?2",
        params![event.tenant_id.as_str(), event.run_id.as_str()],
        |row| row.get(0),
    )?;

    let id = EventId::generate();
    let now = Timestamp::now();
    conn.execute(
        "INSERT INTO run_events
             (tenant_id, id, run_id, event_number, ts, stage, event_type, level, message,
              payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.tenant_id.as_str(),
            id.as_str(),
            event.run_id.as_str(),
            next_number,
            now.unix_millis(),
            event.stage.map(Stage::as_str),
            event.event_type,
            event.level.as_str(),
            event.message,
            encode_json(&event.payload)
        ],
    )?;
    conn.execute(
        "UPDATE projects
         SET last_run_id = ?3, last_run_status = ?4, last_activity_at = ?5, updated_at = ?5
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            event.tenant_id.as_str(),
            project_id,
            event.run_id.as_str(),
            status.as_str(),
            now.unix_millis()
        ],
    )?;

    Ok(RunEvent {
        id,
        tenant_id: event.tenant_id.clone(),
        run_id: event.run_id.clone(),
        event_number: next_number,
        ts: now,
        stage: event.stage,
        event_type: event.event_type.clone(),
        level: event.level,
        message: event.message.clone(),
        payload: event.payload.clone(),
    })
}

/// Lists events for a run ordered by `event_number` ascending.
pub(crate) fn list_events_on(
    conn: &Connection,
    tenant_id: &TenantId,
    run_id: &RunId,
    after_event_number: Option<i64>,
    limit: usize,
) -> Result<Vec<RunEvent>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM run_events
         WHERE tenant_id = ?1 AND run_id = ?2 AND event_number > ?3
         ORDER BY event_number ASC LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        params![
            tenant_id.as_str(),
            run_id.as_str(),
            after_event_number.unwrap_or(0),
            i64::try_from(limit).unwrap_or(i64::MAX)
        ],
        |row| Ok(event_from_row(row)),
    )?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row??);
    }
    Ok(events)
}

// ============================================================================
// SECTION: Session and Store Surface
// ============================================================================

impl StoreSession<'_> {
    /// Appends an event inside the session's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs and
    /// [`StoreError::Conflict`] for disallowed appends to finished runs.
    pub fn append_event(&mut self, event: &NewRunEvent) -> Result<RunEvent, StoreError> {
        append_event_on(self.conn(), event)
    }

    /// Lists events inside the session's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_run_events(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        after_event_number: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RunEvent>, StoreError> {
        list_events_on(self.conn(), tenant_id, run_id, after_event_number, limit)
    }
}

impl SqliteStore {
    /// Lists events for a run ordered by `event_number` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_run_events(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        after_event_number: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RunEvent>, StoreError> {
        self.with_reader(|conn| {
            list_events_on(conn, tenant_id, run_id, after_event_number, limit)
        })
    }
}

// ============================================================================
// SECTION: Event Sink
// ============================================================================

/// Event writer with its own commit scope.
///
/// # Invariants
/// - Every append opens a fresh connection and commits before returning, so
///   readers observe the event even while a stage transaction stays open.
#[derive(Debug, Clone)]
pub struct SqliteEventSink {
    /// Store configuration used to open append connections.
    config: SqliteStoreConfig,
}

impl SqliteEventSink {
    /// Creates a sink against the same database as a store.
    #[must_use]
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            config: store.config().clone(),
        }
    }

    /// Creates a sink directly from configuration.
    #[must_use]
    pub fn from_config(config: SqliteStoreConfig) -> Self {
        Self {
            config,
        }
    }

    /// Opens a short-lived connection and runs one committed transaction.
    fn with_own_tx<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut connection = open_connection(&self.config)?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let value = f(&tx)?;
        tx.commit().map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(value)
    }
}

/// Maps sink storage errors onto the interface error type.
fn sink_error(err: StoreError) -> EventSinkError {
    match err {
        StoreError::RunNotFound => EventSinkError::RunNotFound,
        StoreError::Conflict(_) => EventSinkError::RunFinished,
        other => EventSinkError::Storage(other.to_string()),
    }
}

impl EventSink for SqliteEventSink {
    fn append(&self, event: &NewRunEvent) -> Result<RunEvent, EventSinkError> {
        self.with_own_tx(|conn| append_event_on(conn, event)).map_err(sink_error)
    }

    fn latest_for_stage(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        stage: Stage,
    ) -> Result<Option<RunEvent>, EventSinkError> {
        self.with_own_tx(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM run_events
                 WHERE tenant_id = ?1 AND run_id = ?2 AND stage = ?3
                 ORDER BY event_number DESC LIMIT 1",
            )?;
            let event = stmt
                .query_row(
                    params![tenant_id.as_str(), run_id.as_str(), stage.as_str()],
                    |row| Ok(event_from_row(row)),
                )
                .optional()?
                .transpose()?;
            Ok(event)
        })
        .map_err(sink_error)
    }
}

// ============================================================================
// SECTION: Stage Event Helpers
// ============================================================================

/// Emits a `stage_start` event, idempotent per `(run, stage)`.
///
/// When the most recent event for the stage is already a `stage_start`, the
/// existing event is returned and nothing is appended.
///
/// # Errors
///
/// Returns [`EventSinkError`] when the sink cannot read or append.
pub fn emit_stage_start(
    sink: &dyn EventSink,
    tenant_id: &TenantId,
    run_id: &RunId,
    stage: Stage,
    payload: serde_json::Value,
) -> Result<RunEvent, EventSinkError> {
    if let Some(latest) = sink.latest_for_stage(tenant_id, run_id, stage)?
        && latest.event_type == event_types::STAGE_START
    {
        return Ok(latest);
    }
    let event = NewRunEvent::info(
        tenant_id.clone(),
        run_id.clone(),
        event_types::STAGE_START,
        format!("Starting stage: {stage}"),
    )
    .with_stage(stage)
    .with_payload(payload);
    sink.append(&event)
}

/// Emits a `stage_finish` event.
///
/// # Errors
///
/// Returns [`EventSinkError`] when the sink cannot append.
pub fn emit_stage_finish(
    sink: &dyn EventSink,
    tenant_id: &TenantId,
    run_id: &RunId,
    stage: Stage,
    payload: serde_json::Value,
) -> Result<RunEvent, EventSinkError> {
    let event = NewRunEvent::info(
        tenant_id.clone(),
        run_id.clone(),
        event_types::STAGE_FINISH,
        format!("Finished stage: {stage}"),
    )
    .with_stage(stage)
    .with_payload(payload);
    sink.append(&event)
}
