// crates/draftgate-server/src/stream.rs
// ============================================================================
// Module: SSE Run-Event Streamer
// Description: Poll-loop streamer with resume, keepalive, and grace window.
// Purpose: Serve ordered, resumable run events as a long-lived stream.
// Dependencies: draftgate-core, draftgate-store-sqlite, tokio, tokio-stream
// ============================================================================

//! ## Overview
//! The streamer polls the event log every 500 ms and frames each new event
//! as `id:` / `event: run_event` / `data: <json>`. Ten idle polls produce a
//! `: keepalive` comment; once the run is terminal the stream polls through
//! a two-tick grace window, emits `: stream complete`, and closes. The
//! frame and cadence decisions live in the pure [`StreamPlanner`] so tests
//! drive them without timers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use draftgate_core::RunEvent;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::TenantId;
use draftgate_store_sqlite::SqliteStore;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Poll period for the event log.
pub const POLL_PERIOD: Duration = Duration::from_millis(500);
/// Idle polls between keepalive comments.
const KEEPALIVE_EVERY: u32 = 10;
/// Extra polls granted after the run reaches a terminal state.
const GRACE_POLLS_AFTER_TERMINAL: u32 = 2;
/// Page size per poll.
const POLL_LIMIT: usize = 200;

// ============================================================================
// SECTION: Frame Formatting
// ============================================================================

/// JSON-encodes one string value, with escaping.
fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Formats one event as an SSE frame.
///
/// The frame shape is fixed: an `id:` line carrying the event number, an
/// `event: run_event` line, one `data:` line of compact JSON with a fixed
/// field order, and a blank line. Debug-level events surface as `info`.
/// The data object is assembled by hand because its field order is part of
/// the wire contract.
#[must_use]
pub fn format_sse_event(event: &RunEvent) -> String {
    let level = match event.level.as_str() {
        "debug" => "info",
        other => other,
    };
    let stage = event
        .stage
        .map_or_else(|| "null".to_string(), |stage| json_string(stage.as_str()));
    let data = format!(
        "{{\"id\":{},\"ts\":{},\"level\":{},\"stage\":{},\"event_type\":{},\"message\":{},\"payload\":{}}}",
        event.event_number,
        json_string(&event.ts.to_rfc3339()),
        json_string(level),
        stage,
        json_string(&event.event_type),
        json_string(&event.message),
        event.payload,
    );
    format!("id: {}\nevent: run_event\ndata: {data}\n\n", event.event_number)
}

// ============================================================================
// SECTION: Planner
// ============================================================================

/// Pure poll-loop state: resume point, keepalive cadence, grace window.
///
/// # Invariants
/// - `last_seen` only advances; replays therefore contain no duplicates.
#[derive(Debug, Clone)]
pub struct StreamPlanner {
    /// Highest event number already delivered.
    last_seen: i64,
    /// Idle polls since the last frame.
    keepalive_counter: u32,
    /// Idle polls observed since the run turned terminal.
    polls_since_terminal: u32,
    /// Set once the completion comment has been emitted.
    complete: bool,
}

impl StreamPlanner {
    /// Creates a planner resuming after `last_seen` (0 streams from the
    /// beginning).
    #[must_use]
    pub const fn new(last_seen: i64) -> Self {
        Self {
            last_seen,
            keepalive_counter: 0,
            polls_since_terminal: 0,
            complete: false,
        }
    }

    /// Returns the resume point for the next poll.
    #[must_use]
    pub const fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Returns true once the stream has emitted its completion comment.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Consumes one poll result and returns the frames to emit.
    ///
    /// `events` must be the events with numbers beyond the resume point, in
    /// ascending order; `status` is the run's status at poll time.
    pub fn on_poll(&mut self, events: &[RunEvent], status: RunStatus) -> Vec<String> {
        let mut frames = Vec::new();
        for event in events {
            frames.push(format_sse_event(event));
            self.last_seen = self.last_seen.max(event.event_number);
        }

        if status.is_finished() {
            if events.is_empty() {
                self.polls_since_terminal += 1;
                if self.polls_since_terminal >= GRACE_POLLS_AFTER_TERMINAL {
                    frames.push(": stream complete\n\n".to_string());
                    self.complete = true;
                }
            } else {
                self.polls_since_terminal = 0;
            }
            self.keepalive_counter = 0;
            return frames;
        }

        self.polls_since_terminal = 0;
        if events.is_empty() {
            self.keepalive_counter += 1;
            if self.keepalive_counter >= KEEPALIVE_EVERY {
                frames.push(": keepalive\n\n".to_string());
                self.keepalive_counter = 0;
            }
        } else {
            self.keepalive_counter = 0;
        }
        frames
    }
}

// ============================================================================
// SECTION: Stream Driver
// ============================================================================

/// Spawns the poll loop and returns a stream of SSE frames.
///
/// The loop ends when the planner completes, the run disappears, or the
/// client hangs up (receiver dropped).
pub fn run_event_stream(
    store: SqliteStore,
    tenant_id: TenantId,
    run_id: RunId,
    after_id: i64,
) -> ReceiverStream<String> {
    let (sender, receiver) = mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let mut planner = StreamPlanner::new(after_id);
        loop {
            let poll_store = store.clone();
            let poll_tenant = tenant_id.clone();
            let poll_run = run_id.clone();
            let last_seen = planner.last_seen();
            let polled = tokio::task::spawn_blocking(move || {
                let events = poll_store.list_run_events(
                    &poll_tenant,
                    &poll_run,
                    Some(last_seen),
                    POLL_LIMIT,
                )?;
                let run = poll_store
                    .with_session(|session| session.get_run_required(&poll_tenant, &poll_run))?;
                Ok::<_, draftgate_store_sqlite::StoreError>((events, run.status))
            })
            .await;

            let Ok(Ok((events, status))) = polled else {
                // A vanished run or store failure ends the stream quietly.
                break;
            };
            for frame in planner.on_poll(&events, status) {
                if sender.send(frame).await.is_err() {
                    return;
                }
            }
            if planner.is_complete() {
                break;
            }
            tokio::time::sleep(POLL_PERIOD).await;
        }
    });
    ReceiverStream::new(receiver)
}
