// crates/draftgate-server/tests/stream_planner.rs
// ============================================================================
// Module: Stream Planner Tests
// Description: Tests for SSE framing, keepalive, grace window, and resume.
// ============================================================================
//! ## Overview
//! Drives the pure poll-loop planner through scripted polls: frame shape is
//! bit-exact, ten idle polls produce a keepalive, terminal runs close after
//! the two-tick grace window, and `Last-Event-ID` resume replays without
//! gaps or duplicates.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use draftgate_core::EventId;
use draftgate_core::EventLevel;
use draftgate_core::RunEvent;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_server::StreamPlanner;
use draftgate_server::format_sse_event;
use serde_json::json;

/// Builds an event with a fixed timestamp for frame assertions.
fn event(number: i64, event_type: &str, stage: Option<Stage>) -> RunEvent {
    RunEvent {
        id: EventId::new(format!("event-{number}")),
        tenant_id: TenantId::new("t1"),
        run_id: RunId::new("r1"),
        event_number: number,
        // 2026-01-17T10:00:00Z in unix milliseconds.
        ts: Timestamp::from_unix_millis(1_768_644_000_000),
        stage,
        event_type: event_type.to_string(),
        level: EventLevel::Info,
        message: format!("Starting stage: {}", stage.map_or("none", Stage::as_str)),
        payload: json!({}),
    }
}

#[test]
fn frame_shape_is_bit_exact() {
    let frame = format_sse_event(&event(42, "stage_start", Some(Stage::Draft)));
    let expected = "id: 42\nevent: run_event\ndata: {\"id\":42,\"ts\":\"2026-01-17T10:00:00Z\",\"level\":\"info\",\"stage\":\"draft\",\"event_type\":\"stage_start\",\"message\":\"Starting stage: draft\",\"payload\":{}}\n\n";
    assert_eq!(frame, expected);
}

#[test]
fn debug_level_surfaces_as_info() {
    let mut debug_event = event(1, "log", None);
    debug_event.level = EventLevel::Debug;
    let frame = format_sse_event(&debug_event);
    assert!(frame.contains("\"level\":\"info\""));
}

#[test]
fn events_advance_the_resume_point() {
    let mut planner = StreamPlanner::new(0);
    let frames =
        planner.on_poll(&[event(1, "log", None), event(2, "log", None)], RunStatus::Running);
    assert_eq!(frames.len(), 2);
    assert_eq!(planner.last_seen(), 2);
    assert!(!planner.is_complete());
}

#[test]
fn ten_idle_polls_emit_one_keepalive() {
    let mut planner = StreamPlanner::new(0);
    for poll in 0 .. 9 {
        let frames = planner.on_poll(&[], RunStatus::Running);
        assert!(frames.is_empty(), "poll {poll} must stay silent");
    }
    let frames = planner.on_poll(&[], RunStatus::Running);
    assert_eq!(frames, vec![": keepalive\n\n".to_string()]);
    // The counter resets after a keepalive.
    assert!(planner.on_poll(&[], RunStatus::Running).is_empty());
}

#[test]
fn events_reset_the_keepalive_counter() {
    let mut planner = StreamPlanner::new(0);
    for _ in 0 .. 9 {
        assert!(planner.on_poll(&[], RunStatus::Running).is_empty());
    }
    let frames = planner.on_poll(&[event(1, "log", None)], RunStatus::Running);
    assert_eq!(frames.len(), 1);
    // Nine more idle polls still do not reach the keepalive threshold.
    for _ in 0 .. 9 {
        assert!(planner.on_poll(&[], RunStatus::Running).is_empty());
    }
}

#[test]
fn terminal_runs_close_after_the_grace_window() {
    let mut planner = StreamPlanner::new(0);
    let frames = planner.on_poll(&[event(1, "state", None)], RunStatus::Succeeded);
    assert_eq!(frames.len(), 1, "late events still stream during the window");
    assert!(planner.on_poll(&[], RunStatus::Succeeded).is_empty(), "first grace tick");
    let frames = planner.on_poll(&[], RunStatus::Succeeded);
    assert_eq!(frames, vec![": stream complete\n\n".to_string()]);
    assert!(planner.is_complete());
}

#[test]
fn late_events_reset_the_grace_window() {
    let mut planner = StreamPlanner::new(0);
    assert!(planner.on_poll(&[], RunStatus::Canceled).is_empty());
    // A straggler event arrives inside the window.
    let frames = planner.on_poll(&[event(1, "state", None)], RunStatus::Canceled);
    assert_eq!(frames.len(), 1);
    assert!(!planner.is_complete());
    assert!(planner.on_poll(&[], RunStatus::Canceled).is_empty());
    let frames = planner.on_poll(&[], RunStatus::Canceled);
    assert_eq!(frames, vec![": stream complete\n\n".to_string()]);
}

#[test]
fn resume_replays_strictly_after_the_given_id() {
    // A client that saw events 1..=7 reconnects with Last-Event-ID: 7.
    let mut planner = StreamPlanner::new(7);
    assert_eq!(planner.last_seen(), 7);
    let replay: Vec<RunEvent> = (8 ..= 10).map(|n| event(n, "log", None)).collect();
    let frames = planner.on_poll(&replay, RunStatus::Running);
    assert_eq!(frames.len(), 3);
    assert!(frames[0].starts_with("id: 8\n"));
    assert!(frames[2].starts_with("id: 10\n"));
    assert_eq!(planner.last_seen(), 10);
}
