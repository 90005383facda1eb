// crates/draftgate-store-sqlite/src/tests.rs
// ============================================================================
// Module: Store Core Tests
// Description: Unit tests for session scoping and rollback behavior.
// ============================================================================
//! ## Overview
//! Validates that the session boundary commits on success and leaves no
//! rows behind on failure.

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

use draftgate_core::RunStatus;
use draftgate_core::TenantId;

use crate::NewRun;
use crate::SqliteStore;
use crate::SqliteStoreConfig;
use crate::StoreError;

/// Opens a store in a fresh temporary directory.
fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    (dir, store)
}

/// Builds run inputs for a project.
fn new_run(project_id: &draftgate_core::ProjectId) -> NewRun {
    NewRun {
        project_id: project_id.clone(),
        status: RunStatus::Queued,
        current_stage: None,
        question: "effects of sleep on memory".to_string(),
        output_type: "report".to_string(),
        client_request_id: None,
        budgets: serde_json::json!({}),
        usage: serde_json::json!({}),
    }
}

#[test]
fn open_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let first = SqliteStore::open(SqliteStoreConfig::new(&path));
    assert!(first.is_ok());
    let second = SqliteStore::open(SqliteStoreConfig::new(&path));
    assert!(second.is_ok());
}

#[test]
fn session_commits_on_ok() {
    let (_dir, store) = open_store();
    let tenant = TenantId::new("t1");
    let project = store
        .with_session(|session| session.create_project(&tenant, "demo", None))
        .unwrap();
    let found = store
        .with_session(|session| session.get_project(&tenant, &project.id))
        .unwrap();
    assert_eq!(found.map(|p| p.name), Some("demo".to_string()));
}

#[test]
fn session_rolls_back_on_error() {
    let (_dir, store) = open_store();
    let tenant = TenantId::new("t1");
    let result: Result<(), StoreError> = store.with_session(|session| {
        session.create_project(&tenant, "doomed", None)?;
        Err(StoreError::Conflict("forced".to_string()))
    });
    assert!(result.is_err());
    let projects = store.with_session(|session| session.list_projects(&tenant, 10)).unwrap();
    assert!(projects.is_empty(), "rolled-back project must not persist");
}

#[test]
fn duplicate_project_names_conflict() {
    let (_dir, store) = open_store();
    let tenant = TenantId::new("t1");
    store.with_session(|session| session.create_project(&tenant, "demo", None)).unwrap();
    let duplicate = store.with_session(|session| session.create_project(&tenant, "demo", None));
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
}

#[test]
fn tenants_are_isolated() {
    let (_dir, store) = open_store();
    let tenant_a = TenantId::new("a");
    let tenant_b = TenantId::new("b");
    let project = store
        .with_session(|session| session.create_project(&tenant_a, "demo", None))
        .unwrap();
    let run = store
        .with_session(|session| session.create_run(&tenant_a, &new_run(&project.id)))
        .unwrap();
    let cross = store.with_session(|session| session.get_run(&tenant_b, &run.id)).unwrap();
    assert!(cross.is_none(), "run must be invisible to another tenant");
}
