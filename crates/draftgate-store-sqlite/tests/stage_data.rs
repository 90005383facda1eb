// crates/draftgate-store-sqlite/tests/stage_data.rs
// ============================================================================
// Module: Stage Data Tests
// Description: Tests for outline, evidence, draft, review, artifact tables.
// ============================================================================
//! ## Overview
//! Validates delete-then-insert outline replacement, atomic evidence pack
//! swaps, draft and review upserts, artifact upsert idempotency, and the
//! snippet vector search.

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

use draftgate_core::CanonicalIdentifier;
use draftgate_core::Outline;
use draftgate_core::OutlineSection;
use draftgate_core::ProjectId;
use draftgate_core::RetrievedSource;
use draftgate_core::ReviewVerdict;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::SectionId;
use draftgate_core::SnippetId;
use draftgate_core::SourceId;
use draftgate_core::SourceType;
use draftgate_core::TenantId;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;

/// Opens a store with one queued run.
fn seed() -> (tempfile::TempDir, SqliteStore, TenantId, ProjectId, RunId) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    let tenant = TenantId::new("t1");
    let (project_id, run_id) = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "demo", None)?;
            let run = session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id.clone(),
                    status: RunStatus::Queued,
                    current_stage: None,
                    question: "q".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: None,
                    budgets: serde_json::json!({}),
                    usage: serde_json::json!({}),
                },
            )?;
            Ok((project.id, run.id))
        })
        .unwrap();
    (dir, store, tenant, project_id, run_id)
}

/// Builds a minimal outline section.
fn section(section_id: &str, title: &str, order: u32) -> OutlineSection {
    OutlineSection {
        section_id: section_id.to_string(),
        title: title.to_string(),
        goal: "States the goal. Sets the scope.".to_string(),
        key_points: (0 .. 6).map(|n| format!("point {n}")).collect(),
        suggested_evidence_themes: vec!["memory".to_string()],
        section_order: order,
    }
}

/// Persists a source, snapshot, and embedded snippet; returns ids.
fn seed_snippet(
    store: &SqliteStore,
    tenant: &TenantId,
    title: &str,
    vector: &[f32],
) -> (SourceId, SnippetId) {
    store
        .with_session(|session| {
            let source = RetrievedSource {
                canonical_id: CanonicalIdentifier {
                    doi: Some(format!("10.1/{title}")),
                    arxiv_id: None,
                    openalex_id: None,
                    url: None,
                },
                title: title.to_string(),
                authors: vec!["Author A".to_string()],
                year: Some(2_024),
                venue: None,
                abstract_text: Some("An abstract.".to_string()),
                url: None,
                pdf_url: None,
                source_type: SourceType::Paper,
                connector: "openalex".to_string(),
                citations_count: Some(3),
                extra_metadata: serde_json::json!({}),
            };
            let upsert = session.upsert_source(tenant, &source, "openalex")?;
            let version = session.next_snapshot_version(tenant, &upsert.source_id)?;
            let snapshot_id = session.insert_snapshot(
                tenant,
                &upsert.source_id,
                version,
                "text/plain",
                "abstract:test",
                "hash",
                9,
                &serde_json::json!({}),
            )?;
            let snippet_id =
                session.insert_snippet(tenant, &snapshot_id, 0, "Snippet text.", "hash")?;
            session.insert_snippet_embedding(tenant, &snippet_id, "embed-small", vector)?;
            Ok((upsert.source_id, snippet_id))
        })
        .unwrap()
}

#[test]
fn outline_replacement_deletes_prior_rows() {
    let (_dir, store, tenant, _project, run_id) = seed();
    let first = Outline {
        sections: vec![section("intro", "Introduction", 1), section("conclusion", "Conclusion", 2)],
    };
    let second = Outline {
        sections: vec![
            section("intro", "Introduction", 1),
            section("findings", "Findings", 2),
            section("conclusion", "Conclusion", 3),
        ],
    };
    store
        .with_session(|session| session.replace_outline(&tenant, &run_id, &first))
        .unwrap();
    store
        .with_session(|session| session.replace_outline(&tenant, &run_id, &second))
        .unwrap();
    let sections = store
        .with_session(|session| session.list_run_sections(&tenant, &run_id))
        .unwrap();
    assert_eq!(sections.len(), 3);
    assert_eq!(sections[1].section_id.as_str(), "findings");
    let notes = store
        .with_session(|session| session.load_outline_notes(&tenant, &run_id))
        .unwrap();
    assert_eq!(notes.len(), 3);
    assert_eq!(notes[0].key_points.len(), 6);
}

#[test]
fn evidence_pack_swap_is_atomic_per_section() {
    let (_dir, store, tenant, _project, run_id) = seed();
    let section_id = SectionId::new("intro");
    let first = vec![SnippetId::new("aaa"), SnippetId::new("bbb")];
    let second = vec![SnippetId::new("ccc")];
    store
        .with_session(|session| {
            session.replace_section_evidence(&tenant, &run_id, &section_id, &first)
        })
        .unwrap();
    store
        .with_session(|session| {
            session.replace_section_evidence(&tenant, &run_id, &section_id, &second)
        })
        .unwrap();
    let ids = store
        .with_session(|session| session.list_section_evidence(&tenant, &run_id, &section_id))
        .unwrap();
    assert_eq!(ids, second);
}

#[test]
fn draft_upsert_replaces_text_and_summary() {
    let (_dir, store, tenant, _project, run_id) = seed();
    let section_id = SectionId::new("intro");
    store
        .with_session(|session| {
            session.upsert_draft_section(&tenant, &run_id, &section_id, "v1 text.", Some("One."))
        })
        .unwrap();
    store
        .with_session(|session| {
            session.upsert_draft_section(&tenant, &run_id, &section_id, "v2 text.", Some("Two."))
        })
        .unwrap();
    let drafts = store
        .with_session(|session| session.load_draft_sections(&tenant, &run_id))
        .unwrap();
    assert_eq!(drafts.len(), 1);
    let draft = drafts.get("intro").unwrap();
    assert_eq!(draft.text, "v2 text.");
    assert_eq!(draft.section_summary.as_deref(), Some("Two."));
}

#[test]
fn review_upsert_round_trips_issues() {
    let (_dir, store, tenant, _project, run_id) = seed();
    let section_id = SectionId::new("intro");
    let issues = vec![draftgate_core::ReviewIssue {
        sentence_index: 2,
        problem: draftgate_core::IssueKind::Unsupported,
        notes: "no support".to_string(),
        citations: vec![SnippetId::new("abc")],
    }];
    store
        .with_session(|session| {
            session.upsert_section_review(
                &tenant,
                &run_id,
                &section_id,
                ReviewVerdict::Fail,
                &issues,
            )
        })
        .unwrap();
    let reviews = store
        .with_session(|session| session.load_section_reviews(&tenant, &run_id))
        .unwrap();
    let review = reviews.get("intro").unwrap();
    assert_eq!(review.verdict, ReviewVerdict::Fail);
    assert_eq!(review.issues, issues);
}

#[test]
fn artifact_upsert_is_idempotent_per_type() {
    let (_dir, store, tenant, project_id, run_id) = seed();
    for content in ["first", "second"] {
        store
            .with_session(|session| {
                session.upsert_artifact(
                    &tenant,
                    &project_id,
                    &run_id,
                    "report_md",
                    "inline://runs/r/report.md",
                    "text/markdown",
                    content.len(),
                    &serde_json::json!({ "markdown": content }),
                )
            })
            .unwrap();
    }
    let artifacts = store
        .with_session(|session| session.list_artifacts(&tenant, &run_id, 10))
        .unwrap();
    assert_eq!(artifacts.len(), 1, "one artifact per (run, type)");
    assert_eq!(
        artifacts[0].metadata.get("markdown").and_then(|v| v.as_str()),
        Some("second")
    );
}

#[test]
fn snippet_search_orders_by_similarity_and_respects_source_filter() {
    let (_dir, store, tenant, _project, _run_id) = seed();
    let (source_a, snippet_a) = seed_snippet(&store, &tenant, "close", &[1.0, 0.0, 0.0]);
    let (_source_b, snippet_b) = seed_snippet(&store, &tenant, "far", &[0.0, 1.0, 0.0]);

    let hits = store
        .with_session(|session| {
            session.search_snippets(&tenant, &[1.0, 0.05, 0.0], "embed-small", 10, 0.0, None)
        })
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].snippet_id, snippet_a);
    assert!(hits[0].similarity > hits[1].similarity);

    let filtered = store
        .with_session(|session| {
            session.search_snippets(
                &tenant,
                &[0.0, 1.0, 0.0],
                "embed-small",
                10,
                0.0,
                Some(std::slice::from_ref(&source_a)),
            )
        })
        .unwrap();
    assert!(filtered.iter().all(|hit| hit.source_id == source_a));
    assert!(!filtered.iter().any(|hit| hit.snippet_id == snippet_b));

    // Threshold filtering drops low-similarity hits entirely.
    let thresholded = store
        .with_session(|session| {
            session.search_snippets(&tenant, &[1.0, 0.0, 0.0], "embed-small", 10, 0.9, None)
        })
        .unwrap();
    assert_eq!(thresholded.len(), 1);
}
