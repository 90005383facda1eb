// crates/draftgate-store-sqlite/src/stagedata.rs
// ============================================================================
// Module: Stage Data Store
// Description: Sections, notes, evidence packs, drafts, reviews, checkpoints.
// Purpose: Persist per-stage outputs inside stage transactions.
// Dependencies: draftgate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Stage tables are keyed by `(tenant_id, run_id, section_id)` and written
//! only inside stage transactions. Outline persistence deletes prior rows
//! first so a repaired outline never leaves stale sections; evidence packs
//! delete-and-reinsert per section for the same reason.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::CheckpointId;
use draftgate_core::DraftSection;
use draftgate_core::Outline;
use draftgate_core::OutlineNotes;
use draftgate_core::ReviewIssue;
use draftgate_core::ReviewVerdict;
use draftgate_core::RunId;
use draftgate_core::RunSection;
use draftgate_core::SectionId;
use draftgate_core::SectionReview;
use draftgate_core::SnippetId;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;

use crate::store::StoreError;
use crate::store::StoreSession;
use crate::store::decode_json;
use crate::store::encode_json;

// ============================================================================
// SECTION: Outline Persistence
// ============================================================================

impl StoreSession<'_> {
    /// Replaces the run's outline tables with the given outline.
    ///
    /// Deletes prior `run_sections` and `outline_notes` rows first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn replace_outline(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        outline: &Outline,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM outline_notes WHERE tenant_id = ?1 AND run_id = ?2",
            params![tenant_id.as_str(), run_id.as_str()],
        )?;
        self.conn().execute(
            "DELETE FROM run_sections WHERE tenant_id = ?1 AND run_id = ?2",
            params![tenant_id.as_str(), run_id.as_str()],
        )?;
        for section in &outline.sections {
            self.conn().execute(
                "INSERT INTO run_sections
                     (tenant_id, run_id, section_id, title, goal, section_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant_id.as_str(),
                    run_id.as_str(),
                    section.section_id,
                    section.title,
                    section.goal,
                    i64::from(section.section_order)
                ],
            )?;
            let notes = json!({
                "key_points": section.key_points,
                "suggested_evidence_themes": section.suggested_evidence_themes,
            });
            self.conn().execute(
                "INSERT INTO outline_notes (tenant_id, run_id, section_id, notes_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tenant_id.as_str(),
                    run_id.as_str(),
                    section.section_id,
                    encode_json(&notes)
                ],
            )?;
        }
        Ok(())
    }

    /// Lists the run's sections ordered by `section_order`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_run_sections(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<Vec<RunSection>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM run_sections WHERE tenant_id = ?1 AND run_id = ?2
             ORDER BY section_order ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id.as_str(), run_id.as_str()], |row| {
            let order: i64 = row.get("section_order")?;
            Ok(RunSection {
                tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
                run_id: RunId::new(row.get::<_, String>("run_id")?),
                section_id: SectionId::new(row.get::<_, String>("section_id")?),
                title: row.get("title")?,
                goal: row.get("goal")?,
                section_order: u32::try_from(order.max(0)).unwrap_or(0),
            })
        })?;
        let mut sections = Vec::new();
        for row in rows {
            sections.push(row?);
        }
        Ok(sections)
    }

    /// Loads the run's outline notes keyed by section id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn load_outline_notes(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<Vec<OutlineNotes>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM outline_notes WHERE tenant_id = ?1 AND run_id = ?2")?;
        let rows = stmt.query_map(params![tenant_id.as_str(), run_id.as_str()], |row| {
            let raw: String = row.get("notes_json")?;
            Ok((
                row.get::<_, String>("tenant_id")?,
                row.get::<_, String>("run_id")?,
                row.get::<_, String>("section_id")?,
                raw,
            ))
        })?;
        let mut notes = Vec::new();
        for row in rows {
            let (tenant, run, section_id, raw) = row?;
            let value = decode_json(&raw, "notes_json")?;
            let key_points = string_list(&value, "key_points");
            let themes = string_list(&value, "suggested_evidence_themes");
            notes.push(OutlineNotes {
                tenant_id: TenantId::new(tenant),
                run_id: RunId::new(run),
                section_id: SectionId::new(section_id),
                key_points,
                suggested_evidence_themes: themes,
            });
        }
        Ok(notes)
    }
}

/// Extracts a string array field from a JSON object.
fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(ToString::to_string).collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Evidence Packs
// ============================================================================

impl StoreSession<'_> {
    /// Replaces one section's evidence pack atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn replace_section_evidence(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
        snippet_ids: &[SnippetId],
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM section_evidence
             WHERE tenant_id = ?1 AND run_id = ?2 AND section_id = ?3",
            params![tenant_id.as_str(), run_id.as_str(), section_id.as_str()],
        )?;
        for snippet_id in snippet_ids {
            self.conn().execute(
                "INSERT OR IGNORE INTO section_evidence
                     (tenant_id, run_id, section_id, snippet_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tenant_id.as_str(),
                    run_id.as_str(),
                    section_id.as_str(),
                    snippet_id.as_str()
                ],
            )?;
        }
        Ok(())
    }

    /// Lists the snippet ids gating citations for one section.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_section_evidence(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
    ) -> Result<Vec<SnippetId>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT snippet_id FROM section_evidence
             WHERE tenant_id = ?1 AND run_id = ?2 AND section_id = ?3",
        )?;
        let rows = stmt.query_map(
            params![tenant_id.as_str(), run_id.as_str(), section_id.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(SnippetId::new(row?));
        }
        Ok(ids)
    }
}

// ============================================================================
// SECTION: Draft Sections
// ============================================================================

impl StoreSession<'_> {
    /// Upserts one drafted section.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn upsert_draft_section(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
        text: &str,
        section_summary: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Timestamp::now();
        self.conn().execute(
            "INSERT INTO draft_sections
                 (tenant_id, run_id, section_id, text, section_summary, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tenant_id, run_id, section_id) DO UPDATE SET
                 text = excluded.text,
                 section_summary = excluded.section_summary,
                 updated_at = excluded.updated_at",
            params![
                tenant_id.as_str(),
                run_id.as_str(),
                section_id.as_str(),
                text,
                section_summary,
                now.unix_millis()
            ],
        )?;
        Ok(())
    }

    /// Loads every drafted section keyed by section id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn load_draft_sections(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, DraftSection>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM draft_sections WHERE tenant_id = ?1 AND run_id = ?2")?;
        let rows = stmt.query_map(params![tenant_id.as_str(), run_id.as_str()], |row| {
            Ok(DraftSection {
                tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
                run_id: RunId::new(row.get::<_, String>("run_id")?),
                section_id: SectionId::new(row.get::<_, String>("section_id")?),
                text: row.get("text")?,
                section_summary: row.get("section_summary")?,
                updated_at: Timestamp::from_unix_millis(row.get("updated_at")?),
            })
        })?;
        let mut drafts = BTreeMap::new();
        for row in rows {
            let draft = row?;
            drafts.insert(draft.section_id.as_str().to_string(), draft);
        }
        Ok(drafts)
    }

    /// Fetches one drafted section.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn get_draft_section(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
    ) -> Result<Option<DraftSection>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM draft_sections
             WHERE tenant_id = ?1 AND run_id = ?2 AND section_id = ?3",
        )?;
        let draft = stmt
            .query_row(
                params![tenant_id.as_str(), run_id.as_str(), section_id.as_str()],
                |row| {
                    Ok(DraftSection {
                        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
                        run_id: RunId::new(row.get::<_, String>("run_id")?),
                        section_id: SectionId::new(row.get::<_, String>("section_id")?),
                        text: row.get("text")?,
                        section_summary: row.get("section_summary")?,
                        updated_at: Timestamp::from_unix_millis(row.get("updated_at")?),
                    })
                },
            )
            .optional()?;
        Ok(draft)
    }
}

// ============================================================================
// SECTION: Section Reviews
// ============================================================================

impl StoreSession<'_> {
    /// Upserts one section review with its normalized issues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn upsert_section_review(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
        verdict: ReviewVerdict,
        issues: &[ReviewIssue],
    ) -> Result<(), StoreError> {
        let now = Timestamp::now();
        let issues_json = serde_json::to_value(issues)
            .map_err(|err| StoreError::Corrupt(format!("review issues unserializable: {err}")))?;
        self.conn().execute(
            "INSERT INTO section_reviews
                 (tenant_id, run_id, section_id, verdict, issues_json, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tenant_id, run_id, section_id) DO UPDATE SET
                 verdict = excluded.verdict,
                 issues_json = excluded.issues_json,
                 reviewed_at = excluded.reviewed_at",
            params![
                tenant_id.as_str(),
                run_id.as_str(),
                section_id.as_str(),
                verdict.as_str(),
                encode_json(&issues_json),
                now.unix_millis()
            ],
        )?;
        Ok(())
    }

    /// Loads every section review keyed by section id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when stored issues fail to decode.
    pub fn load_section_reviews(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, SectionReview>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM section_reviews WHERE tenant_id = ?1 AND run_id = ?2")?;
        let rows = stmt.query_map(params![tenant_id.as_str(), run_id.as_str()], |row| {
            let verdict_raw: String = row.get("verdict")?;
            let issues_raw: String = row.get("issues_json")?;
            Ok((
                row.get::<_, String>("tenant_id")?,
                row.get::<_, String>("run_id")?,
                row.get::<_, String>("section_id")?,
                verdict_raw,
                issues_raw,
                row.get::<_, i64>("reviewed_at")?,
            ))
        })?;
        let mut reviews = BTreeMap::new();
        for row in rows {
            let (tenant, run, section_id, verdict_raw, issues_raw, reviewed_at) = row?;
            let verdict = ReviewVerdict::parse(&verdict_raw).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown review verdict {verdict_raw}"))
            })?;
            let issues: Vec<ReviewIssue> = serde_json::from_str(&issues_raw).map_err(|err| {
                StoreError::Corrupt(format!("column issues_json holds invalid JSON: {err}"))
            })?;
            reviews.insert(
                section_id.clone(),
                SectionReview {
                    tenant_id: TenantId::new(tenant),
                    run_id: RunId::new(run),
                    section_id: SectionId::new(section_id),
                    verdict,
                    issues,
                    reviewed_at: Timestamp::from_unix_millis(reviewed_at),
                },
            );
        }
        Ok(reviews)
    }
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

impl StoreSession<'_> {
    /// Appends a run checkpoint row for a stage summary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn create_run_checkpoint(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        stage: &str,
        payload: &Value,
    ) -> Result<(), StoreError> {
        let id = CheckpointId::generate();
        let now = Timestamp::now();
        self.conn().execute(
            "INSERT INTO run_checkpoints (tenant_id, id, run_id, stage, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                run_id.as_str(),
                stage,
                encode_json(payload),
                now.unix_millis()
            ],
        )?;
        Ok(())
    }

    /// Loads the most recent checkpoint payload for a stage label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn latest_run_checkpoint(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        stage: &str,
    ) -> Result<Option<Value>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT payload_json FROM run_checkpoints
             WHERE tenant_id = ?1 AND run_id = ?2 AND stage = ?3
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )?;
        let raw = stmt
            .query_row(
                params![tenant_id.as_str(), run_id.as_str(), stage],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|payload| decode_json(&payload, "payload_json")).transpose()
    }
}
