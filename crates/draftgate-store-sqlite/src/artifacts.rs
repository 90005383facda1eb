// crates/draftgate-store-sqlite/src/artifacts.rs
// ============================================================================
// Module: Artifact Store
// Description: Exactly-once artifact persistence via typed upserts.
// Purpose: Replace, never edit, exported run outputs.
// Dependencies: draftgate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Artifacts upsert on `(tenant_id, run_id, artifact_type)`: re-running an
//! export replaces the content wholesale, so a retried run still ends with
//! exactly one `report_md` row. Artifact rows outlive their run; deletion
//! cascades clear `run_id` upstream rather than dropping the artifact.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::Artifact;
use draftgate_core::ArtifactId;
use draftgate_core::ProjectId;
use draftgate_core::RunId;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde_json::Value;

use crate::store::StoreError;
use crate::store::StoreSession;
use crate::store::decode_json;
use crate::store::encode_json;

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps one `artifacts` row.
fn artifact_from_row(row: &Row<'_>) -> Result<Artifact, StoreError> {
    let metadata_raw: String = row.get("metadata_json")?;
    let size: i64 = row.get("size_bytes")?;
    Ok(Artifact {
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        id: ArtifactId::new(row.get::<_, String>("id")?),
        project_id: ProjectId::new(row.get::<_, String>("project_id")?),
        run_id: row.get::<_, Option<String>>("run_id")?.map(RunId::new),
        artifact_type: row.get("artifact_type")?,
        blob_ref: row.get("blob_ref")?,
        mime_type: row.get("mime_type")?,
        size_bytes: u64::try_from(size.max(0)).unwrap_or(0),
        metadata: decode_json(&metadata_raw, "metadata_json")?,
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
    })
}

// ============================================================================
// SECTION: Operations
// ============================================================================

impl StoreSession<'_> {
    /// Upserts an artifact keyed by `(run_id, artifact_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    #[allow(clippy::too_many_arguments, reason = "artifact rows carry this many columns")]
    pub fn upsert_artifact(
        &mut self,
        tenant_id: &TenantId,
        project_id: &ProjectId,
        run_id: &RunId,
        artifact_type: &str,
        blob_ref: &str,
        mime_type: &str,
        size_bytes: usize,
        metadata: &Value,
    ) -> Result<Artifact, StoreError> {
        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM artifacts
                 WHERE tenant_id = ?1 AND run_id = ?2 AND artifact_type = ?3",
                params![tenant_id.as_str(), run_id.as_str(), artifact_type],
                |row| row.get(0),
            )
            .optional()?;
        let now = Timestamp::now();
        let id = match existing {
            Some(found) => {
                let id = ArtifactId::new(found);
                self.conn().execute(
                    "UPDATE artifacts SET blob_ref = ?3, mime_type = ?4, size_bytes = ?5,
                                          metadata_json = ?6
                     WHERE tenant_id = ?1 AND id = ?2",
                    params![
                        tenant_id.as_str(),
                        id.as_str(),
                        blob_ref,
                        mime_type,
                        i64::try_from(size_bytes).unwrap_or(i64::MAX),
                        encode_json(metadata)
                    ],
                )?;
                id
            }
            None => {
                let id = ArtifactId::generate();
                self.conn().execute(
                    "INSERT INTO artifacts
                         (tenant_id, id, project_id, run_id, artifact_type, blob_ref, mime_type,
                          size_bytes, metadata_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        tenant_id.as_str(),
                        id.as_str(),
                        project_id.as_str(),
                        run_id.as_str(),
                        artifact_type,
                        blob_ref,
                        mime_type,
                        i64::try_from(size_bytes).unwrap_or(i64::MAX),
                        encode_json(metadata),
                        now.unix_millis()
                    ],
                )?;
                id
            }
        };
        let mut stmt =
            self.conn().prepare("SELECT * FROM artifacts WHERE tenant_id = ?1 AND id = ?2")?;
        stmt.query_row(params![tenant_id.as_str(), id.as_str()], |row| {
            Ok(artifact_from_row(row))
        })?
    }

    /// Lists a run's artifacts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_artifacts(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        limit: usize,
    ) -> Result<Vec<Artifact>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM artifacts WHERE tenant_id = ?1 AND run_id = ?2
             ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![
                tenant_id.as_str(),
                run_id.as_str(),
                i64::try_from(limit).unwrap_or(i64::MAX)
            ],
            |row| Ok(artifact_from_row(row)),
        )?;
        let mut artifacts = Vec::new();
        for row in rows {
            artifacts.push(row??);
        }
        Ok(artifacts)
    }
}
