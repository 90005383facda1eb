// crates/draftgate-store-sqlite/src/sources.rs
// ============================================================================
// Module: Source and Snippet Store
// Description: Sources, snapshots, snippets, and embedding caches.
// Purpose: Persist retrieval output and serve evidence vector search.
// Dependencies: draftgate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Sources dedupe on `(tenant_id, canonical_id)`; upserts merge metadata,
//! preferring more complete fields and the maximum citation count. Snippet
//! search loads candidate embeddings and scores cosine similarity in
//! process, restricted to the run's selected sources.
//!
//! Embedding vectors persist as JSON float arrays. The source-embedding
//! cache is keyed by `(tenant_id, canonical_id, embedding_model)` and only
//! refreshes when the embedded text hash changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::EvidenceSnippetRef;
use draftgate_core::RetrievedSource;
use draftgate_core::RunId;
use draftgate_core::SectionId;
use draftgate_core::SnapshotId;
use draftgate_core::SnippetId;
use draftgate_core::SourceId;
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
// SECTION: Result Shapes
// ============================================================================

/// Stored source fields returned by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpsert {
    /// Persisted source identifier.
    pub source_id: SourceId,
    /// Canonical identifier string.
    pub canonical_id: String,
    /// Merged title.
    pub title: String,
    /// Merged author list.
    pub authors: Vec<String>,
    /// Merged publication year.
    pub year: Option<i32>,
    /// Merged venue.
    pub venue: Option<String>,
    /// Merged DOI.
    pub doi: Option<String>,
    /// Merged arXiv identifier.
    pub arxiv_id: Option<String>,
    /// Merged URL.
    pub url: Option<String>,
    /// Connector origin label.
    pub origin: Option<String>,
    /// Maximum observed citation count.
    pub cited_by_count: Option<u64>,
}

/// One vector search hit with its joined source metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetSearchResult {
    /// Snippet identifier.
    pub snippet_id: SnippetId,
    /// Snippet text.
    pub snippet_text: String,
    /// Index of the snippet within its snapshot.
    pub snippet_index: i64,
    /// Character offset of the snippet start.
    pub char_start: usize,
    /// Character offset of the snippet end.
    pub char_end: usize,
    /// Cosine similarity in `0.0..=1.0`.
    pub similarity: f64,
    /// Parent source identifier.
    pub source_id: SourceId,
    /// Source title.
    pub source_title: Option<String>,
    /// Source publication year.
    pub source_year: Option<i32>,
    /// Source URL.
    pub source_url: Option<String>,
    /// Parent snapshot identifier.
    pub snapshot_id: SnapshotId,
}

/// Cached source embedding row.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSourceEmbedding {
    /// Hash of the text the vector was computed from.
    pub text_hash: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

// ============================================================================
// SECTION: Vector Codec
// ============================================================================

/// Encodes an embedding vector as a JSON array string.
fn encode_vector(vector: &[f32]) -> String {
    let values: Vec<Value> = vector
        .iter()
        .map(|component| json!(f64::from(*component)))
        .collect();
    Value::Array(values).to_string()
}

/// Decodes an embedding vector from its stored JSON form.
fn decode_vector(raw: &str) -> Result<Vec<f32>, StoreError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| StoreError::Corrupt(format!("embedding_json invalid: {err}")))?;
    let items = value
        .as_array()
        .ok_or_else(|| StoreError::Corrupt("embedding_json is not an array".to_string()))?;
    let mut vector = Vec::with_capacity(items.len());
    for item in items {
        let component = item
            .as_f64()
            .ok_or_else(|| StoreError::Corrupt("embedding_json holds a non-number".to_string()))?;
        #[allow(clippy::cast_possible_truncation, reason = "f32 storage precision is intended")]
        vector.push(component as f32);
    }
    Ok(vector)
}

/// Cosine similarity mapped into `0.0..=1.0`.
fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (l, r) in left.iter().zip(right.iter()) {
        dot += f64::from(*l) * f64::from(*r);
        left_norm += f64::from(*l) * f64::from(*l);
        right_norm += f64::from(*r) * f64::from(*r);
    }
    let denom = left_norm.sqrt() * right_norm.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (dot / denom).clamp(0.0, 1.0)
}

// ============================================================================
// SECTION: Sources
// ============================================================================

impl StoreSession<'_> {
    /// Upserts a retrieved source by canonical identifier.
    ///
    /// Existing rows merge metadata: newer non-empty fields win, citation
    /// counts only grow, and connector metadata fills gaps without
    /// overwriting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn upsert_source(
        &mut self,
        tenant_id: &TenantId,
        source: &RetrievedSource,
        origin: &str,
    ) -> Result<SourceUpsert, StoreError> {
        let canonical_id = source.canonical_id.to_canonical_string();
        let now = Timestamp::now();
        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM sources WHERE tenant_id = ?1 AND canonical_id = ?2",
                params![tenant_id.as_str(), canonical_id],
                |row| row.get(0),
            )
            .optional()?;

        let source_id = match existing {
            Some(id) => {
                let source_id = SourceId::new(id);
                self.conn().execute(
                    "UPDATE sources SET
                         title = CASE WHEN ?3 <> '' THEN ?3 ELSE title END,
                         authors_json = CASE WHEN ?4 <> '[]' THEN ?4 ELSE authors_json END,
                         year = COALESCE(?5, year),
                         venue = COALESCE(?6, venue),
                         doi = COALESCE(?7, doi),
                         arxiv_id = COALESCE(?8, arxiv_id),
                         url = COALESCE(?9, url),
                         origin = COALESCE(?10, origin),
                         cited_by_count = MAX(COALESCE(cited_by_count, 0), COALESCE(?11, 0)),
                         updated_at = ?12
                     WHERE tenant_id = ?1 AND id = ?2",
                    params![
                        tenant_id.as_str(),
                        source_id.as_str(),
                        source.title,
                        encode_json(&json!(source.authors)),
                        source.year,
                        source.venue,
                        source.canonical_id.doi,
                        source.canonical_id.arxiv_id,
                        source.url,
                        origin,
                        source.citations_count.map(|count| i64::try_from(count).unwrap_or(i64::MAX)),
                        now.unix_millis()
                    ],
                )?;
                self.merge_source_metadata(tenant_id, &source_id, &source.extra_metadata)?;
                source_id
            }
            None => {
                let source_id = SourceId::generate();
                self.conn().execute(
                    "INSERT INTO sources
                         (tenant_id, id, canonical_id, source_type, title, authors_json, year,
                          venue, doi, arxiv_id, url, origin, cited_by_count, metadata_json,
                          created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                    params![
                        tenant_id.as_str(),
                        source_id.as_str(),
                        canonical_id,
                        source.source_type.as_str(),
                        source.title,
                        encode_json(&json!(source.authors)),
                        source.year,
                        source.venue,
                        source.canonical_id.doi,
                        source.canonical_id.arxiv_id,
                        source.url,
                        origin,
                        source.citations_count.map(|count| i64::try_from(count).unwrap_or(i64::MAX)),
                        encode_json(&source.extra_metadata),
                        now.unix_millis()
                    ],
                )?;
                source_id
            }
        };
        self.load_source_upsert(tenant_id, &source_id)
    }

    /// Merges connector metadata into a source row without overwriting.
    fn merge_source_metadata(
        &mut self,
        tenant_id: &TenantId,
        source_id: &SourceId,
        incoming: &Value,
    ) -> Result<(), StoreError> {
        let Some(incoming_map) = incoming.as_object() else {
            return Ok(());
        };
        if incoming_map.is_empty() {
            return Ok(());
        }
        let raw: String = self.conn().query_row(
            "SELECT metadata_json FROM sources WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), source_id.as_str()],
            |row| row.get(0),
        )?;
        let mut merged = decode_json(&raw, "metadata_json")?;
        let Some(merged_map) = merged.as_object_mut() else {
            return Ok(());
        };
        for (key, value) in incoming_map {
            if value.is_null() {
                continue;
            }
            let empty = merged_map
                .get(key)
                .is_none_or(|current| current.is_null() || current == &json!("") || current == &json!([]));
            if empty {
                merged_map.insert(key.clone(), value.clone());
            }
        }
        self.conn().execute(
            "UPDATE sources SET metadata_json = ?3 WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), source_id.as_str(), encode_json(&merged)],
        )?;
        Ok(())
    }

    /// Loads the merged fields of a stored source.
    fn load_source_upsert(
        &mut self,
        tenant_id: &TenantId,
        source_id: &SourceId,
    ) -> Result<SourceUpsert, StoreError> {
        let mut stmt =
            self.conn().prepare("SELECT * FROM sources WHERE tenant_id = ?1 AND id = ?2")?;
        let upsert = stmt.query_row(params![tenant_id.as_str(), source_id.as_str()], |row| {
            let authors_raw: String = row.get("authors_json")?;
            let cited: Option<i64> = row.get("cited_by_count")?;
            Ok((
                row.get::<_, String>("canonical_id")?,
                row.get::<_, String>("title")?,
                authors_raw,
                row.get::<_, Option<i32>>("year")?,
                row.get::<_, Option<String>>("venue")?,
                row.get::<_, Option<String>>("doi")?,
                row.get::<_, Option<String>>("arxiv_id")?,
                row.get::<_, Option<String>>("url")?,
                row.get::<_, Option<String>>("origin")?,
                cited,
            ))
        })?;
        let (canonical_id, title, authors_raw, year, venue, doi, arxiv_id, url, origin, cited) =
            upsert;
        let authors_value = decode_json(&authors_raw, "authors_json")?;
        let authors = authors_value
            .as_array()
            .map(|items| {
                items.iter().filter_map(Value::as_str).map(ToString::to_string).collect()
            })
            .unwrap_or_default();
        Ok(SourceUpsert {
            source_id: source_id.clone(),
            canonical_id,
            title,
            authors,
            year,
            venue,
            doi,
            arxiv_id,
            url,
            origin,
            cited_by_count: cited.and_then(|count| u64::try_from(count).ok()),
        })
    }

    /// Upserts the run-to-source link, keeping the best score.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn upsert_run_source(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        source_id: &SourceId,
        score: f64,
        origin: &str,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO run_sources (tenant_id, run_id, source_id, score, origin)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (tenant_id, run_id, source_id) DO UPDATE SET
                 score = MAX(run_sources.score, excluded.score),
                 origin = COALESCE(run_sources.origin, excluded.origin)",
            params![tenant_id.as_str(), run_id.as_str(), source_id.as_str(), score, origin],
        )?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Source Embedding Cache
// ============================================================================

impl StoreSession<'_> {
    /// Loads cached source embeddings for a set of canonical ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when a stored vector fails to decode.
    pub fn load_source_embeddings(
        &mut self,
        tenant_id: &TenantId,
        canonical_ids: &[String],
        embedding_model: &str,
    ) -> Result<BTreeMap<String, CachedSourceEmbedding>, StoreError> {
        let mut cache = BTreeMap::new();
        let mut stmt = self.conn().prepare(
            "SELECT canonical_id, text_hash, embedding_json FROM source_embeddings
             WHERE tenant_id = ?1 AND canonical_id = ?2 AND embedding_model = ?3",
        )?;
        for canonical_id in canonical_ids {
            let row = stmt
                .query_row(
                    params![tenant_id.as_str(), canonical_id, embedding_model],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            if let Some((id, text_hash, raw)) = row {
                cache.insert(
                    id,
                    CachedSourceEmbedding {
                        text_hash,
                        vector: decode_vector(&raw)?,
                    },
                );
            }
        }
        Ok(cache)
    }

    /// Upserts one source embedding keyed by canonical id and model.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn upsert_source_embedding(
        &mut self,
        tenant_id: &TenantId,
        canonical_id: &str,
        embedding_model: &str,
        vector: &[f32],
        text_hash: &str,
    ) -> Result<(), StoreError> {
        let now = Timestamp::now();
        self.conn().execute(
            "INSERT INTO source_embeddings
                 (tenant_id, canonical_id, embedding_model, embedding_dim, embedding_json,
                  text_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (tenant_id, canonical_id, embedding_model) DO UPDATE SET
                 embedding_dim = excluded.embedding_dim,
                 embedding_json = excluded.embedding_json,
                 text_hash = excluded.text_hash,
                 updated_at = excluded.updated_at",
            params![
                tenant_id.as_str(),
                canonical_id,
                embedding_model,
                i64::try_from(vector.len()).unwrap_or(i64::MAX),
                encode_vector(vector),
                text_hash,
                now.unix_millis()
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Snapshots and Snippets
// ============================================================================

impl StoreSession<'_> {
    /// Returns true when any snippet exists for the given sources.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn any_snippets_for_sources(
        &mut self,
        tenant_id: &TenantId,
        source_ids: &[SourceId],
    ) -> Result<bool, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT 1 FROM snippets sn
             JOIN snapshots sp ON sp.tenant_id = sn.tenant_id AND sp.id = sn.snapshot_id
             WHERE sn.tenant_id = ?1 AND sp.source_id = ?2 LIMIT 1",
        )?;
        for source_id in source_ids {
            let hit: Option<i64> = stmt
                .query_row(params![tenant_id.as_str(), source_id.as_str()], |row| row.get(0))
                .optional()?;
            if hit.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns the next snapshot version for a source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn next_snapshot_version(
        &mut self,
        tenant_id: &TenantId,
        source_id: &SourceId,
    ) -> Result<i64, StoreError> {
        let version: i64 = self.conn().query_row(
            "SELECT COALESCE(MAX(snapshot_version), 0) + 1 FROM snapshots
             WHERE tenant_id = ?1 AND source_id = ?2",
            params![tenant_id.as_str(), source_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Inserts a snapshot row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    #[allow(clippy::too_many_arguments, reason = "snapshot rows carry this many columns")]
    pub fn insert_snapshot(
        &mut self,
        tenant_id: &TenantId,
        source_id: &SourceId,
        snapshot_version: i64,
        content_type: &str,
        blob_ref: &str,
        sha256: &str,
        size_bytes: usize,
        metadata: &Value,
    ) -> Result<SnapshotId, StoreError> {
        let id = SnapshotId::generate();
        let now = Timestamp::now();
        self.conn().execute(
            "INSERT INTO snapshots
                 (tenant_id, id, source_id, snapshot_version, content_type, blob_ref, sha256,
                  size_bytes, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                source_id.as_str(),
                snapshot_version,
                content_type,
                blob_ref,
                sha256,
                i64::try_from(size_bytes).unwrap_or(i64::MAX),
                encode_json(metadata),
                now.unix_millis()
            ],
        )?;
        Ok(id)
    }

    /// Inserts a snippet row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn insert_snippet(
        &mut self,
        tenant_id: &TenantId,
        snapshot_id: &SnapshotId,
        snippet_index: i64,
        text: &str,
        sha256: &str,
    ) -> Result<SnippetId, StoreError> {
        let id = SnippetId::generate();
        let now = Timestamp::now();
        self.conn().execute(
            "INSERT INTO snippets
                 (tenant_id, id, snapshot_id, snippet_index, text, char_start, char_end, sha256,
                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                snapshot_id.as_str(),
                snippet_index,
                text,
                i64::try_from(text.len()).unwrap_or(i64::MAX),
                sha256,
                now.unix_millis()
            ],
        )?;
        Ok(id)
    }

    /// Inserts one snippet embedding.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn insert_snippet_embedding(
        &mut self,
        tenant_id: &TenantId,
        snippet_id: &SnippetId,
        embedding_model: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO snippet_embeddings
                 (tenant_id, snippet_id, embedding_model, dims, embedding_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (tenant_id, snippet_id, embedding_model) DO UPDATE SET
                 dims = excluded.dims,
                 embedding_json = excluded.embedding_json",
            params![
                tenant_id.as_str(),
                snippet_id.as_str(),
                embedding_model,
                i64::try_from(vector.len()).unwrap_or(i64::MAX),
                encode_vector(vector)
            ],
        )?;
        Ok(())
    }

    /// Searches snippets by cosine similarity against a query embedding.
    ///
    /// Restricts to the given sources when provided and drops hits under
    /// `min_similarity`. Results come back sorted by similarity descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when a stored vector fails to decode.
    pub fn search_snippets(
        &mut self,
        tenant_id: &TenantId,
        query_embedding: &[f32],
        embedding_model: &str,
        limit: usize,
        min_similarity: f64,
        source_ids: Option<&[SourceId]>,
    ) -> Result<Vec<SnippetSearchResult>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT sn.id AS snippet_id, sn.text AS snippet_text, sn.snippet_index,
                    sn.char_start, sn.char_end, se.embedding_json,
                    sp.id AS snapshot_id, sp.source_id,
                    so.title AS source_title, so.year AS source_year, so.url AS source_url
             FROM snippet_embeddings se
             JOIN snippets sn ON sn.tenant_id = se.tenant_id AND sn.id = se.snippet_id
             JOIN snapshots sp ON sp.tenant_id = sn.tenant_id AND sp.id = sn.snapshot_id
             JOIN sources so ON so.tenant_id = sp.tenant_id AND so.id = sp.source_id
             WHERE se.tenant_id = ?1 AND se.embedding_model = ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id.as_str(), embedding_model], |row| {
            let char_start: i64 = row.get("char_start")?;
            let char_end: i64 = row.get("char_end")?;
            Ok((
                row.get::<_, String>("snippet_id")?,
                row.get::<_, String>("snippet_text")?,
                row.get::<_, i64>("snippet_index")?,
                char_start,
                char_end,
                row.get::<_, String>("embedding_json")?,
                row.get::<_, String>("snapshot_id")?,
                row.get::<_, String>("source_id")?,
                row.get::<_, Option<String>>("source_title")?,
                row.get::<_, Option<i32>>("source_year")?,
                row.get::<_, Option<String>>("source_url")?,
            ))
        })?;

        let allowed: Option<std::collections::BTreeSet<&str>> =
            source_ids.map(|ids| ids.iter().map(SourceId::as_str).collect());
        let mut scored = Vec::new();
        for row in rows {
            let (
                snippet_id,
                snippet_text,
                snippet_index,
                char_start,
                char_end,
                embedding_raw,
                snapshot_id,
                source_id,
                source_title,
                source_year,
                source_url,
            ) = row?;
            if let Some(allowed_ids) = &allowed
                && !allowed_ids.contains(source_id.as_str())
            {
                continue;
            }
            let vector = decode_vector(&embedding_raw)?;
            let similarity = cosine_similarity(query_embedding, &vector);
            if similarity < min_similarity {
                continue;
            }
            scored.push(SnippetSearchResult {
                snippet_id: SnippetId::new(snippet_id),
                snippet_text,
                snippet_index,
                char_start: usize::try_from(char_start.max(0)).unwrap_or(0),
                char_end: usize::try_from(char_end.max(0)).unwrap_or(0),
                similarity,
                source_id: SourceId::new(source_id),
                source_title,
                source_year,
                source_url,
                snapshot_id: SnapshotId::new(snapshot_id),
            });
        }
        scored.sort_by(|left, right| {
            right.similarity.partial_cmp(&left.similarity).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Loads the evidence snippets gating one section's citations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn load_section_snippets(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        section_id: &SectionId,
    ) -> Result<Vec<EvidenceSnippetRef>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT sn.id AS snippet_id, sn.text, sn.char_start, sn.char_end, sp.source_id
             FROM section_evidence ev
             JOIN snippets sn ON sn.tenant_id = ev.tenant_id AND sn.id = ev.snippet_id
             JOIN snapshots sp ON sp.tenant_id = sn.tenant_id AND sp.id = sn.snapshot_id
             WHERE ev.tenant_id = ?1 AND ev.run_id = ?2 AND ev.section_id = ?3",
        )?;
        let rows = stmt.query_map(
            params![tenant_id.as_str(), run_id.as_str(), section_id.as_str()],
            |row| {
                let char_start: i64 = row.get("char_start")?;
                let char_end: i64 = row.get("char_end")?;
                Ok((
                    row.get::<_, String>("snippet_id")?,
                    row.get::<_, String>("text")?,
                    char_start,
                    char_end,
                    row.get::<_, String>("source_id")?,
                ))
            },
        )?;
        let mut snippets = Vec::new();
        for row in rows {
            let (snippet_id, text, char_start, char_end, source_id) = row?;
            snippets.push(EvidenceSnippetRef {
                snippet_id: SnippetId::new(snippet_id),
                source_id: SourceId::new(source_id),
                text,
                char_start: usize::try_from(char_start.max(0)).unwrap_or(0),
                char_end: usize::try_from(char_end.max(0)).unwrap_or(0),
            });
        }
        Ok(snippets)
    }
}
