// crates/draftgate-core/src/core/identifiers.rs
// ============================================================================
// Module: Draftgate Identifiers
// Description: Canonical opaque identifiers for tenants, runs, and records.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, rand
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Draftgate.
//! Identifiers are opaque strings on the wire. Generated identifiers are
//! 32 lowercase hex characters, which keeps citation tokens and URL paths
//! free of characters that need escaping.
//!
//! Every persisted entity is scoped by `(tenant_id, id)`; the identifier
//! types here never encode the tenant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Generates a fresh opaque identifier as 32 lowercase hex characters.
fn generate_hex_id() -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Declares an opaque string identifier type with generation support.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing wire value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(generate_hex_id())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id! {
    /// Tenant identifier scoping every persisted entity.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; resolved by the deployment's identity layer.
    TenantId
}

string_id! {
    /// Project identifier scoped within a tenant.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    ProjectId
}

string_id! {
    /// Run identifier for one end-to-end pipeline execution.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    RunId
}

string_id! {
    /// Job identifier for one queue claim unit.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    JobId
}

string_id! {
    /// Event identifier for one append-only log record.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; ordering comes from `event_number`, never from
    ///   this identifier.
    EventId
}

string_id! {
    /// Source identifier for one deduplicated academic source.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    SourceId
}

string_id! {
    /// Snapshot identifier for one captured rendition of a source.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    SnapshotId
}

string_id! {
    /// Snippet identifier referenced by citation tokens.
    ///
    /// # Invariants
    /// - Generated values are lowercase hex so `[CITE:<id>]` tokens stay
    ///   free of bracket-unsafe characters.
    SnippetId
}

string_id! {
    /// Artifact identifier for one exported output record.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    ArtifactId
}

string_id! {
    /// Checkpoint identifier for one persisted stage summary or snapshot.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique per `(tenant_id, id)`.
    CheckpointId
}

/// Outline section identifier such as `intro` or `conclusion`.
///
/// # Invariants
/// - Human-authored slug, not generated; the first section of a valid
///   outline is `intro` and the last is `conclusion`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(String);

impl SectionId {
    /// Creates a section identifier from a slug.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SectionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
