// crates/draftgate-connectors/src/openalex.rs
// ============================================================================
// Module: OpenAlex Connector
// Description: Keyword search against the OpenAlex works API.
// Purpose: Retrieve published work metadata with abstracts and citations.
// Dependencies: draftgate-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! OpenAlex serves work records as JSON with abstracts stored as an
//! inverted index (word to positions), which this connector reconstructs
//! into plain text. A contact email, when configured, rides along as the
//! `mailto` parameter per the API's polite-pool convention.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use draftgate_core::CanonicalIdentifier;
use draftgate_core::Connector;
use draftgate_core::ConnectorError;
use draftgate_core::RetrievedSource;
use draftgate_core::SearchOptions;
use draftgate_core::SourceType;
use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Works endpoint of the OpenAlex API.
const WORKS_ENDPOINT: &str = "https://api.openalex.org/works";
/// User agent sent on every request.
const USER_AGENT: &str = "draftgate/0.1";

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Connector for the OpenAlex works API.
pub struct OpenAlexConnector {
    /// Blocking HTTP client with a per-call timeout.
    client: Client,
    /// Contact email for the polite pool.
    email: Option<String>,
}

impl OpenAlexConnector {
    /// Creates a connector with the given timeout and optional contact
    /// email.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(timeout: Duration, email: Option<String>) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ConnectorError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            email,
        })
    }

    /// Builds the works query URL.
    fn build_url(&self, query: &str, options: &SearchOptions) -> Result<Url, ConnectorError> {
        let mut url =
            Url::parse(WORKS_ENDPOINT).map_err(|err| ConnectorError::Decode(err.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("search", query);
            pairs.append_pair("per-page", &options.max_results.max(1).to_string());
            if let (Some(from), Some(to)) = (options.year_from, options.year_to) {
                pairs.append_pair(
                    "filter",
                    &format!("from_publication_date:{from}-01-01,to_publication_date:{to}-12-31"),
                );
            }
            if let Some(email) = &self.email {
                pairs.append_pair("mailto", email);
            }
        }
        Ok(url)
    }
}

impl Connector for OpenAlexConnector {
    fn name(&self) -> &'static str {
        "openalex"
    }

    fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedSource>, ConnectorError> {
        let url = self.build_url(query, options)?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ConnectorError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status {
                status: status.as_u16(),
            });
        }
        let body: Value =
            response.json().map_err(|err| ConnectorError::Decode(err.to_string()))?;
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ConnectorError::Decode("missing results array".to_string()))?;
        Ok(results.iter().filter_map(parse_work).collect())
    }
}

// ============================================================================
// SECTION: Record Parsing
// ============================================================================

/// Parses one OpenAlex work record; records without a title are skipped.
pub(crate) fn parse_work(work: &Value) -> Option<RetrievedSource> {
    let title = work
        .get("title")
        .or_else(|| work.get("display_name"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();
    if title.is_empty() {
        return None;
    }

    let openalex_id = work
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.trim_start_matches("https://openalex.org/").to_string());
    let doi = work
        .get("doi")
        .and_then(Value::as_str)
        .map(|doi| doi.trim_start_matches("https://doi.org/").to_string());
    let year = work
        .get("publication_year")
        .and_then(Value::as_i64)
        .and_then(|year| i32::try_from(year).ok());
    let cited_by_count = work
        .get("cited_by_count")
        .and_then(Value::as_i64)
        .and_then(|count| u64::try_from(count).ok());

    let authors: Vec<String> = work
        .get("authorships")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("author")
                        .and_then(|author| author.get("display_name"))
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    let venue = work
        .get("primary_location")
        .and_then(|location| location.get("source"))
        .and_then(|source| source.get("display_name"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let landing_url = work
        .get("primary_location")
        .and_then(|location| location.get("landing_page_url"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let pdf_url = work
        .get("primary_location")
        .and_then(|location| location.get("pdf_url"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let abstract_text =
        work.get("abstract_inverted_index").and_then(reconstruct_abstract);

    Some(RetrievedSource {
        canonical_id: CanonicalIdentifier {
            doi,
            arxiv_id: None,
            openalex_id,
            url: landing_url.clone(),
        },
        title,
        authors,
        year,
        venue,
        abstract_text,
        url: landing_url,
        pdf_url,
        source_type: SourceType::Paper,
        connector: "openalex".to_string(),
        citations_count: cited_by_count,
        extra_metadata: json!({}),
    })
}

/// Rebuilds abstract text from OpenAlex's inverted word index.
pub(crate) fn reconstruct_abstract(index: &Value) -> Option<String> {
    let map = index.as_object()?;
    if map.is_empty() {
        return None;
    }
    let mut positioned: Vec<(u64, &str)> = Vec::new();
    for (word, positions) in map {
        let Some(entries) = positions.as_array() else {
            continue;
        };
        for position in entries.iter().filter_map(Value::as_u64) {
            positioned.push((position, word.as_str()));
        }
    }
    if positioned.is_empty() {
        return None;
    }
    positioned.sort_unstable_by_key(|(position, _)| *position);
    let words: Vec<&str> = positioned.into_iter().map(|(_, word)| word).collect();
    Some(words.join(" "))
}
