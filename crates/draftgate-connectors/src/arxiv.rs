// crates/draftgate-connectors/src/arxiv.rs
// ============================================================================
// Module: arXiv Connector
// Description: Keyword search against the arXiv Atom export API.
// Purpose: Retrieve preprint metadata including abstracts and PDF links.
// Dependencies: draftgate-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! The arXiv export API answers in Atom XML. The feed shape is small and
//! rigid (one `<entry>` per result with flat child elements), so this
//! connector extracts fields with a scoped tag scanner instead of pulling
//! in an XML dependency. Entities in text nodes are unescaped for the five
//! predefined XML escapes.

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
use serde_json::json;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Query endpoint of the arXiv export API.
const QUERY_ENDPOINT: &str = "https://export.arxiv.org/api/query";
/// User agent sent on every request.
const USER_AGENT: &str = "draftgate/0.1";

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Connector for the arXiv export API.
pub struct ArxivConnector {
    /// Blocking HTTP client with a per-call timeout.
    client: Client,
}

impl ArxivConnector {
    /// Creates a connector with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ConnectorError::Transport(err.to_string()))?;
        Ok(Self {
            client,
        })
    }

    /// Builds the query URL.
    fn build_url(query: &str, options: &SearchOptions) -> Result<Url, ConnectorError> {
        let mut url =
            Url::parse(QUERY_ENDPOINT).map_err(|err| ConnectorError::Decode(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{query}"))
            .append_pair("start", "0")
            .append_pair("max_results", &options.max_results.max(1).to_string())
            .append_pair("sortBy", "relevance");
        Ok(url)
    }
}

impl Connector for ArxivConnector {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedSource>, ConnectorError> {
        let url = Self::build_url(query, options)?;
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
        let body = response.text().map_err(|err| ConnectorError::Decode(err.to_string()))?;
        let mut sources: Vec<RetrievedSource> = parse_feed(&body);
        // The export API ignores year filters; apply them locally.
        if options.year_from.is_some() || options.year_to.is_some() {
            sources.retain(|source| {
                source.year.is_none_or(|year| {
                    options.year_from.is_none_or(|from| year >= from)
                        && options.year_to.is_none_or(|to| year <= to)
                })
            });
        }
        Ok(sources)
    }
}

// ============================================================================
// SECTION: Feed Parsing
// ============================================================================

/// Parses every `<entry>` block of an Atom feed.
pub(crate) fn parse_feed(feed: &str) -> Vec<RetrievedSource> {
    blocks(feed, "entry").into_iter().filter_map(|entry| parse_entry(&entry)).collect()
}

/// Parses one feed entry; entries without a title or id are skipped.
fn parse_entry(entry: &str) -> Option<RetrievedSource> {
    let title = collapse_whitespace(&tag_text(entry, "title")?);
    if title.is_empty() {
        return None;
    }
    let id_url = tag_text(entry, "id")?;
    let arxiv_id = arxiv_id_from_url(&id_url)?;
    let abstract_text =
        tag_text(entry, "summary").map(|summary| collapse_whitespace(&summary));
    let year = tag_text(entry, "published")
        .and_then(|published| published.get(.. 4).map(ToString::to_string))
        .and_then(|prefix| prefix.parse::<i32>().ok());
    let authors: Vec<String> = blocks(entry, "author")
        .into_iter()
        .filter_map(|author| tag_text(&author, "name"))
        .map(|name| collapse_whitespace(&name))
        .collect();
    let pdf_url = pdf_link(entry).or_else(|| Some(format!("https://arxiv.org/pdf/{arxiv_id}")));

    Some(RetrievedSource {
        canonical_id: CanonicalIdentifier {
            doi: tag_text(entry, "arxiv:doi").map(|doi| doi.trim().to_lowercase()),
            arxiv_id: Some(arxiv_id.clone()),
            openalex_id: None,
            url: Some(id_url.clone()),
        },
        title,
        authors,
        year,
        venue: None,
        abstract_text,
        url: Some(id_url),
        pdf_url,
        source_type: SourceType::Preprint,
        connector: "arxiv".to_string(),
        citations_count: None,
        extra_metadata: json!({}),
    })
}

/// Extracts every `<tag>...</tag>` block body, outermost and in order.
fn blocks(source: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut cursor = 0_usize;
    while let Some(start_offset) = source[cursor ..].find(&open) {
        let start = cursor + start_offset;
        let Some(body_offset) = source[start ..].find('>') else {
            break;
        };
        let body_start = start + body_offset + 1;
        let Some(end_offset) = source[body_start ..].find(&close) else {
            break;
        };
        let body_end = body_start + end_offset;
        found.push(source[body_start .. body_end].to_string());
        cursor = body_end + close.len();
    }
    found
}

/// Extracts the text of the first `<tag>` element, entity-unescaped.
fn tag_text(source: &str, tag: &str) -> Option<String> {
    blocks(source, tag).into_iter().next().map(|body| unescape(body.trim()))
}

/// Finds the `rel="related"` or `title="pdf"` link target.
fn pdf_link(entry: &str) -> Option<String> {
    let mut cursor = 0_usize;
    while let Some(offset) = entry[cursor ..].find("<link") {
        let start = cursor + offset;
        let end = entry[start ..].find('>').map(|close| start + close)?;
        let link = &entry[start ..= end];
        if link.contains("title=\"pdf\"") {
            return attribute_value(link, "href");
        }
        cursor = end + 1;
    }
    None
}

/// Extracts a quoted attribute value from a single tag.
fn attribute_value(tag: &str, attribute: &str) -> Option<String> {
    let marker = format!("{attribute}=\"");
    let start = tag.find(&marker)? + marker.len();
    let end = tag[start ..].find('"')? + start;
    Some(unescape(&tag[start .. end]))
}

/// Derives the bare arXiv id from an abs URL, dropping the version suffix.
fn arxiv_id_from_url(url: &str) -> Option<String> {
    let raw = url.rsplit("/abs/").next().filter(|rest| *rest != url)?;
    let bare = raw.split('v').next().unwrap_or(raw);
    if bare.is_empty() {
        return None;
    }
    Some(bare.to_string())
}

/// Collapses internal whitespace runs into single spaces.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Unescapes the five predefined XML entities.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
