// crates/draftgate-pipeline/tests/common/mod.rs
// ============================================================================
// Module: Pipeline Test Harness
// Description: Stub clients and fixtures for coordinator tests.
// ============================================================================
//! ## Overview
//! Provides a scripted LLM, a constant-vector embedding client, and a fixed
//! connector so the full pipeline runs without network access. The scripted
//! LLM recognizes each stage by its prompt preamble and answers with
//! payloads that satisfy (or deliberately violate) the validators.

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
    dead_code,
    reason = "Shared test harness; not every test uses every helper."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use draftgate_config::AppConfig;
use draftgate_core::CanonicalIdentifier;
use draftgate_core::Connector;
use draftgate_core::ConnectorError;
use draftgate_core::EmbedError;
use draftgate_core::EmbeddingClient;
use draftgate_core::LlmClient;
use draftgate_core::LlmError;
use draftgate_core::LlmRequest;
use draftgate_core::ProjectId;
use draftgate_core::RetrievedSource;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::SearchOptions;
use draftgate_core::SourceType;
use draftgate_core::TenantId;
use draftgate_pipeline::Clients;
use draftgate_pipeline::Coordinator;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteEventSink;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;
use serde_json::json;

/// Behavior switches for the scripted LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Every stage answers correctly; every section passes review.
    HappyPath,
    /// The writer cites a snippet outside the evidence pack.
    BadCitation,
    /// The first review fails one section; repair fixes it.
    RepairOnce,
    /// Reviews keep failing even after the repair round.
    NeverPasses,
    /// Request cancellation as a side effect of the outline call.
    CancelDuringOutline,
}

/// Extracts the text between two markers in a prompt.
fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let to = text[from ..].find(end)? + from;
    Some(text[from .. to].trim())
}

/// Extracts the value of a `Label: value` prompt line.
fn line_value<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let from = text.find(label)? + label.len();
    let rest = &text[from ..];
    Some(rest.lines().next().unwrap_or("").trim())
}

/// Extracts every quoted snippet id from an evidence payload block.
fn snippet_ids_in(block: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut cursor = 0_usize;
    while let Some(offset) = block[cursor ..].find("\"snippet_id\": \"") {
        let start = cursor + offset + "\"snippet_id\": \"".len();
        let Some(end) = block[start ..].find('"') else {
            break;
        };
        ids.push(block[start .. start + end].to_string());
        cursor = start + end;
    }
    ids
}

/// Splits text into trimmed sentences the way the validators do.
fn sentences(text: &str) -> Vec<String> {
    draftgate_core::core::text::split_sentences(text)
}

/// The scripted LLM.
pub struct ScriptedLlm {
    /// Behavior switch.
    scenario: Scenario,
    /// Number of evaluate calls answered so far.
    evaluate_calls: AtomicUsize,
    /// Store handle for scenarios with side effects.
    store: SqliteStore,
    /// Run under test, for side-effecting scenarios.
    run: Mutex<Option<(TenantId, RunId)>>,
}

impl ScriptedLlm {
    /// Creates a scripted LLM for a scenario.
    pub fn new(scenario: Scenario, store: SqliteStore) -> Self {
        Self {
            scenario,
            evaluate_calls: AtomicUsize::new(0),
            store,
            run: Mutex::new(None),
        }
    }

    /// Registers the run the cancel scenario should target.
    pub fn target_run(&self, tenant_id: TenantId, run_id: RunId) {
        *self.run.lock().unwrap() = Some((tenant_id, run_id));
    }

    /// Answers a query-plan prompt.
    fn query_plan(&self) -> String {
        let queries: Vec<serde_json::Value> = [
            "survey",
            "methods",
            "benchmarks",
            "failure modes",
            "future directions",
            "recent work",
        ]
        .iter()
        .map(|intent| json!({ "intent": intent, "query": format!("sleep memory {intent}") }))
        .collect();
        json!({ "queries": queries }).to_string()
    }

    /// Answers an outline prompt with a valid four-section outline.
    fn outline(&self) -> String {
        if self.scenario == Scenario::CancelDuringOutline
            && let Some((tenant_id, run_id)) = self.run.lock().unwrap().clone()
        {
            self.store
                .with_session(|session| session.request_cancel(&tenant_id, &run_id, false))
                .unwrap();
        }
        let section = |id: &str, title: &str, order: u32| {
            json!({
                "section_id": id,
                "title": title,
                "goal": "States what the section covers. Sets the reader's expectations.",
                "key_points": (0 .. 6).map(|n| format!("{title} point {n}")).collect::<Vec<String>>(),
                "suggested_evidence_themes": ["memory", "sleep"],
                "section_order": order,
            })
        };
        json!({
            "sections": [
                section("intro", "Introduction", 1),
                section("mechanisms", "Mechanisms", 2),
                section("findings", "Findings", 3),
                section("conclusion", "Conclusion", 4),
            ]
        })
        .to_string()
    }

    /// Answers a draft prompt for one section.
    fn draft(&self, prompt: &str) -> String {
        let section_id = line_value(prompt, "Current Section ID: ").unwrap_or("intro").to_string();
        let pack = prompt.split("Evidence snippets (id + text):").nth(1).unwrap_or("");
        let ids = snippet_ids_in(pack);
        let cite = if self.scenario == Scenario::BadCitation && section_id == "intro" {
            "deadbeefdeadbeef".to_string()
        } else {
            ids.first().cloned().unwrap_or_else(|| "aaaa1111".to_string())
        };
        let second = ids.get(1).cloned().unwrap_or_else(|| cite.clone());
        let text = format!(
            "This section surveys the collected evidence in plain terms. \
             The evidence shows a measurable effect [CITE:{cite}]. \
             Another observation supports the same conclusion [CITE:{second}]. \
             The next section continues the analysis."
        );
        json!({
            "section_id": section_id,
            "section_text": text,
            "section_summary": "The section reviews the evidence. It finds a consistent effect.",
            "status": "ok",
        })
        .to_string()
    }

    /// Answers a review prompt for one section.
    fn review(&self, prompt: &str) -> String {
        let section_id = line_value(prompt, "Section ID: ").unwrap_or("intro").to_string();
        let call = self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        let round = call / 4;
        let failing = match self.scenario {
            Scenario::RepairOnce => round == 0 && section_id == "mechanisms",
            Scenario::NeverPasses => section_id == "mechanisms",
            _ => false,
        };
        if failing {
            json!({
                "section_id": section_id,
                "verdict": "fail",
                "issues": [{
                    "sentence_index": 1,
                    "problem": "overstated",
                    "notes": "softer wording required",
                    "citations": [],
                }],
            })
            .to_string()
        } else {
            json!({ "section_id": section_id, "verdict": "pass", "issues": [] }).to_string()
        }
    }

    /// Answers a repair prompt with a scope-respecting edit.
    fn repair(&self, prompt: &str) -> String {
        let section_id = line_value(prompt, "Current Section ID: ").unwrap_or("mechanisms");
        let next_id = line_value(prompt, "Next Section ID: ").unwrap_or("findings");
        let original = between(prompt, "Current Section Text:\n", "\n\nCurrent Section Summary:")
            .unwrap_or("");
        let next_text =
            between(prompt, "Next Section Text:\n", "\n\nNext Section Summary:").unwrap_or("");
        let pack = between(
            prompt,
            "Evidence pack snippets for current section:",
            "Next Section ID:",
        )
        .unwrap_or("");
        let cite = snippet_ids_in(pack).first().cloned().unwrap_or_else(|| "aaaa1111".to_string());

        // Rewrite only sentence index 1; everything else stays identical.
        let mut revised = sentences(original);
        if revised.len() > 1 {
            revised[1] = format!("The evidence suggests a modest effect [CITE:{cite}].");
        }
        let revised_text = revised.join(" ");

        // Patch only the first two sentences of the next section.
        let next_sentences = sentences(next_text);
        let mut patched = vec![
            "Carrying the repaired thread forward, this part turns to the next topic.".to_string(),
            "The narrative continues without introducing new claims.".to_string(),
        ];
        patched.extend(next_sentences.iter().skip(2).cloned());
        let patched_text = patched.join(" ");

        json!({
            "section_id": section_id,
            "revised_text": revised_text,
            "revised_summary": "The section now reads more cautiously.\nIts claims match the cited evidence.",
            "next_section_id": next_id,
            "patched_next_text": patched_text,
            "patched_next_summary": "The opening now follows the repaired section.\nThe rest of the section is unchanged.",
            "edits_json": {
                "repaired_section_edits": [
                    { "sentence_index": 1, "before": "old", "after": "new", "change_type": "rewrite" }
                ],
                "continuity_patch": {
                    "next_section_id": next_id,
                    "before_first_two_sentences": "old",
                    "after_first_two_sentences": "new",
                },
            },
        })
        .to_string()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let prompt = request.prompt.as_str();
        if prompt.starts_with("Generate 6 to 10 diverse academic search queries") {
            return Ok(self.query_plan());
        }
        if prompt.starts_with("Create a structured report outline")
            || prompt.starts_with("Your JSON failed validation")
        {
            return Ok(self.outline());
        }
        if prompt.starts_with("Draft a report section") {
            return Ok(self.draft(prompt));
        }
        if prompt.starts_with("Evaluate the drafted section") {
            return Ok(self.review(prompt));
        }
        if prompt.starts_with("Repair the current section") {
            return Ok(self.repair(prompt));
        }
        Err(LlmError::InvalidResponse("unrecognized prompt".to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Embedding client returning one constant vector per text.
pub struct ConstantEmbedding;

impl EmbeddingClient for ConstantEmbedding {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }

    fn model_name(&self) -> &str {
        "constant-embed"
    }

    fn dimensions(&self) -> usize {
        3
    }
}

/// Connector returning a fixed set of abstract-only sources.
pub struct FixtureConnector {
    /// Connector name reported on sources.
    name: &'static str,
    /// Number of sources returned per search.
    count: usize,
}

impl FixtureConnector {
    /// Creates a connector returning `count` sources.
    pub const fn new(name: &'static str, count: usize) -> Self {
        Self {
            name,
            count,
        }
    }
}

impl Connector for FixtureConnector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn search(
        &self,
        _query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<RetrievedSource>, ConnectorError> {
        let sources = (0 .. self.count)
            .map(|index| RetrievedSource {
                canonical_id: CanonicalIdentifier {
                    doi: Some(format!("10.1000/{}-{index}", self.name)),
                    arxiv_id: None,
                    openalex_id: None,
                    url: None,
                },
                title: format!("Fixture Paper {index} ({})", self.name),
                authors: vec!["A. Author".to_string()],
                year: Some(2_024),
                venue: Some("Fixture Venue".to_string()),
                abstract_text: Some(format!(
                    "Sleep improves memory consolidation in study {index}."
                )),
                url: Some(format!("https://example.org/{}/{index}", self.name)),
                pdf_url: None,
                source_type: SourceType::Paper,
                connector: self.name.to_string(),
                citations_count: Some(5),
                extra_metadata: json!({}),
            })
            .collect();
        Ok(sources)
    }
}

/// Clients bundle wiring the stubs together.
pub struct StubClients {
    /// Scripted LLM shared across stages.
    pub llm: Arc<ScriptedLlm>,
    /// Constant embedding client.
    embedding: Arc<ConstantEmbedding>,
    /// Fixture connectors.
    connectors: Vec<Arc<dyn Connector>>,
}

impl StubClients {
    /// Creates the stub bundle for a scenario.
    pub fn new(scenario: Scenario, store: SqliteStore) -> Self {
        Self {
            llm: Arc::new(ScriptedLlm::new(scenario, store)),
            embedding: Arc::new(ConstantEmbedding),
            connectors: vec![Arc::new(FixtureConnector::new("openalex", 4))],
        }
    }
}

impl Clients for StubClients {
    fn llm_client(&self, _model_override: Option<&str>) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::clone(&self.llm) as Arc<dyn LlmClient>)
    }

    fn embedding_client(&self) -> Result<Arc<dyn EmbeddingClient>, EmbedError> {
        Ok(Arc::clone(&self.embedding) as Arc<dyn EmbeddingClient>)
    }

    fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors.clone()
    }
}

/// Everything a coordinator test needs.
pub struct Fixture {
    /// Temp dir owning the database file.
    pub _dir: tempfile::TempDir,
    /// Store handle.
    pub store: SqliteStore,
    /// Coordinator under test.
    pub coordinator: Coordinator,
    /// Scripted LLM handle for side-effecting scenarios.
    pub llm: Arc<ScriptedLlm>,
    /// Tenant under test.
    pub tenant: TenantId,
    /// Seeded project.
    pub project_id: ProjectId,
    /// Seeded queued run.
    pub run_id: RunId,
}

/// Builds a fixture with a queued run and stub clients.
pub fn fixture(scenario: Scenario) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    let events = Arc::new(SqliteEventSink::new(&store));

    let mut config = AppConfig::default();
    config.draft.section_min_words = 10;
    config.evidence.snippet_min = 1;
    config.evidence.min_required = 1;
    let config = Arc::new(config);

    let clients = StubClients::new(scenario, store.clone());
    let llm = Arc::clone(&clients.llm);
    let coordinator =
        Coordinator::new(store.clone(), events, Arc::new(clients), Arc::clone(&config));

    let tenant = TenantId::new("t1");
    let (project_id, run_id) = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "demo", None)?;
            let run = session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id.clone(),
                    status: RunStatus::Queued,
                    current_stage: Some(draftgate_core::Stage::Retrieve),
                    question: "effects of sleep on memory".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: Some("c1".to_string()),
                    budgets: json!({}),
                    usage: json!({
                        "job_type": "research.run",
                        "user_query": "effects of sleep on memory",
                    }),
                },
            )?;
            session.enqueue_run_job(&tenant, &run.id, "research.run")?;
            Ok((project.id, run.id))
        })
        .unwrap();
    llm.target_run(tenant.clone(), run_id.clone());

    Fixture {
        _dir: dir,
        store,
        coordinator,
        llm,
        tenant,
        project_id,
        run_id,
    }
}
