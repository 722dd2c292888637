//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use career_frontier::classify::{ClassificationGate, ClassificationResult, Classifier, ClassifierError};
use career_frontier::config::{parse_config, Config};
use career_frontier::crawler::{
    HttpPageFetcher, PageLink, PoliteFetcher, PolitenessGate, RetryPolicy, SharedStore,
};
use career_frontier::storage::{FrontierStore, NewEntry, SqliteStorage, TransitionFields};
use career_frontier::FrontierState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::ResponseTemplate;

/// Builds a validated configuration with short intervals
pub fn test_config(db_path: &Path, budget: u32) -> Config {
    let toml = format!(
        r#"
[crawler]
workers = 2
crawl-budget = {budget}
max-depth = 3
minimum-request-interval = 10
fetch-timeout = 5
classify-timeout = 5
max-attempts = 2
backoff-base = 1
backoff-max = 5
requeue-delay = 600

[policy]
acceptance-confidence = 70
staleness-window = 168
provisional-staleness-window = 24

[user-agent]
crawler-name = "FrontierTestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[storage]
database-path = "{db}"
"#,
        budget = budget,
        db = db_path.display()
    );
    parse_config(&toml).expect("test config is valid")
}

/// A 200 response carrying an HTML body
pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

/// Classifier answering per URL path; unknown paths are not targets
#[derive(Default)]
pub struct ScriptedClassifier {
    answers: HashMap<String, ClassificationResult>,
    failing: bool,
    pub calls: AtomicU32,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A classifier whose every call fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn answer(mut self, path: &str, is_target: bool, confidence: u8, suggested: &[&str]) -> Self {
        self.answers.insert(
            path.to_string(),
            ClassificationResult {
                is_target,
                confidence,
                reasoning: format!("scripted answer for {}", path),
                suggested_links: suggested.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        url: &Url,
        _text: &str,
        _links: &[PageLink],
    ) -> Result<ClassificationResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ClassifierError::Unavailable("HTTP 503".to_string()));
        }

        Ok(self
            .answers
            .get(url.path())
            .cloned()
            .unwrap_or(ClassificationResult {
                is_target: false,
                confidence: 5,
                reasoning: "no listing".to_string(),
                suggested_links: Vec::new(),
            }))
    }
}

/// The pieces the orchestrator and the revalidation scheduler share
pub struct Engine {
    pub store: SharedStore<SqliteStorage>,
    pub fetcher: Arc<PoliteFetcher>,
    pub gate: Arc<ClassificationGate>,
}

pub fn engine(config: &Config, classifier: Arc<dyn Classifier>) -> Engine {
    let storage = SqliteStorage::new(Path::new(&config.storage.database_path)).unwrap();
    let http = HttpPageFetcher::new(&config.user_agent, Duration::from_secs(config.crawler.fetch_timeout))
        .unwrap();

    Engine {
        store: SharedStore::new(storage),
        fetcher: Arc::new(PoliteFetcher::new(
            Arc::new(http),
            PolitenessGate::from_config(&config.crawler),
            RetryPolicy::from_config(&config.crawler),
        )),
        gate: Arc::new(ClassificationGate::from_config(
            classifier,
            &config.policy,
            &config.crawler,
        )),
    }
}

/// Registers a company and returns its id
pub fn add_company(store: &SharedStore<SqliteStorage>, name: &str, url: &str) -> i64 {
    store.lock().unwrap().upsert_company_root(name, url, true).unwrap()
}

/// Registers a company whose root probe already ran; returns `(company_id, root_entry_id)`
pub fn explored_company(store: &SharedStore<SqliteStorage>, name: &str, url: &str) -> (i64, i64) {
    let company_id = add_company(store, name, url);
    let mut storage = store.lock().unwrap();
    let company = storage.get_company_root(company_id).unwrap();
    let root_id = storage.ensure_root_entry(&company).unwrap().entry_id();

    storage
        .transition(root_id, FrontierState::Discovered, FrontierState::Probing, &TransitionFields::default())
        .unwrap();
    storage
        .transition(
            root_id,
            FrontierState::Probing,
            FrontierState::SeedExplored,
            &TransitionFields::checked(Utc::now()),
        )
        .unwrap();

    (company_id, root_id)
}

/// Inserts a child entry and returns its id
pub fn add_child(store: &SharedStore<SqliteStorage>, company_id: i64, parent_id: i64, url: &str) -> i64 {
    store
        .lock()
        .unwrap()
        .upsert_entry(&NewEntry::child(company_id, url, parent_id))
        .unwrap()
        .entry_id()
}

/// Inserts a child and classifies it as a target checked at `checked_at`
pub fn add_target(
    store: &SharedStore<SqliteStorage>,
    company_id: i64,
    parent_id: i64,
    url: &str,
    state: FrontierState,
    confidence: u8,
    checked_at: DateTime<Utc>,
) -> i64 {
    let entry_id = add_child(store, company_id, parent_id, url);
    store
        .lock()
        .unwrap()
        .transition(
            entry_id,
            FrontierState::Discovered,
            state,
            &TransitionFields::checked(checked_at).with_confidence(confidence),
        )
        .unwrap();
    entry_id
}

pub fn state_of(store: &SharedStore<SqliteStorage>, entry_id: i64) -> FrontierState {
    store.lock().unwrap().get_entry(entry_id).unwrap().state
}
