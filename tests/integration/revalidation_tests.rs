//! Integration tests for target revalidation

mod common;

use career_frontier::config::Config;
use career_frontier::crawler::RevalidationScheduler;
use career_frontier::storage::{FrontierStore, SqliteStorage};
use career_frontier::FrontierState;
use chrono::{Duration, Utc};
use common::{add_child, add_target, engine, explored_company, html, state_of, test_config, Engine, ScriptedClassifier};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scheduler(config: &Config, engine: &Engine) -> RevalidationScheduler<SqliteStorage> {
    RevalidationScheduler::new(
        engine.store.clone(),
        Arc::clone(&engine.fetcher),
        Arc::clone(&engine.gate),
        &config.policy,
        &config.crawler,
    )
}

const LISTING: &str = r#"<html><body>
    <h1>Open positions</h1>
    <a href="/careers/engineering">Engineering</a>
    <a href="/careers/sales">Sales</a>
    </body></html>"#;

/// A company with one confirmed target at `/careers`, last checked 200 hours ago
struct Fixture {
    _dir: TempDir,
    config: Config,
    engine: Engine,
    company_id: i64,
    root_id: i64,
    target_id: i64,
}

fn fixture(server: &MockServer, classifier: ScriptedClassifier) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, Arc::new(classifier));
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", server.uri()));
    let target_id = add_target(
        &engine.store,
        company_id,
        root_id,
        &format!("{}/careers", server.uri()),
        FrontierState::TargetConfirmed,
        90,
        Utc::now() - Duration::hours(200),
    );

    Fixture {
        _dir: dir,
        config,
        engine,
        company_id,
        root_id,
        target_id,
    }
}

#[tokio::test]
async fn test_broken_target_rearms_root_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let f = fixture(&server, ScriptedClassifier::new());
    let report = scheduler(&f.config, &f.engine).run_pass().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.broken, 1);
    assert_eq!(report.roots_rearmed, 1);

    let target = f.engine.store.lock().unwrap().get_entry(f.target_id).unwrap();
    assert_eq!(target.state, FrontierState::TargetBroken);
    assert!(target.last_error.unwrap().contains("404"));

    assert_eq!(state_of(&f.engine.store, f.root_id), FrontierState::Discovered);
}

#[tokio::test]
async fn test_non_listing_is_revoked_not_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(html("<html><body><p>This page has moved to our blog.</p></body></html>"))
        .mount(&server)
        .await;

    // Unknown paths are not targets
    let f = fixture(&server, ScriptedClassifier::new());
    let before = f.engine.store.lock().unwrap().list_entries(f.company_id).unwrap().len();

    let report = scheduler(&f.config, &f.engine).run_pass().await.unwrap();
    assert_eq!(report.revoked, 1);

    let storage = f.engine.store.lock().unwrap();
    assert_eq!(storage.list_entries(f.company_id).unwrap().len(), before);
    assert_eq!(storage.get_entry(f.target_id).unwrap().state, FrontierState::TargetRevoked);
    assert!(storage.list_targets(f.company_id).unwrap().is_empty());
    // Revocation alone does not force rediscovery
    assert_eq!(storage.get_entry(f.root_id).unwrap().state, FrontierState::SeedExplored);
}

#[tokio::test]
async fn test_valid_target_is_refreshed_and_expanded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(html(LISTING))
        .mount(&server)
        .await;

    let classifier = ScriptedClassifier::new().answer(
        "/careers",
        true,
        95,
        &["/careers/sales", "/careers/fabricated"],
    );
    let f = fixture(&server, classifier);
    let old = f.engine.store.lock().unwrap().get_entry(f.target_id).unwrap();

    let report = scheduler(&f.config, &f.engine).run_pass().await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.children, 1);

    let storage = f.engine.store.lock().unwrap();
    let target = storage.get_entry(f.target_id).unwrap();
    assert_eq!(target.state, FrontierState::TargetConfirmed);
    assert_eq!(target.confidence, Some(95));
    assert!(target.last_checked_at > old.last_checked_at);

    let sales = storage
        .find_entry(f.company_id, &format!("{}/careers/sales", server.uri()))
        .unwrap()
        .unwrap();
    assert_eq!(sales.state, FrontierState::Discovered);
    assert_eq!(sales.depth, 2);
    assert!(storage
        .find_entry(f.company_id, &format!("{}/careers/fabricated", server.uri()))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_low_confidence_downgrades_to_provisional() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(html(LISTING))
        .mount(&server)
        .await;

    let f = fixture(&server, ScriptedClassifier::new().answer("/careers", true, 40, &[]));
    let report = scheduler(&f.config, &f.engine).run_pass().await.unwrap();
    assert_eq!(report.provisional, 1);

    let storage = f.engine.store.lock().unwrap();
    assert_eq!(storage.get_entry(f.target_id).unwrap().state, FrontierState::TargetProvisional);
    assert!(storage.list_confirmed_targets(f.company_id).unwrap().is_empty());
    assert_eq!(storage.list_targets(f.company_id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_redirected_target_is_superseded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/jobs"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(html(LISTING))
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::new().answer("/jobs", true, 95, &[]));
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, classifier.clone());
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", server.uri()));
    let target_id = add_target(
        &engine.store,
        company_id,
        root_id,
        &format!("{}/careers", server.uri()),
        FrontierState::TargetConfirmed,
        90,
        Utc::now() - Duration::hours(200),
    );

    let report = scheduler(&config, &engine).run_pass().await.unwrap();
    assert_eq!(report.revoked, 1);
    assert_eq!(report.children, 1);
    // The replacement is classified by the next crawl cycle, not by revalidation
    assert_eq!(classifier.call_count(), 0);

    let storage = engine.store.lock().unwrap();
    let target = storage.get_entry(target_id).unwrap();
    assert_eq!(target.state, FrontierState::TargetRevoked);
    assert!(target.last_error.unwrap().starts_with("superseded by"));

    let jobs = storage
        .find_entry(company_id, &format!("{}/jobs", server.uri()))
        .unwrap()
        .unwrap();
    assert_eq!(jobs.state, FrontierState::Discovered);
    assert_eq!(jobs.parent_id, Some(target_id));
}

#[tokio::test]
async fn test_staleness_windows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(LISTING))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = ScriptedClassifier::new()
        .answer("/careers", true, 90, &[])
        .answer("/jobs", true, 40, &[]);
    let engine = engine(&config, Arc::new(classifier));
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", server.uri()));

    // 30h old: stale for a provisional target (24h), fresh for a confirmed one (168h)
    let checked_at = Utc::now() - Duration::hours(30);
    let confirmed = add_target(
        &engine.store,
        company_id,
        root_id,
        &format!("{}/careers", server.uri()),
        FrontierState::TargetConfirmed,
        90,
        checked_at,
    );
    let provisional = add_target(
        &engine.store,
        company_id,
        root_id,
        &format!("{}/jobs", server.uri()),
        FrontierState::TargetProvisional,
        40,
        checked_at,
    );

    let scheduler = scheduler(&config, &engine);
    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.provisional, 1);

    let untouched = engine.store.lock().unwrap().get_entry(confirmed).unwrap();
    assert!(untouched.last_checked_at.is_some());
    assert_eq!(untouched.state, FrontierState::TargetConfirmed);

    // A week later both are due
    let report = scheduler
        .run_pass_at(Utc::now() + Duration::hours(200))
        .await
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(state_of(&engine.store, provisional), FrontierState::TargetProvisional);
}

#[tokio::test]
async fn test_transient_failure_keeps_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let f = fixture(&server, ScriptedClassifier::new());
    let report = scheduler(&f.config, &f.engine).run_pass().await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.broken, 0);

    let target = f.engine.store.lock().unwrap().get_entry(f.target_id).unwrap();
    assert_eq!(target.state, FrontierState::TargetConfirmed);
    assert_eq!(target.attempts, 1);
    assert_eq!(state_of(&f.engine.store, f.root_id), FrontierState::SeedExplored);
}

#[tokio::test]
async fn test_superseded_target_at_depth_limit_keeps_its_replacement() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a/b/careers"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/jobs"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(html(LISTING))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    assert_eq!(config.crawler.max_depth, 3);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let base = server.uri();
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let a = add_child(&engine.store, company_id, root_id, &format!("{}/a", base));
    let b = add_child(&engine.store, company_id, a, &format!("{}/a/b", base));
    let target_id = add_target(
        &engine.store,
        company_id,
        b,
        &format!("{}/a/b/careers", base),
        FrontierState::TargetConfirmed,
        90,
        Utc::now() - Duration::hours(200),
    );

    let report = scheduler(&config, &engine).run_pass().await.unwrap();
    assert_eq!(report.revoked, 1);
    assert_eq!(report.children, 1);

    let storage = engine.store.lock().unwrap();
    let target = storage.get_entry(target_id).unwrap();
    assert_eq!(target.depth, 3);
    assert_eq!(target.state, FrontierState::TargetRevoked);

    let jobs = storage
        .find_entry(company_id, &format!("{}/jobs", base))
        .unwrap()
        .expect("replacement recorded past the depth limit");
    assert_eq!(jobs.depth, 4);
    assert_eq!(jobs.parent_id, Some(target_id));
    assert_eq!(jobs.state, FrontierState::Discovered);
}
