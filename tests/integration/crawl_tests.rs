//! Integration tests for crawl cycles
//!
//! These tests use wiremock to serve company websites and a scripted
//! classifier, and run whole crawl cycles against a SQLite file.

mod common;

use career_frontier::config::Config;
use career_frontier::crawler::{CrawlOrchestrator, RevalidationScheduler};
use career_frontier::probe::ProbeStrategyChain;
use career_frontier::storage::{FrontierStore, SqliteStorage};
use career_frontier::FrontierState;
use common::{add_child, add_company, engine, explored_company, html, state_of, test_config, Engine, ScriptedClassifier};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn orchestrator(config: &Config, engine: &Engine) -> CrawlOrchestrator<SqliteStorage> {
    CrawlOrchestrator::new(
        engine.store.clone(),
        Arc::clone(&engine.fetcher),
        ProbeStrategyChain::new(config.probe.clone()),
        Arc::clone(&engine.gate),
        &config.crawler,
    )
}

async fn mount_careers_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(html(
            r#"<html><head><title>Careers at Acme</title></head><body>
            <h1>Careers</h1>
            <p>Open positions across all teams. Apply today.</p>
            <a href="/careers/engineering">Engineering</a>
            <a href="/about">About us</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/careers/engineering"))
        .respond_with(html(
            "<html><body><p>We are not hiring engineers right now.</p></body></html>",
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_probe_classify_and_expand() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_careers_site(&server).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = ScriptedClassifier::new().answer(
        "/careers",
        true,
        92,
        &["/careers/engineering", "/careers/secret-internal"],
    );
    let engine = engine(&config, Arc::new(classifier));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.roots_found, 1);
    assert_eq!(report.targets, 1);
    assert_eq!(report.processed, 3);
    assert!(!report.cancelled);

    let storage = engine.store.lock().unwrap();

    let root = storage.root_entry(company_id).unwrap().unwrap();
    assert_eq!(root.state, FrontierState::SeedExplored);

    let careers = storage
        .find_entry(company_id, &format!("{}/careers", base))
        .unwrap()
        .expect("career root was queued");
    assert_eq!(careers.depth, 1);
    assert_eq!(careers.parent_id, Some(root.entry_id));
    assert_eq!(careers.state, FrontierState::TargetConfirmed);
    assert_eq!(careers.confidence, Some(92));
    assert!(careers.last_checked_at.is_some());

    let engineering = storage
        .find_entry(company_id, &format!("{}/careers/engineering", base))
        .unwrap()
        .expect("suggested link present on the page was queued");
    assert_eq!(engineering.depth, 2);
    assert_eq!(engineering.parent_id, Some(careers.entry_id));
    // Not a listing and no links of its own
    assert_eq!(engineering.state, FrontierState::DeadEnd);

    // Suggested by the classifier but absent from the page
    assert!(storage
        .find_entry(company_id, &format!("{}/careers/secret-internal", base))
        .unwrap()
        .is_none());

    let confirmed = storage.list_confirmed_targets(company_id).unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].entry_id, careers.entry_id);
}

#[tokio::test]
async fn test_depth_is_parent_depth_plus_one() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_careers_site(&server).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = ScriptedClassifier::new().answer("/careers", false, 40, &["/careers/engineering", "/about"]);
    let engine = engine(&config, Arc::new(classifier));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    orchestrator(&config, &engine).run_cycle().await.unwrap();

    let entries = engine.store.lock().unwrap().list_entries(company_id).unwrap();
    assert!(entries.len() >= 4);

    let by_id: HashMap<i64, _> = entries.iter().map(|e| (e.entry_id, e)).collect();
    for entry in &entries {
        match entry.parent_id {
            Some(parent_id) => {
                let parent = by_id[&parent_id];
                assert_eq!(entry.depth, parent.depth + 1, "{}", entry.url);
                assert_eq!(entry.parent_url.as_deref(), Some(parent.url.as_str()));
            }
            None => assert_eq!(entry.depth, 0, "{}", entry.url),
        }
    }

    // Not a target but links were followed
    let careers = entries
        .iter()
        .find(|e| e.url == format!("{}/careers", base))
        .unwrap();
    assert_eq!(careers.state, FrontierState::SeedExplored);
}

#[tokio::test]
async fn test_no_career_page_is_terminal() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body><a href="/products">Products</a><a href="/contact">Contact</a></body></html>"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = Arc::new(ScriptedClassifier::new());
    let engine = engine(&config, classifier.clone());
    let company_id = add_company(&engine.store, "Quiet Co", &format!("{}/", base));

    let orchestrator = orchestrator(&config, &engine);
    let first = orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.roots_found, 0);

    let root = engine.store.lock().unwrap().root_entry(company_id).unwrap().unwrap();
    assert_eq!(root.state, FrontierState::NoCareerPageFound);
    assert_eq!(root.last_error.as_deref(), Some("no career page found"));

    // The ordinary crawl never touches a terminal entry again
    let second = orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.processed, 0);

    let after = engine.store.lock().unwrap().root_entry(company_id).unwrap().unwrap();
    assert_eq!(after, root);
    assert_eq!(classifier.call_count(), 0);
}

#[tokio::test]
async fn test_homepage_link_and_budget() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body>
            <a href="/blog">Blog</a>
            <a href="/team">Work with us</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team"))
        .respond_with(html("<html><body>Open positions</body></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 1);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.roots_found, 1);

    // The budget is spent on the probe; the career root waits for the next cycle
    let team = engine
        .store
        .lock()
        .unwrap()
        .find_entry(company_id, &format!("{}/team", base))
        .unwrap()
        .unwrap();
    assert_eq!(team.depth, 1);
    assert_eq!(team.state, FrontierState::Discovered);
}

#[tokio::test]
async fn test_permanent_failure_marks_invalid() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/careers/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let entry_id = add_child(&engine.store, company_id, root_id, &format!("{}/careers/gone", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.invalid, 1);

    let entry = engine.store.lock().unwrap().get_entry(entry_id).unwrap();
    assert_eq!(entry.state, FrontierState::Invalid);
    assert!(entry.last_error.unwrap().contains("404"));
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_requeued() {
    let server = MockServer::start().await;
    let base = server.uri();

    // max-attempts = 2
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let entry_id = add_child(&engine.store, company_id, root_id, &format!("{}/jobs", base));

    let orchestrator = orchestrator(&config, &engine);
    let report = orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.failures, 1);

    let entry = engine.store.lock().unwrap().get_entry(entry_id).unwrap();
    assert_eq!(entry.state, FrontierState::Discovered);
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("503"));
    assert!(entry.next_attempt_at.is_some());

    // Not due again until the requeue delay has passed
    let second = orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.processed, 0);
}

#[tokio::test]
async fn test_classifier_failure_never_downgrades() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_careers_site(&server).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = Arc::new(ScriptedClassifier::failing());
    let engine = engine(&config, classifier.clone());
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let entry_id = add_child(&engine.store, company_id, root_id, &format!("{}/careers", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(classifier.call_count(), 2);

    let entry = engine.store.lock().unwrap().get_entry(entry_id).unwrap();
    assert_eq!(entry.state, FrontierState::Discovered);
    assert!(entry.last_error.unwrap().starts_with("classifier:"));
    assert_eq!(entry.confidence, None);
}

#[tokio::test]
async fn test_rate_limited_entry_is_deferred() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let entry_id = add_child(&engine.store, company_id, root_id, &format!("{}/careers", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failures, 0);

    let entry = engine.store.lock().unwrap().get_entry(entry_id).unwrap();
    assert_eq!(entry.state, FrontierState::Discovered);
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.last_error, None);
    assert!(entry.next_attempt_at.is_some());
}

#[tokio::test]
async fn test_cancelled_cycle_does_no_work() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_careers_site(&server).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    let orchestrator = orchestrator(&config, &engine);
    orchestrator.cancellation_token().cancel();

    let report = orchestrator.run_cycle().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);

    let root = engine.store.lock().unwrap().root_entry(company_id).unwrap().unwrap();
    assert_eq!(root.state, FrontierState::Discovered);
}

#[tokio::test]
async fn test_companies_are_crawled_independently() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    mount_careers_site(&first).await;
    mount_careers_site(&second).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = ScriptedClassifier::new().answer("/careers", true, 50, &[]);
    let engine = engine(&config, Arc::new(classifier));
    let acme = add_company(&engine.store, "Acme", &format!("{}/", first.uri()));
    let globex = add_company(&engine.store, "Globex", &format!("{}/", second.uri()));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.companies.len(), 2);
    assert_eq!(report.roots_found, 2);

    for (company_id, base) in [(acme, first.uri()), (globex, second.uri())] {
        let storage = engine.store.lock().unwrap();
        let careers = storage
            .find_entry(company_id, &format!("{}/careers", base))
            .unwrap()
            .unwrap();
        // Below the acceptance threshold
        assert_eq!(careers.state, FrontierState::TargetProvisional);
        assert!(storage.list_confirmed_targets(company_id).unwrap().is_empty());
        assert_eq!(storage.list_targets(company_id).unwrap().len(), 1);
    }

    let root = engine.store.lock().unwrap().root_entry(acme).unwrap().unwrap();
    assert_eq!(state_of(&engine.store, root.entry_id), FrontierState::SeedExplored);
}

#[tokio::test]
async fn test_redirecting_link_is_classified_at_its_destination() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/careers"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/jobs"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(html(
            r#"<html><body><h1>Open positions</h1><a href="/jobs/backend">Backend engineer</a></body></html>"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 20);
    let classifier = Arc::new(ScriptedClassifier::new().answer("/jobs", true, 95, &[]));
    let engine = engine(&config, classifier.clone());
    let (company_id, root_id) = explored_company(&engine.store, "Acme", &format!("{}/", base));
    let careers_id = add_child(&engine.store, company_id, root_id, &format!("{}/careers", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.children, 1);
    assert_eq!(report.targets, 1);
    assert_eq!(classifier.call_count(), 1);

    let jobs_id = {
        let storage = engine.store.lock().unwrap();
        let careers = storage.get_entry(careers_id).unwrap();
        assert_eq!(careers.state, FrontierState::SeedExplored);
        assert_eq!(careers.confidence, None);

        let jobs = storage
            .find_entry(company_id, &format!("{}/jobs", base))
            .unwrap()
            .expect("redirect destination was queued");
        assert_eq!(jobs.depth, 2);
        assert_eq!(jobs.parent_id, Some(careers_id));
        assert_eq!(jobs.state, FrontierState::TargetConfirmed);
        assert_eq!(jobs.confidence, Some(95));
        jobs.entry_id
    };

    // Nothing changed on the site, so a later revalidation keeps the target
    let scheduler = RevalidationScheduler::new(
        engine.store.clone(),
        Arc::clone(&engine.fetcher),
        Arc::clone(&engine.gate),
        &config.policy,
        &config.crawler,
    );
    let revalidated = scheduler
        .run_pass_at(Utc::now() + Duration::hours(200))
        .await
        .unwrap();
    assert_eq!(revalidated.checked, 1);
    assert_eq!(revalidated.confirmed, 1);
    assert_eq!(revalidated.revoked, 0);
    assert_eq!(state_of(&engine.store, jobs_id), FrontierState::TargetConfirmed);
    assert_eq!(state_of(&engine.store, careers_id), FrontierState::SeedExplored);
}

/// Serves a site whose only career link is listed in a child sitemap
///
/// The index lists, in order: a nested index, a compressed sitemap and the
/// page sitemap holding `/team/careers`.
async fn mount_sitemap_site(server: &MockServer, pages_expected: u64) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body><a href="/products">Products</a><a href="/contact">Contact</a></body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                    <sitemap><loc>{base}/sitemap-nested.xml</loc></sitemap>
                    <sitemap><loc>{base}/sitemap-archive.xml.gz</loc></sitemap>
                    <sitemap><loc>{base}/sitemap-pages.xml</loc></sitemap>
                </sitemapindex>"#,
                base = base
            )
            .into_bytes(),
            "application/xml",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap-nested.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<sitemapindex><sitemap><loc>{}/sitemap-deep.xml</loc></sitemap></sitemapindex>"#,
                base
            )
            .into_bytes(),
            "application/xml",
        ))
        .mount(server)
        .await;

    // Behind the nested index: never fetched
    Mock::given(method("GET"))
        .and(path("/sitemap-deep.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(r#"<urlset><url><loc>{}/deep/careers</loc></url></urlset>"#, base).into_bytes(),
            "application/xml",
        ))
        .expect(0)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap-archive.xml.gz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap-pages.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<urlset>
                    <url><loc>{base}/</loc></url>
                    <url><loc>{base}/about</loc></url>
                    <url><loc>{base}/team/careers</loc></url>
                </urlset>"#,
                base = base
            )
            .into_bytes(),
            "application/xml",
        ))
        .expect(pages_expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sitemap_index_locates_career_root() {
    let server = MockServer::start().await;
    let base = server.uri();
    // Every direct probe path is unmatched and answers 404
    mount_sitemap_site(&server, 1).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("frontier.db"), 1);
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.roots_found, 1);

    let storage = engine.store.lock().unwrap();
    let root = storage.root_entry(company_id).unwrap().unwrap();
    assert_eq!(root.state, FrontierState::SeedExplored);

    let careers = storage
        .find_entry(company_id, &format!("{}/team/careers", base))
        .unwrap()
        .expect("career root from the child sitemap was queued");
    assert_eq!(careers.depth, 1);
    assert_eq!(careers.parent_id, Some(root.entry_id));
    assert_eq!(careers.state, FrontierState::Discovered);

    assert!(storage
        .find_entry(company_id, &format!("{}/deep/careers", base))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_child_sitemaps_beyond_limit_are_not_read() {
    let server = MockServer::start().await;
    let base = server.uri();
    // The page sitemap is third in the index
    mount_sitemap_site(&server, 0).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir.path().join("frontier.db"), 1);
    config.probe.max_child_sitemaps = 2;
    let engine = engine(&config, Arc::new(ScriptedClassifier::new()));
    let company_id = add_company(&engine.store, "Acme", &format!("{}/", base));

    let report = orchestrator(&config, &engine).run_cycle().await.unwrap();
    assert_eq!(report.roots_found, 0);

    let root = engine.store.lock().unwrap().root_entry(company_id).unwrap().unwrap();
    assert_eq!(root.state, FrontierState::NoCareerPageFound);
}
