//! End-to-end test: an interstitial page is stored, counted as a risk hint
//! failure, and does not fail the job.

use std::sync::Arc;
use std::time::Duration;

use media_crawler_core::crawler::ErrorKind;
use media_crawler_core::platform::{PageRunner, Tieba};
use media_crawler_core::{Config, Overrides, Registry, TaskSupervisor};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

fn supervisor_against(server: &MockServer, dir: &TempDir) -> TaskSupervisor {
    let base_url = server.uri();
    let mut registry = Registry::new();
    registry.register("tieba", &["tb"], move |ctx| {
        Box::new(PageRunner::<Tieba>::with_base_url(ctx, &base_url))
    });
    let base = Config {
        data_dir: dir.path().display().to_string(),
        crawler_max_sleep_sec: 0,
        http_retry_count: 0,
        http_retry_base_delay_ms: 0,
        http_retry_max_delay_ms: 0,
        ..Config::default()
    };
    TaskSupervisor::new(base, Arc::new(registry))
}

// ==================== Risk Hint Tests ====================

#[tokio::test]
async fn test_verification_page_is_saved_and_counted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/7001"))
        .respond_with(html("<html><body>请通过验证后继续访问</body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/7002"))
        .respond_with(html("<html><title>normal thread</title></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let supervisor = supervisor_against(&server, &dir);
    supervisor
        .run(&Overrides {
            platform: Some("tb".to_string()),
            crawler_type: Some("detail".to_string()),
            inputs: Some(vec!["7001".to_string(), "7002".to_string()]),
            ..Overrides::default()
        })
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), supervisor.wait_idle())
        .await
        .expect("job should finish");

    assert!(status.last_error.is_empty(), "{}", status.last_error);
    assert_eq!(status.last_error_kind, None);
    assert_eq!(status.processed, 2);
    assert_eq!(status.succeeded, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.failure_kinds.get(&ErrorKind::RiskHint), Some(&1));

    let raw = std::fs::read_to_string(dir.path().join("tieba/notes/7001/note.json")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(record["risk_hint"], "captcha");
    assert!(record["body"].as_str().unwrap().contains("请通过验证"));
    assert!(dir.path().join("tieba/notes/7002/note.json").exists());
}
