//! Fan-out executor lifecycle and administrative calls

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tsdb_gateway::backend::wire::UidKind;
use tsdb_gateway::error::TransportError;
use tsdb_gateway::fanout::{RenameRequest, STATUS_CLOSED};
use tsdb_gateway::{
    Error, FanoutExecutor, GatewayConfig, MetricSpecification, QueryStatus, QueryWindow,
    RawResponse, Transport,
};

/// Replays a script of responses and records every call
struct ScriptedBackend {
    script: Mutex<Vec<Result<RawResponse, TransportError>>>,
    fallback: RawResponse,
    calls: AtomicUsize,
    paths: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Result<RawResponse, TransportError>>, fallback: RawResponse) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            fallback,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, path: &str) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_string());
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[async_trait]
impl Transport for ScriptedBackend {
    async fn post_json(&self, path: &str, body: Value) -> Result<RawResponse, TransportError> {
        self.bodies.lock().unwrap().push(body);
        self.next(path)
    }

    async fn get(
        &self,
        path: &str,
        _params: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        self.next(path)
    }
}

/// Panics on any query naming `metric`, answers one series otherwise
struct PanickingBackend {
    metric: &'static str,
}

#[async_trait]
impl Transport for PanickingBackend {
    async fn post_json(&self, _path: &str, body: Value) -> Result<RawResponse, TransportError> {
        if body.to_string().contains(self.metric) {
            panic!("transport failure for {}", self.metric);
        }
        Ok(RawResponse::new(200, r#"[{"metric":"m","dps":{"0":1}}]"#))
    }

    async fn get(
        &self,
        _path: &str,
        _params: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200, "[]"))
    }
}

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.executor.core_pool_size = 2;
    config.executor.max_pool_size = 4;
    config.admin.retry_count = 3;
    config.admin.drop_cache_retry_count = 2;
    config.admin.retry_backoff_ms = 1;
    config
}

fn open(backend: &Arc<ScriptedBackend>) -> FanoutExecutor {
    FanoutExecutor::open(&config(), backend.clone()).unwrap()
}

#[test]
fn test_suggest_unescapes_names() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![],
        RawResponse::new(200, r#"["sys.cpu", "disk__SPACE__used"]"#),
    ));
    let executor = open(&backend);

    let names = executor.suggest(UidKind::Metric, "s", 10).unwrap();
    assert_eq!(names, vec!["sys.cpu".to_string(), "disk used".to_string()]);
    assert_eq!(backend.paths.lock().unwrap()[0], "/api/suggest");
}

#[test]
fn test_suggest_client_error_is_not_retried() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![],
        RawResponse::new(400, r#"{"error":{"code":400,"message":"Invalid type"}}"#),
    ));
    let executor = open(&backend);

    let err = executor.suggest(UidKind::Tagk, "", 5).unwrap_err();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().contains("Invalid type"));
}

#[test]
fn test_drop_caches_retries_server_errors() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![Ok(RawResponse::new(503, "unavailable"))],
        RawResponse::new(200, "{}"),
    ));
    let executor = open(&backend);

    executor.drop_caches().unwrap();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.paths.lock().unwrap()[1], "/api/dropcaches");
}

#[test]
fn test_drop_caches_gives_up_after_budget() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![],
        RawResponse::new(500, "still broken"),
    ));
    let executor = open(&backend);

    let err = executor.drop_caches().unwrap_err();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(matches!(err, Error::Backend { status: 500, .. }));
}

#[test]
fn test_transport_errors_are_retried() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![
            Err(TransportError::Timeout("slow".into())),
            Err(TransportError::Connect("refused".into())),
        ],
        RawResponse::new(200, "[]"),
    ));
    let executor = open(&backend);

    let names = executor.suggest(UidKind::Tagv, "x", 1).unwrap();
    assert!(names.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_rename_reports_every_task() {
    let backend = Arc::new(ScriptedBackend::new(vec![], RawResponse::new(200, "{}")));
    let executor = open(&backend);

    let requests = vec![
        RenameRequest::new(UidKind::Metric, "old.a", "new.a"),
        RenameRequest::new(UidKind::Metric, "old.b", "new.b"),
        RenameRequest::new(UidKind::Tagv, "web 1", "web1"),
    ];

    let mut seen = Vec::new();
    let summary = executor
        .rename(requests, |progress| seen.push(progress.clone()))
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert!(summary.failed.is_empty());

    assert_eq!(seen.len(), 3);
    let completed: Vec<usize> = seen.iter().map(|p| p.completed).collect();
    assert_eq!(completed, vec![1, 2, 3]);
    assert!(seen.iter().all(|p| p.total == 3 && p.is_success()));

    let bodies = backend.bodies.lock().unwrap();
    assert!(bodies
        .iter()
        .any(|b| b["tagv"] == "web__SPACE__1" && b["name"] == "web1"));
}

#[test]
fn test_rename_collects_failures() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![],
        RawResponse::new(404, r#"{"error":{"code":404,"message":"no such name"}}"#),
    ));
    let executor = open(&backend);

    let summary = executor
        .rename(vec![RenameRequest::new(UidKind::Tagk, "a", "b")], |progress| {
            assert!(!progress.is_success());
            assert!(progress.message().contains("failed to rename tagk 'a' to 'b'"));
        })
        .unwrap();

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].1.contains("no such name"));
    // 4xx is final
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_closed_executor() {
    let backend = Arc::new(ScriptedBackend::new(vec![], RawResponse::new(200, "[]")));
    let mut executor = open(&backend);
    assert!(executor.is_open());
    executor.close();
    executor.close();

    assert!(matches!(executor.drop_caches(), Err(Error::ExecutorClosed)));
    assert!(matches!(
        executor.suggest(UidKind::Metric, "", 1),
        Err(Error::ExecutorClosed)
    ));

    let specs = vec![
        MetricSpecification::for_metric("a"),
        MetricSpecification::for_metric("b"),
    ];
    let results = executor.fetch(QueryWindow::since(0), None, &specs);
    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .all(|r| r.status == QueryStatus::error(STATUS_CLOSED)));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_many_specs_bounded_by_pool() {
    let backend = Arc::new(ScriptedBackend::new(
        vec![],
        RawResponse::new(200, r#"[{"metric":"m","dps":{"0":1}}]"#),
    ));
    let executor = open(&backend);

    let specs: Vec<MetricSpecification> = (0..50)
        .map(|i| MetricSpecification::for_metric("m").with_id(format!("s{}", i)))
        .collect();
    let results = executor.fetch(QueryWindow::new(0, 60), None, &specs);

    assert_eq!(results.len(), 50);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.spec_index, i);
        assert_eq!(result.spec_id.as_deref(), Some(format!("s{}", i).as_str()));
        assert_eq!(result.series.len(), 1);
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 50);
}

#[test]
fn test_panicking_task_fails_only_its_slot() {
    let backend = Arc::new(PanickingBackend { metric: "boom" });
    let executor = FanoutExecutor::open(&config(), backend).unwrap();

    let specs = vec![
        MetricSpecification::for_metric("first"),
        MetricSpecification::for_metric("boom"),
        MetricSpecification::for_metric("last"),
    ];
    let results = executor.fetch(QueryWindow::new(0, 60), None, &specs);

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].spec_index, 1);
    assert_eq!(results[1].status, QueryStatus::error("sub-query task aborted"));
    assert!(results[1].series.is_empty());

    for i in [0, 2] {
        assert_eq!(results[i].spec_index, i);
        assert!(!results[i].status.is_error());
        assert_eq!(results[i].series.len(), 1);
    }
    assert!(executor.is_open());
}
