mod common;

use codemux::incremental::UpdatePriority;
use codemux::{AnalysisContext, ConnectionStatus, FileChange, FileChangeType, Language, SymbolQuery};
use common::{engine, test_config, uri_of, write_file, MockState};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_file_change_fans_out_to_index_cache_and_analyzer() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "app.rs", "fn start\nfn stop\n");
    let uri = uri_of(&path);

    let state = MockState::new();
    let engine = engine(&state, test_config());
    engine.index_project(dir.path()).await.unwrap();

    let context = AnalysisContext::new(uri.clone(), Language::Rust);
    let before = engine.analyze_code(&context).await.unwrap();
    assert_eq!(before.symbols.len(), 2);

    std::fs::write(&path, "fn start\nfn stop\nfn restart\n").unwrap();
    let update = engine
        .handle_file_changes(&[FileChange::new(uri.clone(), FileChangeType::Modified)])
        .await
        .unwrap();
    assert_eq!(update.updated, 1);

    let after = engine.analyze_code(&context).await.unwrap();
    assert_eq!(after.symbols.len(), 3);
    let found = engine
        .find_symbols(&SymbolQuery::by_name("restart"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_document_changed_events_invalidate_analyses() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "lib.rs", "fn one\n");
    let uri = uri_of(&path);

    let state = MockState::new();
    let engine = engine(&state, test_config());
    engine.start();

    let context = AnalysisContext::new(uri.clone(), Language::Rust);
    assert_eq!(engine.analyze_code(&context).await.unwrap().symbols.len(), 1);

    engine.supervisor().queue_incremental_update(
        &uri,
        Language::Rust,
        vec![json!({ "text": "fn one\nfn two\n" })],
        UpdatePriority::High,
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    let refreshed = engine.analyze_code(&context).await.unwrap();
    assert_eq!(refreshed.symbols.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_status_metrics_and_token_reduction() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "big.py",
        &format!("fn compute\n{}", "# filler line for token estimate\n".repeat(50)),
    );

    let state = MockState::new();
    let engine = engine(&state, test_config());
    assert!(engine.get_server_status(Language::Python).await.is_none());

    engine.index_project(dir.path()).await.unwrap();

    let status = engine.get_server_status(Language::Python).await.unwrap();
    assert_eq!(status.status, ConnectionStatus::Running);
    assert_eq!(status.pool_size, 1);

    let metrics = engine.get_server_metrics(Language::Python).unwrap();
    assert!(metrics.requests_total >= 1);
    assert_eq!(metrics.token_reduction.samples, 1);
    assert!(metrics.token_reduction.average_reduction > 0.5);

    engine.shutdown().await;
    assert!(engine.get_server_status(Language::Python).await.is_none());
}

#[tokio::test]
async fn test_snapshot_round_trip_through_engine() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.rs", "fn exported\n");

    let state = MockState::new();
    let source = engine(&state, test_config());
    source.index_project(dir.path()).await.unwrap();
    let snapshot = source.export_index().await;

    let target = engine(&MockState::new(), test_config());
    target.import_index(snapshot).await.unwrap();
    let found = target
        .find_symbols(&SymbolQuery::by_name("exported"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}
