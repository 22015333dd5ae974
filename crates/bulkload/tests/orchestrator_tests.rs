//! Bulk-load orchestration tests against a spy driver
//!
//! Every run here goes through the real orchestrator, channel and registry;
//! only the database and the storage are replaced.

mod common;

use bulkload::{BulkLoadAction, LoadConfig, LoadError, LoadFailure, StorageError};
use common::{spy_context, Call, MemoryStore, Script, SpyDriver};

const STATEMENT: &str = "COPY events FROM STDIN DELIMITER ','";

fn events_config() -> LoadConfig {
    LoadConfig::basic("events", "postgres://warehouse.internal:5433/analytics", "/data/batch1", ",")
}

fn batch1() -> MemoryStore {
    MemoryStore::new().with_dir(
        "/data/batch1",
        &[("part-0.csv", "1,login\n2,logout\n"), ("part-1.csv", "3,login\n")],
    )
}

#[tokio::test]
async fn loads_two_files_and_sums_rejects() {
    // first file: three rows rejected, second file: none
    let driver = SpyDriver::new(Script {
        rejects: vec![vec![2, 5, 7], vec![]],
        finish_rows: 42,
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let result = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap();

    assert_eq!(result.rows_rejected, 3);
    assert_eq!(result.rows_inserted, 42);
    assert_eq!(result.files_loaded, 2);
    assert!(!result.run_id.is_nil());

    assert_eq!(
        driver.channel_calls(),
        vec![
            Call::Start(STATEMENT.to_string()),
            Call::AddStream("1,login\n2,logout\n".to_string()),
            Call::Execute,
            Call::AddStream("3,login\n".to_string()),
            Call::Execute,
            Call::Finish,
        ]
    );
    assert_eq!(metrics.get("num.of.rows.rejected"), Some(3));
    assert_eq!(metrics.get("num.of.rows.inserted"), Some(42));
}

#[tokio::test]
async fn reject_total_counts_rows_across_executions() {
    for auto_commit in [false, true] {
        let driver = SpyDriver::new(Script {
            rejects: vec![vec![3, 5, 8], vec![], vec![1]],
            ..Script::default()
        });
        let store = MemoryStore::new().with_dir(
            "/data/batch1",
            &[("a.csv", "a\n"), ("b.csv", "b\n"), ("c.csv", "c\n")],
        );
        let (ctx, metrics) = spy_context(driver.clone(), store);

        let result = BulkLoadAction::new(events_config().with_auto_commit(auto_commit))
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(result.rows_rejected, 4, "auto_commit = {}", auto_commit);
        assert_eq!(metrics.get("num.of.rows.rejected"), Some(4));
    }
}

#[tokio::test]
async fn commits_once_without_auto_commit() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1());

    BulkLoadAction::new(events_config()).run(&ctx).await.unwrap();

    assert_eq!(driver.count(&Call::Commit), 1);
    let calls = driver.calls();
    let finish = calls.iter().position(|c| *c == Call::Finish).unwrap();
    let commit = calls.iter().position(|c| *c == Call::Commit).unwrap();
    assert!(commit > finish);
}

#[tokio::test]
async fn commits_per_file_plus_final_with_auto_commit() {
    let driver = SpyDriver::new(Script::default());
    let store = MemoryStore::new().with_dir(
        "/data/batch1",
        &[("a.csv", "a\n"), ("b.csv", "b\n"), ("c.csv", "c\n")],
    );
    let (ctx, _) = spy_context(driver.clone(), store);

    BulkLoadAction::new(events_config().with_auto_commit(true))
        .run(&ctx)
        .await
        .unwrap();

    assert_eq!(driver.count(&Call::Commit), 4);
}

#[tokio::test]
async fn connection_runs_without_auto_commit() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1());

    BulkLoadAction::new(events_config().with_auto_commit(true))
        .run(&ctx)
        .await
        .unwrap();

    let calls = driver.calls();
    let disabled = calls
        .iter()
        .position(|c| *c == Call::SetAutoCommit(false))
        .unwrap();
    let started = calls
        .iter()
        .position(|c| matches!(c, Call::Start(_)))
        .unwrap();
    assert!(disabled < started);
    assert_eq!(driver.count(&Call::SetAutoCommit(true)), 0);
}

#[tokio::test]
async fn missing_table_never_starts_channel() {
    let driver = SpyDriver::new(Script {
        table_present: false,
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match err {
        LoadError::TableNotFound { table, target } => {
            assert_eq!(table, "events");
            assert_eq!(target, "postgres://warehouse.internal:5433/analytics");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(driver.channel_calls().is_empty());
    assert_eq!(driver.count(&Call::TableExists("events".to_string())), 1);
    assert_eq!(driver.count(&Call::Connect), 1);
    assert_eq!(driver.count(&Call::Close), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
    assert_eq!(metrics.report_count(), 0);
}

#[tokio::test]
async fn empty_directory_finishes_with_zero_totals() {
    let driver = SpyDriver::new(Script::default());
    let store = MemoryStore::new().with_dir("/data/batch1", &[]);
    let (ctx, metrics) = spy_context(driver.clone(), store);

    let result = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap();

    assert_eq!(result.rows_inserted, 0);
    assert_eq!(result.rows_rejected, 0);
    assert_eq!(result.files_loaded, 0);
    assert_eq!(
        driver.channel_calls(),
        vec![Call::Start(STATEMENT.to_string()), Call::Finish]
    );
    assert_eq!(metrics.get("num.of.rows.inserted"), Some(0));
    assert_eq!(metrics.get("num.of.rows.rejected"), Some(0));
}

#[tokio::test]
async fn streaming_failure_cleans_up_and_names_statement() {
    let driver = SpyDriver::new(Script {
        fail_execute_at: Some(1),
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    assert!(matches!(err, LoadError::LoadExecution { .. }));
    assert!(err.to_string().contains(STATEMENT));
    assert!(err.to_string().contains("stream reset by peer"));

    assert_eq!(driver.count(&Call::Register), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
    assert_eq!(driver.count(&Call::Close), driver.count(&Call::Connect));
    assert_eq!(driver.count(&Call::Abort), 1);
    assert_eq!(driver.count(&Call::Finish), 0);
    assert_eq!(driver.count(&Call::Commit), 0);
    assert_eq!(metrics.report_count(), 0);

    let calls = driver.calls();
    let abort = calls.iter().position(|c| *c == Call::Abort).unwrap();
    let last_close = calls.iter().rposition(|c| *c == Call::Close).unwrap();
    assert!(abort < last_close);
}

#[tokio::test]
async fn unreadable_file_is_a_load_failure() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1().with_unreadable("part-1.csv"));

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match err {
        LoadError::LoadExecution {
            statement,
            source: LoadFailure::Storage(StorageError::Io { .. }),
        } => assert_eq!(statement, STATEMENT),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.count(&Call::Execute), 1);
    assert_eq!(driver.count(&Call::Abort), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
}

#[tokio::test]
async fn missing_path_is_reported_as_such() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), MemoryStore::new());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match err {
        LoadError::PathNotFound { path } => assert_eq!(path, "/data/batch1"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.count(&Call::Abort), 1);
    assert_eq!(driver.count(&Call::Close), 2);
    assert_eq!(driver.count(&Call::Deregister), 1);
}

#[tokio::test]
async fn invalid_config_touches_nothing() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1());
    let config = LoadConfig::basic("events; DROP TABLE users", "postgres://db/w", "", "''");

    let err = BulkLoadAction::new(config).run(&ctx).await.unwrap_err();

    match err {
        LoadError::ConfigValidation(failures) => {
            let properties: Vec<_> = failures.iter().map(|f| f.property.as_str()).collect();
            assert_eq!(properties, vec!["tableName", "path", "delimiter"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn connect_failure_is_connectivity_error() {
    let driver = SpyDriver::new(Script {
        connect_fails: true,
        ..Script::default()
    });
    let (ctx, _) = spy_context(driver.clone(), batch1());
    let config = LoadConfig::basic("events", "postgres://loader:hunter2@db:5433/w", "/data/batch1", ",")
        .with_credentials("loader", Some("hunter2".to_string()));

    let err = BulkLoadAction::new(config).run(&ctx).await.unwrap_err();

    assert!(matches!(err, LoadError::Connectivity { .. }));
    assert!(!err.to_string().contains("hunter2"));
    assert_eq!(driver.count(&Call::Register), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
}

#[tokio::test]
async fn close_failure_after_success_fails_the_run() {
    let driver = SpyDriver::new(Script {
        fail_close: true,
        ..Script::default()
    });
    let (ctx, _) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    assert!(matches!(err, LoadError::LoadExecution { .. }));
    assert!(err.to_string().contains("socket already closed"));
    assert_eq!(driver.count(&Call::Commit), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
}

#[tokio::test]
async fn close_failure_after_failed_load_keeps_original_error() {
    let driver = SpyDriver::new(Script {
        fail_execute_at: Some(0),
        fail_close: true,
        ..Script::default()
    });
    let (ctx, _) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    assert!(err.to_string().contains("stream reset by peer"));
    assert!(!err.to_string().contains("socket already closed"));
}

#[tokio::test]
async fn catalog_lookup_failure_is_connectivity_error() {
    let driver = SpyDriver::new(Script {
        fail_table_lookup: true,
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match &err {
        LoadError::Connectivity { target, .. } => {
            assert_eq!(target, "postgres://warehouse.internal:5433/analytics")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("permission denied for schema information_schema"));
    assert!(!err.to_string().contains(STATEMENT));

    assert_eq!(driver.count(&Call::TableExists("events".to_string())), 1);
    assert_eq!(driver.count(&Call::Connect), 1);
    assert_eq!(driver.count(&Call::Close), 1);
    assert_eq!(driver.count(&Call::Deregister), 1);
    assert_eq!(driver.count(&Call::Abort), 0);
    assert!(driver.channel_calls().is_empty());
    assert_eq!(metrics.report_count(), 0);
}

#[tokio::test]
async fn finish_failure_aborts_and_names_statement() {
    let driver = SpyDriver::new(Script {
        fail_finish: true,
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match &err {
        LoadError::LoadExecution { statement, source } => {
            assert_eq!(statement, STATEMENT);
            assert!(matches!(source, LoadFailure::Driver(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains(STATEMENT));
    assert!(err.to_string().contains("copy terminated by server"));

    assert_eq!(driver.count(&Call::Finish), 1);
    assert_eq!(driver.count(&Call::Abort), 1);
    assert_eq!(driver.count(&Call::Commit), 0);
    assert_eq!(driver.count(&Call::Connect), 2);
    assert_eq!(driver.count(&Call::Close), 2);
    assert_eq!(driver.count(&Call::Deregister), 1);
    assert_eq!(metrics.report_count(), 0);

    let channel = driver.channel_calls();
    assert_eq!(&channel[channel.len() - 2..], &[Call::Finish, Call::Abort]);
}

#[tokio::test]
async fn final_commit_failure_names_statement_and_releases() {
    let driver = SpyDriver::new(Script {
        fail_commit: true,
        finish_rows: 3,
        ..Script::default()
    });
    let (ctx, metrics) = spy_context(driver.clone(), batch1());

    let err = BulkLoadAction::new(events_config()).run(&ctx).await.unwrap_err();

    match &err {
        LoadError::LoadExecution { statement, source } => {
            assert_eq!(statement, STATEMENT);
            assert!(matches!(source, LoadFailure::Driver(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("could not serialize access"));

    // the channel had already finished, so there is nothing to abort
    assert_eq!(driver.count(&Call::Finish), 1);
    assert_eq!(driver.count(&Call::Abort), 0);
    assert_eq!(driver.count(&Call::Commit), 1);
    assert_eq!(driver.count(&Call::Close), 2);
    assert_eq!(driver.count(&Call::Deregister), 1);
    assert_eq!(ctx.registry.active_sessions("spy"), 0);

    let calls = driver.calls();
    let commit = calls.iter().position(|c| *c == Call::Commit).unwrap();
    let last_close = calls.iter().rposition(|c| *c == Call::Close).unwrap();
    assert!(commit < last_close);

    // totals are reported before the commit is attempted
    assert_eq!(metrics.get("num.of.rows.inserted"), Some(3));
    assert_eq!(metrics.get("num.of.rows.rejected"), Some(0));
}

#[tokio::test]
async fn advanced_statement_is_passed_verbatim() {
    let statement = "COPY events (id, kind) FROM STDIN WITH (FORMAT csv, HEADER true)";
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1());
    let config = LoadConfig::advanced(
        "events",
        "postgres://warehouse.internal:5433/analytics",
        "/data/batch1",
        statement,
    );

    BulkLoadAction::new(config).run(&ctx).await.unwrap();

    assert_eq!(driver.channel_calls()[0], Call::Start(statement.to_string()));
}

#[tokio::test]
async fn successive_runs_register_and_deregister_each_time() {
    let driver = SpyDriver::new(Script::default());
    let (ctx, _) = spy_context(driver.clone(), batch1());
    let action = BulkLoadAction::new(events_config());

    let first = action.run(&ctx).await.unwrap();
    let second = action.run(&ctx).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(driver.count(&Call::Register), 2);
    assert_eq!(driver.count(&Call::Deregister), 2);
    assert_eq!(ctx.registry.active_sessions("spy"), 0);
}
