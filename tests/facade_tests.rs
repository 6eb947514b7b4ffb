/// TxSentry facade tests
///
/// End-to-end wiring of retry engine, transaction monitor and exception
/// reporting against the shipped sinks.
/// Run with: cargo test --test facade_tests


use doubles::{CapturedLogs, RecordingDriver, RecordingSleeper, Script, deadlock, syntax_error};
use std::sync::Arc;
use tokio::sync::Notify;
use txsentry::events::summarize_by_hash;
use txsentry::{
    BackoffPolicy, CallerContext, DatabaseError, JsonlSink, MemorySink, RetryOptions, RetryToggle,
    SentryConfig, SentryError, TableNames, TransactionRunner, TxSentry, Value,
};

async fn sentry_with(
    config: SentryConfig,
    sink: Arc<dyn txsentry::EventSink>,
) -> (TxSentry, Arc<RecordingDriver>, Arc<RecordingSleeper>) {
    let driver = Arc::new(RecordingDriver::default());
    let sleeper = Arc::new(RecordingSleeper::default());
    let sentry = TxSentry::builder(driver.clone(), sink)
        .config(config)
        .sleeper(sleeper.clone())
        .backoff(BackoffPolicy::seeded(99))
        .logger(Arc::new(CapturedLogs::default()))
        .build()
        .await
        .unwrap();
    (sentry, driver, sleeper)
}

#[tokio::test]
async fn test_retry_and_monitor_rows_land_in_jsonl_files() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlSink::open(dir.path()).await.unwrap());
    let config = SentryConfig::default();
    let (sentry, driver, sleeper) = sentry_with(config.clone(), sink.clone()).await;

    let script = Script::new(vec![Err(deadlock()), Ok("settled")]);
    let sentry_ref = &sentry;
    let result = sentry
        .run(RetryOptions::new().label("settlement"), || {
            let step = script.step();
            async move {
                sentry_ref
                    .record_query("default", "UPDATE invoices SET paid = ? WHERE id = ?", &[
                        Value::Boolean(true),
                        Value::Integer(8),
                    ], 4)
                    .await;
                step.await
            }
        })
        .await;

    assert_eq!(result.unwrap(), "settled");
    assert_eq!(sleeper.slept().len(), 1);
    assert_eq!(driver.calls().len(), 4);

    let retry_rows = sink.read_rows(&config.tables.retry_events).await.unwrap();
    assert_eq!(retry_rows.len(), 1);
    assert_eq!(retry_rows[0].get("status"), Some(&Value::from("success")));
    assert_eq!(retry_rows[0].get("label"), Some(&Value::from("settlement")));
    assert!(matches!(retry_rows[0].get("id"), Some(Value::Text(_))));

    let summaries = sink.read_rows(&config.tables.transactions).await.unwrap();
    assert_eq!(summaries.len(), 2);

    let details = sink
        .read_rows(&config.tables.transaction_queries)
        .await
        .unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(
        details[1].get("sql"),
        Some(&Value::from("UPDATE invoices SET paid = 1 WHERE id = 8"))
    );
    assert_eq!(details[1].get("transaction_id"), summaries[1].get("id"));

    let groups = summarize_by_hash(&retry_rows);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count, 1);
    assert!(groups[0].last_seen.is_some());
}

#[tokio::test]
async fn test_reported_exception_uses_current_caller() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;

    sentry.set_caller(CallerContext::request("GET", "/reports/daily").user("ops"));
    let err = syntax_error().with_sql("SELECT * FORM reports WHERE day = ?", vec![Value::from(
        "2024-06-01",
    )]);
    assert!(sentry.report_exception(&err).await);

    let rows = sink.rows(&config.tables.query_exceptions);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("exception_class"), Some(&Value::from("QueryError")));
    assert_eq!(rows[0].get("url"), Some(&Value::from("/reports/daily")));
    assert_eq!(rows[0].get("user_id"), Some(&Value::from("ops")));
    assert_eq!(
        rows[0].get("raw_sql"),
        Some(&Value::from("SELECT * FORM reports WHERE day = '2024-06-01'"))
    );
    assert_eq!(rows[0].get("level"), Some(&Value::from("error")));
    assert!(sink.rows(&config.tables.retry_events).is_empty());
}

#[tokio::test]
async fn test_fatal_errors_only_reach_exception_table_when_reported() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;

    let script = Script::failing_forever(syntax_error());
    let err = sentry
        .run(RetryOptions::new(), || script.step())
        .await
        .unwrap_err();

    assert!(sink.rows(&config.tables.retry_events).is_empty());
    assert!(sink.rows(&config.tables.query_exceptions).is_empty());

    sentry.report_exception(&err).await;
    assert_eq!(sink.rows(&config.tables.query_exceptions).len(), 1);
}

#[tokio::test]
async fn test_reporting_skipped_after_unbind() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;

    sentry.reporter().unbind();
    assert!(!sentry.report_exception(&deadlock()).await);
    assert!(sink.rows(&config.tables.query_exceptions).is_empty());
}

#[tokio::test]
async fn test_monitored_runner_outside_retry_engine() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, driver, _) = sentry_with(config.clone(), sink.clone()).await;

    let runner = sentry.runner();
    runner.begin("analytics").await.unwrap();
    sentry.record_query("analytics", "SELECT 1", &[], 0).await;
    runner.commit("analytics").await.unwrap();

    assert_eq!(driver.calls(), vec!["begin:analytics", "commit:analytics"]);
    assert_eq!(sink.row_count(&config.tables.transactions), 1);
    assert_eq!(sink.row_count(&config.tables.transaction_queries), 1);
}

#[tokio::test]
async fn test_config_default_and_override_toggle() {
    let config = SentryConfig::default().retries_enabled(false);
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;
    assert!(!sentry.retry_toggle().is_enabled());

    let driver = Arc::new(RecordingDriver::default());
    let forced = TxSentry::builder(driver, sink)
        .config(config)
        .retry_toggle(RetryToggle::new(false).with_marker(Some(true)))
        .build()
        .await
        .unwrap();
    assert!(forced.retry_toggle().is_enabled());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let tables = TableNames {
        transactions: "db_retry_events".to_string(),
        ..TableNames::default()
    };
    let config = SentryConfig::default().tables(tables);
    let sink = Arc::new(MemorySink::new());

    let result = TxSentry::builder(Arc::new(RecordingDriver::default()), sink)
        .config(config)
        .build()
        .await;
    assert!(matches!(result, Err(SentryError::ConfigError(_))));
}

#[tokio::test]
async fn test_config_loaded_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txsentry.json");
    std::fs::write(
        &path,
        r#"{
            "retry": { "max_retries": 2, "base_delay_secs": 1, "retryable_driver_codes": [1213, 1205] },
            "monitor": { "slow_query_threshold_ms": 250 },
            "levels": { "success": "notice" }
        }"#,
    )
    .unwrap();

    let config = SentryConfig::from_path(&path).unwrap();
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.retry.retryable_driver_codes, vec![1213, 1205]);
    assert_eq!(config.retry.retryable_sql_states, vec!["40001".to_string()]);
    assert_eq!(config.monitor.slow_query_threshold_ms, 250);
    assert_eq!(config.levels.success, txsentry::EventLevel::Notice);
    assert_eq!(config.tables.retry_events, "db_retry_events");

    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, sleeper) = sentry_with(config.clone(), sink.clone()).await;
    let script = Script::new(vec![
        Err(DatabaseError::query("Lock wait timeout exceeded").with_driver_code(1205)),
        Ok("after-timeout"),
    ]);
    let result = sentry.run(RetryOptions::new(), || script.step()).await;

    assert_eq!(result.unwrap(), "after-timeout");
    assert_eq!(sleeper.slept().len(), 1);
    let rows = sink.rows(&config.tables.retry_events);
    assert_eq!(rows[0].get("level"), Some(&Value::from("notice")));
}

#[tokio::test]
async fn test_overlapping_runs_keep_their_own_labels() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;
    let b_started = Notify::new();
    let a_finished = Notify::new();
    let (sentry_ref, b_started, a_finished) = (&sentry, &b_started, &a_finished);

    let run_a = async {
        let result = sentry_ref
            .run(RetryOptions::new().label("a").connection("conn-a"), || async move {
                b_started.notified().await;
                Ok::<_, DatabaseError>(sentry_ref.context().label())
            })
            .await;
        a_finished.notify_one();
        result
    };
    let run_b = sentry_ref.run(RetryOptions::new().label("b").connection("conn-b"), || async move {
        b_started.notify_one();
        a_finished.notified().await;
        Ok::<_, DatabaseError>(sentry_ref.context().label())
    });

    let (seen_a, seen_b) = tokio::join!(run_a, run_b);
    assert_eq!(seen_a.unwrap().as_deref(), Some("a"));
    assert_eq!(seen_b.unwrap().as_deref(), Some("b"));
    assert_eq!(sentry.context().label(), None);

    sentry
        .run(RetryOptions::new(), || async { Ok::<_, DatabaseError>(()) })
        .await
        .unwrap();

    let summaries = sink.rows(&config.tables.transactions);
    assert_eq!(summaries.len(), 3);
    let label_on = |connection: &str| {
        summaries
            .iter()
            .find(|row| row.get("connection") == Some(&Value::from(connection)))
            .and_then(|row| row.get("label").cloned())
    };
    assert_eq!(label_on("conn-a"), Some(Value::from("a")));
    assert_eq!(label_on("conn-b"), Some(Value::from("b")));
    assert_eq!(label_on("default"), Some(Value::Null));
}

#[tokio::test]
async fn test_concurrent_requests_report_their_own_caller() {
    let config = SentryConfig::default();
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, _) = sentry_with(config.clone(), sink.clone()).await;
    let both_inside = Notify::new();

    let first = sentry.with_caller(CallerContext::request("GET", "/first"), async {
        both_inside.notified().await;
        sentry.report_exception(&syntax_error()).await
    });
    let second = sentry.with_caller(CallerContext::request("POST", "/second"), async {
        both_inside.notify_one();
        sentry.report_exception(&syntax_error()).await
    });
    let (first, second) = tokio::join!(first, second);
    assert!(first && second);

    let mut urls: Vec<_> = sink
        .rows(&config.tables.query_exceptions)
        .iter()
        .map(|row| row.get("url").cloned())
        .collect();
    urls.sort_by_key(|url| format!("{:?}", url));
    assert_eq!(urls, vec![Some(Value::from("/first")), Some(Value::from("/second"))]);
    assert_eq!(sentry.context().caller(), None);
}

#[tokio::test]
async fn test_configured_marker_disables_retries() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("retry-marker");
    RetryToggle::write_marker(&marker, false).await.unwrap();

    let config = SentryConfig::default().retry_marker(marker.clone());
    let sink = Arc::new(MemorySink::for_tables(&config.tables, false));
    let (sentry, _, sleeper) = sentry_with(config.clone(), sink.clone()).await;
    assert!(!sentry.retry_toggle().is_enabled());

    let script = Script::failing_forever(deadlock());
    let outcome = sentry
        .run_with_outcome(RetryOptions::new(), || script.step())
        .await;

    assert_eq!(outcome.attempts, 1);
    assert!(sleeper.slept().is_empty());
    assert!(sink.rows(&config.tables.retry_events).is_empty());

    RetryToggle::write_marker(&marker, true).await.unwrap();
    let config = config.retries_enabled(false);
    let (sentry, _, _) = sentry_with(config, sink).await;
    assert!(sentry.retry_toggle().is_enabled());
}
