/// Transaction monitor tests
///
/// Nested transaction roll-up, threshold gating and the summary/detail rows
/// written when a root transaction closes.
/// Run with: cargo test --test transaction_monitor_tests


use doubles::{CapturedLogs, RecordingDriver, RecordingSleeper, Script, deadlock};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use txsentry::{
    BackoffPolicy, CallerContext, ContextSlot, EventLevel, MemorySink, MonitorPolicy,
    MonitoredRunner, Record, RetryOptions, RetryRunner, SentryConfig, SlowTransactionRecorder,
    TableNames, TransactionRunner, TransactionTracker, Value,
};

struct Monitor {
    sink: Arc<MemorySink>,
    logs: Arc<CapturedLogs>,
    slot: ContextSlot,
    tables: TableNames,
    runner: Arc<MonitoredRunner<RecordingDriver>>,
}

impl Monitor {
    fn new(policy: MonitorPolicy) -> Self {
        let tables = TableNames::default();
        let sink = Arc::new(MemorySink::for_tables(&tables, true));
        let logs = Arc::new(CapturedLogs::default());
        let slot = ContextSlot::new();

        let recorder = SlowTransactionRecorder::new(sink.clone(), tables.clone(), policy)
            .with_logger(logs.clone());
        let tracker =
            Arc::new(TransactionTracker::new(slot.clone()).with_recorder(Arc::new(recorder)));
        let runner = Arc::new(MonitoredRunner::new(RecordingDriver::default(), tracker));

        Self {
            sink,
            logs,
            slot,
            tables,
            runner,
        }
    }

    fn summaries(&self) -> Vec<Record> {
        self.sink.rows(&self.tables.transactions)
    }

    fn details(&self) -> Vec<Record> {
        self.sink.rows(&self.tables.transaction_queries)
    }
}

#[tokio::test]
async fn test_nested_queries_roll_up_to_one_summary() {
    let monitor = Monitor::new(MonitorPolicy::default());
    let runner = &monitor.runner;

    runner.begin("default").await.unwrap();
    runner.begin("default").await.unwrap();
    runner
        .record_query("default", "INSERT INTO audit (event) VALUES (?)", &[Value::from("open")], 2)
        .await;
    runner.commit("default").await.unwrap();

    assert!(monitor.summaries().is_empty());
    assert!(monitor.details().is_empty());

    runner
        .record_query("default", "UPDATE ledger SET closed = ?", &[Value::Boolean(true)], 5)
        .await;
    runner.commit("default").await.unwrap();

    let summaries = monitor.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].get("status"), Some(&Value::from("committed")));
    assert_eq!(summaries[0].get("query_count"), Some(&Value::Integer(2)));

    let details = monitor.details();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].get("query_order"), Some(&Value::Integer(1)));
    assert_eq!(
        details[0].get("sql"),
        Some(&Value::from("INSERT INTO audit (event) VALUES ('open')"))
    );
    assert_eq!(details[1].get("query_order"), Some(&Value::Integer(2)));
    assert_eq!(
        details[1].get("sql"),
        Some(&Value::from("UPDATE ledger SET closed = 1"))
    );
    for detail in &details {
        assert_eq!(detail.get("transaction_id"), summaries[0].get("id"));
        assert_eq!(detail.get("completed_at"), summaries[0].get("completed_at"));
    }
}

#[tokio::test]
async fn test_fast_transaction_below_threshold_writes_nothing() {
    let monitor = Monitor::new(MonitorPolicy {
        transaction_threshold_ms: 60_000,
        ..MonitorPolicy::default()
    });

    monitor.runner.begin("default").await.unwrap();
    monitor.runner.record_query("default", "SELECT 1", &[], 1).await;
    monitor.runner.commit("default").await.unwrap();

    assert!(monitor.summaries().is_empty());
    assert!(monitor.details().is_empty());
    // the log line is not threshold gated
    assert_eq!(monitor.logs.lines().len(), 1);
}

#[tokio::test]
async fn test_transaction_at_threshold_writes_one_summary() {
    let monitor = Monitor::new(MonitorPolicy {
        transaction_threshold_ms: 20,
        slow_query_threshold_ms: 100,
        ..MonitorPolicy::default()
    });

    monitor.runner.begin("default").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    monitor.runner.record_query("default", "SELECT 1", &[], 30).await;
    monitor.runner.commit("default").await.unwrap();

    let summaries = monitor.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].get("slow_query_count"), Some(&Value::Integer(0)));
    assert!(monitor.details().is_empty());
}

#[tokio::test]
async fn test_rollback_is_logged_with_last_query() {
    let monitor = Monitor::new(MonitorPolicy::default());
    monitor.slot.set_label("refund");
    monitor
        .slot
        .set_caller(CallerContext::request("POST", "/refunds").route("refunds.store").user(11));

    monitor.runner.begin("default").await.unwrap();
    monitor.runner.record_query("default", "SELECT * FROM orders", &[], 3).await;
    monitor
        .runner
        .record_query("default", "DELETE FROM payments WHERE id = ?", &[Value::Integer(4)], 9)
        .await;
    monitor.runner.rollback("default").await.unwrap();

    let lines = monitor.logs.lines();
    assert_eq!(lines.len(), 1);
    let (level, _, payload) = &lines[0];
    assert_eq!(*level, EventLevel::Error);
    assert_eq!(payload["status"], json!("rolled_back"));
    assert_eq!(payload["label"], json!("refund"));
    assert_eq!(payload["route_name"], json!("refunds.store"));
    assert_eq!(payload["user_id"], json!("11"));
    assert_eq!(payload["last_query"], json!("DELETE FROM payments WHERE id = 4"));

    let summaries = monitor.summaries();
    assert_eq!(summaries[0].get("status"), Some(&Value::from("rolled_back")));
    assert_eq!(summaries[0].get("label"), Some(&Value::from("refund")));
    assert_eq!(summaries[0].get("method"), Some(&Value::from("POST")));
}

#[tokio::test]
async fn test_logging_can_be_disabled() {
    let monitor = Monitor::new(MonitorPolicy {
        logging_enabled: false,
        ..MonitorPolicy::default()
    });

    monitor.runner.begin("default").await.unwrap();
    monitor.runner.commit("default").await.unwrap();

    assert!(monitor.logs.lines().is_empty());
    assert_eq!(monitor.summaries().len(), 1);
}

#[tokio::test]
async fn test_connections_close_independently() {
    let monitor = Monitor::new(MonitorPolicy::default());
    let runner = &monitor.runner;

    runner.begin("primary").await.unwrap();
    runner.begin("reporting").await.unwrap();

    join_all([
        runner.record_query("primary", "UPDATE a SET x = 1", &[], 2),
        runner.record_query("reporting", "SELECT count(*) FROM a", &[], 4),
        runner.record_query("primary", "UPDATE b SET y = 2", &[], 3),
    ])
    .await;

    runner.commit("reporting").await.unwrap();
    assert_eq!(runner.tracker().depth("primary").await, 1);
    assert_eq!(monitor.summaries().len(), 1);
    assert_eq!(monitor.summaries()[0].get("connection"), Some(&Value::from("reporting")));

    runner.commit("primary").await.unwrap();
    let summaries = monitor.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[1].get("query_count"), Some(&Value::Integer(2)));
}

#[tokio::test]
async fn test_retried_work_is_monitored_per_attempt() {
    let config = SentryConfig::default();
    let monitor = Monitor::new(config.monitor.clone());
    let sleeper = Arc::new(RecordingSleeper::default());
    let retry = RetryRunner::new(monitor.runner.clone(), &config)
        .with_sleeper(sleeper)
        .with_backoff(BackoffPolicy::seeded(3))
        .with_context_slot(monitor.slot.clone());

    let script = Script::new(vec![Err(deadlock()), Ok("booked")]);
    let runner = monitor.runner.clone();
    let result = retry
        .run(RetryOptions::new().label("booking"), || {
            let runner = runner.clone();
            let step = script.step();
            async move {
                runner.record_query("default", "UPDATE seats SET taken = 1", &[], 1).await;
                step.await
            }
        })
        .await;

    assert_eq!(result.unwrap(), "booked");

    let summaries = monitor.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].get("status"), Some(&Value::from("rolled_back")));
    assert_eq!(summaries[1].get("status"), Some(&Value::from("committed")));
    for summary in &summaries {
        assert_eq!(summary.get("label"), Some(&Value::from("booking")));
    }
    assert_eq!(monitor.details().len(), 2);
}
