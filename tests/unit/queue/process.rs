//! Unit tests for the Process transition builder

use chrono::{Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use vaultq::models::{Params, PushOptions, Task, TaskStatus};
use vaultq::queue::Process;

fn claimed_task() -> Task {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let mut params = Params::new();
    params.insert("wallet".to_string(), json!("0xabc"));
    let mut task = Task::new("metrics.collect", params, PushOptions::default(), now);
    task.status = TaskStatus::Process;
    task.attempt = 2;
    task
}

#[test]
fn returned_without_transition_is_done() {
    let process = Process::new(claimed_task());
    assert!(process.is_done());

    let now = Utc::now();
    let task = process.into_task(now, Some(15));
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.updated_at, now);
    assert_eq!(task.execution_time_ms, Some(15));
}

#[test]
fn builder_calls_return_new_values() {
    let seed = Process::new(claimed_task());
    let failed = seed.error("nope");

    assert!(failed.is_error());
    assert!(!seed.is_error());
    assert!(seed.is_done());
}

#[test]
fn later_returns_task_to_pending_without_touching_attempt() {
    let at = Utc::now() + Duration::seconds(30);
    let task = Process::new(claimed_task()).later(at).into_task(Utc::now(), None);

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.start_at, at);
    assert_eq!(task.attempt, 2);
    assert_eq!(task.error, None);
}

#[test]
fn later_in_is_relative_to_now() {
    let before = Utc::now();
    let process = Process::new(claimed_task()).later_in(Duration::seconds(30));
    let at = process.later_at().expect("later transition");

    assert!(at >= before + Duration::seconds(30));
    assert!(at <= Utc::now() + Duration::seconds(30));
}

#[test]
fn error_records_message() {
    let task = Process::new(claimed_task())
        .error("wallet not found")
        .into_task(Utc::now(), None);

    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error.as_deref(), Some("wallet not found"));
}

#[test]
fn last_transition_wins() {
    let process = Process::new(claimed_task())
        .error("transient")
        .later_in(Duration::minutes(1))
        .done();
    assert!(process.is_done());
    assert_eq!(process.later_at(), None);
}

#[test]
fn params_and_info_are_merged_into_the_task() {
    let mut seed = claimed_task();
    seed.info = "first run".to_string();

    let task = Process::new(seed)
        .param("tx", "0xdead")
        .param("wallet", "0xdef")
        .info("submitted")
        .info("waiting for receipt")
        .done()
        .into_task(Utc::now(), None);

    assert_eq!(task.params["tx"], json!("0xdead"));
    assert_eq!(task.params["wallet"], json!("0xdef"));
    assert_eq!(task.info, "first run\nsubmitted\nwaiting for receipt");
}

#[test]
fn params_as_reads_typed_params() {
    #[derive(Deserialize)]
    struct WalletParams {
        wallet: String,
    }

    let process = Process::new(claimed_task());
    let params: WalletParams = process.params_as().expect("typed params");
    assert_eq!(params.wallet, "0xabc");
    assert!(process.params_as::<Vec<String>>().is_err());
}
