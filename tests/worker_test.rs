//! Consumer loop tests: queue draining, failure isolation, events

mod common;

use std::sync::Arc;
use std::time::Duration;

use qfarm::broker::{InMemoryBroker, JobQueue, SharedWorkList};
use qfarm::models::{Event, EventType};
use qfarm::notify::Notifier;
use qfarm::worker::{Worker, WorkerSettings};

use common::*;

fn settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(1),
    }
}

fn worker_with_failing_repo(
    broker: &Arc<InMemoryBroker>,
    checkout: &std::path::Path,
) -> (Arc<SharedWorkList>, Worker) {
    let queue = Arc::new(SharedWorkList::new(
        broker.clone(),
        broker.clone(),
        "test-q-list",
        "test-q-channel",
    ));
    let fetcher = SelectiveFetcher {
        failing: "host/user/broken",
        checkout: checkout.to_path_buf(),
    };
    let worker = Worker::new(
        queue.clone(),
        Box::new(broker.subscribe("test-q-channel")),
        pipeline(broker, Box::new(fetcher)),
        Notifier::new(broker.clone(), EVENTS),
        settings(),
    );
    (queue, worker)
}

fn received(rx: &crossbeam_channel::Receiver<String>) -> Vec<Event> {
    rx.try_iter()
        .map(|raw| serde_json::from_str(&raw).unwrap())
        .collect()
}

#[test]
fn test_fetch_failure_emits_one_error_and_worker_continues() {
    let (dir, _git) = go_project();
    let broker = Arc::new(InMemoryBroker::new());
    let rx = broker.subscribe_raw(EVENTS);
    let (queue, mut worker) = worker_with_failing_repo(&broker, dir.path());

    queue.enqueue("host/user/broken").unwrap();
    queue.enqueue("host/user/repo").unwrap();
    assert_eq!(worker.tick().unwrap(), 2);

    let events = received(&rx);
    let broken: Vec<&Event> = events
        .iter()
        .filter(|e| e.repo == "host/user/broken")
        .collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].kind, EventType::Error);
    assert!(broken[0].msg.starts_with("Error: "));
    assert!(broken[0].msg.contains("unrecognized import path"));

    // no report for the failed job, one for the good one
    assert!(broker.list("builds:host/user/broken").is_empty());
    assert_eq!(broker.list("builds:host/user/repo").len(), 1);
    assert!(events
        .iter()
        .any(|e| e.repo == "host/user/repo" && e.kind == EventType::AllDone));
}

#[test]
fn test_failed_job_is_not_redelivered() {
    let (dir, _git) = go_project();
    let broker = Arc::new(InMemoryBroker::new());
    let (queue, mut worker) = worker_with_failing_repo(&broker, dir.path());

    queue.enqueue("host/user/broken").unwrap();
    assert_eq!(worker.tick().unwrap(), 1);
    assert!(broker.list("test-q-list").is_empty());
    assert_eq!(worker.tick().unwrap(), 0);
}

#[test]
fn test_duplicate_submission_through_queue() {
    let (dir, _git) = go_project();
    let broker = Arc::new(InMemoryBroker::new());
    let rx = broker.subscribe_raw(EVENTS);
    let (queue, mut worker) = worker_with_failing_repo(&broker, dir.path());

    queue.enqueue("host/user/repo").unwrap();
    queue.enqueue("host/user/repo").unwrap();
    assert_eq!(worker.tick().unwrap(), 2);

    assert_eq!(broker.list("builds:host/user/repo").len(), 1);
    let events = received(&rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == EventType::AlreadyAnalyzed)
            .count(),
        1
    );
    assert!(!events.iter().any(|e| e.kind == EventType::Error));
}

#[test]
fn test_competing_workers_process_each_job_once() {
    let broker = Arc::new(InMemoryBroker::new());
    let (dir, _git) = go_project();
    let (queue, mut first) = worker_with_failing_repo(&broker, dir.path());
    let (_, mut second) = worker_with_failing_repo(&broker, dir.path());

    for i in 0..6 {
        queue.enqueue(&format!("host/user/repo{}", i)).unwrap();
    }

    let a = std::thread::spawn(move || first.tick().unwrap());
    let b = std::thread::spawn(move || second.tick().unwrap());
    let total = a.join().unwrap() + b.join().unwrap();

    assert_eq!(total, 6);
    assert_eq!(broker.list("all-builds").len(), 6);
    for i in 0..6 {
        assert_eq!(broker.list(&format!("builds:host/user/repo{}", i)).len(), 1);
    }
}
