//! Integration tests for lock renewal, lock loss, GC and job queries.

use std::convert::Infallible;
use std::sync::Arc;

use capstan_core::Store;
use capstan_jobs::CompleteOptions;
use capstan_jobs::JobEngine;
use capstan_jobs::JobError;
use capstan_jobs::JobState;
use capstan_jobs::Jid;
use capstan_jobs::PutOptions;
use serde_json::json;

fn setup() -> (Arc<Store>, JobEngine) {
    let store = Arc::new(Store::new());
    let engine = JobEngine::new(store.clone());
    (store, engine)
}

async fn zscore(store: &Store, key: &str, member: &str) -> Option<i64> {
    store.transaction(|txn| Ok::<_, Infallible>(txn.zset_score(key, member))).await.unwrap()
}

async fn zlen(store: &Store, key: &str) -> usize {
    store.transaction(|txn| Ok::<_, Infallible>(txn.zset_len(key))).await.unwrap()
}

async fn complete_job(engine: &JobEngine, now: u64, queue: &str, jid: &str, tags: &[&str]) {
    let jid = Jid::from(jid);
    engine
        .put(now, queue, &jid, "Example", json!({}), PutOptions {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
        .await
        .unwrap();
    engine.pop(now, queue, "w1", 1).await.unwrap();
    engine.complete(now, &jid, "w1", queue, json!({}), CompleteOptions::default()).await.unwrap();
}

#[tokio::test]
async fn heartbeat_extends_the_lock_monotonically() {
    let (store, engine) = setup();
    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();
    engine.pop(100, "q1", "w1", 1).await.unwrap();

    let first = engine.heartbeat(150, &jid, "w1", None).await.unwrap();
    assert_eq!(first, 210);
    let second = engine.heartbeat(200, &jid, "w1", None).await.unwrap();
    assert_eq!(second, 260);
    assert!(second > first);

    // The job stays running and every expiry index agrees.
    let job = engine.data(&jid).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.expires, 260);
    assert_eq!(zscore(&store, "ql:q:q1-locks", "a").await, Some(260));
    assert_eq!(zscore(&store, "ql:w:w1:jobs", "a").await, Some(260));
}

#[tokio::test]
async fn heartbeat_honours_per_queue_config() {
    let (_store, engine) = setup();
    engine.set_config("heartbeat", "100").await.unwrap();
    engine.set_config("q1-heartbeat", "10").await.unwrap();

    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();
    engine.pop(100, "q1", "w1", 1).await.unwrap();

    assert_eq!(engine.heartbeat(150, &jid, "w1", None).await.unwrap(), 160);
}

#[tokio::test]
async fn heartbeat_after_reassignment_is_lock_lost() {
    let (store, engine) = setup();
    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();
    engine.pop(100, "q1", "w1", 1).await.unwrap();

    // Another process reassigned the job to w2.
    let changes = json!({ "worker": "w2" }).as_object().unwrap().clone();
    engine.update(&jid, changes).await.unwrap();

    let err = engine.heartbeat(600, &jid, "w1", None).await.unwrap_err();
    assert!(matches!(err, JobError::OwnershipLost { .. }));

    // No writes happened: the lock still carries the pop-time expiry.
    assert_eq!(zscore(&store, "ql:q:q1-locks", "a").await, Some(160));
    assert_eq!(engine.data(&jid).await.unwrap().unwrap().expires, 160);
}

#[tokio::test]
async fn expired_locks_are_seized_by_the_next_pop() {
    let (store, engine) = setup();
    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();
    engine.pop(100, "q1", "w1", 1).await.unwrap();
    let mut log = store.subscribe("log");

    // w1's lock expired at 160; w2 pops at 200 and takes the job over.
    let popped = engine.pop(200, "q1", "w2", 1).await.unwrap();
    assert_eq!(popped.len(), 1);
    assert_eq!(popped[0].jid, jid);
    assert_eq!(popped[0].worker, "w2");

    assert!(zscore(&store, "ql:w:w1:jobs", "a").await.is_none());
    assert_eq!(zscore(&store, "ql:w:w2:jobs", "a").await, Some(260));

    let event: serde_json::Value = serde_json::from_str(&log.try_recv().unwrap()).unwrap();
    assert_eq!(event["event"], "lock_lost");
    assert_eq!(event["jid"], "a");
    assert_eq!(event["worker"], "w1");

    // The old owner can no longer complete the job.
    let err = engine.complete(210, &jid, "w1", "q1", json!({}), CompleteOptions::default()).await.unwrap_err();
    assert!(matches!(err, JobError::OwnershipLost { .. }));
}

#[tokio::test]
async fn gc_bounds_completed_jobs_by_count() {
    let (store, engine) = setup();
    engine.set_config("jobs-history-count", "2").await.unwrap();

    complete_job(&engine, 100, "q1", "a", &[]).await;
    complete_job(&engine, 200, "q1", "b", &[]).await;
    complete_job(&engine, 300, "q1", "c", &[]).await;

    // The oldest completion was evicted, hash and all.
    assert_eq!(zlen(&store, "ql:completed").await, 2);
    assert!(engine.data(&Jid::from("a")).await.unwrap().is_none());
    assert!(engine.data(&Jid::from("b")).await.unwrap().is_some());
    assert!(engine.data(&Jid::from("c")).await.unwrap().is_some());
}

#[tokio::test]
async fn gc_bounds_completed_jobs_by_age() {
    let (store, engine) = setup();
    engine.set_config("jobs-history", "100").await.unwrap();

    complete_job(&engine, 100, "q1", "a", &[]).await;
    complete_job(&engine, 150, "q1", "b", &[]).await;

    // Completing at 300 expires everything older than 200.
    complete_job(&engine, 300, "q1", "c", &[]).await;

    assert!(engine.data(&Jid::from("a")).await.unwrap().is_none());
    assert!(engine.data(&Jid::from("b")).await.unwrap().is_none());
    assert!(engine.data(&Jid::from("c")).await.unwrap().is_some());
    assert_eq!(zlen(&store, "ql:completed").await, 1);
}

#[tokio::test]
async fn gc_eviction_cleans_tag_indices() {
    let (store, engine) = setup();
    engine.set_config("jobs-history-count", "1").await.unwrap();

    complete_job(&engine, 100, "q1", "a", &["nightly", "shared"]).await;
    complete_job(&engine, 200, "q1", "b", &["shared"]).await;

    // a was evicted: its tag entries are gone and cardinalities decremented.
    assert!(zscore(&store, "ql:t:nightly", "a").await.is_none());
    assert!(zscore(&store, "ql:tags", "nightly").await.is_none());
    assert!(zscore(&store, "ql:t:shared", "a").await.is_none());
    assert_eq!(zscore(&store, "ql:tags", "shared").await, Some(1));
    assert!(zscore(&store, "ql:t:shared", "b").await.is_some());
}

#[tokio::test]
async fn data_projects_requested_fields_in_order() {
    let (_store, engine) = setup();
    let jid = Jid::from("a");
    engine
        .put(100, "q1", &jid, "Example", json!({ "size": 3 }), PutOptions {
            priority: 7,
            ..Default::default()
        })
        .await
        .unwrap();

    let fields = engine.data_fields(&jid, &["queue", "priority", "data", "nope"]).await.unwrap().unwrap();
    assert_eq!(fields, vec![json!("q1"), json!(7), json!({ "size": 3 }), serde_json::Value::Null]);

    assert!(engine.data(&Jid::from("ghost")).await.unwrap().is_none());
    assert!(engine.data_fields(&Jid::from("ghost"), &["queue"]).await.unwrap().is_none());
}

#[tokio::test]
async fn priority_rescores_only_waiting_jobs() {
    let (store, engine) = setup();
    engine.put(100, "q1", &Jid::from("first"), "Example", json!({}), PutOptions::default()).await.unwrap();
    engine.put(200, "q1", &Jid::from("second"), "Example", json!({}), PutOptions::default()).await.unwrap();
    engine
        .put(100, "q1", &Jid::from("parked"), "Example", json!({}), PutOptions {
            delay: 1_000,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(engine.priority(&Jid::from("second"), 10).await.unwrap());
    assert!(engine.priority(&Jid::from("parked"), 10).await.unwrap());
    assert!(!engine.priority(&Jid::from("ghost"), 10).await.unwrap());

    // The waiting job moved ahead; the scheduled one kept its fire time.
    let popped = engine.pop(300, "q1", "w1", 2).await.unwrap();
    let order: Vec<&str> = popped.iter().map(|j| j.jid.as_str()).collect();
    assert_eq!(order, vec!["second", "first"]);
    assert_eq!(zscore(&store, "ql:q:q1-scheduled", "parked").await, Some(1_100));
    assert_eq!(engine.data(&Jid::from("parked")).await.unwrap().unwrap().priority, 10);
}

#[tokio::test]
async fn update_overwrites_recognised_fields_only() {
    let (_store, engine) = setup();
    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();

    let changes = json!({ "klass": "Renamed", "priority": 3, "data": { "v": 1 } }).as_object().unwrap().clone();
    engine.update(&jid, changes).await.unwrap();

    let job = engine.data(&jid).await.unwrap().unwrap();
    assert_eq!(job.klass, "Renamed");
    assert_eq!(job.priority, 3);
    assert_eq!(job.data, json!({ "v": 1 }));

    let bogus = json!({ "state": "complete" }).as_object().unwrap().clone();
    let err = engine.update(&jid, bogus).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidArgument { .. }));
    assert_eq!(engine.data(&jid).await.unwrap().unwrap().state, JobState::Waiting);
}

#[tokio::test]
async fn cancel_removes_every_membership() {
    let (store, engine) = setup();
    let jid = Jid::from("a");
    engine
        .put(100, "q1", &jid, "Example", json!({}), PutOptions {
            tags: vec!["nightly".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    engine.pop(100, "q1", "w1", 1).await.unwrap();
    engine.track(100, &jid).await.unwrap();
    let mut canceled = store.subscribe("canceled");

    assert!(engine.cancel(&jid).await.unwrap());
    assert_eq!(canceled.try_recv().unwrap(), "a");

    assert!(engine.data(&jid).await.unwrap().is_none());
    assert!(zscore(&store, "ql:q:q1-locks", "a").await.is_none());
    assert!(zscore(&store, "ql:w:w1:jobs", "a").await.is_none());
    assert!(zscore(&store, "ql:t:nightly", "a").await.is_none());
    assert!(zscore(&store, "ql:tracked", "a").await.is_none());

    // Cancelling a missing job reports false.
    assert!(!engine.cancel(&jid).await.unwrap());
}

#[tokio::test]
async fn tags_maintain_their_indices() {
    let (store, engine) = setup();
    let jid = Jid::from("a");
    engine.put(100, "q1", &jid, "Example", json!({}), PutOptions::default()).await.unwrap();

    let tags = engine.tag(110, &jid, &["red", "blue"]).await.unwrap();
    assert_eq!(tags, vec!["red", "blue"]);
    assert_eq!(zscore(&store, "ql:t:red", "a").await, Some(110));
    assert_eq!(zscore(&store, "ql:tags", "red").await, Some(1));

    // Tagging twice does not double-count.
    engine.tag(120, &jid, &["red"]).await.unwrap();
    assert_eq!(zscore(&store, "ql:tags", "red").await, Some(1));

    let tags = engine.untag(&jid, &["red"]).await.unwrap();
    assert_eq!(tags, vec!["blue"]);
    assert!(zscore(&store, "ql:t:red", "a").await.is_none());
    assert!(zscore(&store, "ql:tags", "red").await.is_none());
}

#[tokio::test]
async fn peek_reads_without_taking_ownership() {
    let (store, engine) = setup();
    engine.put(100, "q1", &Jid::from("a"), "Example", json!({}), PutOptions::default()).await.unwrap();

    let peeked = engine.peek(150, "q1", 5).await.unwrap();
    assert_eq!(peeked.len(), 1);
    assert_eq!(peeked[0].state, JobState::Waiting);
    assert_eq!(peeked[0].worker, "");
    assert!(zscore(&store, "ql:q:q1-work", "a").await.is_some());
    assert_eq!(zlen(&store, "ql:q:q1-locks").await, 0);
}
