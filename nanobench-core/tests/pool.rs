mod common;

use std::sync::Arc;
use std::time::Duration;

use mqtt_transport::{Message, QoS, TransportError};
use nanobench_core::config::{PublishOptions, SubscribeOptions, Workload};
use nanobench_core::{Counters, SessionError, SessionPool, Shared};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{MockSession, incoming, wait_until};

fn publish(limit: Option<u64>, interval_ms: u64) -> Shared {
    let workload = Workload::Publish(PublishOptions {
        topic: "bench/%i".into(),
        qos: QoS::AtMostOnce,
        retain: false,
        size: 8,
        limit,
        interval_of_msg: Duration::from_millis(interval_ms),
    });
    Shared::new(workload, Arc::new(Counters::new(limit)))
}

fn subscribe() -> Shared {
    let workload = Workload::Subscribe(SubscribeOptions {
        topic: "sensors/%i".into(),
        qos: QoS::AtMostOnce,
    });
    Shared::new(workload, Arc::new(Counters::default()))
}

#[tokio::test]
async fn subscribe_pool_sends_one_subscribe() {
    let (session, state) = MockSession::new("nanobench-0", true, false);
    let shared = subscribe();
    let pool = SessionPool::new(Arc::new(session), shared.clone(), 8, None);
    assert_eq!(pool.len(), 8);

    let token = CancellationToken::new();
    let task = tokio::spawn(pool.run(token.clone()));

    // the subscribe is held, so only the other seven are receiving
    wait_until(|| state.recv_calls() == 7 && state.sent().len() == 1).await;
    assert_eq!(
        state.sent(),
        vec![Message::Subscribe {
            topic: "sensors/0".into(),
            qos: QoS::AtMostOnce,
        }]
    );

    state.release_sends();
    wait_until(|| state.recv_calls() == 8).await;
    assert_eq!(state.sent().len(), 1);

    state.deliver(Ok(incoming()));
    state.deliver(Ok(incoming()));
    wait_until(|| shared.counters.received() == 2).await;

    token.cancel();
    task.await.unwrap().expect("pool stops cleanly");
}

#[tokio::test]
async fn publish_budget_is_exact() {
    let (session, state) = MockSession::new("nanobench-0", false, false);
    let shared = publish(Some(5), 0);
    let pool = SessionPool::new(Arc::new(session), shared.clone(), 1, None);

    pool.run(CancellationToken::new())
        .await
        .expect("pool halts once the budget is spent");

    let sent = state.sent();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|m| matches!(
        m,
        Message::Publish(p) if p.topic == "bench/0" && p.payload.len() == 8
    )));
    assert_eq!(shared.counters.sent(), 5);
    assert_eq!(shared.counters.send_budget(), 0);
}

#[tokio::test]
async fn publish_budget_is_shared_by_contexts() {
    let (session, state) = MockSession::new("nanobench-0", false, false);
    let shared = publish(Some(21), 0);
    let pool = SessionPool::new(Arc::new(session), shared.clone(), 8, None);

    pool.run(CancellationToken::new()).await.unwrap();

    assert_eq!(state.sent().len(), 21);
    assert_eq!(shared.counters.sent(), 21);
}

#[tokio::test(start_paused = true)]
async fn publish_interval_paces_sends() {
    let (session, state) = MockSession::new("nanobench-0", false, false);
    let shared = publish(Some(4), 100);
    let pool = SessionPool::new(Arc::new(session), shared, 1, None);

    let start = Instant::now();
    pool.run(CancellationToken::new()).await.unwrap();

    assert_eq!(state.sent().len(), 4);
    // four sends, three sleeps in between and one more before the budget check
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn failed_receive_ends_the_pool() {
    let (session, state) = MockSession::new("nanobench-0", false, false);
    let pool = SessionPool::new(Arc::new(session), subscribe(), 2, None);

    state.deliver(Err(TransportError::Closed));
    let err = pool.run(CancellationToken::new()).await.unwrap_err();
    assert!(
        matches!(err, SessionError::Fatal { operation: "receive", .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn failed_publish_ends_the_pool() {
    let (session, _state) = MockSession::new("nanobench-0", false, true);
    let pool = SessionPool::new(Arc::new(session), publish(None, 0), 4, None);

    let err = pool.run(CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("publish failed"), "{err}");
}

#[tokio::test]
async fn connect_pool_runs_until_cancelled() {
    let (session, state) = MockSession::new("nanobench-0", false, false);
    let shared = Shared::new(Workload::Connect, Arc::new(Counters::default()));
    let pool = SessionPool::new(Arc::new(session), shared.clone(), 3, None);

    let token = CancellationToken::new();
    let task = tokio::spawn(pool.run(token.clone()));
    wait_until(|| state.recv_calls() == 3).await;

    state.deliver(Ok(incoming()));
    wait_until(|| state.recv_calls() == 4).await;
    assert!(state.sent().is_empty());
    assert_eq!(shared.counters.received(), 0);

    token.cancel();
    task.await.unwrap().unwrap();
}
