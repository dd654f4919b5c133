use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task_core::{
    CircuitBreakerConfig, CircuitState, CoreConfig, Error, Job, Orchestrator, RateLimiterConfig,
};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

fn flaky_job(id: u64, healthy: Arc<AtomicBool>) -> Job<u64> {
    Job::from_fn(id, move || async move {
        if healthy.load(Ordering::SeqCst) {
            Ok(id)
        } else {
            Err(anyhow::anyhow!("upstream returned 503"))
        }
    })
}

#[tokio::test]
async fn test_breaker_trips_and_recovers() {
    let healthy = Arc::new(AtomicBool::new(false));
    let orch = Orchestrator::<u64>::builder()
        .workers(1)
        .circuit_breaker_config(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_open_timeout(Duration::from_millis(100)),
        )
        .build()
        .unwrap();
    let mut results = orch.results().unwrap();
    orch.start().unwrap();
    let breaker = Arc::clone(orch.breaker().unwrap());

    for id in 0..3 {
        assert_ok!(orch.submit(flaky_job(id, Arc::clone(&healthy))).await);
        assert!(results.recv().await.unwrap().error().is_some());
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    let opened_generation = breaker.generation();

    let err = orch.submit(flaky_job(3, Arc::clone(&healthy))).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The trial job moves the breaker through HalfOpen and closes it.
    assert_ok!(orch.submit(flaky_job(4, Arc::clone(&healthy))).await);
    let trial = results.recv().await.unwrap();
    assert_eq!(trial.output(), Some(&4));
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.generation(), opened_generation + 2);

    orch.shutdown().await;
    let signals = orch.signals();
    assert_eq!(signals.pool.rejected, 1);
    assert_eq!(signals.pool.failed, 3);
}

#[tokio::test]
async fn test_rate_limit_bounds_admissions_over_time() {
    let orch = Orchestrator::<()>::builder()
        .rate_limit(RateLimiterConfig::new().with_burst(5).with_refill_rate(10.0))
        .build()
        .unwrap();
    let mut results = orch.results().unwrap();
    orch.start().unwrap();
    let drain = tokio::spawn(async move {
        let mut n = 0usize;
        while results.recv().await.is_some() {
            n += 1;
        }
        n
    });

    let mut admitted = 0usize;
    let mut limited = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let mut id = 0u64;
    while tokio::time::Instant::now() < deadline {
        match orch.submit(Job::from_fn(id, || async { Ok(()) })).await {
            Ok(()) => admitted += 1,
            Err(Error::RateLimited) => limited += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
        id += 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    orch.shutdown().await;

    // Burst of 5 plus about 3 refilled tokens.
    assert!(admitted >= 5, "admitted {admitted}");
    assert!(admitted <= 10, "admitted {admitted}");
    assert!(limited > 0);
    assert_eq!(drain.await.unwrap(), admitted);
}

#[tokio::test]
async fn test_cancel_stops_waiting_submitters() {
    let orch = Orchestrator::<()>::builder()
        .rate_limit(RateLimiterConfig::new().with_burst(1).with_refill_rate(0.1))
        .build()
        .unwrap();
    let _results = orch.results().unwrap();
    orch.start().unwrap();
    let orch = Arc::new(orch);

    let cancel = CancellationToken::new();
    assert_ok!(orch.submit_wait(Job::from_fn(0, || async { Ok(()) }), &cancel).await);

    let waiter = {
        let orch = Arc::clone(&orch);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orch.submit_wait(Job::from_fn(1, || async { Ok(()) }), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let res = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter did not observe cancellation")
        .unwrap();
    assert!(matches!(res, Err(Error::Cancelled)));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_orchestrator_from_yaml() {
    let cfg = CoreConfig::from_yaml_str(
        r#"
pool:
  workers: 2
  queue_capacity: 4
rate_limit:
  rps: 100.0
  burst: 4
circuit_breaker:
  failure_threshold: 2
  open_timeout_ms: 1000
"#,
    )
    .unwrap();
    let orch = Orchestrator::<String>::from_config(&cfg).unwrap();
    let mut results = orch.results().unwrap();
    orch.start().unwrap();

    for id in 0..4u64 {
        orch.submit(Job::new(id, format!("item-{id}"), |s: String| async move {
            Ok(s.to_uppercase())
        }))
        .await
        .unwrap();
    }
    orch.shutdown().await;

    let mut outputs = Vec::new();
    while let Some(r) = results.recv().await {
        outputs.push(r.into_output().unwrap());
    }
    outputs.sort();
    assert_eq!(outputs, vec!["ITEM-0", "ITEM-1", "ITEM-2", "ITEM-3"]);

    let json = serde_json::to_value(orch.signals()).unwrap();
    assert_eq!(json["circuit_breaker"]["state"], "closed");
    assert_eq!(json["pool"]["completed"], 4);
}
