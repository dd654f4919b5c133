use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use task_core::{Error, Job, WorkerPool, WorkerPoolConfig};
use tokio_test::{assert_err, assert_ok};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_accepted_job_yields_one_result() {
    const N: u64 = 500;
    let pool = WorkerPool::new(8, 16);
    let mut results = pool.results().unwrap();
    assert_ok!(pool.start());

    let collector = tokio::spawn(async move {
        let mut ids = Vec::new();
        while let Some(r) = results.recv().await {
            assert_eq!(r.output(), Some(&(r.job_id * 2)));
            ids.push(r.job_id);
        }
        ids
    });

    for id in 0..N {
        assert_ok!(pool.submit(Job::new(id, id, |n: u64| async move { Ok(n * 2) })).await);
    }
    pool.shutdown().await;

    let ids = collector.await.unwrap();
    assert_eq!(ids.len(), N as usize);
    let unique: HashSet<u64> = ids.into_iter().collect();
    assert_eq!(unique.len(), N as usize);

    let stats = pool.stats();
    assert_eq!(stats.submitted, N as usize);
    assert_eq!(stats.completed, N as usize);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_worker_count() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(3, 32);
    let mut results = pool.results().unwrap();
    pool.start().unwrap();

    let drain = tokio::spawn(async move { while results.recv().await.is_some() {} });

    for id in 0..30u64 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        pool.submit(Job::from_fn(id, move || async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }))
        .await
        .unwrap();
    }
    pool.shutdown().await;
    drain.await.unwrap();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded worker count");
    assert!(peak >= 2);
    assert!(pool.stats().peak_in_flight <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_workers_five_jobs() {
    let pool = WorkerPool::new(2, 10);
    let mut results = pool.results().unwrap();
    pool.start().unwrap();

    let started = Instant::now();
    for id in 1..=5u64 {
        pool.submit(Job::new(id, id, |n: u64| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(n * 10)
        }))
        .await
        .unwrap();
    }
    pool.shutdown().await;

    let mut seen = Vec::new();
    let mut workers = HashSet::new();
    while let Some(r) = results.recv().await {
        assert!(r.worker_id < 2);
        workers.insert(r.worker_id);
        seen.push((r.job_id, r.into_output().unwrap()));
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
    assert_eq!(workers.len(), 2);

    // Three rounds of 100ms on two workers.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_shutdown_twice_and_submit_after() {
    let pool: WorkerPool<u8> = WorkerPool::with_config(WorkerPoolConfig::new().with_workers(2));
    let mut results = pool.results().unwrap();
    pool.start().unwrap();
    pool.submit(Job::from_fn(1, || async { Ok(1u8) })).await.unwrap();

    pool.shutdown().await;
    pool.shutdown().await;
    assert!(pool.is_closed());

    let err = assert_err!(pool.submit(Job::from_fn(2, || async { Ok(2u8) })).await);
    assert!(matches!(err, Error::QueueClosed));
    let err = assert_err!(pool.try_submit(Job::from_fn(3, || async { Ok(3u8) })));
    assert!(matches!(err, Error::QueueClosed));

    assert_eq!(results.recv().await.map(|r| r.job_id), Some(1));
    assert!(results.recv().await.is_none());
    assert_eq!(pool.stats().rejected, 2);
}

#[tokio::test]
async fn test_failures_and_panics_do_not_stop_workers() {
    let pool = WorkerPool::new(1, 8);
    let mut results = pool.results().unwrap();
    pool.start().unwrap();

    pool.submit(Job::from_fn(1, || async { Err(anyhow::anyhow!("disk full")) }))
        .await
        .unwrap();
    pool.submit(Job::new(2, Vec::<u32>::new(), |v: Vec<u32>| async move { Ok(v[3]) }))
        .await
        .unwrap();
    pool.submit(Job::from_fn(3, || async { Ok(7u32) })).await.unwrap();
    pool.shutdown().await;

    let first = results.recv().await.unwrap();
    assert!(matches!(first.error(), Some(Error::Execution(_))));
    assert!(first.error().unwrap().to_string().contains("disk full"));

    let second = results.recv().await.unwrap();
    assert!(matches!(second.error(), Some(Error::JobPanicked { job_id: 2, .. })));

    let third = results.recv().await.unwrap();
    assert_eq!(third.output(), Some(&7));

    let stats = pool.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.panicked, 1);
    assert!((stats.success_rate() - 1.0 / 3.0).abs() < 1e-9);
}
