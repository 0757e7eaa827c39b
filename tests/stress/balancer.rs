//! Balancer stress tests

use futures::future::{Ready, ready};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tower::Service;
use tower_balancer::{Balancer, BalancerLayer, EndpointPool, SelectionStrategy};

use super::ConcurrencyTracker;

/// Mock backends whose availability can be flipped at runtime.
#[derive(Clone)]
struct Backends {
    down: Arc<HashMap<String, AtomicBool>>,
    calls: Arc<AtomicUsize>,
}

impl Backends {
    fn new(hosts: &[String]) -> Self {
        Self {
            down: Arc::new(
                hosts
                    .iter()
                    .map(|h| (h.clone(), AtomicBool::new(false)))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn set_down(&self, host: &str, down: bool) {
        if let Some(flag) = self.down.get(host) {
            flag.store(down, Ordering::SeqCst);
        }
    }
}

impl Service<http::Request<String>> for Backends {
    type Response = http::Response<String>;
    type Error = std::io::Error;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<String>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let host = req.uri().host().unwrap_or_default();
        let down = self
            .down
            .get(host)
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if down {
            ready(Err(std::io::Error::other("connection refused")))
        } else {
            ready(Ok(http::Response::new(String::from("ok"))))
        }
    }
}

fn hosts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("backend-{i}")).collect()
}

fn balancer(hosts: &[String], backends: Backends, interval: Duration) -> Balancer<Backends> {
    BalancerLayer::builder()
        .endpoints(hosts.iter().map(|h| format!("http://{h}:8080")))
        .selection_strategy(SelectionStrategy::Random)
        .probe_interval(interval)
        .name("stress")
        .build()
        .unwrap()
        .build_service(backends)
}

fn get() -> http::Request<String> {
    http::Request::get("/").body(String::new()).unwrap()
}

fn assert_partition(pool: &EndpointPool) {
    let snapshot = pool.snapshot();
    let healthy: HashSet<_> = snapshot.healthy.iter().map(|e| e.id()).collect();
    let unhealthy: HashSet<_> = snapshot.unhealthy.iter().map(|e| e.id()).collect();
    assert!(healthy.is_disjoint(&unhealthy));
    assert_eq!(healthy.len() + unhealthy.len(), pool.len());
}

/// Test: Many sequential dispatches over a healthy pool
#[tokio::test]
#[ignore]
async fn stress_high_volume_dispatch() {
    println!("\n=== Balancer: High volume dispatch ===");

    let hosts = hosts(10);
    let backends = Backends::new(&hosts);
    let balancer = balancer(&hosts, backends.clone(), Duration::from_secs(5));

    let requests = 200_000;
    let start = Instant::now();
    for _ in 0..requests {
        balancer.execute(get()).await.unwrap();
    }
    let elapsed = start.elapsed();

    println!("  Requests: {}", requests);
    println!("  Time: {:?}", elapsed);
    println!(
        "  Throughput: {:.0} req/sec",
        requests as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(backends.calls.load(Ordering::SeqCst), requests);
    assert_eq!(balancer.pool().healthy_count(), 10);
}

/// Test: Thousands of concurrent callers sharing one balancer
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_high_concurrency() {
    println!("\n=== Balancer: High concurrency ===");

    let hosts = hosts(10);
    let balancer = balancer(&hosts, Backends::new(&hosts), Duration::from_secs(5));

    let tracker = ConcurrencyTracker::new();
    let success_count = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let concurrency = 1000;
    let mut handles = Vec::new();

    for _ in 0..concurrency {
        let balancer = balancer.clone();
        let tracker = Arc::clone(&tracker);
        let success_count = Arc::clone(&success_count);

        handles.push(tokio::spawn(async move {
            tracker.enter();
            for _ in 0..100 {
                if balancer.execute(get()).await.is_ok() {
                    success_count.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
            }
            tracker.exit();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total_requests = concurrency * 100;
    let successes = success_count.load(Ordering::SeqCst);

    println!("  Concurrent tasks: {}", concurrency);
    println!("  Total requests: {}", total_requests);
    println!("  Successes: {}", successes);
    println!("  Peak concurrency: {}", tracker.peak());
    println!("  Time: {:?}", elapsed);

    assert_eq!(successes, total_requests);
    assert!(tracker.peak() > 1);
}

/// Test: Endpoints flapping under load while the recovery loop runs
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn stress_churn_with_recovery() {
    println!("\n=== Balancer: Churn with recovery ===");

    let hosts = hosts(8);
    let backends = Backends::new(&hosts);
    let balancer = balancer(&hosts, backends.clone(), Duration::from_millis(10));
    balancer.start().await;

    let stop = Arc::new(AtomicBool::new(false));

    let chaos = {
        let backends = backends.clone();
        let hosts = hosts.clone();
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let (idx, down) = {
                    let mut rng = rand::rng();
                    (rng.random_range(0..hosts.len()), rng.random_bool(0.5))
                };
                backends.set_down(&hosts[idx], down);
                sleep(Duration::from_millis(2)).await;
            }
        })
    };

    let outcomes = Arc::new([
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
    ]);
    let mut callers = Vec::new();
    for _ in 0..50 {
        let balancer = balancer.clone();
        let stop = Arc::clone(&stop);
        let outcomes = Arc::clone(&outcomes);
        callers.push(tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let slot = match balancer.execute(get()).await {
                    Ok(_) => 0,
                    Err(e) if e.is_executor() => 1,
                    Err(_) => 2,
                };
                outcomes[slot].fetch_add(1, Ordering::Relaxed);
                assert_partition(balancer.pool());
                tokio::task::yield_now().await;
            }
        }));
    }

    sleep(Duration::from_secs(2)).await;
    stop.store(true, Ordering::SeqCst);
    chaos.await.unwrap();
    for caller in callers {
        caller.await.unwrap();
    }

    println!("  Succeeded: {}", outcomes[0].load(Ordering::SeqCst));
    println!("  Executor errors: {}", outcomes[1].load(Ordering::SeqCst));
    println!("  Rejected: {}", outcomes[2].load(Ordering::SeqCst));

    // Everything back up: the loop must restore the full pool.
    for host in &hosts {
        backends.set_down(host, false);
    }
    sleep(Duration::from_millis(200)).await;

    assert_partition(balancer.pool());
    assert_eq!(balancer.pool().healthy_count(), hosts.len());

    balancer.stop().await;
}

/// Test: One recovery pass over a large unhealthy set
#[tokio::test]
#[ignore]
async fn stress_large_recovery_pass() {
    println!("\n=== Balancer: Large recovery pass ===");

    let hosts = hosts(2_000);
    let balancer = balancer(&hosts, Backends::new(&hosts), Duration::from_secs(5));
    for endpoint in balancer.endpoints() {
        balancer.pool().demote(endpoint);
    }

    let start = Instant::now();
    let report = balancer.recover_now().await;
    let elapsed = start.elapsed();

    println!("  Probed: {}", report.probed());
    println!("  Time: {:?}", elapsed);

    assert_eq!(report.promoted.len(), hosts.len());
    assert_eq!(balancer.pool().healthy_count(), hosts.len());
}
