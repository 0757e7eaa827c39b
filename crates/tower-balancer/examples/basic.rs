//! Basic example: spread requests over three backends, lose one, get it back.
//!
//! Run with: cargo run --example basic

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::service_fn;
use tower_balancer::{BalancerLayer, SelectionStrategy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Balancer Basic Example ===\n");

    // The "flaky" backend refuses connections until this flag is cleared.
    let flaky_down = Arc::new(AtomicBool::new(true));
    let down = Arc::clone(&flaky_down);

    // Stand-in for a real HTTP client.
    let executor = service_fn(move |req: Request<String>| {
        let down = down.load(Ordering::SeqCst);
        async move {
            let host = req.uri().host().unwrap_or_default().to_string();
            if host == "flaky" && down {
                return Err(std::io::Error::other("connection refused"));
            }
            let body = format!("{host} handled {}", req.uri().path());
            Ok(Response::new(Full::new(Bytes::from(body))))
        }
    });

    let balancer = BalancerLayer::builder()
        .endpoints(["http://primary", "http://secondary", "http://flaky"])
        .selection_strategy(SelectionStrategy::RoundRobin)
        .probe_interval(Duration::from_secs(1))
        .name("example")
        .on_demoted(|endpoint, remaining| {
            println!("  -> {endpoint} demoted, {remaining} healthy left");
        })
        .on_promoted(|endpoint, healthy| {
            println!("  -> {endpoint} recovered, {healthy} healthy");
        })
        .build()?
        .build_service(executor);

    balancer.start().await;

    println!("Sending requests while 'flaky' is down:");
    for i in 0..6 {
        let request = Request::get(format!("/orders/{i}")).body(String::new())?;
        match balancer.execute(request).await {
            Ok(response) => println!("  request {i}: {:?}", response.into_body()),
            Err(e) => println!("  request {i}: error: {e}"),
        }
    }

    let snapshot = balancer.snapshot();
    println!(
        "\nHealthy: {:?}\nUnhealthy: {:?}\n",
        snapshot.healthy, snapshot.unhealthy
    );

    println!("Bringing 'flaky' back and waiting for the recovery loop...");
    flaky_down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    println!("\nHealthy endpoints: {}", balancer.pool().healthy_count());

    balancer.stop().await;
    println!("\n=== Example Complete ===");

    Ok(())
}
