//! Resilience Pipeline Example
//!
//! Demonstrates stacking policies around a simulated remote service:
//! - Retry with exponential backoff and lifecycle events
//! - A circuit breaker that stops hammering a dead dependency
//! - Per-attempt timeouts
//! - A bulkhead bounding concurrency
//! - Hedged requests against a slow replica
//!
//! Run with: cargo run --example resilience_pipeline

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breakwater::prelude::*;
use breakwater::RetryEventKind;

/// Fails the first `failures` calls, then answers after `latency`.
struct FlakyService {
    calls: AtomicU32,
    failures: u32,
    latency: Duration,
}

impl FlakyService {
    fn new(failures: u32, latency: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            latency,
        }
    }

    async fn call(&self) -> Result<String, std::io::Error> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if n < self.failures {
            Err(std::io::Error::other(format!("call {} refused", n + 1)))
        } else {
            Ok(format!("response to call {}", n + 1))
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// ==================== Retry ====================

/// Example 1: retry with backoff and events
async fn example_retry() {
    println!("\n=== Example 1: Retry With Events ===");

    let service = FlakyService::new(2, Duration::from_millis(5));
    let options = RetryOptions::exponential(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(200))
        .with_equal_jitter()
        .on_event(|event| match &event.kind {
            RetryEventKind::Failed { attempt, error, .. } => {
                println!("  attempt {} failed: {}", attempt, error)
            }
            RetryEventKind::Backoff { delay, .. } => println!("  backing off {:?}", delay),
            _ => {}
        });
    let policy = RetryPolicy::new(4, options).with_operation_id("fetch-profile");

    match policy.execute(|| service.call()).await {
        Ok(body) => println!("Success: {}", body),
        Err(e) => println!("Failed: {}", e),
    }
    println!("Calls made: {}", service.calls());
}

// ==================== Circuit Breaker ====================

/// Example 2: circuit breaker with state callbacks
async fn example_circuit_breaker() {
    println!("\n=== Example 2: Circuit Breaker ===");

    let service = FlakyService::new(u32::MAX, Duration::from_millis(1));
    let breaker = CircuitBreakerPolicy::new(CircuitBreakerOptions::new(3, Duration::from_millis(100)));
    breaker.on_circuit_state_change(|from, to| println!("  circuit {} -> {}", from, to));

    for i in 1..=5 {
        match breaker.execute(|| service.call()).await {
            Ok(_) => println!("Request {}: ok", i),
            Err(e) if e.is_circuit_open() => println!("Request {}: rejected ({})", i, e),
            Err(e) => println!("Request {}: {}", i, e),
        }
    }

    let metrics = breaker.metrics();
    println!(
        "State: {}, calls: {}, rejected: {}",
        metrics.state, metrics.total_calls, metrics.rejected_calls
    );
    println!("Service saw {} calls", service.calls());
}

// ==================== Full Pipeline ====================

/// Example 3: retry around a breaker around a timeout
async fn example_pipeline() {
    println!("\n=== Example 3: Retry + Circuit Breaker + Timeout ===");

    let slow = FlakyService::new(0, Duration::from_millis(300));
    let policy = breakwater::compose!(
        RetryPolicy::new(2, RetryOptions::constant(Duration::from_millis(10))),
        CircuitBreakerPolicy::new(CircuitBreakerOptions::new(5, Duration::from_secs(30))),
        TimeoutPolicy::new(Duration::from_millis(50)),
    );

    match policy.execute(|| slow.call()).await {
        Ok(body) => println!("Success: {}", body),
        Err(e) => {
            println!("Failed: {}", e);
            println!("Root cause: {}", e.root_cause());
        }
    }
    println!("Calls made: {}", slow.calls());
}

// ==================== Bulkhead ====================

/// Example 4: bulkhead limiting concurrent calls
async fn example_bulkhead() {
    println!("\n=== Example 4: Bulkhead ===");

    let service = Arc::new(FlakyService::new(0, Duration::from_millis(50)));
    let bulkhead = Arc::new(BulkheadPolicy::new(BulkheadOptions::new(2, 1)));

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let service = Arc::clone(&service);
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move {
                let result = bulkhead.execute(|| service.call()).await;
                (i, result)
            })
        })
        .collect();

    for task in tasks {
        if let Ok((i, result)) = task.await {
            match result {
                Ok(body) => println!("Task {}: {}", i, body),
                Err(e) => println!("Task {}: {}", i, e),
            }
        }
    }

    let metrics = bulkhead.metrics();
    println!(
        "Executed: {}, queued: {}, rejected: {}",
        metrics.total_executed, metrics.total_queued, metrics.total_rejected
    );
}

// ==================== Hedging ====================

/// Example 5: hedging a slow primary
async fn example_hedge() {
    println!("\n=== Example 5: Hedged Requests ===");

    let calls = AtomicU32::new(0);
    let hedge = HedgePolicy::new(HedgeOptions::new(HedgeDelay::Linear(Duration::from_millis(20)), 2));

    let result = hedge
        .execute(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let latency = if n == 0 { 500 } else { 15 };
                tokio::time::sleep(Duration::from_millis(latency)).await;
                Ok::<_, PolicyError>(format!("replica {}", n))
            }
        })
        .await;

    match result {
        Ok(winner) => println!("Winner: {}", winner),
        Err(e) => println!("Failed: {}", e),
    }

    let metrics = hedge.metrics();
    println!(
        "Hedges launched: {}, hedge wins: {}, wasted attempts: {}",
        metrics.total_hedges, metrics.hedge_wins, metrics.resource_waste
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("======================================");
    println!("     Resilience Pipeline Example      ");
    println!("======================================");

    example_retry().await;
    example_circuit_breaker().await;
    example_pipeline().await;
    example_bulkhead().await;
    example_hedge().await;

    println!("\n======================================");
    println!("           Examples Complete           ");
    println!("======================================");
}
