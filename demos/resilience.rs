//! Reliability combinators and middleware pipelines.
//!
//! This example simulates a flaky upstream service and shows:
//! 1. Retrying with exponential backoff
//! 2. Failing fast with a circuit breaker
//! 3. Bounding concurrency with a rate limiter
//! 4. Composing the same concerns as a registered middleware pipeline

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use recoil::{
    Kind, Thrown,
    middleware::{Breaker, EnrichContext, Logging, Pipeline, Recover, Retry, pipeline, register_pipeline},
    reliability::{
        CircuitBreaker, CircuitBreakerOptions, RateLimiter, RateLimiterOptions, RetryOptions,
        retry, timeout,
    },
};

/// Fails until it has been called `recover_after` times.
struct FlakyService {
    calls: AtomicU32,
    recover_after: u32,
}

impl FlakyService {
    fn new(recover_after: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            recover_after,
        }
    }

    async fn fetch(&self) -> Result<String, Thrown> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if call < self.recover_after {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into())
        } else {
            Ok(format!("payload #{call}"))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== Retry ===");
    let service = &FlakyService::new(3);
    let options = RetryOptions::new(5)
        .with_base_delay(Duration::from_millis(20))
        .with_jitter(true);
    match retry(move || service.fetch(), options).await {
        Ok(payload) => println!("recovered: {payload}"),
        Err(failure) => println!("gave up: {failure}"),
    }
    println!();

    println!("=== Circuit breaker ===");
    let breaker = Arc::new(CircuitBreaker::new(
        "upstream",
        CircuitBreakerOptions::new(2, Duration::from_millis(200))
            .on_open(|stats| println!("  breaker opened after {} failures", stats.failure_count))
            .on_close(|_| println!("  breaker closed")),
    ));
    let down = &FlakyService::new(u32::MAX);
    for attempt in 1..=4 {
        match breaker.call(|| down.fetch()).await {
            Ok(payload) => println!("  attempt {attempt}: {payload}"),
            Err(failure) if failure.kind() == &Kind::CIRCUIT_OPEN => {
                println!("  attempt {attempt}: rejected, retry in {}ms", failure.context()["retry_in_ms"]);
            }
            Err(failure) => println!("  attempt {attempt}: {}", failure.kind()),
        }
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    let healthy = &FlakyService::new(0);
    if let Ok(payload) = breaker.call(|| healthy.fetch()).await {
        println!("  trial call succeeded: {payload}");
    }
    println!();

    println!("=== Rate limiter and timeout ===");
    let limiter = RateLimiter::new(RateLimiterOptions::new(2).with_min_delay(Duration::from_millis(10)));
    let jobs = (0..4).map(|job| {
        limiter.execute(move || {
            timeout(Duration::from_millis(30), async move {
                let work = if job == 3 { 100 } else { 5 };
                tokio::time::sleep(Duration::from_millis(work)).await;
                Ok::<_, Thrown>(job)
            })
        })
    });
    for result in futures::future::join_all(jobs).await {
        match result {
            Ok(job) => println!("  job {job} done"),
            Err(failure) => println!("  {}: {}", failure.kind(), failure.message()),
        }
    }
    println!();

    println!("=== Middleware pipeline ===");
    let shared_breaker = breaker.clone();
    let registered = register_pipeline(
        "catalog",
        Pipeline::<Vec<String>>::new()
            .with(Logging::default())
            .with(EnrichContext::new().with("service", "catalog"))
            .with(Recover::new([Kind::NOT_FOUND], |_| Vec::new()))
            .with(Retry::new(RetryOptions::new(2).with_base_delay(Duration::from_millis(1))))
            .with(Breaker::new(shared_breaker)),
    );
    if let Err(error) = registered {
        println!("  {error}");
        return;
    }
    let Ok(catalog) = pipeline::<Vec<String>>("catalog") else {
        return;
    };
    let empty = catalog.execute(|| Err::<Vec<String>, _>(std::io::Error::from(std::io::ErrorKind::NotFound)));
    println!("  missing catalog recovered as {empty:?}");
    if let Err(failure) = catalog.execute(|| Err::<Vec<String>, _>(Thrown::message("catalog service crashed"))) {
        println!("  {}", failure.to_json());
    }
}
