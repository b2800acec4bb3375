//! Integration tests for cancellation and deadlines at the serve boundary.
//!
//! An in-flight mapper must be dropped as soon as the caller gives up.

use hypermap_core::{
    AvailableSet, BoundaryRequest, BoundaryStatus, CancellationToken, DuplicatePolicy, HypermapError,
    MapperDescriptor, MapperRegistry, Resolver, ResolverConfig, ServeRuntime, TypeTag, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Flags when the mapper future holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Registry whose only mapper never finishes on its own.
fn stalled_registry(started: Arc<AtomicBool>, dropped: Arc<AtomicBool>) -> MapperRegistry {
    let mut registry = MapperRegistry::new();
    registry
        .register(MapperDescriptor::new("stall", ["raw"], "slow", move |_args| {
            let started = Arc::clone(&started);
            let guard = DropFlag(Arc::clone(&dropped));
            async move {
                let _guard = guard;
                started.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::new(()))
            }
        }))
        .unwrap();
    registry
}

/// Three blocking sync mappers chained `raw -> one -> two -> three`, each
/// taking 60ms. `started` counts the calls that began.
fn blocking_chain(started: Arc<AtomicUsize>) -> MapperRegistry {
    let mut registry = MapperRegistry::new();
    for (name, input, output) in [("first", "raw", "one"), ("second", "one", "two"), ("third", "two", "three")] {
        let started = Arc::clone(&started);
        registry
            .register(MapperDescriptor::sync(name, [input], output, move |args| {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(60));
                Ok(args[0].clone())
            }))
            .unwrap();
    }
    registry
}

fn request() -> BoundaryRequest {
    BoundaryRequest::new(AvailableSet::new().with("raw", Value::new(1u8)), "slow")
}

#[tokio::test]
async fn test_cancel_drops_in_flight_mapper() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let resolver = Resolver::new(
        stalled_registry(Arc::clone(&started), Arc::clone(&dropped)).seal(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = resolver
        .resolve_with_cancel(
            AvailableSet::new().with("raw", Value::new(1u8)),
            &TypeTag::from("slow"),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HypermapError::Cancelled { .. }));
    assert!(started.load(Ordering::SeqCst));
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_deadline_exceeded_at_boundary() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let config = ResolverConfig {
        call_timeout_ms: Some(30),
        ..ResolverConfig::default()
    };
    let runtime = ServeRuntime::from_registry(
        stalled_registry(Arc::clone(&started), Arc::clone(&dropped)),
        config,
    )
    .unwrap();

    let failure = runtime.handle(request()).await.unwrap_err();

    assert_eq!(failure.status, BoundaryStatus::DeadlineExceeded);
    assert!(failure.message.contains("30ms"));
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_boundary_cancellation_status() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let runtime = ServeRuntime::from_registry(
        stalled_registry(Arc::clone(&started), Arc::clone(&dropped)),
        ResolverConfig::default(),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let call = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.handle(request().with_cancel(cancel)).await }
    });

    while !started.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }
    trigger.cancel();

    let failure = call.await.unwrap().unwrap_err();
    assert_eq!(failure.status, BoundaryStatus::Cancelled);
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_dropping_resolve_future_drops_mapper() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let resolver = Resolver::new(
        stalled_registry(Arc::clone(&started), Arc::clone(&dropped)).seal(),
    );

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        resolver.resolve(
            AvailableSet::new().with("raw", Value::new(1u8)),
            &TypeTag::from("slow"),
        ),
    )
    .await;

    assert!(outcome.is_err());
    assert!(started.load(Ordering::SeqCst));
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancel_stops_blocking_chain_mid_step() {
    let started = Arc::new(AtomicUsize::new(0));
    let resolver = Resolver::new(blocking_chain(Arc::clone(&started)).seal());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let begin = Instant::now();
    let err = resolver
        .resolve_with_cancel(
            AvailableSet::new().with("raw", Value::new(1u8)),
            &TypeTag::from("three"),
            &cancel,
        )
        .await
        .unwrap_err();
    let elapsed = begin.elapsed();

    match &err {
        HypermapError::Cancelled { target, executed } => {
            assert_eq!(target.as_str(), "three");
            assert!(executed.is_empty());
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");

    // The abandoned call finishes in the background; nothing starts after it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deadline_stops_blocking_chain() {
    let started = Arc::new(AtomicUsize::new(0));
    let config = ResolverConfig {
        call_timeout_ms: Some(30),
        ..ResolverConfig::default()
    };
    let runtime = ServeRuntime::from_registry(blocking_chain(Arc::clone(&started)), config).unwrap();

    let begin = Instant::now();
    let failure = runtime
        .handle(BoundaryRequest::new(
            AvailableSet::new().with("raw", Value::new(1u8)),
            "three",
        ))
        .await
        .unwrap_err();

    assert_eq!(failure.status, BoundaryStatus::DeadlineExceeded);
    assert!(failure.executed.is_empty());
    assert!(begin.elapsed() < Duration::from_millis(150));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_between_steps_keeps_completed_work() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut registry = MapperRegistry::new();
    registry
        .register(MapperDescriptor::new("a", ["raw"], "normalized", move |args| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Ok::<_, anyhow::Error>(args[0].clone())
            }
        }))
        .unwrap();
    registry
        .register(MapperDescriptor::sync("b", ["normalized"], "final", |_| {
            panic!("must not run after cancellation")
        }))
        .unwrap();
    let resolver = Resolver::new(registry.seal());

    let available = AvailableSet::new().with("raw", Value::new(1u8));
    let plan = resolver.plan(&available, &TypeTag::from("final")).unwrap();
    let err = resolver
        .execute_with_cancel(plan, available, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, HypermapError::Cancelled { .. }));
    assert_eq!(err.executed_steps(), ["a".to_string()]);
}

#[tokio::test]
async fn test_blocking_chain_completes_without_interrupt() {
    let started = Arc::new(AtomicUsize::new(0));
    let resolver = Resolver::new(blocking_chain(Arc::clone(&started)).seal());

    let resolution = resolver
        .resolve(
            AvailableSet::new().with("raw", Value::new(7u8)),
            &TypeTag::from("three"),
        )
        .await
        .unwrap();

    assert_eq!(resolution.value().downcast_ref::<u8>(), Some(&7));
    assert_eq!(resolution.invocations(), 3);
    assert_eq!(started.load(Ordering::SeqCst), 3);
}

#[test]
fn test_policy_mismatch_rejected() {
    let config = ResolverConfig {
        duplicate_policy: DuplicatePolicy::LastWins,
        ..ResolverConfig::default()
    };
    let err = ServeRuntime::from_registry(MapperRegistry::new(), config.clone()).unwrap_err();
    assert!(matches!(err, HypermapError::InvalidConfig(_)));
    assert!(err.to_string().contains("LastWins"));

    let runtime = ServeRuntime::from_registry(config.registry(), config).unwrap();
    assert_eq!(runtime.resolver().registry().policy(), DuplicatePolicy::LastWins);
}
