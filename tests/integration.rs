//! End-to-end tests for pipeline topologies and cancellation

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipeweld::prelude::*;

fn square(n: i64) -> i64 {
    n * n
}

#[tokio::test]
async fn test_source_transform_in_order() {
    let (pipeline, _token) = Pipeline::new();
    let squares = pipeline.transform(pipeline.source(vec![2, 3]), square);

    assert_eq!(squares.drain().await, vec![4, 9]);
    pipeline.join().await.unwrap();
}

#[tokio::test]
async fn test_long_sequence_keeps_order() {
    let (pipeline, _token) = Pipeline::new();
    let input: Vec<i64> = (-500..500).collect();
    let expected: Vec<i64> = input.iter().map(|&n| square(n)).collect();

    let squares = pipeline.transform(pipeline.source(input), square);
    assert_eq!(squares.drain().await, expected);
}

#[tokio::test]
async fn test_fan_out_merge_yields_set() {
    let (pipeline, _token) = Pipeline::new();
    let branches = pipeline.fan_out(pipeline.source(vec![2, 3]), square, 2);
    let merged = pipeline.merge(branches);

    let out: HashSet<i64> = merged.drain().await.into_iter().collect();
    assert_eq!(out, HashSet::from([4, 9]));
    pipeline.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fan_out_multiset_for_every_width() {
    let input: Vec<i64> = (0..64).map(|n| n % 9).collect();
    let mut expected: Vec<i64> = input.iter().map(|&n| square(n)).collect();
    expected.sort_unstable();

    for width in 1..=8 {
        for capacity in [Capacity::Rendezvous, Capacity::Bounded(4), Capacity::Unbounded] {
            let config = PipelineConfig::default()
                .name(format!("width-{width}"))
                .capacity(capacity);
            let (pipeline, _token) = Pipeline::with_config(config).unwrap();

            let merged = pipeline.parallel(pipeline.source(input.clone()), square, width);
            let mut out = tokio::time::timeout(Duration::from_secs(5), merged.drain())
                .await
                .expect("merge never closed");
            out.sort_unstable();

            assert_eq!(out, expected, "width {width}, capacity {capacity}");
            pipeline.join().await.unwrap();
            assert_eq!(pipeline.active_stages(), 0);
        }
    }
}

#[tokio::test]
async fn test_fire_after_first_value_leaks_nothing() {
    let (pipeline, token) = Pipeline::new();
    let branches = pipeline.fan_out(pipeline.source(1i64..), square, 3);
    let merged = pipeline.merge(branches);

    let first = merged.recv().await.expect("merge closed early");
    assert!(first >= 1);
    token.fire();

    pipeline.shutdown().await.unwrap();
    assert_eq!(pipeline.active_stages(), 0);

    // At most the handful of items already accepted before the fire.
    let rest = tokio::time::timeout(Duration::from_millis(50), merged.drain())
        .await
        .expect("merged channel left open");
    assert!(rest.len() <= 1, "unexpected backlog: {rest:?}");
}

/// Read `reads` values from an endless fanned-out pipeline, fire, and check
/// that every stage exits and every channel closes.
async fn fire_after_reads(capacity: Capacity, width: usize, reads: usize) {
    let config = PipelineConfig::default()
        .name(format!("endless-{capacity}-{width}-{reads}"))
        .capacity(capacity)
        .shutdown_grace(Duration::from_millis(500));
    let (pipeline, token) = Pipeline::with_config(config).unwrap();
    let merged = pipeline.parallel(pipeline.source(0u64..), |n: u64| n.wrapping_mul(n), width);

    for _ in 0..reads {
        let value = tokio::time::timeout(Duration::from_millis(500), merged.recv())
            .await
            .unwrap_or_else(|_| panic!("no value with {capacity}, width {width}"));
        assert!(value.is_some());
    }
    token.fire();

    let shutdown = pipeline.shutdown().await;
    assert!(shutdown.is_ok(), "{capacity}, width {width}, reads {reads}: {shutdown:?}");
    assert_eq!(pipeline.active_stages(), 0);

    tokio::time::timeout(Duration::from_millis(500), merged.drain())
        .await
        .unwrap_or_else(|_| panic!("merged channel left open with {capacity}"));
}

const CAPACITIES: [Capacity; 3] = [Capacity::Rendezvous, Capacity::Bounded(8), Capacity::Unbounded];

#[tokio::test]
async fn test_fire_at_any_point_current_thread() {
    for capacity in CAPACITIES {
        for width in [1, 2, 4] {
            for reads in [0, 1, 5] {
                fire_after_reads(capacity, width, reads).await;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fire_at_any_point_multi_thread() {
    for capacity in CAPACITIES {
        for width in [1, 2, 4] {
            for reads in [0, 1, 5] {
                fire_after_reads(capacity, width, reads).await;
            }
        }
    }
}

#[tokio::test]
async fn test_unbounded_endless_source_stops_on_fire() {
    let config = PipelineConfig::default().capacity(Capacity::Unbounded);
    let (pipeline, token) = Pipeline::with_config(config).unwrap();
    let out = pipeline.source(0u64..);

    let first = tokio::time::timeout(Duration::from_millis(200), out.recv())
        .await
        .expect("source starved the runtime");
    assert_eq!(first, Some(0));
    token.fire();

    pipeline.shutdown().await.unwrap();
    assert_eq!(pipeline.active_stages(), 0);
}

#[tokio::test]
async fn test_fire_is_idempotent() {
    let (pipeline, token) = Pipeline::new();
    let _out = pipeline.source(0u8..);
    token.fire();
    token.fire();
    assert!(pipeline.token().is_fired());
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unread_output_is_released_by_shutdown() {
    let (pipeline, _token) = Pipeline::new();
    let squares = pipeline.transform(pipeline.source(0i64..1000), square);

    // Nobody reads; every stage is parked on a write.
    tokio::task::yield_now().await;
    assert_eq!(pipeline.active_stages(), 2);

    pipeline.shutdown().await.unwrap();
    assert_eq!(pipeline.active_stages(), 0);
    assert_eq!(squares.recv().await, None);
}

#[tokio::test]
async fn test_try_transform_forwards_item_errors() {
    let (pipeline, token) = Pipeline::new();
    let parsed = pipeline.try_transform(pipeline.source(vec!["4", "four", "16"]), |s: &str| {
        s.parse::<u32>()
    });

    let out = parsed.drain().await;
    assert_eq!(out.len(), 3);
    assert_eq!(out.iter().filter(|r| r.is_err()).count(), 1);
    assert!(!token.is_fired());
    pipeline.join().await.unwrap();
}

#[tokio::test]
async fn test_fail_fast_fires_token() {
    let config = PipelineConfig::default().fail_fast(true);
    let (pipeline, token) = Pipeline::with_config(config).unwrap();
    let parsed = pipeline.try_transform(pipeline.source(vec!["1", "x", "3", "4"]), |s: &str| {
        s.parse::<u32>()
    });

    let out = parsed.drain().await;
    assert!(out.len() <= 2);
    assert!(out.last().is_some_and(|r| r.is_err()));

    let err = pipeline.join().await.unwrap_err();
    assert!(matches!(err, Error::ItemFailed { .. }), "{err}");
    assert!(token.is_fired());
}

#[tokio::test]
async fn test_panicking_stage_is_reported() {
    let (pipeline, token) = Pipeline::new();
    let out = pipeline.transform(pipeline.source(vec![1u8, 0, 2]), |n: u8| {
        if n == 0 {
            panic!("zero is not allowed");
        }
        n
    });

    let seen = out.drain().await;
    assert_eq!(seen, vec![1]);

    match pipeline.join().await {
        Err(Error::StagePanicked { message, .. }) => assert_eq!(message, "zero is not allowed"),
        other => panic!("expected a panic report, got {other:?}"),
    }
    assert!(token.is_fired());
}

struct Failing;

#[async_trait]
impl Stage for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&mut self, _token: &CancelToken) -> Result<()> {
        Err(Error::stage(
            "failing",
            std::io::Error::new(std::io::ErrorKind::Other, "upstream unavailable"),
        ))
    }
}

#[tokio::test]
async fn test_custom_stage_error_without_fail_fast() {
    let (pipeline, token) = Pipeline::new();
    pipeline.spawn(Failing);

    let err = pipeline.join().await.unwrap_err();
    assert!(err.to_string().contains("upstream unavailable"));
    assert!(!token.is_fired());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_with_resource_pool() {
    const WORKERS: usize = 4;
    let (pipeline, _token) = Pipeline::new();
    let buffers = Pool::new(String::new);
    let total = Arc::new(AtomicUsize::new(0));

    let (b, t) = (buffers.clone(), total.clone());
    pipeline.for_each(
        pipeline.source(0..1000u32),
        move |n| {
            let mut buf = b.acquire();
            buf.push_str(&n.to_string());
            t.fetch_add(buf.len(), Ordering::SeqCst);
        },
        WORKERS,
    );
    pipeline.join().await.unwrap();

    let digits: usize = (0..1000u32).map(|n| n.to_string().len()).sum();
    assert_eq!(total.load(Ordering::SeqCst), digits);
    assert!(buffers.stats().allocations <= WORKERS);
}

#[tokio::test]
async fn test_gate_drives_a_custom_source() {
    struct GatedSource {
        gate: Arc<Gate<Vec<u32>>>,
        out: Sender<u32>,
    }

    #[async_trait]
    impl Stage for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        async fn run(&mut self, token: &CancelToken) -> Result<()> {
            loop {
                let next = match self.gate.wait_until_or_cancel(|q| !q.is_empty(), token).await {
                    Ok(mut queue) => queue.remove(0),
                    Err(Cancelled) => return Ok(()),
                };
                if next == 0 || self.out.send(next, token).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    let (pipeline, _token) = Pipeline::new();
    let gate = Arc::new(Gate::new(Vec::new()));
    let (tx, rx) = pipeline.channel();
    pipeline.spawn(GatedSource {
        gate: gate.clone(),
        out: tx,
    });
    let squares = pipeline.transform(rx, |n: u32| n * n);

    for n in [3, 4, 0] {
        gate.update(|q| q.push(n)).await;
    }
    assert_eq!(squares.drain().await, vec![9, 16]);
    pipeline.join().await.unwrap();
}

#[tokio::test]
async fn test_once_init_shared_between_stages() {
    let once = Arc::new(OnceInit::new());
    let (pipeline, _token) = Pipeline::new();

    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = pipeline.channel::<u32>();
    let (o, c) = (once.clone(), counter.clone());
    let loader = tokio::spawn(async move {
        let value = *o
            .get_or_init(|| async {
                c.fetch_add(1, Ordering::SeqCst);
                7u32
            })
            .await;
        tx.send(value, &CancelToken::new()).await.unwrap();
    });

    assert_eq!(rx.recv().await, Some(7));
    loader.await.unwrap();
    assert_eq!(*once.get_or_init(|| async { 99 }).await, 7);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
