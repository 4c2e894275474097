//! Integration tests for the adaptive runner.
//!
//! Time-dependent tests run on tokio's paused clock, so backoff delays of
//! several seconds complete instantly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fdrun::error::BatchError;
use fdrun::{BatchEvent, BatchSummary, ErrorCode, Observer, Recoverability, Runner, RunnerConfig};
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TestError {
    Emfile,
    Enfile,
    Fatal(&'static str),
}

impl ErrorCode for TestError {
    fn error_code(&self) -> Option<&str> {
        match self {
            TestError::Emfile => Some("EMFILE"),
            TestError::Enfile => Some("ENFILE"),
            TestError::Fatal(_) => None,
        }
    }
}

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| "a".repeat(i)).collect()
}

async fn collect_ok<T, E: std::fmt::Debug>(
    stream: fdrun::ResultStream<T, E>,
) -> (Vec<T>, BatchSummary) {
    match stream.collect().await {
        Ok(done) => done,
        Err(e) => panic!("batch should complete, got {e:?}"),
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn emits_every_result_then_completes() {
    let stream = Runner::default().run(0..10u32, |n| async move {
        sleep(Duration::from_millis(50)).await;
        Ok::<_, TestError>(n * 2)
    });

    let (mut values, summary) = collect_ok(stream).await;
    values.sort();
    assert_eq!(values, (0..10).map(|n| n * 2).collect::<Vec<_>>());
    assert_eq!(summary.items, 10);
    assert_eq!(summary.attempts, 10);
    assert_eq!(summary.retries(), 0);
    assert!(summary.backoff_delays_ms.is_empty());
}

#[tokio::test(start_paused = true)]
async fn results_arrive_in_completion_order() {
    let filenames: Vec<String> = (0..=10).rev().map(|i| "a".repeat(i)).collect();

    let stream = Runner::default().run(filenames, |name: String| async move {
        sleep(Duration::from_millis(name.len() as u64 * 100)).await;
        Ok::<_, TestError>(name.len())
    });

    let (values, _) = collect_ok(stream).await;
    assert_eq!(values, (0..=10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn emitted_values_match_action_results_as_a_multiset() {
    let items: Vec<u64> = (0..25).map(|i| i % 7).collect();
    let stream = Runner::default().run(items.clone(), |n: u64| async move {
        sleep(Duration::from_millis((n * 37) % 11)).await;
        Ok::<_, TestError>(n)
    });

    let (mut values, _) = collect_ok(stream).await;
    let mut expected = items;
    values.sort();
    expected.sort();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn empty_batch_completes_without_emitting() {
    let mut stream = Runner::default().run(Vec::<u32>::new(), |n| async move {
        Ok::<_, TestError>(n)
    });

    match stream.next().await {
        Some(BatchEvent::Completed(summary)) => {
            assert_eq!(summary.items, 0);
            assert_eq!(summary.attempts, 0);
            assert!(summary.backoff_delays_ms.is_empty());
        }
        other => panic!("expected immediate completion, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn runs_everything_in_parallel_when_no_limit_is_hit() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let action = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        move |_: usize| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        }
    };

    let (values, _) = collect_ok(Runner::default().run(0..10, action)).await;
    assert_eq!(values.len(), 10);
    assert_eq!(peak.load(Ordering::SeqCst), 10);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Unrecoverable failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unrecoverable_error_fails_the_batch_with_that_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut stream = Runner::default().run(names(10), move |_: String| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            match call {
                1 | 3 => Err(TestError::Emfile),
                6 => Err(TestError::Fatal("some other error")),
                _ => Ok(42),
            }
        }
    });

    let mut emitted = 0;
    let mut failure = None;
    while let Some(event) = stream.next().await {
        match event {
            BatchEvent::Item(_) => {
                assert!(failure.is_none(), "no value may follow the failure");
                emitted += 1;
            }
            BatchEvent::Failed(e) => failure = Some(e),
            BatchEvent::Completed(_) => panic!("batch must not complete"),
        }
    }

    assert_eq!(failure, Some(TestError::Fatal("some other error")));
    assert!(emitted < 10);
}

#[tokio::test(start_paused = true)]
async fn collect_surfaces_the_action_error() {
    let stream = Runner::default().run(0..5u32, |n| async move {
        if n == 3 {
            Err(TestError::Fatal("boom"))
        } else {
            Ok(n)
        }
    });

    match stream.collect().await {
        Err(BatchError::Action(e)) => assert_eq!(e, TestError::Fatal("boom")),
        other => panic!("expected action error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn nothing_is_dispatched_after_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    // Item 0 fails on the OS-wide limit and arms a timer; item 1 then fails
    // fatally. The timer must not retry item 0 afterwards.
    let stream = Runner::default().run(0..2u32, move |n| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err::<u32, _>(TestError::Enfile)
            } else {
                sleep(Duration::from_millis(10)).await;
                Err(TestError::Fatal("fatal"))
            }
        }
    });

    assert!(matches!(stream.collect().await, Err(BatchError::Action(_))));
    sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_action_aborts_the_batch() {
    let stream = Runner::default().run(0..3u32, |n| async move {
        if n == 1 {
            panic!("action blew up");
        }
        Ok::<_, TestError>(n)
    });

    assert!(matches!(stream.collect().await, Err(BatchError::Aborted)));
}

// ---------------------------------------------------------------------------
// Process-level exhaustion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn process_limit_never_exceeds_the_revealed_capacity() {
    const CAPACITY: usize = 2;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let action = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        move |name: String| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                if now > CAPACITY {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(TestError::Emfile);
                }
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(name)
            }
        }
    };

    let stream = Runner::default().run(names(10), action);
    let (mut values, summary) = collect_ok(stream).await;

    values.sort();
    assert_eq!(values, names(10));
    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert!(summary.process_limit_hits >= 8);
    assert!(summary.backoff_delays_ms.is_empty());
}

// ---------------------------------------------------------------------------
// System-level exhaustion and backoff
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn backoff_timer_drains_queue_once_the_os_limit_clears() {
    let clears_at = Instant::now() + Duration::from_secs(1);

    let stream = Runner::default().run(names(10), move |name: String| async move {
        if Instant::now() < clears_at {
            return Err(TestError::Enfile);
        }
        sleep(Duration::from_millis(50)).await;
        Ok(name)
    });

    let (mut values, summary) = collect_ok(stream).await;
    values.sort();
    assert_eq!(values, names(10));
    assert_eq!(summary.system_limit_hits, 10);
    // Only one timer was ever needed: completions drained the rest.
    assert_eq!(summary.backoff_delays_ms, vec![2000]);
}

#[tokio::test(start_paused = true)]
async fn each_new_timer_doubles_the_delay() {
    let clears_at = Instant::now() + Duration::from_secs(5);

    let stream = Runner::default().run(0..3u32, move |n| async move {
        if Instant::now() < clears_at {
            return Err(TestError::Enfile);
        }
        Ok(n)
    });

    let (values, summary) = collect_ok(stream).await;
    assert_eq!(values.len(), 3);
    // t=0: armed 2s. t=2: retry fails, armed 4s. t=6: limit cleared.
    assert_eq!(summary.backoff_delays_ms, vec![2000, 4000]);
}

#[tokio::test(start_paused = true)]
async fn configured_initial_delay_and_ceiling_apply() {
    let clears_at = Instant::now() + Duration::from_millis(2400);
    let runner = Runner::new(RunnerConfig {
        initial_backoff: Duration::from_millis(500),
        max_backoff: Some(Duration::from_millis(1000)),
    });

    let stream = runner.run(0..1u32, move |n| async move {
        if Instant::now() < clears_at {
            return Err(TestError::Enfile);
        }
        Ok(n)
    });

    let (_, summary) = collect_ok(stream).await;
    // 0.5s, then 1s, then clamped at 1s: retries at 0.5, 1.5 and 2.5.
    assert_eq!(summary.backoff_delays_ms, vec![500, 1000, 1000]);
    assert_eq!(summary.attempts, 4);
}

#[tokio::test(start_paused = true)]
async fn success_cancels_the_pending_timer_and_retries_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let start = Instant::now();

    let stream = Runner::default().run(["blocked", "fast"], move |name: &'static str| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            match (name, call) {
                ("blocked", 0) => Err(TestError::Enfile),
                ("fast", _) => {
                    sleep(Duration::from_millis(100)).await;
                    Ok(name)
                }
                _ => Ok(name),
            }
        }
    });

    let (values, summary) = collect_ok(stream).await;
    assert_eq!(values, vec!["fast", "blocked"]);
    assert_eq!(summary.backoff_delays_ms, vec![2000]);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn item_alternating_between_limits_is_kept_until_it_succeeds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let stream = Runner::default().run(["flaky", "slow"], move |name: &'static str| {
        let counter = Arc::clone(&counter);
        async move {
            if name == "slow" {
                sleep(Duration::from_secs(10)).await;
                return Ok(name);
            }
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(TestError::Enfile),
                1 => Err(TestError::Emfile),
                _ => Ok(name),
            }
        }
    });

    let (mut values, summary) = collect_ok(stream).await;
    values.sort();
    assert_eq!(values, vec!["flaky", "slow"]);
    assert_eq!(summary.attempts, 4);
    assert_eq!(summary.process_limit_hits, 1);
    assert_eq!(summary.system_limit_hits, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Custom classifiers and callables
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn custom_classifier_decides_recoverability() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let stream = Runner::default().run_with(
        0..4u32,
        move |n| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    return Err("busy");
                }
                sleep(Duration::from_millis(10)).await;
                Ok(n)
            }
        },
        |e: &&'static str| match *e {
            "busy" => Recoverability::ProcessLimit,
            _ => Recoverability::Unrecoverable,
        },
    );

    let (values, summary) = collect_ok(stream).await;
    assert_eq!(values.len(), 4);
    assert_eq!(summary.process_limit_hits, 1);
    assert_eq!(summary.attempts, 5);
}

#[tokio::test(start_paused = true)]
async fn run_all_returns_callable_results_in_completion_order() {
    let thunks = (1..=10u64).rev().map(|n| {
        move || async move {
            sleep(Duration::from_millis(n * 50)).await;
            Ok::<_, String>(n)
        }
    });

    let stream = Runner::default().run_all(thunks, |_: &String| false);
    let (values, _) = collect_ok(stream).await;
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn run_all_retries_limit_errors_and_fails_on_others() {
    let calls = Arc::new(AtomicUsize::new(0));
    let thunks = (0..10).map(|_| {
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match call {
                    3 => Err("Reached limit".to_string()),
                    6 => Err("Some other error".to_string()),
                    _ => Ok(42),
                }
            }
        }
    });

    let stream = Runner::default().run_all(thunks, |e: &String| e == "Reached limit");
    match stream.collect().await {
        Err(BatchError::Action(e)) => assert_eq!(e, "Some other error"),
        other => panic!("expected failure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    values: Vec<u32>,
    error: Option<TestError>,
    summary: Option<BatchSummary>,
}

impl Observer<u32, TestError> for Recorder {
    fn on_next(&mut self, value: u32) {
        self.values.push(value);
    }

    fn on_error(&mut self, error: TestError) {
        self.error = Some(error);
    }

    fn on_complete(&mut self, summary: BatchSummary) {
        self.summary = Some(summary);
    }
}

#[tokio::test(start_paused = true)]
async fn observer_receives_values_then_completion() {
    let mut recorder = Recorder::default();
    let stream = Runner::default().run(0..5u32, |n| async move {
        sleep(Duration::from_millis(u64::from(5 - n))).await;
        Ok::<_, TestError>(n)
    });

    assert!(stream.subscribe(&mut recorder).await);
    assert_eq!(recorder.values, vec![4, 3, 2, 1, 0]);
    assert!(recorder.error.is_none());
    assert_eq!(recorder.summary.map(|s| s.items), Some(5));
}

#[tokio::test(start_paused = true)]
async fn observer_receives_error_without_completion() {
    let mut recorder = Recorder::default();
    let stream = Runner::default().run(0..5u32, |n| async move {
        if n == 2 {
            Err(TestError::Fatal("nope"))
        } else {
            sleep(Duration::from_millis(10)).await;
            Ok(n)
        }
    });

    assert!(stream.subscribe(&mut recorder).await);
    assert_eq!(recorder.error, Some(TestError::Fatal("nope")));
    assert!(recorder.summary.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_stream_cancels_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let stream = Runner::default().run(0..2u32, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(TestError::Enfile) }
    });

    sleep(Duration::from_millis(100)).await;
    drop(stream);
    sleep(Duration::from_secs(60)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
