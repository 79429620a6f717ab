//! Lifecycle tests against the in-memory backend.
//!
//! Every test drives a real `Container` through `StubBackend`, so the gate,
//! the poll loop, cancellation and the dispose policy run exactly as they do
//! against Docker. Timing tests run on tokio's paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use capsule::backend::LogBuffer;
use capsule::container::{
    Container, ContainerBuilder, ContainerState, SESSION_LABEL, TeardownPolicy,
};
use capsule::testing::{StubBackend, StubCalls};
use capsule::wait::{UntilContainerIsRunning, UntilMessageIsLogged, UntilOperationIsSucceeded};
use capsule::{ContainerError, Result};

const POLL: Duration = Duration::from_secs(1);

fn builder() -> ContainerBuilder {
    ContainerBuilder::new("postgres:16").with_poll_interval(POLL)
}

fn manage(builder: ContainerBuilder, backend: &Arc<StubBackend>) -> Container {
    Container::new(builder.build().unwrap(), backend.clone())
}

// ── Serialization ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_starts_create_once() {
    let backend = Arc::new(StubBackend::new().with_create_delay(Duration::from_millis(200)));
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(container.start(&cancel), container.start(&cancel));
    a.unwrap();
    b.unwrap();

    let calls = backend.calls();
    assert_eq!(calls.create, 1);
    assert_eq!(calls.start, 2);
    assert_eq!(backend.container_count(), 1);

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test]
async fn stop_and_clean_up_need_a_container() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    assert!(matches!(
        container.stop(&cancel).await,
        Err(ContainerError::NotCreated)
    ));
    assert!(matches!(
        container.clean_up(&cancel).await,
        Err(ContainerError::NotCreated)
    ));
    assert_eq!(backend.calls(), StubCalls::default());
}

// ── Restart semantics ──────────────────────────────────────────────────────

#[tokio::test]
async fn stop_then_start_reuses_container() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    let first = container.id().unwrap();

    container.stop(&cancel).await.unwrap();
    assert_eq!(container.state(), ContainerState::Exited);
    assert_eq!(container.id().unwrap(), first);

    container.start(&cancel).await.unwrap();
    assert_eq!(container.id().unwrap(), first);
    assert_eq!(container.state(), ContainerState::Running);
    assert_eq!(backend.calls().create, 1);
    assert_eq!(backend.calls().start, 2);

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test]
async fn clean_up_then_start_creates_new_container() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    let first = container.id().unwrap();

    container.clean_up(&cancel).await.unwrap();
    assert_eq!(container.state(), ContainerState::Uncreated);
    assert!(matches!(container.id(), Err(ContainerError::NotCreated)));
    assert!(!backend.exists(&first));

    container.start(&cancel).await.unwrap();
    let second = container.id().unwrap();
    assert_ne!(first, second);
    assert_eq!(backend.calls().create, 2);

    container.dispose(&cancel).await.unwrap();
}

// ── Readiness polling ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn readiness_is_polled_at_the_interval() {
    let backend = Arc::new(StubBackend::new().with_state_script([
        ContainerState::Created,
        ContainerState::Created,
        ContainerState::Created,
        ContainerState::Running,
    ]));
    let container = manage(builder().with_wait_strategy(UntilContainerIsRunning), &backend);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    container.start(&cancel).await.unwrap();
    let elapsed = started.elapsed();

    // Refresh after start, then three polls two intervals apart.
    assert!(elapsed >= POLL * 2, "{elapsed:?}");
    assert!(elapsed < POLL * 3, "{elapsed:?}");
    assert_eq!(container.state(), ContainerState::Running);

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn strategies_run_in_order_after_startup_callback() {
    let backend = Arc::new(StubBackend::new().with_output_line("database system is ready"));
    let buffer = LogBuffer::new();
    let callbacks = Arc::new(AtomicU32::new(0));

    let seen = Arc::clone(&callbacks);
    let callback = move |c: &Container| -> Result<()> {
        assert_eq!(c.state(), ContainerState::Running);
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    let order = Arc::clone(&callbacks);
    let container = manage(
        builder()
            .with_output(buffer.clone())
            .with_startup_callback(callback)
            .with_wait_strategy(
                UntilMessageIsLogged::new("ready", buffer.clone()).unwrap(),
            )
            .with_wait_strategy(UntilOperationIsSucceeded::new(
                move |_| order.load(Ordering::SeqCst) == 1,
                1,
            )),
        &backend,
    );
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(buffer.lines(), vec!["database system is ready".to_string()]);

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test]
async fn startup_callback_error_aborts_start() {
    let backend = Arc::new(StubBackend::new());
    let callback = |_: &Container| -> Result<()> {
        Err(ContainerError::Config {
            reason: "schema migration failed".to_string(),
        })
    };
    let container = manage(
        builder()
            .with_startup_callback(callback)
            .with_wait_strategy(UntilContainerIsRunning),
        &backend,
    );
    let cancel = CancellationToken::new();

    let err = container.start(&cancel).await.unwrap_err();
    assert!(matches!(err, ContainerError::Config { .. }));
    assert!(container.id().is_ok());

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn readiness_times_out() {
    let backend = Arc::new(StubBackend::new().with_state_script([ContainerState::Created]));
    let container = manage(
        builder()
            .with_wait_strategy(UntilContainerIsRunning)
            .with_wait_timeout(Duration::from_secs(5)),
        &backend,
    );
    let cancel = CancellationToken::new();

    let err = container.start(&cancel).await.unwrap_err();
    assert!(matches!(err, ContainerError::Timeout(d) if d == Duration::from_secs(5)));
    assert!(container.id().is_ok());

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test]
async fn exit_during_wait_fails_fast() {
    let backend = Arc::new(StubBackend::new().with_state_script([ContainerState::Exited]));
    let container = manage(builder().with_wait_strategy(UntilContainerIsRunning), &backend);
    let cancel = CancellationToken::new();

    let err = container.start(&cancel).await.unwrap_err();
    assert!(matches!(err, ContainerError::WaitStrategy { strategy: "running", .. }));

    container.dispose(&cancel).await.unwrap();
}

#[tokio::test]
async fn backend_errors_propagate() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    backend.set_failing(Some("start"));
    let err = container.start(&cancel).await.unwrap_err();
    assert!(matches!(err, ContainerError::Backend { operation: "start", .. }));

    backend.set_failing(None);
    container.start(&cancel).await.unwrap();
    assert_eq!(backend.calls().create, 1);

    container.dispose(&cancel).await.unwrap();
}

// ── Cancellation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_token_never_reaches_backend() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = container.start(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(backend.calls(), StubCalls::default());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_leaves_container_for_dispose() {
    let backend = Arc::new(
        StubBackend::new()
            .with_state_script([ContainerState::Created])
            .without_reaper(),
    );
    let container = manage(builder().with_wait_strategy(UntilContainerIsRunning), &backend);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let err = container.start(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    let id = container.id().unwrap();
    assert!(backend.exists(&id));

    // A cancelled token must not stop teardown with a fresh one.
    container.dispose(&CancellationToken::new()).await.unwrap();
    assert!(!backend.exists(&id));
}

// ── Dispose ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispose_stops_when_reaper_observes() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    let id = container.id().unwrap();
    container.dispose(&cancel).await.unwrap();

    assert_eq!(backend.calls().stop, 1);
    assert_eq!(backend.calls().remove, 0);
    assert!(backend.exists(&id));
}

#[tokio::test]
async fn dispose_removes_without_reaper() {
    for (backend, builder) in [
        (StubBackend::new().without_reaper(), builder()),
        (StubBackend::new(), builder().with_reaper(false)),
    ] {
        let backend = Arc::new(backend);
        let container = manage(builder, &backend);
        let cancel = CancellationToken::new();

        container.start(&cancel).await.unwrap();
        let id = container.id().unwrap();
        container.dispose(&cancel).await.unwrap();

        assert_eq!(backend.calls().remove, 1);
        assert_eq!(backend.calls().stop, 0);
        assert!(!backend.exists(&id));
    }
}

#[tokio::test]
async fn dispose_only_stops_containers_outside_a_session() {
    let backend = Arc::new(StubBackend::new().without_reaper());
    let container = manage(
        builder().with_label(SESSION_LABEL, "00000000-0000-0000-0000-000000000000"),
        &backend,
    );
    let cancel = CancellationToken::new();

    assert_eq!(
        TeardownPolicy::select(false, container.config().session_label()),
        TeardownPolicy::ReaperSupervised
    );

    container.start(&cancel).await.unwrap();
    container.dispose(&cancel).await.unwrap();
    assert_eq!(backend.calls().stop, 1);
    assert_eq!(backend.calls().remove, 0);
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();

    let (a, b) = tokio::join!(container.dispose(&cancel), container.dispose(&cancel));
    a.unwrap();
    b.unwrap();
    container.dispose(&cancel).await.unwrap();

    assert_eq!(backend.calls().stop, 1);
}

#[tokio::test]
async fn lifecycle_calls_fail_after_dispose() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    container.dispose(&cancel).await.unwrap();

    assert!(matches!(
        container.start(&cancel).await,
        Err(ContainerError::Disposed)
    ));
    assert!(matches!(
        container.stop(&cancel).await,
        Err(ContainerError::Disposed)
    ));
    assert!(matches!(
        container.clean_up(&cancel).await,
        Err(ContainerError::Disposed)
    ));
    // Accessors keep reading the last handle.
    assert_eq!(container.state(), ContainerState::Exited);
}

#[test]
fn dispose_without_create_touches_nothing() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);

    tokio_test::block_on(container.dispose(&CancellationToken::new())).unwrap();

    assert_eq!(backend.calls(), StubCalls::default());
    assert!(matches!(
        tokio_test::block_on(container.start(&CancellationToken::new())),
        Err(ContainerError::Disposed)
    ));
}

// ── Accessors ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mapped_port_and_hostname_after_start() {
    let backend = Arc::new(StubBackend::new().with_port(80, 32768));
    let container = manage(
        builder()
            .with_endpoint("tcp://203.0.113.5:2375")
            .with_exposed_port(80),
        &backend,
    );
    let cancel = CancellationToken::new();

    assert!(matches!(
        container.mapped_public_port(80),
        Err(ContainerError::NotCreated)
    ));

    container.start(&cancel).await.unwrap();
    assert_eq!(container.mapped_public_port(80).unwrap(), 32768);
    assert!(matches!(
        container.mapped_public_port(81),
        Err(ContainerError::PortNotMapped { .. })
    ));
    assert_eq!(container.hostname().await.unwrap(), "203.0.113.5");

    container.dispose(&cancel).await.unwrap();
}

// ── Dispose failures and retries ───────────────────────────────────────────

#[tokio::test]
async fn cancelled_dispose_can_be_retried() {
    let backend = Arc::new(StubBackend::new().without_reaper());
    let container = manage(builder(), &backend);
    container.start(&CancellationToken::new()).await.unwrap();
    let id = container.id().unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(container.dispose(&cancelled).await.unwrap_err().is_cancelled());
    assert!(backend.exists(&id));
    assert!(matches!(
        container.start(&CancellationToken::new()).await,
        Err(ContainerError::Disposed)
    ));

    container.dispose(&CancellationToken::new()).await.unwrap();
    assert!(!backend.exists(&id));
    assert_eq!(backend.calls().remove, 1);
    assert!(matches!(
        container.clean_up(&CancellationToken::new()).await,
        Err(ContainerError::Disposed)
    ));
}

#[tokio::test]
async fn failed_teardown_propagates_and_keeps_start_closed() {
    let backend = Arc::new(StubBackend::new());
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();
    container.start(&cancel).await.unwrap();

    backend.set_failing(Some("stop"));
    let err = container.dispose(&cancel).await.unwrap_err();
    assert!(matches!(err, ContainerError::Backend { operation: "stop", .. }));
    assert!(matches!(
        container.start(&cancel).await,
        Err(ContainerError::Disposed)
    ));
    assert_eq!(backend.calls().start, 1);

    backend.set_failing(None);
    container.dispose(&cancel).await.unwrap();
    assert_eq!(container.state(), ContainerState::Exited);
    assert_eq!(backend.calls().stop, 2);

    container.dispose(&cancel).await.unwrap();
    assert_eq!(backend.calls().stop, 2);
}

#[tokio::test(start_paused = true)]
async fn dispose_waits_for_in_flight_start() {
    let backend = Arc::new(StubBackend::new().with_create_delay(Duration::from_millis(500)));
    let container = manage(builder(), &backend);
    let cancel = CancellationToken::new();

    let (started, disposed) = tokio::join!(container.start(&cancel), container.dispose(&cancel));
    started.unwrap();
    disposed.unwrap();

    let calls = backend.calls();
    assert_eq!(calls.create, 1);
    assert_eq!(calls.start, 1);
    assert_eq!(calls.stop, 1);
    assert_eq!(container.state(), ContainerState::Exited);
}

// ── Restart with stateful strategies ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn attempt_budget_is_per_start() {
    let backend = Arc::new(StubBackend::new());
    let polls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&polls);
    let container = manage(
        builder().with_wait_strategy(UntilOperationIsSucceeded::new(
            // Ready on every second poll.
            move |_| counter.fetch_add(1, Ordering::SeqCst) % 2 == 1,
            2,
        )),
        &backend,
    );
    let cancel = CancellationToken::new();

    container.start(&cancel).await.unwrap();
    container.stop(&cancel).await.unwrap();
    container.start(&cancel).await.unwrap();

    assert_eq!(polls.load(Ordering::SeqCst), 4);
    assert_eq!(backend.calls().create, 1);

    container.dispose(&cancel).await.unwrap();
}
