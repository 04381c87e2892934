//! Tests for the managed connection
//!
//! Timer-driven scenarios run under a paused tokio clock so the default
//! intervals (500ms ping, 2s retry, 60s budget) execute instantly and
//! deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::timeout;

use relink_core::{
    ConnectParams, Connection, Driver, QueryResult, RelinkError, Result, Value,
};

use crate::events::ConnectionEvent;
use crate::manager::ManagedConnection;

/// Upper bound on event waits; paused-clock tests fail fast instead of
/// hanging when an expected event never fires.
const EVENT_WAIT: Duration = Duration::from_secs(600);

/// Shared knobs and counters for the mock driver and its connections
#[derive(Default)]
struct MockState {
    connect_count: AtomicU32,
    ping_count: AtomicU32,
    query_count: AtomicU32,
    close_count: AtomicU32,

    fail_connects: AtomicU32,
    fail_all_connects: AtomicBool,
    fail_pings: AtomicU32,
    fail_all_pings: AtomicBool,
    fail_queries: AtomicU32,
    fail_closes: AtomicU32,

    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl MockState {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        if counter.load(Ordering::SeqCst) > 0 {
            counter.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

struct MockDriver {
    state: Arc<MockState>,
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, _params: &ConnectParams) -> Result<Arc<dyn Connection>> {
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_all_connects.load(Ordering::SeqCst)
            || MockState::take_failure(&self.state.fail_connects)
        {
            return Err(RelinkError::Connection("mock connect refused".into()));
        }
        Ok(Arc::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        self.state.ping_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_all_pings.load(Ordering::SeqCst)
            || MockState::take_failure(&self.state.fail_pings)
        {
            return Err(RelinkError::Connection("mock ping failed".into()));
        }
        Ok(())
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.state.query_count.fetch_add(1, Ordering::SeqCst);
        if MockState::take_failure(&self.state.fail_queries) {
            return Err(RelinkError::Query("mock query failed".into()));
        }

        // Track overlapping calls; the exclusion gate must keep this at 1
        let concurrent = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_in_flight
            .fetch_max(concurrent, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if sql == "SELECT 1" {
            Ok(QueryResult::with_rows(
                vec!["1".into()],
                vec![vec![Value::Int64(1)]],
            ))
        } else {
            Ok(QueryResult::empty())
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
        if MockState::take_failure(&self.state.fail_closes) {
            return Err(RelinkError::Connection("mock close failed".into()));
        }
        Ok(())
    }
}

fn manager_with_mock() -> (Arc<ManagedConnection>, Arc<MockState>) {
    let state = MockState::new();
    let driver = Arc::new(MockDriver {
        state: Arc::clone(&state),
    });
    let manager = ManagedConnection::with_defaults(driver, ConnectParams::new("mock", 0));
    (manager, state)
}

/// Receive events until one matches, failing fast on timeout.
async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>,
    mut matches: F,
) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    loop {
        let received = timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for lifecycle event");
        match received {
            Ok(event) if matches(&event) => return event,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("event channel closed"),
        }
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn open_connects_verifies_and_emits_connected() {
        let (manager, state) = manager_with_mock();
        let mut events = manager.subscribe();

        manager.open().await.unwrap();

        assert!(manager.is_connected());
        assert!(!manager.is_broken());
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 1);
        // One verification round trip happened during open
        assert_eq!(state.query_count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            events.recv().await,
            Ok(ConnectionEvent::Connected)
        ));

        let result = manager.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].get(0), Some(&Value::Int64(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_propagates_and_emits_disconnected() {
        let (manager, state) = manager_with_mock();
        let mut events = manager.subscribe();
        state.fail_connects.store(1, Ordering::SeqCst);

        let err = manager.open().await.unwrap_err();
        assert!(matches!(err, RelinkError::Connection(_)));
        assert!(!manager.is_connected());
        assert!(matches!(
            events.recv().await,
            Ok(ConnectionEvent::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn open_fails_when_liveness_verification_fails() {
        let (manager, state) = manager_with_mock();
        state.fail_queries.store(1, Ordering::SeqCst);

        let err = manager.open().await.unwrap_err();
        assert!(matches!(err, RelinkError::Query(_)));
        assert!(!manager.is_connected());
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_on_broken_manager_never_touches_the_driver() {
        let (manager, state) = manager_with_mock();
        manager.mark_broken();

        let err = manager.open().await.unwrap_err();
        assert!(matches!(err, RelinkError::Broken));
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_emits_disconnected_and_stops_pings() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        let mut events = manager.subscribe();

        // Two ping cycles at the default 500ms interval
        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert_eq!(state.ping_count.load(Ordering::SeqCst), 2);

        manager.close().await.unwrap();
        assert!(!manager.is_connected());
        assert_eq!(state.close_count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            events.recv().await,
            Ok(ConnectionEvent::Disconnected)
        ));

        // The monitor is gone; no further pings
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.ping_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_propagates_underlying_error() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        state.fail_closes.store(1, Ordering::SeqCst);

        let err = manager.close().await.unwrap_err();
        assert!(matches!(err, RelinkError::Connection(_)));
        // Disconnection was already announced; the manager is down
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn close_on_broken_manager_is_refused() {
        let (manager, _state) = manager_with_mock();
        manager.mark_broken();
        assert!(matches!(
            manager.close().await,
            Err(RelinkError::Broken)
        ));
    }
}

mod exclusion {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn gate_serializes_concurrent_queries() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.query("SELECT 1", &[]).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 1);
    }
}

mod recovery {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ping_failure_triggers_reconnect_without_breaking() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        let mut events = manager.subscribe();

        state.fail_pings.store(1, Ordering::SeqCst);

        // Recovery tears down, reopens, and re-announces the connection
        wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Disconnected)
        })
        .await;
        let mut saw_broken = false;
        loop {
            let event = wait_for_event(&mut events, |_| true).await;
            match event {
                ConnectionEvent::Connected => break,
                ConnectionEvent::Broken(_) => {
                    saw_broken = true;
                    break;
                }
                ConnectionEvent::Disconnected => continue,
            }
        }

        assert!(!saw_broken);
        assert!(manager.is_connected());
        assert!(!manager.is_broken());
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 2);

        // Health monitoring resumed on the new connection
        let pings_before = state.ping_count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(state.ping_count.load(Ordering::SeqCst) > pings_before);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_expiry_breaks_exactly_once() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        let mut events = manager.subscribe();

        let started = tokio::time::Instant::now();
        state.fail_all_pings.store(true, Ordering::SeqCst);
        state.fail_all_connects.store(true, Ordering::SeqCst);

        wait_for_event(&mut events, ConnectionEvent::is_broken).await;

        // The budget runs from the first detected problem, not per retry
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "broke early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(70), "broke late: {elapsed:?}");

        assert!(manager.is_broken());
        assert!(!manager.is_connected());

        // No second broken notification ever fires
        let second = timeout(Duration::from_secs(30), async {
            wait_for_event(&mut events, ConnectionEvent::is_broken).await
        })
        .await;
        assert!(second.is_err());

        assert!(matches!(manager.open().await, Err(RelinkError::Broken)));
        assert!(matches!(manager.close().await, Err(RelinkError::Broken)));
        assert!(matches!(
            manager.query("SELECT 1", &[]).await,
            Err(RelinkError::ConnectionLost)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn direct_recover_reconnects_and_disarms_budget() {
        let (manager, _state) = manager_with_mock();

        manager.recover().await;
        assert!(manager.is_connected());

        // Well past the budget; a leaked timer would break the manager
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!manager.is_broken());
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_survives_failed_attempts_within_budget() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        let mut events = manager.subscribe();

        // One ping failure and two failed reconnects, then success
        state.fail_pings.store(1, Ordering::SeqCst);
        state.fail_connects.store(2, Ordering::SeqCst);

        wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
        assert!(manager.is_connected());
        assert!(!manager.is_broken());
        // Initial connect, two refused attempts, one successful reconnect
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 4);
    }
}

mod queuing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn queued_query_completes_after_open() {
        let (manager, _state) = manager_with_mock();

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.query("SELECT 1", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        manager.open().await.unwrap();

        let result = timeout(EVENT_WAIT, waiter)
            .await
            .expect("queued query never completed")
            .unwrap()
            .unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_query_fails_when_manager_breaks() {
        let (manager, state) = manager_with_mock();
        state.fail_all_connects.store(true, Ordering::SeqCst);

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.query("SELECT 1", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Force a recovery cycle that can never succeed
        {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.recover().await });
        }

        let err = timeout(EVENT_WAIT, waiter)
            .await
            .expect("queued query never settled")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RelinkError::ConnectionLost));
        assert!(manager.is_broken());
    }

    #[tokio::test(start_paused = true)]
    async fn query_error_propagates_without_triggering_recovery() {
        let (manager, state) = manager_with_mock();
        manager.open().await.unwrap();
        let mut events = manager.subscribe();

        state.fail_queries.store(1, Ordering::SeqCst);
        let err = manager.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, RelinkError::Query(_)));

        // Still connected; a failing query is the caller's problem
        assert!(manager.is_connected());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 1);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }
}

mod formatting {
    use super::*;

    #[test]
    fn format_is_a_stateless_pass_through() {
        let sql = ManagedConnection::format(
            "SELECT * FROM ?? WHERE id = ?",
            &[Value::Text("jobs".into()), Value::Int64(3)],
        );
        assert_eq!(sql, "SELECT * FROM `jobs` WHERE id = 3");
    }
}
