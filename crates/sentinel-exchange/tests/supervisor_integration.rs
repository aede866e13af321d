//! Integration tests for ConnectionSupervisor with a scripted stream connector.

use async_trait::async_trait;
use sentinel_exchange::{
    stream_channels, ConnectionState, ConnectionSupervisor, ExchangeError, ExchangeResult,
    ExitReason, ReconnectPolicy, SessionEnd, SessionEndSender, StreamConnector, StreamQueues,
    StreamSession, StreamSinks, WatchdogConfig,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

enum Step {
    Fail(ExchangeError),
    Connect,
    ConnectThenEnd(SessionEnd),
}

/// Connector that replays a fixed script; once the script is empty every
/// connect succeeds with a silent session.
struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    live_sessions: Mutex<Vec<SessionEndSender>>,
}

impl ScriptedConnector {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            live_sessions: Mutex::new(Vec::new()),
        })
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, _sinks: &StreamSinks) -> ExchangeResult<StreamSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Connect);

        match step {
            Step::Fail(err) => Err(err),
            Step::Connect => {
                let (session, ended) = StreamSession::new(None);
                self.live_sessions.lock().unwrap().push(ended);
                Ok(session)
            }
            Step::ConnectThenEnd(reason) => {
                let (session, ended) = StreamSession::new(None);
                ended.end(reason);
                self.live_sessions.lock().unwrap().push(ended);
                Ok(session)
            }
        }
    }

    async fn disconnect(&self, session: StreamSession) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        session.shutdown().await;
    }
}

fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_secs(1),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(60),
        max_attempts,
    }
}

fn watchdog(fail_fast: bool) -> WatchdogConfig {
    WatchdogConfig {
        timeout: Duration::from_secs(10),
        interval: Duration::from_secs(1),
        fail_fast,
    }
}

fn supervisor(
    connector: Arc<ScriptedConnector>,
    policy: ReconnectPolicy,
    watchdog: WatchdogConfig,
) -> (Arc<ConnectionSupervisor>, StreamQueues) {
    let (sinks, queues) = stream_channels(16);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        connector,
        sinks,
        policy,
        watchdog,
        CancellationToken::new(),
    ));
    (supervisor, queues)
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("supervisor dropped");
}

fn network_error() -> ExchangeError {
    ExchangeError::Network("connection refused".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_and_counter_reset() {
    let connector = ScriptedConnector::new(vec![
        Step::Fail(network_error()),
        Step::Fail(network_error()),
        Step::Connect,
    ]);
    let (supervisor, _queues) = supervisor(connector.clone(), policy(5), watchdog(false));
    let mut states = supervisor.subscribe();

    let start = Instant::now();
    let handle = supervisor.spawn();
    wait_for_state(&mut states, ConnectionState::Connected).await;

    // 1s + 2s backoff before the third attempt
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
    assert_eq!(connector.connects(), 3);
    assert_eq!(supervisor.reconnect_attempts(), 0);

    supervisor.stop();
    assert_eq!(handle.join().await, ExitReason::Shutdown);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_fatal_without_retry() {
    let connector = ScriptedConnector::new(vec![Step::Fail(ExchangeError::Api {
        code: -2015,
        message: "Invalid API-key, IP, or permissions for action.".to_string(),
    })]);
    let (supervisor, _queues) = supervisor(connector.clone(), policy(5), watchdog(false));

    let reason = supervisor.spawn().join().await;

    assert!(matches!(reason, ExitReason::AuthFailure(_)));
    assert_eq!(supervisor.state(), ConnectionState::FatalError);
    assert_eq!(connector.connects(), 1);
    assert_eq!(supervisor.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_limit_escalates() {
    let connector = ScriptedConnector::new(
        (0..10).map(|_| Step::Fail(network_error())).collect(),
    );
    let (supervisor, _queues) = supervisor(connector.clone(), policy(3), watchdog(false));

    let reason = supervisor.spawn().join().await;

    assert_eq!(reason, ExitReason::ReconnectLimit { attempts: 3 });
    assert_eq!(supervisor.state(), ConnectionState::FatalError);
    assert_eq!(connector.connects(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_session_end_triggers_reconnect() {
    let connector = ScriptedConnector::new(vec![
        Step::ConnectThenEnd(SessionEnd::ListenKeyExpired),
        Step::Connect,
    ]);
    let (supervisor, _queues) = supervisor(connector.clone(), policy(5), watchdog(false));
    let mut states = supervisor.subscribe();
    let handle = supervisor.spawn();

    wait_for_state(&mut states, ConnectionState::Reconnecting).await;
    wait_for_state(&mut states, ConnectionState::Connected).await;

    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.reconnect_attempts(), 0);

    supervisor.stop();
    assert_eq!(handle.join().await, ExitReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_forces_reconnect_on_stale_stream() {
    let connector = ScriptedConnector::new(vec![Step::Connect, Step::Connect]);
    let (supervisor, _queues) = supervisor(connector.clone(), policy(5), watchdog(false));
    let mut states = supervisor.subscribe();
    let handle = supervisor.spawn();

    wait_for_state(&mut states, ConnectionState::Connected).await;
    wait_for_state(&mut states, ConnectionState::Reconnecting).await;
    wait_for_state(&mut states, ConnectionState::Connected).await;

    assert_eq!(connector.connects(), 2);
    assert!(supervisor.exit_reason().is_none());

    supervisor.stop();
    assert_eq!(handle.join().await, ExitReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_fail_fast() {
    let connector = ScriptedConnector::new(vec![Step::Connect]);
    let (supervisor, _queues) = supervisor(connector.clone(), policy(5), watchdog(true));

    let reason = supervisor.spawn().join().await;

    assert_eq!(reason, ExitReason::WatchdogStale);
    assert_eq!(supervisor.state(), ConnectionState::FatalError);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_is_prompt() {
    let connector = ScriptedConnector::new(vec![Step::Fail(network_error())]);
    let slow = ReconnectPolicy {
        initial_delay: Duration::from_secs(300),
        ..policy(5)
    };
    let (supervisor, _queues) = supervisor(connector.clone(), slow, watchdog(false));
    let mut states = supervisor.subscribe();
    let handle = supervisor.spawn();

    wait_for_state(&mut states, ConnectionState::Reconnecting).await;
    let start = Instant::now();
    supervisor.stop();
    supervisor.stop();

    assert_eq!(handle.join().await, ExitReason::Shutdown);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(connector.connects(), 1);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}
