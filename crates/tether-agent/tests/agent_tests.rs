//! Agent tests — receive loop dispatch, heartbeat, backoff and the
//! reconnection state machine, all over in-memory transports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tether_agent::heartbeat::heartbeat_loop;
use tether_agent::*;
use tether_protocol::{CommandMessage, CommandOutcome, HandlerError, HandlerResult, Status};
use tether_transport::memory::{self, MemoryConnection};
use tether_transport::{ConnectionInfo, Connector, Transport, TransportError};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Counts invocations. `fail` returns an error, `explode` panics, `slow`
/// sleeps for `delay_ms`; everything else echoes `seq` back with status ok.
#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
}

impl CommandHandler for CountingHandler {
    async fn handle(&self, command: &CommandMessage, _connection: &ConnectionInfo) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match command.action() {
            Some("fail") => Err(HandlerError::failed("device unavailable")),
            Some("explode") => panic!("boom"),
            Some("slow") => {
                let delay = command.field("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(CommandOutcome::new(Status::OK)
                    .with("seq", command.field("seq").cloned().unwrap_or(Value::Null)))
            }
            _ => Ok(CommandOutcome::new(Status::OK)
                .with("seq", command.field("seq").cloned().unwrap_or(Value::Null))),
        }
    }
}

struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Result<MemoryConnection, TransportError>>>,
    dialed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    fn new(outcomes: Vec<Result<MemoryConnection, TransportError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            dialed: Arc::default(),
        }
    }
}

fn refused() -> Result<MemoryConnection, TransportError> {
    Err(TransportError::Connect {
        address: "ws://relay".into(),
        reason: "connection refused".into(),
    })
}

impl Connector for ScriptedConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, address: &str) -> Result<MemoryConnection, TransportError> {
        self.dialed.lock().unwrap().push(address.to_string());
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(refused)
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

fn config(floor_ms: u64, jitter_ms: u64) -> AgentConfig {
    AgentConfig {
        url: "ws://relay".into(),
        device_id: Some("device-1".into()),
        heartbeat_interval: Duration::from_secs(3600),
        backoff_floor: Duration::from_millis(floor_ms),
        backoff_ceiling: Duration::from_secs(30),
        jitter: Duration::from_millis(jitter_ms),
    }
}

async fn recv_json(conn: &MemoryConnection) -> Value {
    let frame = timeout(WAIT, conn.receive())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    serde_json::from_str(&frame).unwrap()
}

/// No frame arrives within a short window (a close is fine).
async fn assert_silent(conn: &MemoryConnection) {
    if let Ok(Ok(frame)) = timeout(Duration::from_millis(50), conn.receive()).await {
        panic!("unexpected frame: {frame}");
    }
}

async fn send(conn: &MemoryConnection, value: Value) {
    conn.send(value.to_string()).await.unwrap();
}

/// Spawn a receive loop on the agent end of a fresh pair; returns the
/// operator end, the handler and the loop's join handle.
fn spawn_loop<H: CommandHandler>(
    handler: H,
) -> (
    MemoryConnection,
    Arc<H>,
    tokio::task::JoinHandle<TransportError>,
) {
    let (agent, operator) = memory::pair("agent", "operator");
    let handler = Arc::new(handler);
    let task = {
        let handler = handler.clone();
        tokio::spawn(async move { receive_loop(&agent, handler.as_ref()).await })
    };
    (operator, handler, task)
}

// ─────────────────────────────────────────────────────────────────────────────
// Receive loop
// ─────────────────────────────────────────────────────────────────────────────

mod receiving {
    use super::*;

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (operator, _handler, _task) = spawn_loop(ActionRouter::with_defaults());
        send(&operator, json!({"action": "ping"})).await;
        assert_eq!(recv_json(&operator).await, json!({"action": "ping", "status": "pong"}));
    }

    #[tokio::test]
    async fn sender_is_echoed_as_target() {
        let (operator, _handler, _task) = spawn_loop(ActionRouter::with_defaults());
        send(&operator, json!({"action": "ping", "sender": "op-1"})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"action": "ping", "status": "pong", "target": "op-1"})
        );
    }

    #[tokio::test]
    async fn malformed_frames_do_not_end_the_loop() {
        let (operator, handler, task) = spawn_loop(CountingHandler::default());
        operator.send("{not json".into()).await.unwrap();
        operator.send("[1,2]".into()).await.unwrap();
        send(&operator, json!({"action": "tap", "seq": 1})).await;

        let resp = recv_json(&operator).await;
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["seq"], 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn forbidden_gets_no_handler_call_and_no_response() {
        let (operator, handler, _task) = spawn_loop(CountingHandler::default());
        send(&operator, json!({"message": "Forbidden", "connectionId": "x"})).await;
        send(&operator, json!({"message": "forbidden"})).await;
        send(&operator, json!({"action": "tap", "seq": 7})).await;

        // The first thing back is the answer to the tap.
        let resp = recv_json(&operator).await;
        assert_eq!(resp["seq"], 7);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn relayed_responses_are_not_dispatched() {
        let (operator, handler, _task) = spawn_loop(CountingHandler::default());
        send(&operator, json!({"action": "ping", "status": "pong"})).await;
        send(&operator, json!({"action": "tap", "seq": 2})).await;

        let resp = recv_json(&operator).await;
        assert_eq!(resp["seq"], 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_becomes_error_response_and_loop_continues() {
        let (operator, handler, _task) = spawn_loop(CountingHandler::default());
        send(&operator, json!({"action": "fail", "sender": "op"})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"action": "fail", "status": "error", "target": "op", "error": "device unavailable"})
        );

        send(&operator, json!({"action": "tap", "seq": 3})).await;
        assert_eq!(recv_json(&operator).await["seq"], 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_panic_becomes_error_response_and_loop_continues() {
        let (operator, _handler, task) = spawn_loop(CountingHandler::default());
        send(&operator, json!({"action": "explode"})).await;

        let resp = recv_json(&operator).await;
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["error"], "handler panicked: boom");

        send(&operator, json!({"action": "tap", "seq": 4})).await;
        assert_eq!(recv_json(&operator).await["seq"], 4);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn unknown_and_missing_actions_are_errors() {
        let (operator, _handler, _task) = spawn_loop(ActionRouter::with_defaults());
        send(&operator, json!({"action": "dance"})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"action": "dance", "status": "error", "error": "unknown action: dance"})
        );

        send(&operator, json!({"x": 1})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"status": "error", "error": "missing action"})
        );
    }

    #[tokio::test]
    async fn nested_body_is_unwrapped_before_dispatch() {
        let (operator, _handler, _task) = spawn_loop(ActionRouter::with_defaults());
        let inner = json!({"action": "ping", "sender": "gateway-op"}).to_string();
        send(&operator, json!({"requestContext": {}, "body": inner})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"action": "ping", "status": "pong", "target": "gateway-op"})
        );
    }

    #[tokio::test]
    async fn responses_follow_arrival_order() {
        let (operator, _handler, _task) = spawn_loop(CountingHandler::default());
        for (seq, delay) in [(1, 40), (2, 0), (3, 20), (4, 0)] {
            send(&operator, json!({"action": "slow", "seq": seq, "delay_ms": delay})).await;
        }
        for seq in 1..=4 {
            assert_eq!(recv_json(&operator).await["seq"], seq);
        }
    }

    #[tokio::test]
    async fn loop_returns_when_peer_closes() {
        let (operator, _handler, task) = spawn_loop(ActionRouter::with_defaults());
        drop(operator);
        let reason = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(reason, TransportError::Closed(_)));
    }

    #[tokio::test]
    async fn process_frame_drops_what_it_cannot_answer() {
        let handler = CountingHandler::default();
        let info = ConnectionInfo::new("memory://test");
        assert!(process_frame("garbage", &info, &handler).await.is_none());
        assert!(process_frame(r#"{"message":"FORBIDDEN"}"#, &info, &handler).await.is_none());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let resp = process_frame(r#"{"type":"tap","seq":9}"#, &info, &handler).await.unwrap();
        assert_eq!(resp.action.as_deref(), Some("tap"));
        assert_eq!(resp.result.get("seq"), Some(&json!(9)));
    }

    #[test]
    fn build_response_maps_outcomes() {
        let command = CommandMessage::new("find").with_sender("op");

        let ok = build_response(&command, Ok(CommandOutcome::new(Status::CLICKED).with("x", json!(1))));
        assert_eq!(ok.status, "clicked");
        assert_eq!(ok.target.as_deref(), Some("op"));
        assert_eq!(ok.result.get("x"), Some(&json!(1)));
        assert!(ok.error.is_none());

        let err = build_response(&command, Err(HandlerError::invalid_params("missing selector")));
        assert!(err.is_error());
        assert_eq!(err.error.as_deref(), Some("missing selector"));
        assert!(err.result.is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

mod routing {
    use super::*;

    struct Tap;

    impl Action for Tap {
        fn name(&self) -> &str {
            "tap"
        }

        async fn run(&self, command: &CommandMessage) -> HandlerResult {
            let (Some(x), Some(y)) = (command.field("x"), command.field("y")) else {
                return Err(HandlerError::invalid_params("tap needs x and y"));
            };
            Ok(CommandOutcome::new(Status::OK).with("at", json!([x, y])))
        }
    }

    #[test]
    fn defaults_register_ping() {
        assert_eq!(ActionRouter::with_defaults().actions(), vec!["ping"]);
        assert!(ActionRouter::new().actions().is_empty());
    }

    #[tokio::test]
    async fn registered_actions_are_dispatched() {
        let mut router = ActionRouter::with_defaults();
        router.register(Tap);
        assert_eq!(router.actions(), vec!["ping", "tap"]);

        let info = ConnectionInfo::new("memory://test");
        let outcome = router
            .handle(&CommandMessage::new("tap").with_field("x", json!(1)).with_field("y", json!(2)), &info)
            .await
            .unwrap();
        assert_eq!(outcome.result.get("at"), Some(&json!([1, 2])));

        let err = router.handle(&CommandMessage::new("tap"), &info).await.unwrap_err();
        assert_eq!(err.kind, tether_protocol::HandlerErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn ping_has_no_payload() {
        let info = ConnectionInfo::new("memory://test");
        let outcome = ActionRouter::with_defaults()
            .handle(&CommandMessage::ping(), &info)
            .await
            .unwrap();
        assert_eq!(outcome.status, "pong");
        assert!(outcome.result.is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff and config
// ─────────────────────────────────────────────────────────────────────────────

mod backoff_policy {
    use super::*;

    #[test]
    fn doubles_from_floor_and_caps_at_ceiling() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), Duration::ZERO);
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn jitter_stays_in_bounds_and_sequence_is_non_decreasing() {
        let jitter = Duration::from_millis(500);
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30), jitter);
        let mut previous_base = Duration::ZERO;
        for _ in 0..200 {
            let delay = backoff.next_delay();
            let base = backoff.current();
            assert!(delay >= base, "{delay:?} < {base:?}");
            assert!(delay < base + jitter, "{delay:?} >= {base:?} + jitter");
            assert!(base >= previous_base);
            assert!(base <= Duration::from_secs(30));
            previous_base = base;
        }
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), Duration::ZERO);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn endpoint_appends_device_id() {
        let mut cfg = AgentConfig::default();
        assert_eq!(cfg.endpoint(), "ws://127.0.0.1:8080/");

        cfg.url = "wss://relay.example/test".into();
        cfg.device_id = Some("tablet-3".into());
        assert_eq!(cfg.endpoint(), "wss://relay.example/test?deviceId=tablet-3");

        cfg.url = "wss://relay.example/test?stage=dev".into();
        assert_eq!(cfg.endpoint(), "wss://relay.example/test?stage=dev&deviceId=tablet-3");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────────────────────────────────────

mod heartbeats {
    use super::*;

    #[tokio::test]
    async fn sends_pings_on_interval() {
        let (agent, operator) = memory::pair("agent", "operator");
        let handle = HeartbeatHandle::spawn(Arc::new(agent), Duration::from_millis(20));

        for _ in 0..3 {
            assert_eq!(recv_json(&operator).await, json!({"action": "ping"}));
        }
        handle.cancel().await;
    }

    #[tokio::test]
    async fn ends_when_send_fails() {
        let (agent, operator) = memory::pair("agent", "operator");
        drop(operator);
        let reason = timeout(WAIT, heartbeat_loop(Arc::new(agent), Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(matches!(reason, TransportError::Send(_)));
    }

    #[tokio::test]
    async fn stopped_reports_the_failure() {
        let (agent, operator) = memory::pair("agent", "operator");
        let mut handle = HeartbeatHandle::spawn(Arc::new(agent), Duration::from_millis(10));
        drop(operator);
        let reason = timeout(WAIT, handle.stopped()).await.unwrap();
        assert!(matches!(reason, TransportError::Send(_)));
        // Cancelling an already finished heartbeat is fine.
        handle.cancel().await;
    }

    #[tokio::test]
    async fn cancel_does_not_wait_for_the_interval() {
        let (agent, operator) = memory::pair("agent", "operator");
        let handle = HeartbeatHandle::spawn(Arc::new(agent), Duration::from_secs(3600));
        assert_eq!(recv_json(&operator).await, json!({"action": "ping"}));

        timeout(Duration::from_millis(200), handle.cancel())
            .await
            .expect("cancel blocked on the heartbeat interval");

        // Nothing else is sent after cancellation.
        assert_silent(&operator).await;
    }

    #[tokio::test]
    async fn zero_interval_disables_pings() {
        let (agent, operator) = memory::pair("agent", "operator");
        let handle = HeartbeatHandle::spawn(Arc::new(agent), Duration::ZERO);
        assert_silent(&operator).await;
        handle.cancel().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

mod supervision {
    use super::*;

    #[tokio::test]
    async fn three_failures_then_success_backs_off_then_resets() {
        let (agent, operator) = memory::pair("agent", "operator");
        let connector = ScriptedConnector::new(vec![refused(), refused(), refused(), Ok(agent)]);
        let sleeper = RecordingSleeper::default();
        let mut sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            sleeper.clone(),
            config(100, 0),
        );

        assert_eq!(sup.state(), ConnectionState::Connecting);
        for expected_ms in [200, 400, 800] {
            assert!(matches!(sup.step().await, Transition::ConnectFailed(_)));
            assert_eq!(sup.state(), ConnectionState::Disconnected);
            match sup.step().await {
                Transition::Waited(delay) => assert_eq!(delay, Duration::from_millis(expected_ms)),
                other => panic!("expected wait, got {other:?}"),
            }
            assert_eq!(sup.state(), ConnectionState::Connecting);
        }

        match sup.step().await {
            Transition::Connected { connection_id } => assert_eq!(connection_id, "agent"),
            other => panic!("expected connect, got {other:?}"),
        }
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.backoff().current(), Duration::from_millis(100));

        drop(operator);
        let ended = timeout(WAIT, sup.step()).await.unwrap();
        assert!(matches!(ended, Transition::SessionEnded(_)));
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        // The first retry after a successful session starts over from the floor.
        match sup.step().await {
            Transition::Waited(delay) => assert_eq!(delay, Duration::from_millis(200)),
            other => panic!("expected wait, got {other:?}"),
        }

        let slept: Vec<u64> = sleeper.slept.lock().unwrap().iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(slept, vec![200, 400, 800, 200]);
    }

    #[tokio::test]
    async fn delays_include_bounded_jitter() {
        let connector = ScriptedConnector::new(Vec::new());
        let mut sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            RecordingSleeper::default(),
            config(100, 50),
        );

        for base_ms in [200u64, 400, 800, 1600] {
            assert!(matches!(sup.step().await, Transition::ConnectFailed(_)));
            let Transition::Waited(delay) = sup.step().await else {
                panic!("expected wait");
            };
            assert!(delay >= Duration::from_millis(base_ms));
            assert!(delay < Duration::from_millis(base_ms + 50));
        }
    }

    #[tokio::test]
    async fn dials_the_configured_endpoint() {
        let connector = ScriptedConnector::new(Vec::new());
        let dialed = connector.dialed.clone();
        let mut sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            RecordingSleeper::default(),
            config(100, 0),
        );
        sup.step().await;
        sup.step().await;
        sup.step().await;
        assert_eq!(
            *dialed.lock().unwrap(),
            vec!["ws://relay?deviceId=device-1", "ws://relay?deviceId=device-1"]
        );
    }

    #[tokio::test]
    async fn session_serves_commands_until_peer_leaves() {
        let (agent, operator) = memory::pair("agent", "operator");
        let connector = ScriptedConnector::new(vec![Ok(agent)]);
        let mut sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            RecordingSleeper::default(),
            config(100, 0),
        );
        assert!(matches!(sup.step().await, Transition::Connected { .. }));

        let session = tokio::spawn(async move {
            let transition = sup.step().await;
            (sup, transition)
        });

        // The heartbeat's first ping arrives right after connect.
        assert_eq!(recv_json(&operator).await, json!({"action": "ping"}));

        send(&operator, json!({"action": "ping", "sender": "op"})).await;
        assert_eq!(
            recv_json(&operator).await,
            json!({"action": "ping", "status": "pong", "target": "op"})
        );

        drop(operator);
        let (sup, transition) = timeout(WAIT, session).await.unwrap().unwrap();
        assert!(matches!(transition, Transition::SessionEnded(TransportError::Closed(_))));
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn teardown_is_not_delayed_by_a_long_heartbeat_interval() {
        let (agent, operator) = memory::pair("agent", "operator");
        let connector = ScriptedConnector::new(vec![Ok(agent)]);
        let mut sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            RecordingSleeper::default(),
            config(100, 0),
        );
        assert!(matches!(sup.step().await, Transition::Connected { .. }));

        let session = tokio::spawn(async move { sup.step().await });

        // First ping goes out at once; the next one is an hour away.
        assert_eq!(recv_json(&operator).await, json!({"action": "ping"}));
        operator.close().await;

        let transition = timeout(Duration::from_millis(500), session)
            .await
            .expect("session teardown waited on the heartbeat")
            .unwrap();
        assert!(matches!(transition, Transition::SessionEnded(_)));
    }

    #[tokio::test]
    async fn dropping_a_running_supervisor_stops_the_heartbeat() {
        let (agent, operator) = memory::pair("agent", "operator");
        let connector = ScriptedConnector::new(vec![Ok(agent)]);
        let sup = Supervisor::with_sleeper(
            connector,
            ActionRouter::with_defaults(),
            RecordingSleeper::default(),
            AgentConfig {
                heartbeat_interval: Duration::from_millis(20),
                ..config(100, 0)
            },
        );

        let task = tokio::spawn(sup.run());
        assert_eq!(recv_json(&operator).await, json!({"action": "ping"}));

        task.abort();
        let _ = task.await;

        // Nothing may keep pinging on the agent's behalf; once the last owner
        // is gone the operator sees the connection end.
        let released = timeout(WAIT, async {
            while operator.receive().await.is_ok() {}
        })
        .await;
        assert!(released.is_ok(), "heartbeat outlived its supervisor");
    }
}
