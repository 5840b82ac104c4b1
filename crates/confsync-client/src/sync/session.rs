use std::fmt;
use std::sync::Arc;

use confsync_proto::{
    CMD_CONFIG_CHANGED, CMD_GET_CONFIG, CMD_HEARTBEAT, FrameKind, ProtoError,
    Request, decode_oneway, decode_response, encode_request, read_frame,
    write_frame,
};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::supervisor::SyncPolicy;
use crate::endpoint::Endpoint;
use crate::error::SyncError;
use crate::sync::extract_kv;
use crate::value::FlatMap;

const CHANNEL_DEPTH: usize = 64;

/// Why a session died. Fatal reasons reach the supervisor exactly once
/// per session; everything else stays inside and is only logged.
#[derive(Debug)]
pub(crate) enum SessionFatal {
    Read(ProtoError),
    Write(ProtoError),
    HeartbeatTimeout,
}

impl fmt::Display for SessionFatal {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SessionFatal::Read(err) => write!(f, "read failed: {err}"),
            SessionFatal::Write(err) => write!(f, "write failed: {err}"),
            SessionFatal::HeartbeatTimeout => {
                write!(f, "liveness window elapsed")
            }
        }
    }
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// One live connection to the center: a read loop feeding typed
/// channels, a heartbeat loop watching liveness, and a dispatch loop
/// acting on decoded payloads. All three select on the session token.
pub(crate) struct Session {
    token: CancellationToken,
    pub(crate) fatal_rx: mpsc::Receiver<SessionFatal>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Sends the initial GETCONFIG on the fresh connection and spawns
    /// the three session loops.
    pub(crate) async fn open(
        stream: TcpStream,
        endpoint: &Endpoint,
        refresh_tx: mpsc::Sender<FlatMap>,
        policy: SyncPolicy,
        parent: &CancellationToken,
    ) -> Result<Self, SyncError> {
        let (read_half, write_half) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(write_half));

        send_request(&writer, &Request::get_config(endpoint.auth()))
            .await
            .map_err(SyncError::Frame)?;

        let token = parent.child_token();
        let (fatal_tx, fatal_rx) = mpsc::channel(4);
        let (responses_tx, responses_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (oneways_tx, oneways_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (liveness_tx, liveness_rx) = watch::channel(());

        let tasks = vec![
            tokio::spawn(read_loop(
                read_half,
                responses_tx,
                oneways_tx,
                fatal_tx.clone(),
                token.clone(),
            )),
            tokio::spawn(heartbeat_loop(
                Arc::clone(&writer),
                liveness_rx,
                fatal_tx.clone(),
                token.clone(),
                policy,
            )),
            tokio::spawn(dispatch_loop(
                responses_rx,
                oneways_rx,
                writer,
                liveness_tx,
                refresh_tx,
                endpoint.clone(),
                fatal_tx,
                token.clone(),
            )),
        ];

        Ok(Self { token, fatal_rx, tasks })
    }

    /// Cancels every loop and waits for them to exit. Dropping the last
    /// stream half closes the connection.
    pub(crate) async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn send_request(
    writer: &SharedWriter,
    request: &Request,
) -> Result<(), ProtoError> {
    let payload = encode_request(request)?;
    let mut guard = writer.lock().await;
    write_frame(&mut *guard, FrameKind::Request, &payload).await
}

/// Decodes frames off the wire and routes them by kind. Any decode or
/// IO error is fatal to the whole session.
async fn read_loop(
    mut reader: OwnedReadHalf,
    responses: mpsc::Sender<Vec<u8>>,
    oneways: mpsc::Sender<Vec<u8>>,
    fatal: mpsc::Sender<SessionFatal>,
    token: CancellationToken,
) {
    loop {
        let decoded = tokio::select! {
            _ = token.cancelled() => break,
            decoded = read_frame(&mut reader) => decoded,
        };

        match decoded {
            Ok((kind, payload)) => match FrameKind::from_wire(kind) {
                Some(FrameKind::Response) => {
                    if responses.send(payload).await.is_err() {
                        break;
                    }
                }
                Some(FrameKind::Oneway) => {
                    if oneways.send(payload).await.is_err() {
                        break;
                    }
                }
                Some(FrameKind::Request) | None => {
                    warn!("dropping inbound frame of unexpected kind: kind={kind}");
                }
            },
            Err(err) => {
                if !token.is_cancelled() {
                    warn!("connection read failed: error={err}");
                    let _ = fatal.send(SessionFatal::Read(err)).await;
                }
                break;
            }
        }
    }
}

/// Sends a heartbeat on every tick and watches the liveness deadline.
///
/// The deadline moves only when inbound response frames arrive (the
/// dispatch loop signals them through the watch channel); if it fires,
/// the center has been silent for the whole window and the session is
/// declared dead.
async fn heartbeat_loop(
    writer: SharedWriter,
    mut liveness: watch::Receiver<()>,
    fatal: mpsc::Sender<SessionFatal>,
    token: CancellationToken,
    policy: SyncPolicy,
) {
    let mut tick = interval(policy.heartbeat_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately once; the first heartbeat should come
    // one full period after the session opened.
    tick.tick().await;

    let mut deadline = Instant::now() + policy.liveness_window;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                match send_request(&writer, &Request::heartbeat()).await {
                    Ok(()) => debug!("heartbeat sent"),
                    Err(err) => {
                        warn!("heartbeat write failed: error={err}");
                        let _ = fatal.send(SessionFatal::Write(err)).await;
                        break;
                    }
                }
            }
            changed = liveness.changed() => {
                if changed.is_err() {
                    break;
                }
                deadline = Instant::now() + policy.liveness_window;
            }
            _ = sleep_until(deadline) => {
                warn!(
                    "no response from center within {:?}",
                    policy.liveness_window
                );
                let _ = fatal.send(SessionFatal::HeartbeatTimeout).await;
                break;
            }
        }
    }
}

/// Acts on decoded payloads: change pushes trigger a fresh GETCONFIG,
/// configuration responses flow to the refresh channel, everything else
/// is logged. Undecodable JSON drops the frame but keeps the session.
#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    mut responses: mpsc::Receiver<Vec<u8>>,
    mut oneways: mpsc::Receiver<Vec<u8>>,
    writer: SharedWriter,
    liveness: watch::Sender<()>,
    refresh: mpsc::Sender<FlatMap>,
    endpoint: Endpoint,
    fatal: mpsc::Sender<SessionFatal>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            maybe = responses.recv() => {
                let Some(payload) = maybe else { break };
                // Any response frame counts as liveness, decodable or not.
                let _ = liveness.send(());
                handle_response(&payload, &refresh).await;
            }
            maybe = oneways.recv() => {
                let Some(payload) = maybe else { break };
                if !handle_oneway(&payload, &writer, &endpoint, &fatal).await {
                    break;
                }
            }
        }
    }
}

async fn handle_response(
    payload: &[u8],
    refresh: &mpsc::Sender<FlatMap>,
) {
    let response = match decode_response(payload) {
        Ok(response) => response,
        Err(err) => {
            warn!("undecodable response payload: error={err}");
            return;
        }
    };

    if !response.success {
        warn!(
            "center reported failure: command={}, error={:?}",
            response.command,
            response.error.unwrap_or_default()
        );
        return;
    }

    match response.command {
        CMD_HEARTBEAT => debug!("heartbeat acknowledged"),
        CMD_GET_CONFIG => {
            let configs = response
                .result
                .unwrap_or_default()
                .remove("configs")
                .unwrap_or_default();
            let flat = extract_kv(&configs);
            info!(
                "configuration payload received: entries={}",
                flat.len()
            );
            // A closed refresh channel means the subscription is being
            // torn down; the payload is discarded with it.
            let _ = refresh.send(flat).await;
        }
        other => {
            warn!("dropping response with unknown command: command={other}");
        }
    }
}

/// Returns false when the loop should stop (write path is gone).
async fn handle_oneway(
    payload: &[u8],
    writer: &SharedWriter,
    endpoint: &Endpoint,
    fatal: &mpsc::Sender<SessionFatal>,
) -> bool {
    let oneway = match decode_oneway(payload) {
        Ok(oneway) => oneway,
        Err(err) => {
            warn!("undecodable oneway payload: error={err}");
            return true;
        }
    };

    if oneway.command != CMD_CONFIG_CHANGED {
        warn!(
            "ignoring oneway with unknown command: command={}",
            oneway.command
        );
        return true;
    }

    info!("change notification received, pulling configuration");
    match send_request(writer, &Request::get_config(endpoint.auth())).await
    {
        Ok(()) => true,
        Err(err) => {
            warn!("config pull write failed: error={err}");
            let _ = fatal.send(SessionFatal::Write(err)).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::{Session, SessionFatal};
    use crate::sync::supervisor::SyncPolicy;
    use crate::testutil::{
        configs_response, push_change, read_request, reply, reply_raw,
        test_endpoint,
    };

    use confsync_proto::{
        CMD_GET_CONFIG, CMD_HEARTBEAT, FrameKind, Response, encode_frame,
    };

    async fn open_pair(
        policy: SyncPolicy
    ) -> (Session, tokio::net::TcpStream, mpsc::Receiver<crate::value::FlatMap>)
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint =
            test_endpoint(&addr.to_string(), "127.0.0.1:0");

        let (refresh_tx, refresh_rx) = mpsc::channel(8);
        let token = CancellationToken::new();

        let (session, server) = tokio::join!(
            async {
                let stream =
                    crate::sync::dial(&endpoint.tcp_address).await.unwrap();
                Session::open(stream, &endpoint, refresh_tx, policy, &token)
                    .await
                    .unwrap()
            },
            async { listener.accept().await.unwrap().0 },
        );
        (session, server, refresh_rx)
    }

    #[tokio::test]
    async fn initial_getconfig_flows_to_refresh_channel() {
        let (session, mut server, mut refresh_rx) =
            open_pair(SyncPolicy::default()).await;

        let request = read_request(&mut server).await;
        assert_eq!(request.command, CMD_GET_CONFIG);
        assert_eq!(request.data["groupId"], "web");
        assert_eq!(request.data["artifactId"], "svc");

        reply(
            &mut server,
            &configs_response(&[("a.b", json!("x")), ("n", json!(3))]),
        )
        .await;

        let flat = timeout(Duration::from_secs(3), refresh_rx.recv())
            .await
            .expect("payload in time")
            .expect("payload");
        assert_eq!(flat["a.b"], json!("x"));
        assert_eq!(flat["n"], json!(3));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn each_change_push_triggers_one_pull() {
        let (session, mut server, mut refresh_rx) =
            open_pair(SyncPolicy::default()).await;

        let _initial = read_request(&mut server).await;
        reply(&mut server, &configs_response(&[("n", json!(0))])).await;
        assert!(refresh_rx.recv().await.is_some());

        for round in 1..=3 {
            push_change(&mut server).await;
            let request = read_request(&mut server).await;
            assert_eq!(request.command, CMD_GET_CONFIG);
            reply(
                &mut server,
                &configs_response(&[("n", json!(round))]),
            )
            .await;

            let flat = timeout(Duration::from_secs(3), refresh_rx.recv())
                .await
                .expect("payload in time")
                .expect("payload");
            assert_eq!(flat["n"], json!(round));
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn server_failure_is_logged_and_session_survives() {
        let (session, mut server, mut refresh_rx) =
            open_pair(SyncPolicy::default()).await;

        let _initial = read_request(&mut server).await;
        let failure = Response {
            kind: FrameKind::Response.wire(),
            command: CMD_GET_CONFIG,
            success: false,
            result: None,
            error: Some(
                [("code".to_string(), "403".to_string())].into(),
            ),
        };
        reply(&mut server, &failure).await;

        // A later valid exchange proves the session is still up.
        push_change(&mut server).await;
        let _pull = read_request(&mut server).await;
        reply(&mut server, &configs_response(&[("k", json!(1))])).await;

        let flat = timeout(Duration::from_secs(3), refresh_rx.recv())
            .await
            .expect("payload in time")
            .expect("payload");
        assert_eq!(flat["k"], json!(1));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn empty_payload_frame_does_not_kill_session() {
        let (session, mut server, mut refresh_rx) =
            open_pair(SyncPolicy::default()).await;

        let _initial = read_request(&mut server).await;
        // length == 2: a legal frame with an empty (hence unparsable)
        // JSON payload.
        reply_raw(&mut server, &encode_frame(FrameKind::Response, b""))
            .await;
        reply(&mut server, &configs_response(&[("k", json!(1))])).await;

        let flat = timeout(Duration::from_secs(3), refresh_rx.recv())
            .await
            .expect("payload in time")
            .expect("payload");
        assert_eq!(flat["k"], json!(1));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn connection_loss_signals_read_fatal() {
        let (mut session, server, _refresh_rx) =
            open_pair(SyncPolicy::default()).await;

        drop(server);

        let fatal = timeout(Duration::from_secs(3), session.fatal_rx.recv())
            .await
            .expect("fatal in time")
            .expect("fatal");
        assert!(matches!(fatal, SessionFatal::Read(_)));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeats_follow_the_send_tick() {
        let policy = SyncPolicy {
            heartbeat_interval: Duration::from_millis(50),
            liveness_window: Duration::from_secs(10),
            ..SyncPolicy::default()
        };
        let (session, mut server, _refresh_rx) = open_pair(policy).await;

        let _initial = read_request(&mut server).await;
        for _ in 0..2 {
            let request =
                timeout(Duration::from_secs(3), read_request(&mut server))
                    .await
                    .expect("heartbeat in time");
            assert_eq!(request.command, CMD_HEARTBEAT);
            assert!(request.data.is_empty());
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn silent_center_trips_the_liveness_deadline() {
        let policy = SyncPolicy {
            heartbeat_interval: Duration::from_millis(40),
            liveness_window: Duration::from_millis(120),
            ..SyncPolicy::default()
        };
        let (mut session, mut server, _refresh_rx) =
            open_pair(policy).await;

        // Swallow whatever the client sends and never answer.
        let _initial = read_request(&mut server).await;

        let fatal = timeout(Duration::from_secs(3), session.fatal_rx.recv())
            .await
            .expect("fatal in time")
            .expect("fatal");
        assert!(matches!(fatal, SessionFatal::HeartbeatTimeout));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn responses_reset_the_liveness_deadline() {
        let policy = SyncPolicy {
            heartbeat_interval: Duration::from_millis(40),
            liveness_window: Duration::from_millis(200),
            ..SyncPolicy::default()
        };
        let (mut session, mut server, _refresh_rx) =
            open_pair(policy).await;

        let _initial = read_request(&mut server).await;

        // Answer heartbeats for a while: the deadline must keep moving.
        let heartbeat_ack = Response {
            kind: FrameKind::Response.wire(),
            command: CMD_HEARTBEAT,
            success: true,
            result: None,
            error: None,
        };
        for _ in 0..4 {
            let _hb = read_request(&mut server).await;
            reply(&mut server, &heartbeat_ack).await;
            assert!(
                timeout(Duration::from_millis(10), session.fatal_rx.recv())
                    .await
                    .is_err(),
                "session must stay alive while responses arrive"
            );
        }

        session.shutdown().await;
    }
}
