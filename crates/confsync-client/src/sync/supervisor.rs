use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::session::Session;
use crate::endpoint::Endpoint;
use crate::error::SyncError;
use crate::value::FlatMap;

const REFRESH_DEPTH: usize = 8;

/// Timing and retry knobs for one TCP subscription. The defaults are
/// the center's contract: the center heartbeats every 15 s, so the
/// client sends at 14 s to stay ahead of network jitter and allows two
/// missed rounds before declaring the session dead.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub heartbeat_interval: Duration,
    pub liveness_window: Duration,
    pub retry_interval: Duration,
    pub retry_max: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(14);
        Self {
            heartbeat_interval,
            liveness_window: heartbeat_interval * 2,
            retry_interval: Duration::from_secs(5),
            retry_max: 20,
        }
    }
}

/// Handle on one live TCP subscription.
///
/// `refresh_rx` yields one flat payload per configuration pull;
/// `dormant_rx` flips to true when the reconnect attempts run out.
pub struct Subscription {
    pub refresh_rx: mpsc::Receiver<FlatMap>,
    pub dormant_rx: watch::Receiver<bool>,
}

/// Dials the center and starts the session plus its supervisor task.
///
/// A failed initial dial is returned to the caller as
/// [`SyncError::DialFailed`]; later connection losses are handled by
/// the supervisor alone.
pub async fn start(
    endpoint: Endpoint,
    policy: SyncPolicy,
    shutdown: &CancellationToken,
) -> Result<Subscription, SyncError> {
    let stream = super::dial(&endpoint.tcp_address).await?;

    let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_DEPTH);
    let (dormant_tx, dormant_rx) = watch::channel(false);
    let token = shutdown.child_token();

    let session = Session::open(
        stream,
        &endpoint,
        refresh_tx.clone(),
        policy,
        &token,
    )
    .await?;

    info!(
        "configuration subscription opened: center={}, artifact={}, version={}",
        endpoint.tcp_address, endpoint.artifact_id, endpoint.version
    );

    tokio::spawn(supervise(
        endpoint,
        policy,
        session,
        refresh_tx,
        dormant_tx,
        token,
    ));

    Ok(Subscription { refresh_rx, dormant_rx })
}

/// Owns the current session and replaces it on fatal loss.
///
/// The fatal channel lives inside the session, so concurrent fatal
/// signals from its loops collapse into a single reload pass: the first
/// one wins, teardown discards the rest, and the next session starts
/// with a fresh channel.
async fn supervise(
    endpoint: Endpoint,
    policy: SyncPolicy,
    mut session: Session,
    refresh_tx: mpsc::Sender<FlatMap>,
    dormant_tx: watch::Sender<bool>,
    token: CancellationToken,
) {
    loop {
        let fatal = tokio::select! {
            _ = token.cancelled() => None,
            maybe = session.fatal_rx.recv() => maybe,
        };

        // No reason means cancellation from outside, either via the
        // token or because every session loop already exited.
        let Some(fatal) = fatal else {
            session.shutdown().await;
            return;
        };

        warn!(
            "session lost: center={}, reason={}",
            endpoint.tcp_address, fatal
        );
        session.shutdown().await;

        match reload(&endpoint, policy, &refresh_tx, &token).await {
            Some(next) => {
                info!(
                    "session re-established: center={}",
                    endpoint.tcp_address
                );
                session = next;
            }
            None => {
                if !token.is_cancelled() {
                    error!(
                        "giving up on center after {} attempts: center={}",
                        policy.retry_max, endpoint.tcp_address
                    );
                    let _ = dormant_tx.send(true);
                }
                return;
            }
        }
    }
}

/// Bounded redial: one attempt every `retry_interval`, at most
/// `retry_max` times. Each fresh session re-sends GETCONFIG, which
/// subsumes any change notification missed while disconnected.
async fn reload(
    endpoint: &Endpoint,
    policy: SyncPolicy,
    refresh_tx: &mpsc::Sender<FlatMap>,
    token: &CancellationToken,
) -> Option<Session> {
    for attempt in 1..=policy.retry_max {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = sleep(policy.retry_interval) => {}
        }

        match super::dial(&endpoint.tcp_address).await {
            Ok(stream) => {
                match Session::open(
                    stream,
                    endpoint,
                    refresh_tx.clone(),
                    policy,
                    token,
                )
                .await
                {
                    Ok(session) => return Some(session),
                    Err(err) => warn!(
                        "session handshake failed: attempt={}/{}, error={}",
                        attempt, policy.retry_max, err
                    ),
                }
            }
            Err(err) => warn!(
                "redial failed: attempt={}/{}, error={}",
                attempt, policy.retry_max, err
            ),
        }
    }
    None
}
