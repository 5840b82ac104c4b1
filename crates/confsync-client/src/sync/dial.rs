use tokio::net::TcpStream;

use crate::error::SyncError;

/// Opens the TCP connection to the configuration center.
///
/// No deadline beyond the OS connect timeout; subscribers decide how to
/// handle a [`SyncError::DialFailed`] (typically a snapshot fallback).
pub(crate) async fn dial(addr: &str) -> Result<TcpStream, SyncError> {
    let stream =
        TcpStream::connect(addr).await.map_err(SyncError::DialFailed)?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}
