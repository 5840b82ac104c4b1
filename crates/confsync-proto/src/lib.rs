use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Header layout: version (2) + length (4) + kind (2). The length field
/// counts the kind field plus the payload, not the header itself.
pub const HEADER_LEN: usize = 8;
const KIND_LEN: u32 = 2;

/// Upper bound on a single frame payload. The center sends whole
/// configuration sets in one frame, which stay far below this.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Heartbeat request, answered by the center with an empty response.
pub const CMD_HEARTBEAT: i64 = 101;
/// Full configuration pull for one (group, artifact, version, profile).
pub const CMD_GET_CONFIG: i64 = 102;
/// Server push telling the client its configuration changed.
pub const CMD_CONFIG_CHANGED: i64 = 201;

/// The three message kinds the wire knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Oneway,
}

impl FrameKind {
    pub fn wire(self) -> u16 {
        match self {
            FrameKind::Request => 1,
            FrameKind::Response => 2,
            FrameKind::Oneway => 3,
        }
    }

    pub fn from_wire(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            3 => Some(FrameKind::Oneway),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),
    #[error("malformed frame length: {0}")]
    MalformedFrame(u32),
    #[error("frame payload too large: {0} bytes")]
    PayloadTooLarge(u32),
    #[error("payload encode error: {0}")]
    PayloadEncode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes one frame into a single contiguous buffer.
pub fn encode_frame(
    kind: FrameKind,
    payload: &[u8],
) -> Vec<u8> {
    let length = payload.len() as u32 + KIND_LEN;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&kind.wire().to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Writes one frame with a single write call, so a frame is never
/// partially written unless the write itself fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<(), ProtoError> {
    let frame = encode_frame(kind, payload);
    writer.write_all(&frame).await?;
    Ok(())
}

/// Reads one frame and returns its raw kind and payload bytes.
///
/// The raw kind is returned even when it maps to no [`FrameKind`];
/// routing unknown kinds is the caller's concern. The payload is not
/// interpreted here.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R
) -> Result<(u16, Vec<u8>), ProtoError> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let version = u16::from_be_bytes([header[0], header[1]]);
    if version != PROTOCOL_VERSION {
        return Err(ProtoError::UnsupportedVersion(version));
    }

    let length =
        u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
    if length < KIND_LEN {
        return Err(ProtoError::MalformedFrame(length));
    }

    let kind = u16::from_be_bytes([header[6], header[7]]);

    let payload_len = length - KIND_LEN;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    let mut payload = vec![0_u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok((kind, payload))
}

/// Client-to-center request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "Type")]
    pub kind: u16,
    #[serde(rename = "Command")]
    pub command: i64,
    #[serde(rename = "Data")]
    pub data: BTreeMap<String, String>,
}

impl Request {
    /// Heartbeats carry an empty auth map.
    pub fn heartbeat() -> Self {
        Self {
            kind: FrameKind::Request.wire(),
            command: CMD_HEARTBEAT,
            data: BTreeMap::new(),
        }
    }

    /// Configuration pulls carry the full auth map.
    pub fn get_config(auth: BTreeMap<String, String>) -> Self {
        Self {
            kind: FrameKind::Request.wire(),
            command: CMD_GET_CONFIG,
            data: auth,
        }
    }
}

/// Center-to-client response body. `Result` and `Error` are both
/// optional; the center omits or nulls whichever does not apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Type", default)]
    pub kind: u16,
    #[serde(rename = "Command", default)]
    pub command: i64,
    #[serde(rename = "Success", default)]
    pub success: bool,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<String, Vec<serde_json::Value>>>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<BTreeMap<String, String>>,
}

/// Center-to-client push that expects no reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Oneway {
    #[serde(rename = "Type", default)]
    pub kind: u16,
    #[serde(rename = "Command", default)]
    pub command: i64,
    #[serde(rename = "Data", skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(request)
        .map_err(|err| ProtoError::PayloadEncode(err.to_string()))
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn decode_oneway(bytes: &[u8]) -> Result<Oneway, serde_json::Error> {
    serde_json::from_slice(bytes)
}
