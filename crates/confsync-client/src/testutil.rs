use std::path::PathBuf;

use confsync_proto::{
    CMD_CONFIG_CHANGED, FrameKind, Oneway, Request, Response, encode_frame,
    read_frame,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::env::Environment;

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()))
}

pub(crate) fn test_endpoint(
    tcp_address: &str,
    http_address: &str,
) -> Endpoint {
    Endpoint {
        tcp_address: tcp_address.to_string(),
        http_address: http_address.to_string(),
        group_id: "web".to_string(),
        artifact_id: "svc".to_string(),
        profile: "dev".to_string(),
        version: "1.0".to_string(),
        secret_key: String::new(),
    }
}

pub(crate) fn write_center_file(
    env: &Environment,
    group_id: &str,
    secret_key: &str,
    tcp_address: &str,
    http_address: &str,
) {
    let dir = env.conf_root().join("comm");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("center.toml"),
        format!(
            "group_id = \"{group_id}\"\nsecret_key = \"{secret_key}\"\ntcp_address = \"{tcp_address}\"\nhttp_address = \"{http_address}\"\n"
        ),
    )
    .unwrap();
}

/// Reads one frame off a fake-center connection and parses it as a
/// client request.
pub(crate) async fn read_request(stream: &mut TcpStream) -> Request {
    let (kind, payload) = read_frame(stream).await.expect("client frame");
    assert_eq!(kind, FrameKind::Request.wire());
    serde_json::from_slice(&payload).expect("request payload")
}

pub(crate) async fn reply(
    stream: &mut TcpStream,
    response: &Response,
) {
    let payload = serde_json::to_vec(response).expect("response payload");
    reply_raw(stream, &encode_frame(FrameKind::Response, &payload)).await;
}

pub(crate) async fn push_change(stream: &mut TcpStream) {
    let oneway = Oneway {
        kind: FrameKind::Oneway.wire(),
        command: CMD_CONFIG_CHANGED,
        data: None,
    };
    let payload = serde_json::to_vec(&oneway).expect("oneway payload");
    reply_raw(stream, &encode_frame(FrameKind::Oneway, &payload)).await;
}

pub(crate) async fn reply_raw(
    stream: &mut TcpStream,
    frame: &[u8],
) {
    stream.write_all(frame).await.expect("frame write");
}

pub(crate) fn configs_response(
    pairs: &[(&str, serde_json::Value)]
) -> Response {
    let configs: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(key, value)| {
            serde_json::json!({"config": {"key": key, "value": value}})
        })
        .collect();
    Response {
        kind: FrameKind::Response.wire(),
        command: confsync_proto::CMD_GET_CONFIG,
        success: true,
        result: Some(
            [("configs".to_string(), configs)].into_iter().collect(),
        ),
        error: None,
    }
}
