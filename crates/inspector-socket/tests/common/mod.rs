#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use inspector_socket::{
    Frame, FrameCodec, Handshake, HandshakeEvent, HandshakeWriter, InspectorSocket, Role,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Encoder;

/// The canonical upgrade request a DevTools front-end sends.
pub const HANDSHAKE_REQ: &[u8] = b"GET /ws/path HTTP/1.1\r\n\
Host: localhost:9229\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: aaa==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

pub const RESPONSE_101: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Accept: Dt87H1OULVZnSJo/KgMUYI7xPCg=\r\n\r\n";

pub const RESPONSE_400: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\
Content-Type: text/html; charset=UTF-8\r\n\r\n\
WebSockets request was expected\r\n";

/// The empty close frame the server emits.
pub const SERVER_CLOSE_FRAME: [u8; 2] = [0x88, 0x00];

/// A masked empty close frame as a client would send it.
pub const CLIENT_CLOSE_FRAME: [u8; 6] = [0x88, 0x80, 0x2D, 0x0E, 0x1E, 0xFA];

pub type EventLog = Arc<Mutex<Vec<(HandshakeEvent, Option<String>)>>>;

/// A policy that records every event and allows everything.
pub fn recording_policy(
    log: &EventLog,
) -> impl FnMut(&mut HandshakeWriter, HandshakeEvent, Option<&str>) -> bool + use<> {
    let log = Arc::clone(log);
    move |_: &mut HandshakeWriter, event: HandshakeEvent, path: Option<&str>| {
        log.lock().unwrap().push((event, path.map(str::to_owned)));
        true
    }
}

/// Performs the canonical handshake over an in-memory duplex pipe and
/// returns the client end plus the upgraded server socket.
pub async fn upgraded_pair() -> (DuplexStream, InspectorSocket<DuplexStream>) {
    // Generous pipe so even the large-frame tests never fill it.
    let (mut client, server) = tokio::io::duplex(256 * 1024);
    let policy =
        |_: &mut HandshakeWriter, _: HandshakeEvent, _: Option<&str>| true;
    let task = tokio::spawn(Handshake::new(server, policy).run());

    client.write_all(HANDSHAKE_REQ).await.unwrap();
    let mut response = vec![0u8; RESPONSE_101.len()];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, RESPONSE_101);

    (client, task.await.unwrap().unwrap())
}

/// Encodes a masked text frame as a client would put it on the wire.
pub fn client_text_frame(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut wire = BytesMut::new();
    FrameCodec::new(Role::Client)
        .encode(Frame::text(payload.to_vec()).with_mask(mask), &mut wire)
        .unwrap();
    wire.to_vec()
}

/// Reads until EOF and returns everything received.
pub async fn read_to_eof(stream: &mut DuplexStream) -> Vec<u8> {
    let mut collected = Vec::new();
    stream.read_to_end(&mut collected).await.unwrap();
    collected
}
