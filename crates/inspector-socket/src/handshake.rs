//! HTTP/1.1 handshake handling for inbound debugger connections.
//!
//! [`Handshake`] owns the connection during its HTTP phase. Transport reads
//! accumulate in the shared buffer and are fed to [`httparse`]; every
//! complete request is dispatched to the user's [`HandshakePolicy`], which
//! sees one [`HandshakeEvent`] per decision point and can veto progression
//! or answer plain `GET`s with verbatim bytes through [`HandshakeWriter`].
//!
//! The phase ends in one of two terminal states:
//!
//! - **Upgraded** — the peer sent a `GET` with an `Upgrade` header, a
//!   `Connection: upgrade` token and a `Sec-WebSocket-Key`, and the policy
//!   allowed it. The 101 response is written and [`Handshake::run`] resolves
//!   to an [`InspectorSocket`], carrying the read buffer (and any bytes the
//!   peer pipelined behind the request) into WebSocket mode.
//! - **Failed** — a malformed or non-`GET` request, a missing key, a policy
//!   veto, or peer EOF. A 400 response is written where the transport still
//!   allows it and [`Handshake::run`] resolves to
//!   [`SocketError::HandshakeFailed`].

use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::{Buf, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, SocketError, socket::InspectorSocket};

/// Magic GUID from RFC 6455 section 1.3, concatenated to the client key.
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Matched case-sensitively against header names, exactly as DevTools
/// front-ends send it.
const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";

const MAX_HEADERS: usize = 32;

/// The read buffer grows in quanta of this size.
pub(crate) const BUFFER_GROWTH_CHUNK: usize = 1024;

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\
Content-Type: text/html; charset=UTF-8\r\n\
\r\n\
WebSockets request was expected\r\n";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
///
/// Always 28 ASCII characters: base64 of the 20-byte SHA-1 digest.
///
/// # Example
/// ```rust
/// use inspector_socket::accept_key;
///
/// assert_eq!(accept_key(b"aaa=="), "Dt87H1OULVZnSJo/KgMUYI7xPCg=");
/// ```
pub fn accept_key(client_key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key);
    sha1.update(WS_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Decision points surfaced to the [`HandshakePolicy`] while the HTTP phase
/// runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// A plain `GET` without an upgrade. Allowing it keeps the connection
    /// in the HTTP phase for further requests.
    HttpGet,
    /// A well-formed upgrade request. Allowing it commits to the 101
    /// response.
    Upgrading,
    /// The 101 response was written; the connection is now a WebSocket.
    /// The return value is ignored.
    Upgraded,
    /// The HTTP phase ended without an upgrade. The return value is
    /// ignored. The path is `None` when no request line was parsed.
    Failed,
}

/// User-supplied gate for handshake progression.
///
/// Implemented for any
/// `FnMut(&mut HandshakeWriter, HandshakeEvent, Option<&str>) -> bool`
/// closure. Returning `false` for `HttpGet` or `Upgrading` rejects the
/// request with a 400 response and closes the connection.
///
/// The writer argument lets the policy respond to plain `GET`s re-entrantly;
/// bytes queued there are sent verbatim while the connection is still in
/// the HTTP phase, in call order.
pub trait HandshakePolicy {
    fn on_event(
        &mut self,
        out: &mut HandshakeWriter,
        event: HandshakeEvent,
        path: Option<&str>,
    ) -> bool;
}

impl<F> HandshakePolicy for F
where
    F: FnMut(&mut HandshakeWriter, HandshakeEvent, Option<&str>) -> bool,
{
    fn on_event(
        &mut self,
        out: &mut HandshakeWriter,
        event: HandshakeEvent,
        path: Option<&str>,
    ) -> bool {
        self(out, event, path)
    }
}

/// Write access handed to the policy during dispatch.
///
/// Writes are queued and flushed by the handshake driver after the policy
/// returns: verbatim while in the HTTP phase, or as one text frame per
/// `write` call when queued during the `Upgraded` event.
#[derive(Debug, Default)]
pub struct HandshakeWriter {
    pub(crate) queued: Vec<Bytes>,
}

impl HandshakeWriter {
    /// Queues `bytes` for the peer. Fire-and-forget; no per-call completion
    /// is surfaced.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.queued.push(Bytes::copy_from_slice(bytes.as_ref()));
    }
}

/// Outcome of dispatching one complete request.
enum Dispatch {
    /// Plain `GET` accepted; stay in the HTTP phase.
    KeepReceiving,
    /// Upgrade accepted by policy; commit to the 101 response.
    Upgrade { accept: String, path: String },
    /// Terminal failure; respond 400 and close.
    Fail { path: Option<String> },
}

/// The connection while it is still speaking HTTP.
///
/// Created around a freshly accepted transport; [`run`](Self::run) drives
/// it to a terminal state.
pub struct Handshake<S, P> {
    stream: S,
    policy: P,
    out: HandshakeWriter,
    buf: BytesMut,
}

impl<S, P> Handshake<S, P>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: HandshakePolicy,
{
    pub fn new(stream: S, policy: P) -> Self {
        Self {
            stream,
            policy,
            out: HandshakeWriter::default(),
            buf: BytesMut::new(),
        }
    }

    /// Queues bytes for the peer, sent verbatim before anything else the
    /// driver writes. Multiple calls are emitted in call order.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.out.write(bytes);
    }

    /// Drives the HTTP phase to completion.
    ///
    /// Resolves to the upgraded [`InspectorSocket`] once the policy admits
    /// an upgrade request, or to an error after a 400/teardown. The policy
    /// observes `Upgrading` strictly before `Upgraded`, and is never
    /// consulted again after a terminal event.
    pub async fn run(mut self) -> Result<InspectorSocket<S>> {
        loop {
            self.flush_queued().await?;

            // Dispatch every complete request already buffered; the peer
            // may pipeline several GETs into one transport read.
            loop {
                let request = match parse_request(&self.buf) {
                    Parse::Partial => break,
                    Parse::Malformed => {
                        tracing::debug!("malformed HTTP request");
                        return self.fail(None).await;
                    }
                    Parse::Complete(request) => request,
                };
                let consumed = request.consumed;
                match self.dispatch(request) {
                    Dispatch::KeepReceiving => {
                        self.buf.advance(consumed);
                        self.flush_queued().await?;
                    }
                    Dispatch::Upgrade { accept, path } => {
                        self.buf.advance(consumed);
                        self.flush_queued().await?;
                        return self.upgrade(accept, path).await;
                    }
                    Dispatch::Fail { path } => {
                        return self.fail(path).await;
                    }
                }
            }

            self.buf.reserve(BUFFER_GROWTH_CHUNK);
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) => {
                    tracing::debug!("peer hung up during handshake");
                    self.emit_failed(None);
                    let _ = self.stream.shutdown().await;
                    return Err(SocketError::HandshakeFailed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.emit_failed(None);
                    let _ = self.stream.shutdown().await;
                    return Err(e.into());
                }
            }
        }
    }

    fn dispatch(&mut self, request: ParsedRequest) -> Dispatch {
        if !request.is_get {
            tracing::debug!(method = %request.method, "handshake rejected: not a GET");
            return Dispatch::Fail {
                path: Some(request.path),
            };
        }

        if !request.upgrade {
            return if self
                .policy
                .on_event(&mut self.out, HandshakeEvent::HttpGet, Some(&request.path))
            {
                Dispatch::KeepReceiving
            } else {
                Dispatch::Fail {
                    path: Some(request.path),
                }
            };
        }

        let Some(key) = request.ws_key else {
            tracing::debug!("upgrade request without Sec-WebSocket-Key");
            return Dispatch::Fail {
                path: Some(request.path),
            };
        };
        if self
            .policy
            .on_event(&mut self.out, HandshakeEvent::Upgrading, Some(&request.path))
        {
            Dispatch::Upgrade {
                accept: accept_key(&key),
                path: request.path,
            }
        } else {
            Dispatch::Fail {
                path: Some(request.path),
            }
        }
    }

    async fn upgrade(mut self, accept: String, path: String) -> Result<InspectorSocket<S>> {
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        );
        let written = async {
            self.stream.write_all(response.as_bytes()).await?;
            self.stream.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(error = %e, "failed to write 101 response");
            self.emit_failed(None);
            let _ = self.stream.shutdown().await;
            return Err(e.into());
        }

        tracing::debug!(path = %path, "connection upgraded to WebSocket");
        self.policy
            .on_event(&mut self.out, HandshakeEvent::Upgraded, Some(&path));

        // The buffer moves into the socket as-is; bytes the peer pipelined
        // behind the upgrade request feed straight into the frame decoder.
        let mut socket = InspectorSocket::new(self.stream, self.buf);
        for message in std::mem::take(&mut self.out.queued) {
            socket.write(message).await?;
        }
        Ok(socket)
    }

    async fn fail(mut self, path: Option<String>) -> Result<InspectorSocket<S>> {
        let _ = self.stream.write_all(BAD_REQUEST_RESPONSE).await;
        let _ = self.stream.flush().await;
        self.emit_failed(path.as_deref());
        let _ = self.stream.shutdown().await;
        Err(SocketError::HandshakeFailed)
    }

    fn emit_failed(&mut self, path: Option<&str>) {
        self.policy
            .on_event(&mut self.out, HandshakeEvent::Failed, path);
    }

    /// Sends bytes queued by [`write`](Self::write) or by the policy,
    /// verbatim and in order. Transport failure here is a handshake
    /// failure like any other mid-phase I/O error.
    async fn flush_queued(&mut self) -> Result<()> {
        if self.out.queued.is_empty() {
            return Ok(());
        }
        let result = async {
            for chunk in std::mem::take(&mut self.out.queued) {
                self.stream.write_all(&chunk).await?;
            }
            self.stream.flush().await
        }
        .await;
        if let Err(e) = result {
            self.emit_failed(None);
            let _ = self.stream.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// What the engine needs out of one parsed request.
struct ParsedRequest {
    method: String,
    is_get: bool,
    path: String,
    /// `Upgrade` header present and `Connection` carries the `upgrade`
    /// token.
    upgrade: bool,
    /// Concatenated values of every `Sec-WebSocket-Key` header, `None`
    /// when the header never appeared.
    ws_key: Option<Vec<u8>>,
    /// Bytes this request occupies at the front of the buffer.
    consumed: usize,
}

enum Parse {
    Complete(ParsedRequest),
    Partial,
    Malformed,
}

fn parse_request(buf: &[u8]) -> Parse {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let consumed = match request.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Parse::Partial,
        Err(_) => return Parse::Malformed,
    };

    let mut has_upgrade_header = false;
    let mut connection_upgrade = false;
    let mut ws_key: Option<Vec<u8>> = None;
    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("upgrade") {
            has_upgrade_header = true;
        } else if header.name.eq_ignore_ascii_case("connection")
            && contains_token_ci(header.value, b"upgrade")
        {
            connection_upgrade = true;
        }
        if header.name == SEC_WEBSOCKET_KEY {
            ws_key
                .get_or_insert_with(Vec::new)
                .extend_from_slice(header.value);
        }
    }

    let method = request.method.unwrap_or_default().to_owned();
    Parse::Complete(ParsedRequest {
        is_get: method == "GET",
        method,
        path: request.path.unwrap_or_default().to_owned(),
        upgrade: has_upgrade_header && connection_upgrade,
        ws_key,
        consumed,
    })
}

fn contains_token_ci(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
