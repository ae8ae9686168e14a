//! The upgraded WebSocket connection.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    Result, SocketError,
    codec::{FrameCodec, Role},
    frame::{Frame, OpCode},
    handshake::{Handshake, HandshakePolicy},
};

/// A connection that has completed the WebSocket upgrade.
///
/// Produced by [`Handshake::run`] or [`InspectorSocket::accept`]. The
/// socket is the sole owner of its transport; dropping it closes the
/// connection.
///
/// # Reading
///
/// `InspectorSocket` implements [`futures::Stream`]. Each item is one
/// decoded text payload; the stream ends (`None`) after the peer's close
/// frame has been answered and the transport shut down. Framing violations
/// surface as an [`Err`] item, after which the connection is defunct and is
/// dropped without a close frame.
///
/// # Closing
///
/// [`close`](Self::close) runs the two-sided close handshake from this end:
/// it sends the empty close frame, discards data frames until the peer's
/// close frame (or EOF) arrives, and shuts the transport down. Consuming
/// `self` makes the at-most-once semantics a compile-time property.
pub struct InspectorSocket<S> {
    framed: Framed<S, FrameCodec>,
    /// Our close frame has been handed to the transport.
    close_sent: bool,
    /// The peer's close frame has been decoded.
    received_close: bool,
    /// The transport reached EOF before any close frame.
    peer_eof: bool,
    /// Terminal: no further reads or writes will reach the peer.
    dead: bool,
}

impl InspectorSocket<TcpStream> {
    /// Accepts one inbound TCP connection and drives the HTTP handshake on
    /// it, resolving once the policy admits an upgrade.
    pub async fn accept<P>(listener: &TcpListener, policy: P) -> Result<Self>
    where
        P: HandshakePolicy,
    {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(peer = %peer, "inbound debugger connection");
        Handshake::new(stream, policy).run().await
    }
}

impl<S> InspectorSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an upgraded transport. `leftover` is the read buffer carried
    /// over from the HTTP phase; the frame decoder picks it up before the
    /// next transport read.
    pub(crate) fn new(stream: S, leftover: BytesMut) -> Self {
        let mut parts = FramedParts::new::<Frame>(stream, FrameCodec::new(Role::Server));
        parts.read_buf = leftover;
        Self {
            framed: Framed::from_parts(parts),
            close_sent: false,
            received_close: false,
            peer_eof: false,
            dead: false,
        }
    }

    /// Sends `payload` as one unmasked, uncompressed text frame.
    pub async fn write(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        if self.dead {
            return Err(SocketError::ConnectionClosed);
        }
        self.framed.send(Frame::text(payload.into())).await
    }

    /// Returns `true` while the connection can still exchange messages.
    pub fn is_active(&self) -> bool {
        !self.dead
    }

    /// Runs the close handshake from this end and tears the transport
    /// down. Completes exactly once; the transport is shut down exactly
    /// once, even when the peer disappears mid-handshake.
    pub async fn close(mut self) -> Result<()> {
        if self.peer_eof {
            // EOF already observed: no close-frame exchange is possible.
            let _ = self.framed.get_mut().shutdown().await;
            return Ok(());
        }
        if self.dead {
            // A peer-initiated close or a protocol violation already tore
            // the transport down.
            return Ok(());
        }

        if self
            .framed
            .send(Frame::close_raw(Bytes::new()))
            .await
            .is_err()
        {
            let _ = self.framed.get_mut().shutdown().await;
            return Ok(());
        }
        self.close_sent = true;

        // Wait for the peer's close frame, discarding data frames still in
        // flight. EOF and framing errors end the wait the same way.
        while !self.received_close {
            match self.framed.next().await {
                Some(Ok(frame)) if frame.opcode() == OpCode::Close => {
                    self.received_close = true;
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => break,
            }
        }
        tracing::debug!("close handshake finished");
        let _ = self.framed.get_mut().shutdown().await;
        Ok(())
    }

    /// Answers the peer's close frame and shuts the transport down. Write
    /// failures at this point don't matter; teardown proceeds regardless.
    fn poll_close_reply(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes>>> {
        if !self.close_sent {
            match self.framed.poll_ready_unpin(cx) {
                Poll::Ready(Ok(())) => {
                    if self
                        .framed
                        .start_send_unpin(Frame::close_raw(Bytes::new()))
                        .is_err()
                    {
                        self.dead = true;
                        return Poll::Ready(None);
                    }
                    self.close_sent = true;
                }
                Poll::Ready(Err(_)) => {
                    self.dead = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        match self.framed.poll_flush_unpin(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => {
                self.dead = true;
                return Poll::Ready(None);
            }
            Poll::Pending => return Poll::Pending,
        }
        match Pin::new(self.framed.get_mut()).poll_shutdown(cx) {
            Poll::Ready(_) => {
                tracing::debug!("close handshake finished");
                self.dead = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Stream for InspectorSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.dead {
            return Poll::Ready(None);
        }
        if this.received_close {
            return this.poll_close_reply(cx);
        }

        match ready!(this.framed.poll_next_unpin(cx)) {
            Some(Ok(frame)) => match frame.opcode() {
                OpCode::Text => Poll::Ready(Some(Ok(frame.into_payload()))),
                OpCode::Close => {
                    this.received_close = true;
                    this.poll_close_reply(cx)
                }
                other => {
                    // The decoder only yields text and close.
                    this.dead = true;
                    Poll::Ready(Some(Err(SocketError::UnsupportedOpCode(u8::from(other)))))
                }
            },
            Some(Err(e)) => {
                tracing::debug!(error = %e, "dropping connection without close frame");
                this.dead = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.peer_eof = true;
                this.dead = true;
                Poll::Ready(Some(Err(SocketError::ConnectionClosed)))
            }
        }
    }
}
