/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The full-duplex chat session.
//!
//! A session owns two tasks over one connection:
//!
//! - the **outbound pump** forwards local input lines to the peer,
//! - the **inbound pump** forwards whatever the peer sends to the local sink.
//!
//! Both consult one shared [`Lifecycle`]. Whichever pump ends the session
//! flips it exactly once and wakes the other pump, which drops its pending
//! read. The outbound pump always half-closes the connection on its way out,
//! so the peer's inbound pump sees end-of-stream and unwinds too. The
//! connection itself is dropped only after both pumps have been joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ChatConfig, DEFAULT_READ_BUFFER_SIZE};
use crate::console::{LineSource, OutputSink};
use crate::error::SessionResult;

/// Local command that ends the session. Never sent to the peer.
pub const EXIT_COMMAND: &str = "exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound of one inbound read, and so of one output event.
    pub read_buffer_size: usize,
    /// Liveness timeout on inbound reads. Elapsing is retried, not reported.
    pub read_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_timeout: None,
        }
    }
}

impl From<&ChatConfig> for SessionOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            read_timeout: config.read_timeout(),
        }
    }
}

/// The shared `active` flag plus a wakeup for pumps suspended elsewhere.
#[derive(Debug)]
struct Lifecycle {
    active: AtomicBool,
    stopped: Notify,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            stopped: Notify::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The single terminal transition. Only the pump that wins it gets its
    /// result back; a late caller gets `None`.
    fn terminate(&self, result: SessionResult) -> Option<SessionResult> {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Session terminating: {result}");
            self.stopped.notify_waiters();
            Some(result)
        } else {
            None
        }
    }

    /// Resolves once the session is no longer active.
    async fn stopped(&self) {
        loop {
            // Registered before the check, so a concurrent terminate is not lost.
            let notified = self.stopped.notified();
            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

/// Entry point for running a chat session over an established connection.
pub struct DuplexChatSession;

impl DuplexChatSession {
    /// Launch both pumps with default [`SessionOptions`].
    ///
    /// Must be called from within a tokio runtime. Transport options are
    /// expected to be applied already.
    pub fn start<C, S, O>(connection: C, source: S, sink: O) -> SessionHandle<C>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: LineSource,
        O: OutputSink,
    {
        Self::start_with_options(connection, source, sink, SessionOptions::default())
    }

    pub fn start_with_options<C, S, O>(
        connection: C,
        source: S,
        sink: O,
        options: SessionOptions,
    ) -> SessionHandle<C>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: LineSource,
        O: OutputSink,
    {
        let lifecycle = Arc::new(Lifecycle::new());
        let (reader, writer) = tokio::io::split(connection);

        let outbound = tokio::spawn(outbound_pump(writer, source, lifecycle.clone()));
        let inbound = tokio::spawn(inbound_pump(reader, sink, lifecycle.clone(), options));
        info!("Chat session started");

        SessionHandle {
            lifecycle,
            outbound,
            inbound,
        }
    }
}

/// Completes once both pumps of a session have terminated.
pub struct SessionHandle<C> {
    lifecycle: Arc<Lifecycle>,
    outbound: JoinHandle<(Option<SessionResult>, WriteHalf<C>)>,
    inbound: JoinHandle<(Option<SessionResult>, ReadHalf<C>)>,
}

impl<C> std::fmt::Debug for SessionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("active", &self.lifecycle.is_active())
            .finish()
    }
}

impl<C> SessionHandle<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Wait for both pumps, close the connection and report why the session
    /// ended.
    pub async fn join(self) -> SessionResult {
        let (outbound, inbound) = tokio::join!(self.outbound, self.inbound);

        let mut result = None;
        let writer = match outbound {
            Ok((outcome, writer)) => {
                result = result.or(outcome);
                Some(writer)
            }
            Err(e) => {
                error!("Outbound pump failed: {e}");
                result = result.or(Some(SessionResult::TransportError(format!(
                    "outbound pump failed: {e}"
                ))));
                None
            }
        };
        let reader = match inbound {
            Ok((outcome, reader)) => {
                result = result.or(outcome);
                Some(reader)
            }
            Err(e) => {
                error!("Inbound pump failed: {e}");
                result = result.or(Some(SessionResult::TransportError(format!(
                    "inbound pump failed: {e}"
                ))));
                None
            }
        };

        if let (Some(reader), Some(writer)) = (reader, writer) {
            drop(reader.unsplit(writer));
            debug!("Session connection closed");
        }

        let result = result.unwrap_or_else(|| {
            SessionResult::TransportError("session ended without a recorded cause".to_string())
        });
        info!("Chat session ended: {result}");
        result
    }
}

/// Frame a line for the wire: the text plus one `\n`. No escaping.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    frame
}

async fn outbound_pump<W, S>(
    mut writer: W,
    mut source: S,
    lifecycle: Arc<Lifecycle>,
) -> (Option<SessionResult>, W)
where
    W: AsyncWrite + Unpin,
    S: LineSource,
{
    let mut sent = 0usize;
    let outcome = loop {
        if !lifecycle.is_active() {
            break None;
        }

        let line = tokio::select! {
            biased;
            _ = lifecycle.stopped() => break None,
            line = source.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Local input exhausted");
                break lifecycle.terminate(SessionResult::LocalExit);
            }
            Err(e) => {
                warn!("Local input failed, treating as exit: {e}");
                break lifecycle.terminate(SessionResult::LocalExit);
            }
        };

        if line == EXIT_COMMAND {
            info!("Exit requested");
            break lifecycle.terminate(SessionResult::LocalExit);
        }

        let frame = encode_line(&line);
        let written = tokio::select! {
            biased;
            _ = lifecycle.stopped() => break None,
            written = write_frame(&mut writer, &frame) => written,
        };
        if let Err(e) = written {
            warn!("Write failed: {e}");
            break lifecycle.terminate(SessionResult::TransportError(e.to_string()));
        }
        sent += 1;
    };

    // Half-close on every exit path so the peer's read sees end-of-stream.
    if let Err(e) = writer.shutdown().await {
        debug!("Write half shutdown failed: {e}");
    }
    debug!("Outbound pump finished after {sent} lines");
    (outcome, writer)
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

async fn inbound_pump<R, O>(
    mut reader: R,
    mut sink: O,
    lifecycle: Arc<Lifecycle>,
    options: SessionOptions,
) -> (Option<SessionResult>, R)
where
    R: AsyncRead + Unpin,
    O: OutputSink,
{
    let mut buf = vec![0u8; options.read_buffer_size.max(1)];
    let outcome = loop {
        if !lifecycle.is_active() {
            break None;
        }

        let read = tokio::select! {
            biased;
            _ = lifecycle.stopped() => break None,
            read = read_chunk(&mut reader, &mut buf, options.read_timeout) => read,
        };
        match read {
            Ok(None) => debug!("Receive timeout elapsed, still waiting"),
            Ok(Some(0)) => {
                info!("Peer closed the connection");
                break lifecycle.terminate(SessionResult::RemoteClosed);
            }
            Ok(Some(n)) => {
                debug!("Received {n} bytes");
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if let Err(e) = sink.deliver(text).await {
                    warn!("Local output failed: {e}");
                    break lifecycle.terminate(SessionResult::TransportError(format!(
                        "local output failed: {e}"
                    )));
                }
            }
            Err(e) => {
                warn!("Read failed: {e}");
                break lifecycle.terminate(SessionResult::TransportError(e.to_string()));
            }
        }
    };
    debug!("Inbound pump finished");
    (outcome, reader)
}

/// `Ok(None)` when the timeout elapsed without data.
async fn read_chunk<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => reader.read(buf).await.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};
    use tokio::sync::mpsc;

    async fn read_to_end(mut stream: tokio::io::DuplexStream) -> String {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_encode_line_appends_single_newline() {
        assert_eq!(encode_line("hello"), b"hello\n");
        assert_eq!(encode_line(""), b"\n");
        // Embedded newlines are passed through untouched.
        assert_eq!(encode_line("a\nb"), b"a\nb\n");
    }

    #[test]
    fn test_only_first_terminate_wins() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.is_active());
        assert_eq!(
            lifecycle.terminate(SessionResult::RemoteClosed),
            Some(SessionResult::RemoteClosed)
        );
        assert_eq!(lifecycle.terminate(SessionResult::LocalExit), None);
        assert!(!lifecycle.is_active());
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiting_task() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.stopped().await }
        });
        tokio::task::yield_now().await;
        lifecycle.terminate(SessionResult::LocalExit);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_is_not_sent_and_half_closes() {
        let (local, remote) = duplex(1024);
        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, _out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        line_tx.send("hello".into()).await.unwrap();
        line_tx.send("".into()).await.unwrap();
        line_tx.send("exit".into()).await.unwrap();

        // Reading to the end only finishes because the write half was shut down.
        assert_eq!(read_to_end(remote).await, "hello\n\n");
        assert_eq!(handle.join().await, SessionResult::LocalExit);
    }

    #[tokio::test]
    async fn test_exit_match_is_exact() {
        let (local, remote) = duplex(1024);
        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, _out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        for line in ["EXIT", "exit ", " exit", "exit"] {
            line_tx.send(line.to_string()).await.unwrap();
        }

        assert_eq!(read_to_end(remote).await, "EXIT\nexit \n exit\n");
        assert_eq!(handle.join().await, SessionResult::LocalExit);
    }

    #[tokio::test]
    async fn test_end_of_input_is_local_exit() {
        let (local, remote) = duplex(1024);
        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, _out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        line_tx.send("last words".into()).await.unwrap();
        drop(line_tx);

        assert_eq!(read_to_end(remote).await, "last words\n");
        assert_eq!(handle.join().await, SessionResult::LocalExit);
    }

    #[tokio::test]
    async fn test_remote_close_ends_session_while_input_pending() {
        let (local, mut remote) = duplex(1024);
        // The sender stays alive, so the outbound pump stays parked on input.
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        remote.write_all(b"bye\n").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "bye\n");
        remote.shutdown().await.unwrap();

        assert_eq!(handle.join().await, SessionResult::RemoteClosed);
        // The outbound pump half-closed on its way out.
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_each_read_is_one_event() {
        let (local, mut remote) = duplex(1024);
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        remote.write_all(b"one\ntwo\nthr").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "one\ntwo\nthr");
        drop(remote);

        assert_eq!(handle.join().await, SessionResult::RemoteClosed);
    }

    #[tokio::test]
    async fn test_reads_are_bounded_by_buffer_size() {
        let (local, mut remote) = duplex(1024);
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);

        let options = SessionOptions {
            read_buffer_size: 4,
            read_timeout: None,
        };
        let handle = DuplexChatSession::start_with_options(local, line_rx, out_tx, options);
        remote.write_all(b"abcdefgh").await.unwrap();
        remote.shutdown().await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), "abcd");
        assert_eq!(out_rx.recv().await.unwrap(), "efgh");
        assert_eq!(handle.join().await, SessionResult::RemoteClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_is_retried() {
        let (local, mut remote) = duplex(1024);
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);

        let options = SessionOptions {
            read_buffer_size: 64,
            read_timeout: Some(Duration::from_millis(10)),
        };
        let handle = DuplexChatSession::start_with_options(local, line_rx, out_tx, options);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_active());

        remote.write_all(b"late\n").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "late\n");
        remote.shutdown().await.unwrap();
        assert_eq!(handle.join().await, SessionResult::RemoteClosed);
    }

    #[tokio::test]
    async fn test_dropped_output_is_transport_error() {
        let (local, mut remote) = duplex(1024);
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, out_rx) = mpsc::channel::<String>(8);
        drop(out_rx);

        let handle = DuplexChatSession::start(local, line_rx, out_tx);
        remote.write_all(b"nobody listens\n").await.unwrap();

        match handle.join().await {
            SessionResult::TransportError(reason) => assert!(reason.contains("local output")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Reads fail with a reset, writes are swallowed.
    struct ResetStream;

    impl AsyncRead for ResetStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))
        }
    }

    impl AsyncWrite for ResetStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_is_transport_error() {
        let (_line_tx, line_rx) = mpsc::channel::<String>(8);
        let (out_tx, _out_rx) = mpsc::channel::<String>(8);

        let handle = DuplexChatSession::start(ResetStream, line_rx, out_tx);
        match handle.join().await {
            SessionResult::TransportError(reason) => assert!(reason.contains("reset")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
