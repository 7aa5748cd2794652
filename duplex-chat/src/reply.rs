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

//! Request/reply variant: the client sends a line and waits for exactly one
//! answer; the server answers every request from its single client.

use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::console::{LineSource, OutputSink};
use crate::error::SessionResult;
use crate::session::{encode_line, EXIT_COMMAND};

/// Prefix of every echo reply.
pub const ECHO_PREFIX: &str = "Server da nhan: ";
/// Upper bound of one request or reply read.
pub const REPLY_BUFFER_SIZE: usize = 1024;
/// Largest request an echo read takes in one go, one short of the buffer.
pub const MAX_ECHO_REQUEST: usize = REPLY_BUFFER_SIZE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyStyle {
    /// Answer each read with [`ECHO_PREFIX`] followed by the payload.
    #[default]
    Echo,
    /// Answer each newline-terminated line with `ACK [<n> bytes]\n`.
    Ack,
}

impl ReplyStyle {
    pub fn reply(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            ReplyStyle::Echo => {
                let mut reply = Vec::with_capacity(ECHO_PREFIX.len() + payload.len());
                reply.extend_from_slice(ECHO_PREFIX.as_bytes());
                reply.extend_from_slice(payload);
                reply
            }
            ReplyStyle::Ack => format!("ACK [{} bytes]\n", payload.len()).into_bytes(),
        }
    }
}

impl fmt::Display for ReplyStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyStyle::Echo => write!(f, "echo"),
            ReplyStyle::Ack => write!(f, "ack"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown reply style {0:?}, expected one of [echo, ack]")]
pub struct ParseReplyStyleError(String);

impl FromStr for ReplyStyle {
    type Err = ParseReplyStyleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(ReplyStyle::Echo),
            "ack" => Ok(ReplyStyle::Ack),
            _ => Err(ParseReplyStyleError(s.to_string())),
        }
    }
}

/// Answer requests from one client until it disconnects.
///
/// Every request payload is handed to `sink` before it is answered.
pub async fn serve_replies<C, O>(stream: C, style: ReplyStyle, mut sink: O) -> SessionResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    O: OutputSink,
{
    info!("Serving {style} replies");
    let mut reader = BufReader::with_capacity(REPLY_BUFFER_SIZE, stream);
    let mut buf = Vec::with_capacity(REPLY_BUFFER_SIZE);
    let mut served = 0usize;

    let result = loop {
        buf.clear();
        let read = match style {
            ReplyStyle::Echo => {
                buf.resize(MAX_ECHO_REQUEST, 0);
                let read = reader.read(&mut buf).await;
                if let Ok(n) = read {
                    buf.truncate(n);
                }
                read
            }
            ReplyStyle::Ack => reader.read_until(b'\n', &mut buf).await,
        };

        match read {
            Ok(0) => {
                info!("Client disconnected after {served} requests");
                break SessionResult::RemoteClosed;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Request read failed: {e}");
                break SessionResult::TransportError(e.to_string());
            }
        }

        if let Err(e) = sink.deliver(String::from_utf8_lossy(&buf).into_owned()).await {
            break SessionResult::TransportError(format!("local output failed: {e}"));
        }

        let reply = style.reply(&buf);
        let stream = reader.get_mut();
        if let Err(e) = write_reply(stream, &reply).await {
            warn!("Reply write failed: {e}");
            break SessionResult::TransportError(e.to_string());
        }
        served += 1;
    };

    if let Err(e) = reader.get_mut().shutdown().await {
        debug!("Reply stream shutdown failed: {e}");
    }
    result
}

async fn write_reply<W>(stream: &mut W, reply: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(reply).await?;
    stream.flush().await
}

/// Send each local line and wait for the server's answer.
///
/// `exit` or the end of local input ends the exchange with
/// [`SessionResult::LocalExit`] and half-closes the stream.
pub async fn request_reply<C, S, O>(mut stream: C, mut source: S, mut sink: O) -> SessionResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: LineSource,
    O: OutputSink,
{
    let mut buf = vec![0u8; REPLY_BUFFER_SIZE];
    let result = loop {
        let line = match source.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break SessionResult::LocalExit,
            Err(e) => {
                warn!("Local input failed, treating as exit: {e}");
                break SessionResult::LocalExit;
            }
        };
        if line == EXIT_COMMAND {
            info!("Exit requested");
            break SessionResult::LocalExit;
        }

        if let Err(e) = write_reply(&mut stream, &encode_line(&line)).await {
            warn!("Request write failed: {e}");
            break SessionResult::TransportError(e.to_string());
        }

        match stream.read(&mut buf).await {
            Ok(0) => {
                info!("Server closed the connection");
                break SessionResult::RemoteClosed;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if let Err(e) = sink.deliver(text).await {
                    break SessionResult::TransportError(format!("local output failed: {e}"));
                }
            }
            Err(e) => {
                warn!("Reply read failed: {e}");
                break SessionResult::TransportError(e.to_string());
            }
        }
    };

    if let Err(e) = stream.shutdown().await {
        debug!("Request stream shutdown failed: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    #[test]
    fn test_echo_reply_carries_prefix_and_payload() {
        assert_eq!(ReplyStyle::Echo.reply(b"ping\n"), b"Server da nhan: ping\n");
    }

    #[test]
    fn test_ack_reply_counts_delimiter() {
        assert_eq!(ReplyStyle::Ack.reply(b"ping\n"), b"ACK [5 bytes]\n");
    }

    #[test]
    fn test_parse_reply_style() {
        assert_eq!("echo".parse::<ReplyStyle>().unwrap(), ReplyStyle::Echo);
        assert_eq!("ACK".parse::<ReplyStyle>().unwrap(), ReplyStyle::Ack);
        let err = "json".parse::<ReplyStyle>().unwrap_err();
        assert!(format!("{err}").contains("json"));
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (client, server) = duplex(4096);
        let (server_out_tx, mut server_out_rx) = mpsc::channel::<String>(8);
        let server = tokio::spawn(serve_replies(server, ReplyStyle::Echo, server_out_tx));

        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (client_out_tx, mut client_out_rx) = mpsc::channel::<String>(8);
        let client = tokio::spawn(request_reply(client, line_rx, client_out_tx));

        line_tx.send("ping".to_string()).await.unwrap();
        assert_eq!(server_out_rx.recv().await.unwrap(), "ping\n");
        assert_eq!(client_out_rx.recv().await.unwrap(), "Server da nhan: ping\n");

        line_tx.send("exit".to_string()).await.unwrap();
        assert_eq!(client.await.unwrap(), SessionResult::LocalExit);
        assert_eq!(server.await.unwrap(), SessionResult::RemoteClosed);
    }

    #[tokio::test]
    async fn test_ack_server_answers_each_line() {
        let (mut client, server) = duplex(4096);
        let (server_out_tx, _server_out_rx) = mpsc::channel::<String>(8);
        let server = tokio::spawn(serve_replies(server, ReplyStyle::Ack, server_out_tx));

        client.write_all(b"abc\nhello\n").await.unwrap();
        client.shutdown().await.unwrap();
        let mut replies = String::new();
        client.read_to_string(&mut replies).await.unwrap();

        assert_eq!(replies, "ACK [4 bytes]\nACK [6 bytes]\n");
        assert_eq!(server.await.unwrap(), SessionResult::RemoteClosed);
    }

    #[tokio::test]
    async fn test_client_sees_server_close() {
        let (client, mut server) = duplex(4096);
        // Only the server's write side closes; the request still lands.
        server.shutdown().await.unwrap();

        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (client_out_tx, _client_out_rx) = mpsc::channel::<String>(8);
        line_tx.send("anyone?".to_string()).await.unwrap();

        assert_eq!(
            request_reply(client, line_rx, client_out_tx).await,
            SessionResult::RemoteClosed
        );
        let mut request = String::new();
        server.read_to_string(&mut request).await.unwrap();
        assert_eq!(request, "anyone?\n");
    }

    #[tokio::test]
    async fn test_client_exit_is_not_sent_and_half_closes() {
        let (client, mut server) = duplex(4096);
        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (client_out_tx, mut client_out_rx) = mpsc::channel::<String>(8);
        let client = tokio::spawn(request_reply(client, line_rx, client_out_tx));

        line_tx.send("hi".to_string()).await.unwrap();
        let mut request = [0u8; 3];
        server.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"hi\n");
        server.write_all(b"ok").await.unwrap();
        assert_eq!(client_out_rx.recv().await.unwrap(), "ok");

        line_tx.send("exit".to_string()).await.unwrap();
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected bytes after exit: {rest:?}");
        assert_eq!(client.await.unwrap(), SessionResult::LocalExit);
    }

    #[tokio::test]
    async fn test_echo_read_is_capped() {
        let (mut client, server) = duplex(4096);
        client.write_all(&[b'a'; 2000]).await.unwrap();
        client.shutdown().await.unwrap();

        let (server_out_tx, mut server_out_rx) = mpsc::channel::<String>(8);
        let server = tokio::spawn(serve_replies(server, ReplyStyle::Echo, server_out_tx));

        let mut sizes = Vec::new();
        while let Some(request) = server_out_rx.recv().await {
            sizes.push(request.len());
        }
        assert_eq!(sizes[0], MAX_ECHO_REQUEST);
        assert!(sizes.iter().all(|&n| n <= MAX_ECHO_REQUEST));
        assert_eq!(sizes.iter().sum::<usize>(), 2000);
        assert_eq!(server.await.unwrap(), SessionResult::RemoteClosed);
    }
}
