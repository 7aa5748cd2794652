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

//! TCP plumbing for chat sessions.
//!
//! Sockets are created through [`TcpSocket`] so buffer sizes can be set
//! before the connection exists. Accepted sockets inherit them from the
//! listener. Every option is best-effort.

use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::config::TransportOptions;
use crate::error::ChatError;

/// Connect to `endpoint`, applying `options` before and after the handshake.
pub async fn connect(
    endpoint: SocketAddr,
    options: &TransportOptions,
) -> Result<ChatConnection, ChatError> {
    info!("Connecting to {endpoint}");
    let socket = new_socket(endpoint).map_err(|e| ChatError::setup(endpoint, e))?;
    apply_socket_options(&socket, options);

    let stream = socket
        .connect(endpoint)
        .await
        .map_err(|e| ChatError::setup(endpoint, e))?;
    apply_stream_options(&stream, options);

    info!("Connected to {endpoint}");
    Ok(ChatConnection::new(stream, endpoint))
}

/// Bind a listener that admits a single pending peer.
pub async fn bind(
    endpoint: SocketAddr,
    options: &TransportOptions,
) -> Result<ChatListener, ChatError> {
    let socket = new_socket(endpoint).map_err(|e| ChatError::setup(endpoint, e))?;
    if options.reuse_address {
        if let Err(e) = socket.set_reuseaddr(true) {
            warn!("Failed to set SO_REUSEADDR: {e}");
        }
    }
    apply_socket_options(&socket, options);

    socket
        .bind(endpoint)
        .map_err(|e| ChatError::setup(endpoint, e))?;
    let listener = socket.listen(1).map_err(|e| ChatError::setup(endpoint, e))?;
    let local = listener.local_addr().unwrap_or(endpoint);
    info!("Listening on {local}");

    Ok(ChatListener {
        listener,
        endpoint: local,
        options: options.clone(),
    })
}

fn new_socket(endpoint: SocketAddr) -> io::Result<TcpSocket> {
    if endpoint.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

fn apply_socket_options(socket: &TcpSocket, options: &TransportOptions) {
    if let Err(e) = socket.set_send_buffer_size(options.send_buffer_size) {
        warn!("Failed to set SO_SNDBUF to {}: {e}", options.send_buffer_size);
    }
    if let Err(e) = socket.set_recv_buffer_size(options.recv_buffer_size) {
        warn!("Failed to set SO_RCVBUF to {}: {e}", options.recv_buffer_size);
    }
}

fn apply_stream_options(stream: &TcpStream, options: &TransportOptions) {
    if let Err(e) = stream.set_nodelay(options.nodelay) {
        warn!("Failed to set TCP_NODELAY: {e}");
    }
}

/// A bound listener waiting for its one peer.
#[derive(Debug)]
pub struct ChatListener {
    listener: TcpListener,
    endpoint: SocketAddr,
    options: TransportOptions,
}

impl ChatListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint
    }

    /// Accept exactly one peer. The listening socket is closed afterwards.
    pub async fn accept_one(self) -> Result<ChatConnection, ChatError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChatError::setup(self.endpoint, e))?;
        apply_stream_options(&stream, &self.options);
        info!("Accepted peer {peer}");
        Ok(ChatConnection::new(stream, peer))
    }
}

/// An established TCP connection with idempotent shutdown and close.
#[derive(Debug)]
pub struct ChatConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    write_shut: bool,
}

impl ChatConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
            write_shut: false,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn nodelay(&self) -> Option<bool> {
        self.stream.as_ref().and_then(|s| s.nodelay().ok())
    }

    /// Half-close: the peer's next read observes end-of-stream.
    pub async fn shutdown_write(&mut self) -> Result<(), ChatError> {
        if self.write_shut {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.shutdown().await?;
            self.write_shut = true;
            debug!("Write half to {} shut down", self.peer);
        }
        Ok(())
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("Connection to {} closed", self.peer);
        }
    }

    /// Hand the socket over to a session.
    pub fn into_stream(mut self) -> Result<TcpStream, ChatError> {
        self.stream.take().ok_or(ChatError::Closed)
    }
}
