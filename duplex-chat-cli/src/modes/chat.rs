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

use duplex_chat::config::{ChatConfig, CHAT_PORT};
use duplex_chat::console::{self, ConsoleSink};
use duplex_chat::transport::{self, ChatConnection};
use duplex_chat::{DuplexChatSession, SessionOptions, SessionResult};
use duplex_chat_cli::cli_args::ConnectionArgs;
use tracing::info;

pub async fn serve(args: ConnectionArgs) -> anyhow::Result<SessionResult> {
    let config = args.resolve(CHAT_PORT)?;
    let listener = transport::bind(config.endpoint()?, &config.transport).await?;
    println!("[SERVER] Listening on {}...", listener.local_addr());

    let connection = listener.accept_one().await?;
    println!("[SERVER] Client {} connected!", connection.peer_addr());
    println!("Type messages. Type 'exit' to quit.\n");
    chat(connection, &config, ConsoleSink::new("CLIENT", "SERVER")).await
}

pub async fn connect(args: ConnectionArgs) -> anyhow::Result<SessionResult> {
    let config = args.resolve(CHAT_PORT)?;
    let connection = transport::connect(config.endpoint()?, &config.transport).await?;
    println!("[CLIENT] Connected to {}!", connection.peer_addr());
    println!("Type messages. Type 'exit' to quit.\n");
    chat(connection, &config, ConsoleSink::new("SERVER", "CLIENT")).await
}

async fn chat(
    connection: ChatConnection,
    config: &ChatConfig,
    sink: ConsoleSink,
) -> anyhow::Result<SessionResult> {
    sink.show_prompt()?;
    let handle = DuplexChatSession::start_with_options(
        connection.into_stream()?,
        console::spawn_stdin_reader(),
        sink,
        SessionOptions::from(config),
    );
    let result = handle.join().await;
    info!("Session finished: {result}");
    println!();
    match &result {
        SessionResult::LocalExit => println!("Disconnected."),
        SessionResult::RemoteClosed => println!("Peer disconnected."),
        SessionResult::TransportError(reason) => println!("Connection lost: {reason}"),
    }
    Ok(result)
}
