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

use duplex_chat::config::REPLY_PORT;
use duplex_chat::console::{self, ConsoleSink};
use duplex_chat::reply::{request_reply, serve_replies};
use duplex_chat::transport;
use duplex_chat::SessionResult;
use duplex_chat_cli::cli_args::{ConnectionArgs, EchoServer};

pub async fn serve(args: EchoServer) -> anyhow::Result<SessionResult> {
    let config = args.connection.resolve(REPLY_PORT)?;
    let listener = transport::bind(config.endpoint()?, &config.transport).await?;
    println!(
        "--- Server waiting for a connection on {} ({} replies) ---",
        listener.local_addr(),
        args.style
    );

    let connection = listener.accept_one().await?;
    println!("Client {} connected!", connection.peer_addr());
    let result = serve_replies(
        connection.into_stream()?,
        args.style,
        ConsoleSink::without_prompt("CLIENT"),
    )
    .await;
    println!("Client disconnected.");
    Ok(result)
}

pub async fn connect(args: ConnectionArgs) -> anyhow::Result<SessionResult> {
    let config = args.resolve(REPLY_PORT)?;
    let connection = transport::connect(config.endpoint()?, &config.transport).await?;
    println!("Connected! Type a message (type 'exit' to quit):");

    let result = request_reply(
        connection.into_stream()?,
        console::spawn_stdin_reader(),
        ConsoleSink::without_prompt("REPLY"),
    )
    .await;
    println!("Disconnected.");
    Ok(result)
}
