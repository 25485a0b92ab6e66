use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use chat_rooms::{
    config::CoordinatorConfig,
    coordinator::Coordinator,
    protocol::{ClientMessage, Join, MemberEvent, ServerMessage, Text},
    server,
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[tokio::test]
async fn websocket_clients_chat_through_a_room() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (coordinator, handle) = Coordinator::new(&CoordinatorConfig::default());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let coordinator = tokio::spawn(coordinator.run_until(async move {
        let _ = stop_rx.await;
    }));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let acceptor = tokio::spawn(server::serve_ws(
        listener,
        handle.clone(),
        "/chat",
        async move {
            let _ = shutdown_rx.await;
        },
    ));

    let mut alice = connect(addr).await?;
    let mut bob = connect(addr).await?;

    // A ping is answered by the socket and never reaches the coordinator, so the
    // join reply is the first message alice sees. JOIN also travels as binary.
    alice.send(Message::Ping(b"still there?".to_vec().into())).await?;
    alice
        .send(Message::binary(join("lobby", "alice").encode()?))
        .await?;
    let alice_id = match recv(&mut alice).await? {
        ServerMessage::SuccessJoin(joined) => joined.room_session_id,
        other => panic!("expected SUCCESS_JOIN, got {other:?}"),
    };

    send_text(&mut bob, join("lobby", "bob")).await?;
    let bob_id = match recv(&mut bob).await? {
        ServerMessage::SuccessJoin(joined) => {
            assert_eq!(joined.members.len(), 2);
            joined.room_session_id
        }
        other => panic!("expected SUCCESS_JOIN, got {other:?}"),
    };
    assert_eq!(
        recv(&mut alice).await?,
        ServerMessage::MemberJoined(MemberEvent {
            room_handle: "lobby".into(),
            room_session_id: bob_id,
            session_handle: Some("bob".into()),
        })
    );

    send_text(
        &mut alice,
        ClientMessage::Text(Text {
            room_handle: "lobby".into(),
            content: "over the socket".into(),
        }),
    )
    .await?;
    for client in [&mut bob, &mut alice] {
        match recv(client).await? {
            ServerMessage::ReceiveText(text) => {
                assert_eq!(text.content, "over the socket");
                assert_eq!(text.room_session_id, alice_id);
            }
            other => panic!("expected RECEIVE_TEXT, got {other:?}"),
        }
    }

    // A close frame ends alice's connection like a dropped stream would.
    alice.close(None).await?;
    assert_eq!(
        recv(&mut bob).await?,
        ServerMessage::MemberLeft(MemberEvent {
            room_handle: "lobby".into(),
            room_session_id: alice_id,
            session_handle: Some("alice".into()),
        })
    );
    let snapshot = handle.snapshot().await?;
    assert_eq!(snapshot.clients, 1);
    assert_eq!(snapshot.member_count("lobby"), 1);

    // Stopping the coordinator closes the sockets it still holds.
    let _ = stop_tx.send(());
    coordinator.await??;
    let ended = timeout(READ_TIMEOUT, next_frame(&mut bob)).await?;
    assert!(
        matches!(ended, None | Some(Message::Close(_))),
        "expected the server to close bob, got {ended:?}"
    );
    drop(bob);

    let _ = shutdown_tx.send(());
    timeout(READ_TIMEOUT, acceptor).await???;

    Ok(())
}

async fn connect(addr: SocketAddr) -> Result<WsClient> {
    let (stream, _response) = connect_async(format!("ws://{addr}/chat"))
        .await
        .context("websocket handshake failed")?;
    Ok(stream)
}

fn join(room: &str, handle: &str) -> ClientMessage {
    ClientMessage::Join(Join {
        room_handle: room.into(),
        session_handle: Some(handle.into()),
    })
}

async fn send_text(client: &mut WsClient, message: ClientMessage) -> Result<()> {
    let text = String::from_utf8(message.encode()?)?;
    client.send(Message::text(text)).await?;
    Ok(())
}

/// Next data or close frame; pongs are skipped. `None` once the stream ends or errors.
async fn next_frame(client: &mut WsClient) -> Option<Message> {
    loop {
        match client.next().await? {
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(frame) => return Some(frame),
            Err(_) => return None,
        }
    }
}

async fn recv(client: &mut WsClient) -> Result<ServerMessage> {
    let frame = timeout(READ_TIMEOUT, next_frame(client))
        .await
        .context("timed out waiting for server message")?
        .context("websocket closed")?;
    match frame {
        Message::Text(text) => Ok(ServerMessage::decode(text.as_bytes())?),
        other => anyhow::bail!("unexpected frame {other:?}"),
    }
}
