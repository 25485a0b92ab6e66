use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use chat_rooms::{
    config::CoordinatorConfig,
    coordinator::Coordinator,
    protocol::{ClientMessage, Join, MemberEvent, ServerMessage, Text},
    server,
    transport::lines::{read_message, write_frame},
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

#[tokio::test]
async fn tcp_clients_chat_through_a_room() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (coordinator, handle) = Coordinator::new(&CoordinatorConfig::default());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let coordinator = tokio::spawn(coordinator.run_until(async move {
        let _ = stop_rx.await;
    }));
    let acceptor = tokio::spawn(server::serve_tcp(listener, handle, async move {
        let _ = shutdown_rx.await;
    }));

    let (mut alice_reader, mut alice_writer) = connect(addr).await?;
    let (mut bob_reader, mut bob_writer) = connect(addr).await?;

    send(&mut alice_writer, join("lobby", "alice")).await?;
    let alice_id = match recv(&mut alice_reader).await? {
        ServerMessage::SuccessJoin(joined) => joined.room_session_id,
        other => panic!("expected SUCCESS_JOIN, got {other:?}"),
    };

    send(&mut bob_writer, join("lobby", "bob")).await?;
    let bob_id = match recv(&mut bob_reader).await? {
        ServerMessage::SuccessJoin(joined) => {
            assert_eq!(joined.members.len(), 2);
            joined.room_session_id
        }
        other => panic!("expected SUCCESS_JOIN, got {other:?}"),
    };
    assert_eq!(
        recv(&mut alice_reader).await?,
        ServerMessage::MemberJoined(MemberEvent {
            room_handle: "lobby".into(),
            room_session_id: bob_id,
            session_handle: Some("bob".into()),
        })
    );

    send(
        &mut alice_writer,
        ClientMessage::Text(Text {
            room_handle: "lobby".into(),
            content: "hello bob".into(),
        }),
    )
    .await?;
    match recv(&mut bob_reader).await? {
        ServerMessage::ReceiveText(text) => {
            assert_eq!(text.content, "hello bob");
            assert_eq!(text.room_session_id, alice_id);
            assert_eq!(text.session_handle.as_deref(), Some("alice"));
        }
        other => panic!("expected RECEIVE_TEXT, got {other:?}"),
    }
    assert!(matches!(
        recv(&mut alice_reader).await?,
        ServerMessage::ReceiveText(_)
    ));

    alice_writer.shutdown().await?;
    drop(alice_writer);
    drop(alice_reader);
    assert_eq!(
        recv(&mut bob_reader).await?,
        ServerMessage::MemberLeft(MemberEvent {
            room_handle: "lobby".into(),
            room_session_id: alice_id,
            session_handle: Some("alice".into()),
        })
    );

    let _ = shutdown_tx.send(());
    acceptor.await??;
    let _ = stop_tx.send(());
    coordinator.await??;

    // The coordinator closes remaining connections on shutdown.
    let closed = timeout(
        Duration::from_secs(1),
        read_message::<_, ServerMessage>(&mut bob_reader),
    )
    .await??;
    assert!(closed.is_none());

    Ok(())
}

async fn connect(addr: SocketAddr) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

fn join(room: &str, handle: &str) -> ClientMessage {
    ClientMessage::Join(Join {
        room_handle: room.into(),
        session_handle: Some(handle.into()),
    })
}

async fn send(writer: &mut OwnedWriteHalf, message: ClientMessage) -> Result<()> {
    write_frame(writer, &message.encode()?).await?;
    Ok(())
}

async fn recv(reader: &mut BufReader<OwnedReadHalf>) -> Result<ServerMessage> {
    timeout(
        Duration::from_secs(1),
        read_message::<_, ServerMessage>(reader),
    )
    .await??
    .ok_or_else(|| anyhow::anyhow!("server closed the stream"))
}
