use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{ClientMessage, Join, Part, ServerMessage, Text},
    transport::lines::{read_frame, write_frame},
};

/// One line typed at the terminal.
#[derive(Debug, PartialEq)]
pub enum Input {
    Send(ClientMessage),
    Quit,
    Empty,
    Invalid(String),
}

/// Parses a terminal line. Bare text goes to `current_room`, the last room joined.
pub fn parse_input(line: &str, current_room: Option<&str>) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return match current_room {
            Some(room) => Input::Send(ClientMessage::Text(Text {
                room_handle: room.to_string(),
                content: line.to_string(),
            })),
            None => Input::Invalid("join a room first: /join <room> [handle]".into()),
        };
    };

    let mut parts = command.splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match (verb.as_str(), first, rest) {
        ("quit", _, _) => Input::Quit,
        ("join", Some(room), handle) => Input::Send(ClientMessage::Join(Join {
            room_handle: room.to_string(),
            session_handle: handle.map(str::to_string),
        })),
        ("part", Some(room), None) => Input::Send(ClientMessage::Part(Part {
            room_handle: room.to_string(),
        })),
        ("msg", Some(room), Some(content)) => Input::Send(ClientMessage::Text(Text {
            room_handle: room.to_string(),
            content: content.to_string(),
        })),
        ("join", _, _) => Input::Invalid("usage: /join <room> [handle]".into()),
        ("part", _, _) => Input::Invalid("usage: /part <room>".into()),
        ("msg", _, _) => Input::Invalid("usage: /msg <room> <text>".into()),
        _ => Input::Invalid(format!("unknown command /{verb}")),
    }
}

/// Formats a server message for the terminal. Failures are prefixed with `!!!`.
pub fn render(message: &ServerMessage) -> String {
    match message {
        ServerMessage::SuccessJoin(joined) => format!(
            "*** joined {} as #{} ({} online)",
            joined.room_handle,
            joined.room_session_id,
            joined.members.len()
        ),
        ServerMessage::FailJoin(failure) => {
            format!("!!! could not join {}: {}", failure.room_handle, failure.reason)
        }
        ServerMessage::SuccessPart(part) => format!("*** left {}", part.room_handle),
        ServerMessage::FailPart(failure) => {
            format!("!!! could not leave {}: {}", failure.room_handle, failure.reason)
        }
        ServerMessage::ReceiveText(text) => format!(
            "[{}] <{}> {}",
            text.room_handle,
            display_name(text.session_handle.as_deref(), text.room_session_id),
            text.content
        ),
        ServerMessage::MemberJoined(member) => format!(
            "*** {} joined {}",
            display_name(member.session_handle.as_deref(), member.room_session_id),
            member.room_handle
        ),
        ServerMessage::MemberLeft(member) => format!(
            "*** {} left {}",
            display_name(member.session_handle.as_deref(), member.room_session_id),
            member.room_handle
        ),
        ServerMessage::UnableToParse(failure) => {
            format!("!!! server could not parse message: {}", failure.reason)
        }
    }
}

fn display_name(handle: Option<&str>, session_id: u64) -> String {
    handle.map_or_else(|| format!("#{session_id}"), str::to_string)
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut stdin = BufReader::new(tokio::io::stdin());

    run_client_loop(&mut reader, &mut writer, &mut stdin).await?;
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }

    Ok(())
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
) -> Result<()> {
    let mut current_room: Option<String> = None;
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            frame = read_frame(reader) => {
                let Some(frame) = frame? else {
                    write_stdout("*** server closed the connection").await?;
                    break;
                };
                handle_server_frame(&frame, &mut current_room).await?;
            }
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read? == 0 {
                    break;
                }
                match parse_input(&input, current_room.as_deref()) {
                    Input::Send(message) => write_frame(writer, &message.encode()?).await?,
                    Input::Quit => {
                        write_stdout("*** leaving chat").await?;
                        break;
                    }
                    Input::Empty => {}
                    Input::Invalid(reason) => write_stderr(&format!("!!! {reason}")).await?,
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(frame: &[u8], current_room: &mut Option<String>) -> io::Result<()> {
    let message = match ServerMessage::decode(frame) {
        Ok(message) => message,
        Err(err) => return write_stderr(&format!("!!! unreadable server message: {err}")).await,
    };

    match &message {
        ServerMessage::SuccessJoin(joined) => *current_room = Some(joined.room_handle.clone()),
        ServerMessage::SuccessPart(part)
            if current_room.as_deref() == Some(part.room_handle.as_str()) =>
        {
            *current_room = None;
        }
        _ => {}
    }

    let line = render(&message);
    if line.starts_with("!!!") {
        write_stderr(&line).await
    } else {
        write_stdout(&line).await
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
