use std::time::Duration;

use canvas::history::EventLog;
use canvas::pen::PenTool;
use canvas::surface::RecordingSurface;
use canvas::sync::{Applied, SyncClient, SyncError};
use clap::{Args, Parser, Subcommand};
use frames::Frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    #[error("room sync failed: {0}")]
    Sync(#[from] SyncError),
    #[error("invalid point `{0}`; expected x,y")]
    InvalidPoint(String),
    #[error("a stroke needs at least two points")]
    TooFewPoints,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "draw-cli", about = "Headless participant for the collaborative drawing server")]
struct Cli {
    #[arg(long, env = "DRAW_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the server health endpoint.
    Ping,
    Room(RoomCommand),
    /// Print every change to a room as it arrives.
    Watch {
        room_id: Uuid,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<usize>,
    },
    /// Draw a stroke through the given `x,y` points.
    Stroke(StrokeArgs),
    /// Undo the room's most recent event.
    Undo { room_id: Uuid },
    /// Clear the room's history for every participant.
    Reset { room_id: Uuid },
}

#[derive(Args, Debug)]
struct RoomCommand {
    #[command(subcommand)]
    command: RoomSubcommand,
}

#[derive(Subcommand, Debug)]
enum RoomSubcommand {
    /// Mint a new room and print its id.
    New,
    /// Print a room's log as JSON.
    Show { room_id: Uuid },
}

#[derive(Args, Debug)]
struct StrokeArgs {
    room_id: Uuid,

    #[arg(required = true, num_args = 2..)]
    points: Vec<String>,

    #[arg(long, default_value = canvas::consts::DEFAULT_PEN_COLOR)]
    color: String,

    #[arg(long, default_value_t = canvas::consts::DEFAULT_PEN_WIDTH)]
    width: f64,

    /// Draw a filled rectangle between the first and last point.
    #[arg(long, default_value_t = false)]
    rect: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_url = cli.base_url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&base_url).await,
        Command::Room(room) => match room.command {
            RoomSubcommand::New => run_room_new(&base_url).await,
            RoomSubcommand::Show { room_id } => run_room_show(&base_url, room_id).await,
        },
        Command::Watch { room_id, frames } => run_watch(&base_url, room_id, frames).await,
        Command::Stroke(args) => run_stroke(&base_url, args).await,
        Command::Undo { room_id } => run_undo(&base_url, room_id).await,
        Command::Reset { room_id } => run_reset(&base_url, room_id).await,
    }
}

// =============================================================================
// HTTP
// =============================================================================

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let response = client.get(format!("{base_url}/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_room_new(base_url: &str) -> Result<(), CliError> {
    // The server answers `/draw` with a redirect naming the minted room.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let response = client.get(format!("{base_url}/draw")).send().await?;
    let status = response.status();

    let room_id = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(room_from_location);

    let Some(room_id) = room_id.filter(|_| status.is_redirection()) else {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: "room mint did not redirect to a room".to_owned(),
        });
    };
    println!("{room_id}");
    eprintln!("open {base_url}/draw?roomId={room_id}");
    Ok(())
}

// =============================================================================
// WEBSOCKET COMMANDS
// =============================================================================

async fn run_room_show(base_url: &str, room_id: Uuid) -> Result<(), CliError> {
    let session = Session::open(base_url, room_id).await?;
    print_json(&canvas::sync::history_value(session.client.history()))?;
    eprintln!("{}", describe(session.client.history()));
    session.close().await;
    Ok(())
}

async fn run_watch(base_url: &str, room_id: Uuid, limit: Option<usize>) -> Result<(), CliError> {
    let mut session = Session::open(base_url, room_id).await?;
    println!("joined {room_id}: {}", describe(session.client.history()));

    let mut seen = 0_usize;
    while limit.is_none_or(|limit| seen < limit) {
        let frame = recv_next(&mut session.stream, None).await?;
        seen = seen.saturating_add(1);
        match session.client.handle_frame(&frame, &mut session.surface) {
            Ok(Applied::Stroke { participant, committed: false }) => {
                debug!(%participant, "stroke delta");
            }
            Ok(Applied::Stroke { participant, committed: true }) => {
                println!("{participant} committed a stroke: {}", describe(session.client.history()));
            }
            Ok(Applied::Ignored) => {}
            Ok(applied) => {
                println!("{}: {} ({:?})", frame.syscall, describe(session.client.history()), applied);
            }
            Err(e) => eprintln!("{}: {e}", frame.syscall),
        }
    }

    session.close().await;
    Ok(())
}

async fn run_stroke(base_url: &str, args: StrokeArgs) -> Result<(), CliError> {
    let points = args
        .points
        .iter()
        .map(|raw| parse_point(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(((x0, y0), rest)) = points.split_first() else {
        return Err(CliError::TooFewPoints);
    };
    if rest.is_empty() {
        return Err(CliError::TooFewPoints);
    }

    let mut session = Session::open(base_url, args.room_id).await?;
    let client = &mut session.client;
    client.set_color(args.color);
    client.set_width(args.width);
    if args.rect {
        client.set_tool(PenTool::Rectangle);
    }

    let mut outbound = client.pointer_down(*x0, *y0);
    for (x, y) in rest {
        outbound.extend(client.pointer_move(*x, *y, &mut session.surface));
    }
    outbound.extend(client.pointer_up(&mut session.surface));

    session.send_all(&outbound).await?;
    println!("{}", describe(session.client.history()));
    session.close().await;
    Ok(())
}

async fn run_undo(base_url: &str, room_id: Uuid) -> Result<(), CliError> {
    let mut session = Session::open(base_url, room_id).await?;
    let outbound = session.client.undo(&mut session.surface);
    if outbound.is_empty() {
        println!("nothing to undo");
    } else {
        session.send_all(&outbound).await?;
        println!("{}", describe(session.client.history()));
    }
    session.close().await;
    Ok(())
}

async fn run_reset(base_url: &str, room_id: Uuid) -> Result<(), CliError> {
    let mut session = Session::open(base_url, room_id).await?;
    let outbound = session.client.reset(&mut session.surface);
    session.send_all(&outbound).await?;
    println!("{}", describe(session.client.history()));
    session.close().await;
    Ok(())
}

// =============================================================================
// SESSION
// =============================================================================

/// A joined websocket connection driving a headless room mirror.
struct Session {
    stream: WsStream,
    client: SyncClient,
    surface: RecordingSurface,
}

impl Session {
    async fn open(base_url: &str, room_id: Uuid) -> Result<Self, CliError> {
        let url = ws_url(base_url)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|error| CliError::WsConnect(Box::new(error)))?;

        let mut session = Self { stream, client: SyncClient::new(room_id.to_string()), surface: RecordingSurface::new() };

        let hello = wait_for_syscall(&mut session.stream, frames::SESSION_CONNECTED).await?;
        session.client.handle_frame(&hello, &mut session.surface)?;

        let join = session.client.join_request();
        session.send(&join).await?;
        let reply = wait_for_reply(&mut session.stream, &join.id).await?;
        session.client.handle_frame(&reply, &mut session.surface)?;

        info!(%room_id, client_id = session.client.client_id().unwrap_or("-"), "joined room");
        Ok(session)
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), CliError> {
        self.stream
            .send(Message::Binary(frames::encode_frame(frame).into()))
            .await
            .map_err(|error| CliError::WsConnect(Box::new(error)))
    }

    async fn send_all(&mut self, outbound: &[Frame]) -> Result<(), CliError> {
        for frame in outbound {
            debug!(syscall = %frame.syscall, "send frame");
            self.send(frame).await?;
        }
        Ok(())
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close failed");
        }
    }
}

async fn wait_for_syscall(stream: &mut WsStream, syscall: &str) -> Result<Frame, CliError> {
    loop {
        let frame = recv_next(stream, Some(Duration::from_secs(5))).await?;
        if frame.syscall == syscall {
            return Ok(frame);
        }
    }
}

/// Wait for the terminal reply to `request_id`. Error replies are returned
/// too; the mirror turns them into a [`SyncError`].
async fn wait_for_reply(stream: &mut WsStream, request_id: &str) -> Result<Frame, CliError> {
    loop {
        let frame = recv_next(stream, Some(Duration::from_secs(15))).await?;
        if frame.parent_id.as_deref() != Some(request_id) {
            continue;
        }
        if !frame.status.is_terminal() {
            continue;
        }
        return Ok(frame);
    }
}

async fn recv_next(stream: &mut WsStream, timeout: Option<Duration>) -> Result<Frame, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message.map_err(|error| CliError::WsConnect(Box::new(error)))? {
                Message::Binary(bytes) => {
                    return frames::decode_frame(&bytes).map_err(CliError::from);
                }
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).map_err(CliError::from);
                }
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| CliError::Timeout)?,
        None => fut.await,
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ws_url(base_url: &str) -> Result<String, CliError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

/// Extract the room id from a `/draw?roomId=<uuid>` redirect target.
fn room_from_location(location: &str) -> Option<Uuid> {
    let (_, query) = location.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("roomId="))
        .and_then(|raw| raw.parse().ok())
}

fn parse_point(raw: &str) -> Result<(f64, f64), CliError> {
    let invalid = || CliError::InvalidPoint(raw.to_owned());
    let (x, y) = raw.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
    let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
    Ok((x, y))
}

fn describe(log: &EventLog) -> String {
    let kinds = log.active().iter().map(canvas::history::Event::kind).collect::<Vec<_>>();
    format!("{} events, position {} [{}]", log.len(), log.position(), kinds.join(", "))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
