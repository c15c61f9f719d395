use anyhow::{Context, Result};
use chattersphere::audio_capture::{spawn_recorder, CpalMicrophone, RecorderEvent};
use chattersphere::chat_protocol::RoomCode;
use chattersphere::config::{load_config, ClientConfig};
use chattersphere::directory::{create_room, RoomDirectory};
use chattersphere::identity::{DisplayName, JsonFileStore, KeyValueStore};
use chattersphere::mock_server::MockChatServer;
use chattersphere::session::{ChatSession, SessionEvent};
use chattersphere::timeline::{ChatEvent, ChatPayload};
use chattersphere::ChatError;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "chattersphere")]
#[command(author, version, about = "Room-based text and voice chat client", long_about = None)]
struct Args {
    /// WebSocket URL of the room server (overrides CHATTERSPHERE_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remember the display name used when joining rooms
    Login { name: String },

    /// List the rooms on the server
    Rooms {
        /// Keep polling the server for changes
        #[arg(long)]
        watch: bool,

        /// Seconds between polls when watching
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Create a new room and print its code
    Create,

    /// Join a room and chat. `/voice` toggles recording, `/quit` leaves.
    Join { room_code: String },

    /// Run a local room server for trying the client out
    Serve {
        #[arg(long, default_value = "127.0.0.1:5000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(server) = &args.server {
        config = config
            .with_server_url(server)
            .context("Invalid --server URL")?;
    }

    match args.command {
        Command::Login { name } => login(&config, &name),
        Command::Rooms { watch, interval } => {
            list_rooms(&config, watch, Duration::from_secs(interval.max(1))).await
        }
        Command::Create => {
            let code = create_room(&config)
                .await
                .context("Failed to create room")?;
            println!("🆕 Created room {}", code);
            Ok(())
        }
        Command::Join { room_code } => {
            let room_code = RoomCode::new(room_code).context("Invalid room code")?;
            join(&config, room_code).await
        }
        Command::Serve { bind } => serve(&bind).await,
    }
}

fn login(config: &ClientConfig, name: &str) -> Result<()> {
    let name = DisplayName::new(name).context("Invalid display name")?;
    let mut store = JsonFileStore::new(&config.identity_file);
    store
        .set_display_name(&name)
        .with_context(|| format!("Failed to write {}", store.path().display()))?;
    println!("👤 Logged in as {}", name);
    Ok(())
}

async fn list_rooms(config: &ClientConfig, watch: bool, interval: Duration) -> Result<()> {
    let mut directory = RoomDirectory::open(config)
        .await
        .context("Failed to connect to room directory")?;

    loop {
        match directory.next_snapshot().await? {
            Some(rooms) if rooms.is_empty() => println!("📋 No rooms yet"),
            Some(rooms) => {
                println!("📋 {} rooms:", rooms.len());
                for room in rooms {
                    println!("   {}  ({} online)", room.room_code, room.participant_count);
                }
            }
            None => break,
        }

        if !watch {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => directory.refresh().await?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    directory.close().await;
    Ok(())
}

enum Input {
    Session(Option<SessionEvent>),
    Line(Option<String>),
    Recorder(Option<RecorderEvent>),
    Interrupt,
}

async fn join(config: &ClientConfig, room_code: RoomCode) -> Result<()> {
    let store = JsonFileStore::new(&config.identity_file);
    let mut session = match ChatSession::open(config, room_code, &store).await {
        Err(ChatError::IdentityMissing) => {
            eprintln!("❌ No username set. Run `chattersphere login <name>` first.");
            std::process::exit(1);
        }
        other => other.context("Failed to join room")?,
    };

    println!(
        "💬 Joined room {} as {}",
        session.room_code(),
        session.display_name()
    );
    println!("   Type to chat, /voice to start or stop a recording, /quit to leave");

    let (recorder, mut recordings) = spawn_recorder(CpalMicrophone::default());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input = tokio::select! {
            event = session.next_event() => Input::Session(event),
            line = lines.next_line() => Input::Line(line?),
            event = recordings.recv() => Input::Recorder(event),
            _ = tokio::signal::ctrl_c() => Input::Interrupt,
        };

        match input {
            Input::Session(Some(SessionEvent::Message(id))) => {
                if let Some(event) = session.timeline().get(id) {
                    print_event(event);
                }
            }
            Input::Session(Some(SessionEvent::Notice(notice))) => println!("ℹ️  {}", notice),
            Input::Session(Some(SessionEvent::Closed { reason })) => {
                println!("🔌 Disconnected{}", reason.map(|r| format!(": {r}")).unwrap_or_default());
                break;
            }
            Input::Session(Some(SessionEvent::Error(e))) => {
                eprintln!("❌ {}", e);
                break;
            }
            Input::Recorder(Some(RecorderEvent::Started)) => {
                println!("🎤 Recording... type /voice again to send")
            }
            Input::Recorder(Some(RecorderEvent::Finished(payload))) => {
                if let Err(e) = session.send_voice(&payload).await {
                    eprintln!("❌ Failed to send voice message: {}", e);
                }
            }
            Input::Recorder(Some(RecorderEvent::Failed(e))) => {
                eprintln!("❌ Microphone unavailable: {}", e)
            }
            Input::Session(None) | Input::Line(None) | Input::Recorder(None) | Input::Interrupt => {
                break
            }
            Input::Line(Some(line)) => match line.trim() {
                "/quit" => break,
                "/voice" => {
                    recorder.toggle();
                }
                _ => match session.send_text(&line).await {
                    Ok(()) | Err(ChatError::EmptyMessage) => {}
                    Err(e) => eprintln!("❌ Failed to send: {}", e),
                },
            },
        }
    }

    recorder.discard();
    drop(recorder);
    let released = session.close().await;
    log::info!("Session closed, released {} voice messages", released);
    println!("👋 Left room {}", session.room_code());
    Ok(())
}

fn print_event(event: &ChatEvent) {
    let time = event.received_at.with_timezone(&chrono::Local).format("%H:%M:%S");
    match &event.payload {
        ChatPayload::Text(text) => println!("[{}] {}: {}", time, event.sender, text),
        ChatPayload::Voice(audio) => match (audio.path(), audio.duration()) {
            (Some(path), Some(duration)) => println!(
                "[{}] 🎵 {} ({:.1}s): {}",
                time,
                event.sender,
                duration.as_secs_f32(),
                path.display()
            ),
            (Some(path), None) => println!("[{}] 🎵 {}: {}", time, event.sender, path.display()),
            (None, _) => println!("[{}] 🎵 {} (released)", time, event.sender),
        },
    }
}

async fn serve(bind: &str) -> Result<()> {
    let server = MockChatServer::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    println!("💬 Room server listening on {}", server.url());
    println!("   Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    println!("\n👋 Goodbye!");
    Ok(())
}
