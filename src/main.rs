use std::collections::HashMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use beacon_interact::db::{self, TurnRepo};
use beacon_interact::voice::SAMPLE_RATE;
use beacon_interact::{
    BootstrapOptions, ClientDeps, Config, CpalMicrophone, DisplayMessage, Error,
    InteractionClient, InteractionEvent, InteractionStateMachine, LoopbackTransport,
    MessagePatch, Renderer, Role, TextEvent, Transport, TransportConnector, Turn, VoiceChannel,
};

/// Beacon Interact - voice/text interaction core for AI assistants
#[derive(Parser)]
#[command(name = "beacon-interact", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Chat through the full pipeline with a loopback model
    Chat {
        /// Resume a stored conversation instead of the most recent one
        #[arg(short, long)]
        conversation: Option<String>,
    },
    /// Print stored conversations, or one conversation's timeline
    History {
        /// Conversation ID
        #[arg(short, long)]
        conversation: Option<String>,
    },
    /// Test microphone input through the voice channel
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_interact=info",
        1 => "info,beacon_interact=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Chat { conversation: None }) {
        Command::Chat { conversation } => chat(&config, conversation).await,
        Command::History { conversation } => history(&config, conversation.as_deref()),
        Command::TestMic { duration } => test_mic(duration).await,
    }
}

/// Interactive text console over the SQLite store and a loopback transport
async fn chat(config: &Config, conversation: Option<String>) -> anyhow::Result<()> {
    let pool = db::init(&config.db_path())?;
    let loopback = Arc::new(LoopbackTransport::new());

    let client = Arc::new(InteractionClient::new(
        ClientDeps {
            store: Arc::new(TurnRepo::new(pool)),
            connector: Arc::new(Arc::clone(&loopback)) as Arc<dyn TransportConnector>,
            microphone: Arc::new(CpalMicrophone::new()),
            renderer: Some(Arc::new(ConsoleRenderer::default())),
        },
        config,
    ));

    client.bus().on("text_channel:error", |event| {
        if let InteractionEvent::Text(TextEvent::Error {
            message, attempts, ..
        }) = event
        {
            eprintln!("! send failed after {attempts} attempt(s): {message}");
        }
    });

    // Subscribe before connecting so no response is missed
    let events = loopback.subscribe();

    let result = client
        .connect_with(BootstrapOptions {
            conversation_id: conversation,
            ..config.bootstrap_options()
        })
        .await?;
    println!(
        "conversation {} ({} turns, {} sent to the model)",
        result.conversation_id,
        result.history.len(),
        result.hydrated_item_count
    );
    println!("type a message, /voice, /text or /quit\n");

    if let Some(rx) = events {
        let pump = Arc::clone(&client);
        tokio::spawn(async move { pump.run_transport_events(rx).await });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/voice" => match client.enable_hands_free().await {
                Ok(true) => println!("hands-free on"),
                Ok(false) => eprintln!("! hands-free could not be enabled"),
                Err(e) => eprintln!("! {e}"),
            },
            "/text" => {
                client.state().transition_to_text();
                println!("text mode");
            }
            text => match client.send_text(text).await {
                Ok(()) | Err(Error::EmptyMessage) => {}
                Err(e) => eprintln!("! {e}"),
            },
        }
    }

    // Let the last streamed response settle before tearing down
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.dispose();
    Ok(())
}

/// Print stored conversations, or the turns of one
fn history(config: &Config, conversation: Option<&str>) -> anyhow::Result<()> {
    let repo = TurnRepo::new(db::init(&config.db_path())?);

    let Some(conversation_id) = conversation else {
        let conversations = repo.list_conversations()?;
        if conversations.is_empty() {
            println!("No conversations stored");
        }
        for c in conversations {
            println!(
                "{}  {:>4} turns  {}  {}",
                c.id,
                c.turn_count,
                c.updated_at.format("%Y-%m-%d %H:%M"),
                c.title.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    };

    if !repo.exists(conversation_id)? {
        anyhow::bail!("unknown conversation: {conversation_id}");
    }

    for turn in repo.history(conversation_id)? {
        print_turn(&turn);
    }
    Ok(())
}

/// Test microphone input through the voice channel
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let state = Arc::new(InteractionStateMachine::new());
    let voice = VoiceChannel::new(state, Arc::new(CpalMicrophone::new()), None);

    voice.start_ptt().await?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut total = 0usize;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = voice.take_captured_audio();
        total += samples.len();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    voice.stop_ptt();
    voice.dispose();

    println!("\n---");
    println!("Captured {total} samples while armed");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

fn print_turn(turn: &Turn) {
    let at = turn.timestamp.format("%H:%M:%S");
    if let Some(text) = turn.user_text() {
        println!("[{at}] you: {text}");
    }
    if let Some(text) = turn.assistant_text() {
        println!("[{at}] assistant: {text}");
    }
}

/// Prints assistant messages as they stream; user input is already on screen
#[derive(Default)]
struct ConsoleRenderer {
    /// Bytes printed so far per streaming assistant message
    printed: Mutex<HashMap<String, usize>>,
}

impl Renderer for ConsoleRenderer {
    fn add_message(&self, message: &DisplayMessage, _position: usize) {
        if message.role != Role::Assistant {
            return;
        }
        print!("assistant: {}", message.content);
        let _ = std::io::stdout().flush();
        self.printed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message.id.clone(), message.content.len());
    }

    fn update_message(&self, id: &str, patch: &MessagePatch) {
        let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(shown) = printed.get_mut(id) else {
            return;
        };

        if let Some(content) = &patch.content
            && let Some(rest) = content.get(*shown..)
        {
            print!("{rest}");
            let _ = std::io::stdout().flush();
            *shown = content.len();
        }

        if patch.is_streaming == Some(false) {
            println!();
            printed.remove(id);
        }
    }

    fn set_status(&self, text: &str, muted: bool) {
        if !text.is_empty() && !muted {
            eprintln!("[{text}]");
        }
    }

    fn clear(&self) {
        self.printed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn load_from_history(&self, turns: &[Turn]) {
        for turn in turns {
            print_turn(turn);
        }
    }
}
