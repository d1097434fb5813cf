use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use banana_contracts::chat::{parse_intent, IntentAction, CHAT_HELP_COMMANDS};
use banana_contracts::events::EventWriter;
use banana_engine::toolsets::{default_bin_dir, AgentProfile};
use banana_engine::{
    default_generator_registry, ChatConfig, ConversationSession, CredentialSource, EnvCredentials,
    GeminiGenerator, NormalizedResult, StaticCredentials,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "banana-rs", version, about = "Gemini image chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
    Toolsets(ToolsetsArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    image: Option<PathBuf>,
    /// Gemini request timeout in seconds, clamped to 15-300.
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct ToolsetsArgs {
    #[arg(long)]
    bin_dir: Option<PathBuf>,
}

const DEFAULT_LOG_FILTER: &str = "warn,banana_engine=info,banana_rs=info";

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("banana-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
        Command::Toolsets(args) => run_toolsets(args),
    }
}

fn build_session(
    out: &Path,
    events: Option<PathBuf>,
    model: Option<String>,
    provider: &str,
    timeout: Option<f64>,
) -> Result<ConversationSession> {
    let mut config = ChatConfig::from_env();
    if let Some(model) = model {
        config = config.with_model(model);
    }

    let mut registry = default_generator_registry();
    if let Some(seconds) = timeout {
        registry.register(GeminiGenerator::new().with_timeout_seconds(seconds));
    }
    let known = registry.names();
    let Some(generator) = registry.take(provider) else {
        bail!(
            "unknown provider {provider:?}; expected one of {}",
            known.join(", ")
        );
    };
    // The dry-run generator never leaves the machine, so it gets a stand-in key.
    let credentials: Box<dyn CredentialSource> = if provider == "dryrun" {
        Box::new(StaticCredentials::new().with(config.api_key_var.clone(), "dryrun"))
    } else {
        Box::new(EnvCredentials)
    };

    std::fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let session_id = Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %session_id,
        provider,
        model = %config.model,
        events = %events_path.display(),
        "session starting"
    );
    Ok(ConversationSession::new(config, generator, credentials)
        .with_events(EventWriter::new(events_path, session_id)))
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = build_session(
        &args.out,
        args.events,
        args.model,
        &args.provider,
        args.timeout,
    )?;
    if let Some(path) = args.image.as_ref() {
        session
            .attach_image_path(path)
            .with_context(|| format!("failed to attach {}", path.display()))?;
    }

    let mut stdin = io::stdin().lock();
    let mut line = String::new();

    println!(
        "Image chat started with {} ({}). Type /help for commands.",
        session.generator_name(),
        session.config().model
    );
    print_greeting(&session);

    loop {
        print!("> ");
        io::stdout().flush()?;

        match read_input_line(&mut stdin, &mut line)? {
            LineRead::Line => {}
            LineRead::Skipped => continue,
            LineRead::Eof => break,
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action {
            IntentAction::Noop => continue,
            IntentAction::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            IntentAction::Quit => break,
            IntentAction::Reset => {
                session.reset();
                println!("Chat history cleared.");
                print_greeting(&session);
            }
            IntentAction::AttachImage => match intent.arg {
                Some(path) => match session.attach_image_path(Path::new(&path)) {
                    Ok(()) => {
                        let (width, height) = session
                            .attached_image()
                            .map(|image| (image.width(), image.height()))
                            .unwrap_or_default();
                        println!("Attached {path} ({width}x{height}).");
                    }
                    Err(err) => println!("{err}"),
                },
                None => println!("/attach requires a path"),
            },
            IntentAction::SetModel => match intent.arg {
                Some(model) => {
                    session.set_model(model.clone());
                    println!("Model set to {model}");
                }
                None => println!("Model: {}", session.config().model),
            },
            IntentAction::Export => {
                let dir = intent
                    .arg
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.join("export"));
                match session.state().export(&dir) {
                    Ok(path) => println!("Transcript exported to {}", path.display()),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            IntentAction::Unknown => {
                println!(
                    "Unknown command /{}. Type /help for commands.",
                    intent.command.unwrap_or_default()
                );
            }
            IntentAction::Generate => {
                let Some(prompt) = intent.prompt else {
                    continue;
                };
                println!("Thinking...");
                let result = session.submit(&prompt);
                print_assistant_turn(&session, &result, &args.out);
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    Skipped,
    Eof,
}

fn read_input_line(input: &mut impl BufRead, line: &mut String) -> io::Result<LineRead> {
    line.clear();
    match input.read_line(line) {
        Ok(0) => Ok(LineRead::Eof),
        Ok(_) => Ok(LineRead::Line),
        Err(err) if err.kind() == ErrorKind::Interrupted => Ok(LineRead::Skipped),
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            println!("Input was not valid UTF-8; line ignored.");
            Ok(LineRead::Skipped)
        }
        Err(err) => Err(err),
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut session = build_session(
        &args.out,
        args.events,
        args.model,
        &args.provider,
        args.timeout,
    )?;
    if let Some(path) = args.image.as_ref() {
        session
            .attach_image_path(path)
            .with_context(|| format!("failed to attach {}", path.display()))?;
    }
    let result = session.submit(&args.prompt);
    print_assistant_turn(&session, &result, &args.out);
    Ok(if result.is_error() { 1 } else { 0 })
}

fn run_toolsets(args: ToolsetsArgs) -> Result<i32> {
    let lookup = EnvCredentials;
    let bin_dir = args.bin_dir.unwrap_or_else(|| default_bin_dir(&lookup));
    let profile = AgentProfile::genmedia(&lookup, &bin_dir);
    println!("{}", serde_json::to_string_pretty(&profile.manifest(&lookup))?);
    Ok(0)
}

fn print_greeting(session: &ConversationSession) {
    if let Some(turn) = session.transcript().first() {
        println!("{}", turn.text());
    }
}

fn print_assistant_turn(session: &ConversationSession, result: &NormalizedResult, out: &Path) {
    let Some(turn) = session.transcript().last() else {
        return;
    };
    if !turn.text().is_empty() {
        println!("{}", turn.text());
    }
    let Some(image) = turn.image() else {
        return;
    };
    // An unpack failure echoes the attachment back; nothing new to write.
    if result.is_error() {
        println!("[image] kept attached image");
        return;
    }
    let index = session.transcript().len() - 1;
    let path = out.join(format!(
        "artifact-{}-{:02}.{}",
        timestamp_millis(),
        index,
        image.extension()
    ));
    match image.save(&path) {
        Ok(()) => println!("[image] {} ({}x{})", path.display(), image.width(), image.height()),
        Err(err) => println!("Failed to save image: {err:#}"),
    }
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
