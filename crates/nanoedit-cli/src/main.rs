use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nanoedit_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use nanoedit_contracts::events::{image_fields, EventWriter};
use nanoedit_contracts::image_data::ImagePayload;
use nanoedit_contracts::session::{Session, SessionError, VersionRef};
use nanoedit_engine::{
    parse_aspect_ratio, parse_timeout_seconds, AppliedEdit, EditError, EditRequester,
    EditWorkspace, EditorConfig,
};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "nanoedit", version, about = "Conversational image editing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive editing session.
    Chat(ChatArgs),
    /// Apply one or more prompts in order and write the result.
    Edit(EditArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct ProviderArgs {
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// `none` disables the aspect-ratio hint.
    #[arg(long)]
    aspect_ratio: Option<String>,
    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long = "prompt", required = true)]
    prompts: Vec<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    provider: ProviderArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanoedit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Edit(args) => run_edit(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let workspace = build_workspace(&args.provider, args.events.as_deref())?;
    if let Some(path) = args.image.as_deref() {
        let session = start_from_file(&workspace, path)?;
        println!("Session {} started from {}", session.id(), path.display());
    }

    println!(
        "nanoedit chat started ({} / {}). Type /help for commands.",
        workspace.requester().provider_name(),
        workspace.requester().model()
    );
    let events = workspace.event_writer();
    if let Some(path) = events.path() {
        println!("Events: {} (log {})", path.display(), events.log_id());
    }
    chat_loop(&workspace, io::stdin().lock())
}

fn chat_loop(workspace: &EditWorkspace, mut input: impl BufRead) -> Result<()> {
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent as an edit of the current image.");
            }
            "quit" => break,
            "start_session" => {
                let Some(path) = intent.arg_str("path") else {
                    println!("/new requires an image path");
                    continue;
                };
                match start_from_file(workspace, Path::new(path)) {
                    Ok(session) => println!("Session {} started from {path}", session.id()),
                    Err(err) => println!("Could not open image: {err:#}"),
                }
            }
            "history" => match workspace.current_session() {
                Some(session) => {
                    for entry in history_lines(&session) {
                        println!("{entry}");
                    }
                }
                None => println!(
                    "{}",
                    describe_edit_error(&SessionError::NoActiveSession.into())
                ),
            },
            "select" => {
                let Some(target) = intent.arg_str("target") else {
                    println!("/select requires original, a history number or a step id");
                    continue;
                };
                let Some(session) = workspace.current_session() else {
                    println!("{}", describe_edit_error(&SessionError::NoActiveSession.into()));
                    continue;
                };
                let Some(version) = select_target(&session, target) else {
                    println!("No version {target} (see /history)");
                    continue;
                };
                match workspace.select_version(&version) {
                    Ok(session) => println!("Now editing {}", session.current_version()),
                    Err(err) => println!("{}", describe_edit_error(&err)),
                }
            }
            "reset" => match workspace.reset_to_original() {
                Ok(_) => println!("Back to the original image; history cleared."),
                Err(err) => println!("{}", describe_edit_error(&err)),
            },
            "export" => {
                let path = intent.arg_str("path").map(Path::new);
                match export_current(workspace, path) {
                    Ok(path) => println!("Exported {}", path.display()),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            "edit" => {
                let prompt = intent.prompt.as_deref().unwrap_or_default();
                println!("Editing...");
                match workspace.submit_prompt(prompt) {
                    Ok(applied) => print_applied(&applied),
                    Err(err) => println!("{}", describe_edit_error(&err)),
                }
            }
            _ => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }
    Ok(())
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let workspace = build_workspace(&args.provider, args.events.as_deref())?;
    start_from_file(&workspace, &args.image)?;

    for prompt in &args.prompts {
        match workspace.submit_prompt(prompt) {
            Ok(applied) => print_applied(&applied),
            Err(err) => {
                eprintln!("{}", describe_edit_error(&err));
                return Ok(1);
            }
        }
    }

    let path = export_current(&workspace, Some(args.out.as_path()))?;
    println!("Wrote {}", path.display());
    Ok(0)
}

fn editor_config(args: &ProviderArgs) -> Result<EditorConfig> {
    let mut config = EditorConfig::from_env();
    if let Some(provider) = non_blank(args.provider.as_deref()) {
        config.provider = provider.to_ascii_lowercase();
    }
    if let Some(model) = non_blank(args.model.as_deref()) {
        config.model = model;
    }
    if let Some(ratio) = args.aspect_ratio.as_deref() {
        config.aspect_ratio = parse_aspect_ratio(ratio);
    }
    if let Some(raw) = args.timeout.as_deref() {
        let timeout = parse_timeout_seconds(raw)
            .with_context(|| format!("invalid --timeout '{raw}' (expected seconds > 0)"))?;
        config.request_timeout = Some(timeout);
    }
    Ok(config)
}

fn build_workspace(args: &ProviderArgs, events_path: Option<&Path>) -> Result<EditWorkspace> {
    let config = editor_config(args)?;
    let requester = EditRequester::from_config(&config)?;
    let log_id = format!("nanoedit-{}", unix_epoch_millis());
    let events = match events_path {
        Some(path) => EventWriter::new(path, log_id),
        None => EventWriter::disabled(log_id),
    };
    Ok(EditWorkspace::new(requester, events))
}

fn load_image(path: &Path) -> Result<ImagePayload> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(ImagePayload::from_bytes(bytes))
}

fn start_from_file(workspace: &EditWorkspace, path: &Path) -> Result<Session> {
    let image = load_image(path)?;
    Ok(workspace.start_session(image))
}

fn export_current(workspace: &EditWorkspace, path: Option<&Path>) -> Result<PathBuf> {
    let (image, version) = workspace.with_session(|session| {
        session
            .map(|session| {
                (
                    session.current_image().clone(),
                    session.current_version().to_string(),
                )
            })
            .ok_or(SessionError::NoActiveSession)
    })?;
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_export_path(&image, unix_epoch_millis()));

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    let mut payload = image_fields("image", &image);
    payload.extend(json_object(json!({
        "path": path.to_string_lossy().to_string(),
        "version": version,
    })));
    if let Err(err) = workspace.event_writer().emit("image_exported", payload) {
        eprintln!("nanoedit: failed to write image_exported event: {err:#}");
    }
    Ok(path)
}

/// Edited versions are always PNG; an exported original keeps its own format.
fn default_export_path(image: &ImagePayload, millis: i64) -> PathBuf {
    PathBuf::from(format!("nanoedit-{millis}.{}", image.file_extension()))
}

/// `original` or `0`, a 1-based history number, or a step id.
fn select_target(session: &Session, raw: &str) -> Option<VersionRef> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("original") || raw == "0" {
        return Some(VersionRef::Original);
    }
    if let Ok(number) = raw.parse::<usize>() {
        let step = session.history().get(number.checked_sub(1)?)?;
        return Some(VersionRef::Step(step.id.clone()));
    }
    Some(VersionRef::Step(raw.to_string()))
}

fn history_lines(session: &Session) -> Vec<String> {
    let marker = |version: &VersionRef| {
        if session.current_version() == version {
            "*"
        } else {
            " "
        }
    };
    let original = session.original_image();
    let mut lines = vec![format!(
        "{} 0  original  {} ({} bytes)",
        marker(&VersionRef::Original),
        original.digest(),
        original.len()
    )];
    for (index, step) in session.history().iter().enumerate() {
        let version = VersionRef::Step(step.id.clone());
        lines.push(format!(
            "{} {}  {}  {}  \"{}\"",
            marker(&version),
            index + 1,
            step.id,
            step.timestamp.format("%H:%M:%S"),
            step.prompt
        ));
    }
    lines
}

fn print_applied(applied: &AppliedEdit) {
    println!(
        "Applied {} ({}, {} bytes)",
        applied.step.id,
        applied.step.image.digest(),
        applied.step.image.len()
    );
    let commentary = applied.commentary.trim();
    if !commentary.is_empty() {
        println!("Model: {commentary}");
    }
}

fn describe_edit_error(err: &EditError) -> String {
    match err {
        EditError::Session(SessionError::NoActiveSession) => {
            "No active session. Use /new <image> first.".to_string()
        }
        EditError::Capability {
            message,
            commentary: Some(commentary),
        } => format!("Edit failed: {message}\nModel: {commentary}"),
        other => format!("Edit failed: {other}"),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    let raw = value.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn unix_epoch_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
