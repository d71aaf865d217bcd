use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use studio_contracts::chat::{parse_chat_input, CHAT_HELP_COMMANDS};
use studio_contracts::conversation::{ChatMessage, ChatRole};
use studio_contracts::gallery::DisplayReference;
use studio_contracts::jobs::{JobDescriptor, JobState};
use studio_contracts::media::{MediaPayload, Modality, ProviderId};
use studio_contracts::models::{Capability, ModelRegistry, ModelSpec};
use studio_engine::{SessionReply, Studio, StudioConfig};
use tracing_subscriber::EnvFilter;

const PROGRESS_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "studio-rs", version, about = "Generative media studio")]
struct Cli {
    /// Directory for settings, the event journal and gallery blobs.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Base URL of the local provider proxy.
    #[arg(long, global = true)]
    proxy: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Chat,
    #[command(subcommand)]
    Gallery(GalleryCommand),
    Models(ModelsArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long, default_value = "image", value_parser = parse_modality)]
    modality: Modality,
    #[arg(long, default_value = "dryrun", value_parser = parse_provider)]
    provider: ProviderId,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    negative: Option<String>,
    /// Extra provider parameter; the value is read as JSON when it parses.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
    /// Keep the result in the gallery.
    #[arg(long)]
    save: bool,
    /// Write returned media files here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum GalleryCommand {
    List,
    Clear,
}

#[derive(Debug, Args)]
struct ModelsArgs {
    #[arg(long, value_parser = parse_provider)]
    provider: Option<ProviderId>,
    #[arg(long)]
    capability: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("studio-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = StudioConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(proxy) = cli.proxy {
        config.proxy_base = proxy;
    }
    let mut studio = Studio::init(config)?;
    let code = match cli.command {
        Command::Generate(args) => run_generate(&mut studio, args),
        Command::Chat => run_chat(&studio).map(|()| 0),
        Command::Gallery(command) => run_gallery(&studio, command).map(|()| 0),
        Command::Models(args) => run_models(&studio, args).map(|()| 0),
    };
    studio.teardown()?;
    code
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn parse_modality(raw: &str) -> Result<Modality, String> {
    Modality::parse(raw).ok_or_else(|| format!("unknown modality '{raw}' (image, video, audio)"))
}

fn parse_provider(raw: &str) -> Result<ProviderId, String> {
    ProviderId::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = ProviderId::ALL.iter().map(|provider| provider.as_str()).collect();
        format!("unknown provider '{raw}' ({})", known.join(", "))
    })
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn run_generate(studio: &mut Studio, args: GenerateArgs) -> Result<i32> {
    let mut descriptor = JobDescriptor::new(
        args.modality,
        args.provider,
        args.model.unwrap_or_default(),
        args.prompt,
    )
    .save_to_gallery(args.save);
    if let Some(negative) = args.negative {
        descriptor = descriptor.with_negative_prompt(negative);
    }
    for (key, value) in args.params {
        descriptor = descriptor.with_param(key, value);
    }

    studio.start_worker()?;
    let id = studio.submit(descriptor)?;
    let mut last_progress = String::new();
    let job = loop {
        let job = studio
            .queue()
            .get(&id)
            .ok_or_else(|| anyhow!("job {id} disappeared from the queue"))?;
        if job.progress != last_progress {
            eprintln!("{}", job.progress);
            last_progress = job.progress.clone();
        }
        if job.state().is_terminal() {
            break job;
        }
        thread::sleep(PROGRESS_POLL);
    };

    if job.state() == JobState::Error {
        eprintln!("Generation failed: {}", job.error().unwrap_or("unknown error"));
        return Ok(1);
    }
    let Some(result) = job.result() else {
        bail!("job {id} finished without a result");
    };
    println!("{} with {} ({})", result.summary(), job.model, job.provider);
    if let Some(warning) = &job.storage_warning {
        eprintln!("{warning}");
    }
    for (idx, item) in result.items().into_iter().enumerate() {
        match (&item.payload, &args.out) {
            (MediaPayload::Bytes { data, .. }, Some(out)) => {
                let path = write_output(out, &id, idx, item.mime_type(), data)?;
                println!("  {}", path.display());
            }
            (MediaPayload::Bytes { data, .. }, None) => {
                println!("  {} bytes of {}", data.len(), item.mime_type());
            }
            (MediaPayload::Remote { url, .. }, _) => println!("  {url}"),
        }
    }
    Ok(0)
}

fn write_output(dir: &Path, job_id: &str, idx: usize, mime_type: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let short_id: String = job_id.chars().take(8).collect();
    let path = dir.join(format!("{short_id}-{idx:02}.{}", extension_for(mime_type)));
    fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.split(';').next().unwrap_or_default().trim() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

fn run_chat(studio: &Studio) -> Result<()> {
    let mut session = studio.chat_session()?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Studio chat ({} / {}). Commands: {}",
        session.provider()?,
        session.model()?,
        CHAT_HELP_COMMANDS.join(" ")
    );
    for message in session.conversation().messages() {
        print_turn(message);
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = parse_chat_input(line.trim_end_matches(['\n', '\r']));
        let mut streamed = StreamPrinter::default();
        match session.apply(input, &mut |message| streamed.update(message)) {
            Ok(SessionReply::Silent) => {}
            Ok(SessionReply::Quit) => break,
            Ok(SessionReply::Notice(text)) => println!("{text}"),
            Ok(SessionReply::Turn(outcome)) => {
                streamed.finish();
                if outcome.hit_round_limit {
                    println!("(stopped after {} rounds)", outcome.rounds);
                }
            }
            Err(err) => {
                streamed.finish();
                eprintln!("{err}");
            }
        }
    }
    Ok(())
}

/// Prints streamed assistant text incrementally and tool results whole.
#[derive(Default)]
struct StreamPrinter {
    current: Option<String>,
    printed: usize,
}

impl StreamPrinter {
    fn update(&mut self, message: &ChatMessage) {
        if message.role != ChatRole::Assistant {
            self.finish();
            print_turn(message);
            return;
        }
        if self.current.as_deref() != Some(message.id.as_str()) {
            self.finish();
            self.current = Some(message.id.clone());
            print!("assistant: ");
        }
        let content = message.content();
        if let Some(tail) = content.get(self.printed..) {
            print!("{tail}");
            self.printed = content.len();
        }
        let _ = io::stdout().flush();
    }

    fn finish(&mut self) {
        if self.current.take().is_some() {
            println!();
        }
        self.printed = 0;
    }
}

fn print_turn(message: &ChatMessage) {
    match message.role {
        ChatRole::User => println!("you: {}", message.content()),
        ChatRole::Assistant => {
            println!("assistant: {}", message.content());
            for call in message.tool_calls() {
                println!("  -> {}({})", call.name, call.arguments);
            }
        }
        ChatRole::Tool => {
            println!("tool: {}", message.content());
            for media in &message.media {
                println!("  [{}]", media.mime_type);
            }
        }
    }
}

fn run_gallery(studio: &Studio, command: GalleryCommand) -> Result<()> {
    match command {
        GalleryCommand::List => {
            let items = studio.gallery().items();
            if items.is_empty() {
                println!("Gallery is empty.");
            }
            for item in items.iter() {
                let location = match &item.reference {
                    DisplayReference::Blob(_) => item
                        .blob_id
                        .as_deref()
                        .map(|blob_id| format!("blob {blob_id}"))
                        .unwrap_or_else(|| "blob".to_string()),
                    DisplayReference::Inline(_) => "inline".to_string(),
                    DisplayReference::Remote(url) => url.clone(),
                };
                println!(
                    "{}  {:<5}  {}/{}  {}  \"{}\"  {}",
                    item.created_at,
                    item.modality.as_str(),
                    item.provider,
                    item.model,
                    item.mime_type,
                    item.prompt,
                    location
                );
            }
            println!("{} of {} slots used", items.len(), studio.gallery().max_items());
        }
        GalleryCommand::Clear => {
            let released = studio.gallery().clear()?;
            println!("Removed {released} item(s).");
        }
    }
    Ok(())
}

fn run_models(studio: &Studio, args: ModelsArgs) -> Result<()> {
    let capability = args
        .capability
        .as_deref()
        .map(|raw| {
            Capability::parse(raw).ok_or_else(|| anyhow!("unknown capability '{raw}'"))
        })
        .transpose()?;
    for model in listed_models(studio.models(), args.provider, capability) {
        let capabilities: Vec<&str> = model.capabilities.iter().map(|cap| cap.as_str()).collect();
        println!("{:<40} {:<11} {}", model.name, model.provider.as_str(), capabilities.join(","));
    }
    Ok(())
}

fn listed_models(
    registry: &ModelRegistry,
    provider: Option<ProviderId>,
    capability: Option<Capability>,
) -> Vec<ModelSpec> {
    match (provider, capability) {
        (Some(provider), Some(capability)) => registry.for_provider(provider, capability),
        (None, Some(capability)) => registry.by_capability(capability),
        (provider, None) => registry
            .list()
            .filter(|model| provider.map_or(true, |provider| provider == model.provider))
            .cloned()
            .collect(),
    }
}
