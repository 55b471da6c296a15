use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use mediaconv::constants::{APP_NAME, APP_VERSION, DECODED_FILE_STEM};
use mediaconv::conversion::OutputFormat;
use mediaconv::decode::decode_base64;
use mediaconv::events::{create_event_channel, BatchEvent, EventReceiver};
use mediaconv::media::MediaKind;
use mediaconv::probe::SizeProber;
use mediaconv::services::file_service::size_human_readable;
use mediaconv::services::{BatchRequest, ConfigService, ParameterInput, ServiceManager};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about = "Resize and convert images and videos in batches")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    /// Directory outputs are written to
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resize up to five images; give either --width or --height
    ResizeImages {
        #[arg(long, allow_negative_numbers = true)]
        width: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        height: Option<i64>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Re-encode up to three videos to MP4, optionally resized or resampled
    ResizeVideos {
        #[arg(long, allow_negative_numbers = true)]
        width: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        height: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        fps: Option<i64>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Convert up to five images to another format
    ConvertImages {
        #[arg(short, long)]
        format: OutputFormat,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Decode a Base64 payload (file or stdin) and save it
    DecodeBase64 {
        /// File holding the Base64 text; reads stdin when omitted
        input: Option<PathBuf>,
        /// Output file stem
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the intrinsic size of images and videos
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("Starting {} {}", APP_NAME, APP_VERSION);

    let (event_sender, event_receiver) = create_event_channel();
    let config = match &cli.config {
        Some(path) => ConfigService::with_path(event_sender.clone(), Some(path.clone())),
        None => ConfigService::new(event_sender.clone()),
    };
    let app_config = config.load_config().await;
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| app_config.output_dir_or_current());

    let printer = tokio::spawn(print_events(event_receiver));
    let services = ServiceManager::new(config, &app_config, event_sender);
    services.initialize().await.map_err(|e| anyhow!(e))?;

    let result = run_command(&services, cli.command, &output_dir).await;

    services.shutdown().await.map_err(|e| anyhow!(e))?;
    drop(services);
    let _ = printer.await;
    result
}

async fn run_command(
    services: &ServiceManager,
    command: Command,
    output_dir: &Path,
) -> anyhow::Result<()> {
    match command {
        Command::ResizeImages {
            width,
            height,
            files,
        } => {
            let request = BatchRequest::Resize(ParameterInput {
                width,
                height,
                fps: None,
            });
            run_batch(services, MediaKind::Image, &files, request, output_dir).await
        }
        Command::ResizeVideos {
            width,
            height,
            fps,
            files,
        } => {
            let request = BatchRequest::Resize(ParameterInput { width, height, fps });
            run_batch(services, MediaKind::Video, &files, request, output_dir).await
        }
        Command::ConvertImages { format, files } => {
            let request = BatchRequest::Convert(format);
            run_batch(services, MediaKind::Image, &files, request, output_dir).await
        }
        Command::DecodeBase64 { input, name } => {
            let text = match input {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    tokio::io::stdin().read_to_string(&mut text).await?;
                    text
                }
            };
            let payload = decode_base64(&text)?;
            let stem = name.unwrap_or_else(|| DECODED_FILE_STEM.to_string());
            let file_name = services
                .file
                .output_file_name(&stem, "", payload.extension());
            let path = services
                .file
                .write_output(output_dir, &file_name, &payload.data)
                .await?;
            println!(
                "{} ({}, {})",
                path.display(),
                payload.mime.as_deref().unwrap_or("unknown type"),
                size_human_readable(payload.data.len() as u64)
            );
            Ok(())
        }
        Command::Probe { files } => {
            for path in &files {
                let file = services.file.load_file(path).await?;
                let kind = match file.extension() {
                    Some(ext) if MediaKind::Image.accepts_extension(&ext) => MediaKind::Image,
                    _ => MediaKind::Video,
                };
                match services.prober.probe(kind, &file).await {
                    Ok(dimensions) => println!(
                        "{}: {} {} ({})",
                        file.name,
                        kind,
                        dimensions,
                        size_human_readable(file.size() as u64)
                    ),
                    Err(e) => println!("{}: {}", file.name, e),
                }
            }
            Ok(())
        }
    }
}

async fn run_batch(
    services: &ServiceManager,
    kind: MediaKind,
    paths: &[PathBuf],
    request: BatchRequest,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let files = services.file.load_files(paths).await?;
    let report = services.batch.select(kind, files).await?;
    if report.accepted == 0 {
        bail!("none of the given files can be processed as {}", kind);
    }

    let summary = services.batch.run(request).await?;

    let state = services.batch.snapshot().await;
    for item in &state.items {
        if let (Some(data), Some(name)) = (&item.output, &item.output_name) {
            let path = services.file.write_output(output_dir, name, data).await?;
            println!("{} -> {}", item.file.name, path.display());
        }
    }

    if summary.failed > 0 {
        bail!(
            "{} of {} file(s) failed",
            summary.failed,
            summary.failed + summary.succeeded
        );
    }
    Ok(())
}

async fn print_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::FileRejected { reason, .. } => eprintln!("skipped: {}", reason),
            BatchEvent::ItemStarted { index, file_name } => {
                println!("[{}] {}", index + 1, file_name)
            }
            BatchEvent::ItemProgress { index, progress } => match progress.percent {
                Some(percent) => println!("[{}]   {:>5.1}% {}", index + 1, percent, progress.message),
                None => println!("[{}]   {}", index + 1, progress.message),
            },
            BatchEvent::ItemFailed { index, error } => eprintln!("[{}] failed: {}", index + 1, error),
            BatchEvent::BatchCompleted {
                succeeded, failed, ..
            } => println!("{} succeeded, {} failed", succeeded, failed),
            other => tracing::debug!("{:?}", other),
        }
    }
}
