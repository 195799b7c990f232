use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vidlearn_core::{
    AnalysisRequest, AnalysisService, CardQuery, EngineConfig, GeminiClient, HttpSourceFetcher,
    JsonStore, KnowledgeStore, ProcessingStatus, ProviderConfig, RecordStore, default_data_dir,
    format_analysis_readable, source::TempVideo,
};

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

#[derive(Parser)]
#[command(name = "vidlearn")]
#[command(about = "Turn videos into lessons and grow a shared knowledge base")]
struct Cli {
    /// Where analyses and knowledge cards are stored
    #[arg(long, env = "VIDLEARN_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Give up on an analysis after this many seconds
    #[arg(long, env = "VIDLEARN_DEADLINE_SECS", global = true)]
    deadline_secs: Option<u64>,

    /// Debug-level workflow logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a local video file or a video URL
    Analyze {
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,

        #[arg(long)]
        url: Option<String>,

        /// Display name for the analysis
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Translate the transcript and summary of a completed analysis
    Translate { id: Uuid, language: String },

    /// Print a stored analysis
    Show { id: Uuid },

    /// List popular knowledge cards
    Cards {
        #[arg(long, default_value_t = 3)]
        min_frequency: u32,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete a stored analysis
    Delete { id: Uuid },
}

fn create_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "vidlearn=debug,vidlearn_core=debug"
    } else {
        "vidlearn=info,vidlearn_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_service(store: Arc<JsonStore>, config: EngineConfig) -> Result<AnalysisService> {
    let provider = ProviderConfig::from_env()?;
    Ok(AnalysisService::new(
        Arc::new(GeminiClient::new(provider)),
        Arc::new(HttpSourceFetcher::new()),
        store.clone(),
        store,
        config,
    ))
}

/// The engine deletes whatever it analyses, so it gets a copy. The copy is
/// guarded until `submit` takes it over.
async fn stage_local_copy(file: &Path, work_dir: &Path) -> Result<TempVideo> {
    tokio::fs::create_dir_all(work_dir).await?;
    let extension = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let copy = TempVideo::adopt(work_dir.join(format!("{}{}", Uuid::new_v4(), extension)));
    tokio::fs::copy(file, copy.path())
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(copy)
}

fn print_header() {
    println!(
        "\n{}  {}\n",
        style("vidlearn").cyan().bold(),
        style("Video Lessons").dim()
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let store = Arc::new(JsonStore::open(&data_dir).await?);
    let mut config = EngineConfig::from_env();
    if let Some(secs) = cli.deadline_secs {
        config.analysis_deadline = Duration::from_secs(secs);
    }

    match cli.command {
        Command::Analyze { file, url, name } => {
            let service = build_service(store, config.clone())?;
            print_header();

            let mut staged = None;
            let request = match (file, url) {
                (Some(file), None) => {
                    let display = name.unwrap_or_else(|| {
                        file.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| file.display().to_string())
                    });
                    let copy = stage_local_copy(&file, &config.work_dir).await?;
                    let request = AnalysisRequest::file(copy.path()).named(display);
                    staged = Some(copy);
                    request
                }
                (None, Some(url)) => {
                    let request = AnalysisRequest::url(url);
                    match name {
                        Some(name) => request.named(name),
                        None => request,
                    }
                }
                _ => bail!("pass exactly one of --file or --url"),
            };

            let start = Instant::now();
            let spinner = create_spinner("Analyzing video...")?;
            let submitted = service.submit(request).await;
            // submit removes the file itself; this only covers an early exit above
            drop(staged);
            let record = submitted?;

            if record.processing_status == ProcessingStatus::Failed {
                spinner.finish_with_message(format!(
                    "{} Analysis failed {}",
                    style("✗").red().bold(),
                    style(format!("[{}]", format_duration(start.elapsed()))).dim()
                ));
                bail!(
                    "{}",
                    record
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string())
                );
            }

            spinner.finish_with_message(format!(
                "{} Analyzed: {} {}",
                style("✓").green().bold(),
                style(&record.topic).yellow(),
                style(format!("[{}]", format_duration(start.elapsed()))).dim()
            ));
            println!("\n{} {}", style("ID:").dim(), style(record.id).cyan());
            println!("{}", style("─".repeat(60)).dim());
            println!("{}", format_analysis_readable(&record));
        }

        Command::Translate { id, language } => {
            let service = build_service(store, config)?;
            let start = Instant::now();
            let spinner = create_spinner(&format!("Translating into {language}..."))?;
            let translation = service.translate(id, &language).await?;
            spinner.finish_with_message(format!(
                "{} Translated ({}) {}",
                style("✓").green().bold(),
                style(&translation.language).yellow(),
                style(format!("[{}]", format_duration(start.elapsed()))).dim()
            ));
            println!("{}", style("─".repeat(60)).dim());
            println!("## Summary\n\n{}\n", translation.summary);
            println!("## Transcript\n\n{}", translation.transcript);
        }

        Command::Show { id } => {
            let record = store
                .find_by_id(id)
                .await?
                .with_context(|| format!("Analysis {id} not found"))?;
            println!("{}", format_analysis_readable(&record));
        }

        Command::Cards {
            min_frequency,
            limit,
        } => {
            let cards = store
                .find(&CardQuery {
                    min_frequency,
                    limit,
                })
                .await?;

            if cards.is_empty() {
                println!(
                    "{}",
                    style(format!("No concepts seen in {min_frequency}+ videos yet")).dim()
                );
            }
            for card in cards {
                println!(
                    "{} {} {}",
                    style(format!("{:>3}", card.importance_score)).cyan().bold(),
                    style(&card.concept).bold(),
                    style(format!("({}x, {})", card.frequency, card.category)).dim()
                );
                if !card.description.is_empty() {
                    println!("    {}", card.description);
                }
            }
        }

        Command::Delete { id } => {
            if !store.delete(id).await? {
                bail!("Analysis {id} not found");
            }
            println!("{} Deleted {}", style("✓").green().bold(), id);
        }
    }

    Ok(())
}
