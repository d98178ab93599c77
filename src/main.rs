//! shopscribe CLI - Resumable LLM rewriting of Shopify product descriptions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shopscribe::pipeline::extract_pending;
use shopscribe::{
    BatchProcessor, CheckpointStore, Config, Exporter, LlmClient, ProductField, ProductTable,
    PromptBuilder, ResumePolicy, RetryPolicy, RunOptions, SchemaMarkup, UpdateMode,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "shopscribe")]
#[command(version)]
#[command(about = "Resumable LLM rewriting of Shopify product descriptions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (default: shopscribe.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate descriptions for every product not yet done
    Run {
        /// Shopify product export CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Export the updated CSV here when the run ends
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Checkpoint directory (overrides run.checkpoint_dir)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        #[command(flatten)]
        mode: ModeArgs,

        /// Output language (overrides generation.language)
        #[arg(short, long)]
        language: Option<String>,

        /// Attempts per product (overrides retry.max_attempts)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Process at most this many products
        #[arg(long)]
        limit: Option<usize>,

        /// Leave previously failed products alone
        #[arg(long, conflicts_with = "failed_only")]
        skip_failed: bool,

        /// Only retry previously failed products
        #[arg(long)]
        failed_only: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Write the CSV with all results recorded so far
    Export {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Show progress of the run for an input file
    Status {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// List this many upcoming products
        #[arg(short, long, default_value = "10")]
        next: usize,
    },

    /// Write all rows of the next unprocessed products to a CSV
    Extract {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Number of products to extract
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Replace,
    Append,
    FieldsOnly,
}

#[derive(Debug, clap::Args)]
struct ModeArgs {
    /// How generated text is merged (overrides run.update_mode)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Fields to rewrite in fields-only mode, comma separated
    #[arg(long, value_delimiter = ',')]
    fields: Vec<ProductField>,
}

impl ModeArgs {
    /// Update mode from flags, falling back to the configured one.
    fn resolve(&self, configured: &UpdateMode) -> Result<UpdateMode> {
        let mode = match (self.mode, self.fields.is_empty()) {
            (None, true) => configured.clone(),
            (None, false) | (Some(ModeArg::FieldsOnly), false) => {
                UpdateMode::FieldsOnly(self.fields.clone())
            }
            (Some(ModeArg::FieldsOnly), true) => bail!("--mode fields-only requires --fields"),
            (Some(ModeArg::Replace), true) => UpdateMode::Replace,
            (Some(ModeArg::Append), true) => UpdateMode::Append,
            (Some(_), false) => bail!("--fields only applies to --mode fields-only"),
        };
        Ok(mode)
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# shopscribe configuration file

[api]
# API key (can also use the variable named by api_key_env)
# api_key = "${OPENAI_API_KEY}"
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
model = "gpt-4o-2024-11-20"
timeout_secs = 120
temperature = 0.8
max_tokens = 2000
respect_rate_limit_headers = true

[retry]
max_attempts = 5
base_delay_ms = 1000
max_delay_ms = 60000
jitter_ms = 250

[generation]
language = "English"
tone = "natural and conversational, like speaking to a curious shopper"
# system_prompt = "prompts/system.md"
max_input_chars = 500
schema_markup = true             # hidden schema.org Product JSON-LD after new descriptions
# store_url = "https://shop.example.com"
currency = "USD"

[run]
update_mode = "replace"          # "append", or { fields_only = ["title", "vendor"] }
inter_record_delay_ms = 2000
checkpoint_dir = "checkpoints"
only_with_description = false
"#;
    println!("{example}");
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load config from {path:?}"),
        None => "Failed to load default config".to_string(),
    })
}

fn load_table(input: &Path) -> Result<ProductTable> {
    ProductTable::load(input).with_context(|| format!("Failed to read products from {input:?}"))
}

/// Stop flag set by the first Ctrl-C; a second one exits immediately.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if flag.swap(true, Ordering::SeqCst) {
                eprintln!("\nInterrupted again, exiting");
                std::process::exit(130);
            }
            warn!("Interrupt received, stopping after the current product (Ctrl-C again to abort)");
        }
    });
    stop
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // A missing .env file is fine
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;

            // Try to resolve API key
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;
            config
                .load_system_prompt()
                .context("Failed to read system prompt")?;

            info!("Configuration is valid");
            info!("  Endpoint: {} ({})", config.api.base_url, config.api.model);
            info!(
                "  Retries: {} attempts, {}ms base delay, {}ms cap",
                config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
            );
            info!("  Language: {}", config.generation.language);
            let fields: Vec<_> = config.target_fields().iter().map(|f| f.key()).collect();
            info!("  Update mode: {:?} ({})", config.run.update_mode, fields.join(", "));
            info!("  Checkpoints: {:?}", config.run.checkpoint_dir);
            return Ok(());
        }

        Commands::Run {
            input,
            output,
            checkpoint_dir,
            mode,
            language,
            max_attempts,
            limit,
            skip_failed,
            failed_only,
            no_progress,
        } => {
            let mut config = load_config(cli.config.as_deref())?;

            // Override config from CLI
            let update_mode = mode.resolve(&config.run.update_mode)?;
            config
                .set_update_mode(update_mode)
                .context("Invalid update mode")?;
            if let Some(language) = language {
                config.generation.language = language;
            }
            if let Some(max_attempts) = max_attempts {
                config.retry.max_attempts = max_attempts;
                config.validate().context("Invalid --max-attempts")?;
            }
            let checkpoint_dir = checkpoint_dir.unwrap_or_else(|| config.run.checkpoint_dir.clone());

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;
            let system_prompt = config
                .load_system_prompt()
                .context("Failed to read system prompt")?;
            let prompts = PromptBuilder::new(&config.generation, system_prompt);
            let client = Arc::new(
                LlmClient::new(&config.api, api_key, prompts)
                    .context("Failed to create API client")?,
            );

            let table = load_table(&input)?;
            let records = table.records();
            let run_key = CheckpointStore::run_key(&input)?;
            let mut store = CheckpointStore::open(&checkpoint_dir, &run_key)
                .with_context(|| format!("Failed to open checkpoint in {checkpoint_dir:?}"))?;

            let resume_policy = if skip_failed {
                ResumePolicy::SkipFailed
            } else if failed_only {
                ResumePolicy::FailedOnly
            } else {
                ResumePolicy::RetryFailed
            };
            let options = RunOptions {
                resume_policy,
                limit,
                inter_record_delay: config.run.inter_record_delay(),
                only_with_description: config.run.only_with_description,
                show_progress: !no_progress,
                schema_markup: config.generation.schema_markup.then(|| {
                    SchemaMarkup::new(
                        config.generation.store_url.clone(),
                        config.generation.currency.clone(),
                    )
                }),
            };

            let processor = BatchProcessor::new(
                client.clone(),
                RetryPolicy::from_config(&config.retry),
                config.run.update_mode.clone(),
                config.generation.language.clone(),
            )
            .with_options(options)
            .with_stop_flag(install_interrupt_handler());

            let stats = processor.run(&records, &mut store).await?;
            let (input_tokens, output_tokens) = client.total_tokens();

            println!("\n=== Run {} ===", if stats.interrupted { "Interrupted" } else { "Complete" });
            println!("Products:    {}", stats.total);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Skipped:     {}", stats.skipped);
            println!("API calls:   {}", stats.calls);
            println!("Tokens:      {input_tokens} in / {output_tokens} out");
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Checkpoint:  {:?}", store.path());

            if let Some(output) = output {
                let summary = Exporter::new(config.run.update_mode.clone())
                    .export(&table, store.checkpoint(), &output)
                    .with_context(|| format!("Failed to export to {output:?}"))?;
                println!("Exported:    {} updated of {} products", summary.updated, summary.products);
                println!("Output:      {output:?}");
            }
        }

        Commands::Export {
            input,
            output,
            checkpoint_dir,
            mode,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let update_mode = mode.resolve(&config.run.update_mode)?;
            let checkpoint_dir = checkpoint_dir.unwrap_or_else(|| config.run.checkpoint_dir.clone());

            let table = load_table(&input)?;
            let run_key = CheckpointStore::run_key(&input)?;
            let checkpoint = CheckpointStore::load(&checkpoint_dir, &run_key)
                .context("Failed to read checkpoint")?;

            let summary = Exporter::new(update_mode)
                .export(&table, &checkpoint, &output)
                .with_context(|| format!("Failed to export to {output:?}"))?;

            println!("\n=== Export Complete ===");
            println!("Rows:        {}", summary.rows);
            println!("Products:    {}", summary.products);
            println!("Updated:     {}", summary.updated);
            println!("Failed:      {}", summary.failed);
            println!("Unprocessed: {}", summary.unprocessed);
            if summary.unmergeable > 0 {
                println!("Unmergeable: {}", summary.unmergeable);
            }
            println!("Output:      {output:?}");
        }

        Commands::Status {
            input,
            checkpoint_dir,
            next,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let checkpoint_dir = checkpoint_dir.unwrap_or_else(|| config.run.checkpoint_dir.clone());

            let table = load_table(&input)?;
            let records = table.records();
            let run_key = CheckpointStore::run_key(&input)?;
            let checkpoint = CheckpointStore::load(&checkpoint_dir, &run_key)
                .context("Failed to read checkpoint")?;
            let stats = checkpoint.stats(&records);

            println!("\n=== Status: {input:?} ===");
            println!("Products:    {}", records.len());
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Pending:     {}", stats.pending);
            if !records.is_empty() {
                println!(
                    "Progress:    {:.1}%",
                    stats.succeeded as f64 / records.len() as f64 * 100.0
                );
            }

            let failures: Vec<_> = checkpoint.failures().collect();
            if !failures.is_empty() {
                println!("\nFailures:");
                for entry in failures {
                    println!(
                        "  {} ({} attempts): {}",
                        entry.handle,
                        entry.attempts,
                        entry.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }

            let upcoming: Vec<_> = records
                .iter()
                .filter(|r| !checkpoint.has_outcome(&r.handle))
                .take(next)
                .collect();
            if !upcoming.is_empty() {
                println!("\nNext up:");
                for record in upcoming {
                    println!(
                        "  {} - {}",
                        record.handle,
                        record.title.as_deref().unwrap_or("(untitled)")
                    );
                }
            }
        }

        Commands::Extract {
            input,
            output,
            checkpoint_dir,
            count,
        } => {
            if count == 0 {
                bail!("--count must be at least 1");
            }
            let config = load_config(cli.config.as_deref())?;
            let checkpoint_dir = checkpoint_dir.unwrap_or_else(|| config.run.checkpoint_dir.clone());

            let table = load_table(&input)?;
            let run_key = CheckpointStore::run_key(&input)?;
            let checkpoint = CheckpointStore::load(&checkpoint_dir, &run_key)
                .context("Failed to read checkpoint")?;

            let extracted = extract_pending(&table, &checkpoint, count, &output)
                .with_context(|| format!("Failed to write {output:?}"))?;
            println!("Extracted {extracted} products to {output:?}");
        }
    }

    Ok(())
}
