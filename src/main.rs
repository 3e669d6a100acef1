//! CLI entry point for `mboxarchive`.

use std::path::Path;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mboxarchive::config::Config;
use mboxarchive::export::html::HtmlExporter;
use mboxarchive::model::stats::SanitizationStats;
use mboxarchive::pipeline::Pipeline;

/// Convert MBOX archives into sanitized, self-contained HTML for offline browsing.
#[derive(Parser)]
#[command(name = "mboxarchive", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an MBOX file into an HTML archive
    Convert {
        /// MBOX file to read
        mbox: std::path::PathBuf,
        /// Output directory (created if missing)
        output: std::path::PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file so it can be edited
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mboxarchive::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Convert { mbox, output, json } => cmd_convert(&mbox, &output, json, &config),
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = mboxarchive::config::log_file_path(config);
    let log_dir = mboxarchive::config::cache_dir(config);
    let file_name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "mboxarchive.log".into());
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Print the effective configuration, optionally saving it.
fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    let path = mboxarchive::config::config_file_path();
    if init {
        if path.as_ref().is_some_and(|p| p.exists()) {
            anyhow::bail!(
                "Config file already exists: {}",
                path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
            );
        }
        mboxarchive::config::save_config(config)?;
    }
    match path {
        Some(p) => println!("# {}", p.display()),
        None => println!("# no config directory on this platform"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mboxarchive", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Convert an MBOX file and print a summary.
fn cmd_convert(mbox: &Path, output: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    if !mbox.exists() {
        anyhow::bail!("MBOX file not found: {}", mbox.display());
    }

    let start = Instant::now();
    let mut exporter = HtmlExporter::create(output, config)?;
    let mut pipeline = Pipeline::open(mbox, config, output)?;

    let pb = ProgressBar::new(pipeline.total_bytes());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Converting [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let mut page_failures = 0u64;
    while let Some(record) = pipeline.next() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // The pages written so far still get an index
                tracing::error!(error = %e, "MBOX read failed, stopping early");
                break;
            }
        };
        if let Err(e) = exporter.write_message(&record) {
            page_failures += 1;
            tracing::warn!(message_id = record.id, error = %e, "Could not write message page");
        }
        pb.set_position(pipeline.bytes_read());
    }
    pb.finish_and_clear();

    let totals = pipeline.totals();
    let stats = exporter.finish(&totals)?;
    let elapsed = start.elapsed();

    if json {
        print_summary_json(mbox, &stats, &totals, page_failures, elapsed)?;
    } else {
        print_summary_table(mbox, &stats, &totals, page_failures, elapsed);
    }
    Ok(())
}

fn print_summary_table(
    mbox: &Path,
    stats: &mboxarchive::export::html::ExportStats,
    totals: &SanitizationStats,
    page_failures: u64,
    elapsed: std::time::Duration,
) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<28} {}", "File", mbox.display());
    println!("  {:<28} {}", "Messages", stats.messages);
    println!(
        "  {:<28} {} ({})",
        "Attachments",
        stats.attachments,
        format_size(stats.attachment_bytes, BINARY)
    );
    println!("  {:<28} {:.2?}", "Time", elapsed);
    println!();
    println!("  Removed for offline viewing:");
    println!("    {:>8}  scripts", totals.scripts_removed);
    println!("    {:>8}  event handlers", totals.event_handlers_removed);
    println!("    {:>8}  script links", totals.script_links_neutralized);
    println!(
        "    {:>8}  external stylesheets",
        totals.external_stylesheets_removed
    );
    println!("    {:>8}  style blocks", totals.style_blocks_removed);
    println!("    {:>8}  style attributes", totals.style_attributes_removed);
    println!(
        "    {:>8}  annotation attributes",
        totals.annotation_attributes_removed
    );
    println!("    {:>8}  tracking pixels", totals.tracking_pixels_removed);
    println!("    {:>8}  external images", totals.external_images_removed);
    println!(
        "    {:>8}  large inline images",
        totals.large_inline_images_removed
    );
    println!("    {:>8}  comments", totals.comments_removed);
    if totals.decode_failures + totals.attachment_failures + page_failures > 0 {
        println!();
        println!("  Problems:");
        println!("    {:>8}  undecodable parts", totals.decode_failures);
        println!("    {:>8}  attachments not written", totals.attachment_failures);
        println!("    {:>8}  pages not written", page_failures);
    }
    println!();
    println!("  {:<28} {}", "Index", stats.index_path.display());
    println!();
}

fn print_summary_json(
    mbox: &Path,
    stats: &mboxarchive::export::html::ExportStats,
    totals: &SanitizationStats,
    page_failures: u64,
    elapsed: std::time::Duration,
) -> anyhow::Result<()> {
    let summary = serde_json::json!({
        "file": mbox.to_string_lossy(),
        "export": stats,
        "sanitization": totals,
        "page_failures": page_failures,
        "elapsed_ms": elapsed.as_millis(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
