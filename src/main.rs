//! CLI entry point for `foldersummary`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use foldersummary::config::Config;
use foldersummary::index::builder::{self, BuildOptions, MboxClass};
use foldersummary::model::class::{base_class, RecordClass};
use foldersummary::model::info::MessageInfo;
use foldersummary::summary::view::FolderView;
use foldersummary::summary::FolderSummary;

#[derive(Parser)]
#[command(name = "foldersummary", version, about = "Inspect and build mail folder summaries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an MBOX file and write its summary
    Index {
        path: PathBuf,
        /// Summary file to write (default: hidden file next to the MBOX)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rebuild even if an up-to-date summary exists
        #[arg(short, long)]
        force: bool,
    },
    /// Show the header of a summary file
    Stats {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List the records of a summary file
    List {
        path: PathBuf,
        /// Only show records matching this expression
        #[arg(long, value_name = "EXPR")]
        view: Option<String>,
        /// Record class the summary was written with
        #[arg(long, value_enum, default_value_t = RecordKind::Mbox)]
        class: RecordKind,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RecordKind {
    /// Summaries written by `index`
    Mbox,
    /// Summaries with no class fields
    Base,
}

impl RecordKind {
    fn class(self) -> Arc<dyn RecordClass> {
        match self {
            RecordKind::Mbox => MboxClass::shared(),
            RecordKind::Base => base_class(),
        }
    }
}

/// Name of the ad-hoc view created by `list --view`.
const CLI_VIEW: &str = "cli";

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = foldersummary::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Index {
            path,
            output,
            force,
        } => cmd_index(&path, output, force, &config),
        Commands::Stats { path, json } => cmd_stats(&path, json),
        Commands::List {
            path,
            view,
            class,
            json,
        } => cmd_list(&path, view.as_deref(), class, json, &config),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = foldersummary::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "foldersummary.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "foldersummary", &mut std::io::stdout());
    Ok(())
}

/// Build the summary of an MBOX file and print its counts.
fn cmd_index(
    path: &Path,
    output: Option<PathBuf>,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let file_size = std::fs::metadata(path)?.len();
    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Indexing [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let options = BuildOptions {
        force_rebuild: force,
        output,
        summary: config.persistence.summary_options(),
    };

    let start = Instant::now();
    let summary = builder::build_summary(
        path,
        &options,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    use humansize::{format_size, BINARY};
    let root = summary.root_view();
    let summary_size = summary
        .path()
        .and_then(|p| std::fs::metadata(p).ok())
        .map_or(0, |m| m.len());

    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    if let Some(p) = summary.path() {
        println!("  {:<20} {}", "Summary", p.display());
    }
    println!("  {:<20} {}", "Summary size", format_size(summary_size, BINARY));
    println!("  {:<20} {}", "Messages", root.total());
    println!("  {:<20} {}", "Unread", root.unread());
    println!("  {:<20} {:.2?}", "Indexing time", elapsed);
    println!();
    Ok(())
}

/// Print the header of a summary file without loading its records.
fn cmd_stats(path: &Path, json: bool) -> anyhow::Result<()> {
    let summary = FolderSummary::new(path);
    let header = summary.header_load()?;
    let file_size = std::fs::metadata(path)?.len();
    let saved = chrono::DateTime::from_timestamp(header.time, 0);

    if json {
        let stats = serde_json::json!({
            "file": path.to_string_lossy(),
            "file_size": file_size,
            "saved_at": saved.map(|d| d.to_rfc3339()),
            "header": header,
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};
    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Version", header.version);
    if let Some(saved) = saved {
        println!("  {:<20} {}", "Saved", saved.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  {:<20} {}", "Messages", header.count);
    if header.version >= 3 {
        println!("  {:<20} {}", "Unread", header.unread);
        println!("  {:<20} {}", "Deleted", header.deleted);
        println!("  {:<20} {}", "Junk", header.junk);
        println!("  {:<20} {}", "Next uid", header.next_uid);
    }
    println!();
    Ok(())
}

/// Load a summary and print its records, optionally through a view.
fn cmd_list(
    path: &Path,
    expression: Option<&str>,
    kind: RecordKind,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let summary = FolderSummary::with_class(
        Some(path.to_path_buf()),
        kind.class(),
        config.persistence.summary_options(),
    );
    summary.load()?;

    for view in &config.views {
        summary.view_create(Some(&view.id), view.expression.as_deref())?;
    }

    let view = match expression {
        Some(expr) => summary.view_create(Some(CLI_VIEW), Some(expr))?,
        None => summary.root_view(),
    };
    let records: Vec<MessageInfo> = match expression {
        Some(expr) => foldersummary::search::filter(&summary, expr)?,
        None => summary.array(),
    };

    let mut views = vec![summary.root_view()];
    views.extend(summary.views());

    if json {
        print_list_json(&view, &records, &views)
    } else {
        print_list_table(&records, &views);
        Ok(())
    }
}

fn view_label(view: &FolderView) -> &str {
    view.id().unwrap_or("<root>")
}

fn print_list_table(records: &[MessageInfo], views: &[Arc<FolderView>]) {
    use humansize::{format_size, BINARY};

    println!();
    println!(
        "  {:<6} {:<17} {:<25} {:<40} {:>8}",
        "Uid", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(100));

    for info in records {
        let uid = info.uid().unwrap_or_else(|| Arc::from(""));
        let date = info.date_sent().format("%Y-%m-%d %H:%M").to_string();
        let from: String = info.from().as_deref().unwrap_or("").chars().take(24).collect();
        let subject: String = info
            .subject()
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(39)
            .collect();
        let marker = if info.flags().is_unread() { "*" } else { " " };
        println!(
            "{marker} {:<6} {:<17} {:<25} {:<40} {:>8}",
            uid,
            date,
            from,
            subject,
            format_size(info.size(), BINARY)
        );
    }

    println!();
    println!(
        "  {:<12} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "View", "Total", "Visible", "Unread", "Deleted", "Junk"
    );
    for view in views {
        println!(
            "  {:<12} {:>7} {:>7} {:>7} {:>7} {:>7}",
            view_label(view),
            view.total(),
            view.visible(),
            view.unread(),
            view.deleted(),
            view.junk()
        );
    }
    println!();
}

fn print_list_json(
    view: &FolderView,
    records: &[MessageInfo],
    views: &[Arc<FolderView>],
) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|info| {
            let state = info.state();
            serde_json::json!({
                "uid": info.uid().as_deref(),
                "subject": info.subject().as_deref(),
                "from": info.from().as_deref(),
                "to": info.to().as_deref(),
                "cc": info.cc().as_deref(),
                "mailing_list": info.mailing_list().as_deref(),
                "date_sent": info.date_sent().to_rfc3339(),
                "date_received": info.date_received().to_rfc3339(),
                "size": info.size(),
                "flags": state.flags.bits(),
                "message_id": info.message_id().map(|h| h.to_string()),
                "user_flags": state.user_flags.iter().collect::<Vec<_>>(),
                "user_tags": state.user_tags.iter().collect::<std::collections::BTreeMap<_, _>>(),
            })
        })
        .collect();

    let counts: serde_json::Map<String, serde_json::Value> = views
        .iter()
        .map(|v| Ok((view_label(v).to_string(), serde_json::to_value(v.counts())?)))
        .collect::<Result<_, serde_json::Error>>()?;

    let output = serde_json::json!({
        "view": view_label(view),
        "expression": view.expression(),
        "result_count": records.len(),
        "results": items,
        "views": counts,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
