//! CLI binary for cloudconvert.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig`, runs one or many conversions and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use cloudconvert::process::destination_for;
use cloudconvert::{
    convert, run_batch, BatchProgressCallback, BatchStats, CloudConvertError, ConversionApi,
    ConversionConfig, ConversionOutcome, ConversionRequest, FileError, HttpApi, ProgressCallback,
    UploadOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Exit codes ───────────────────────────────────────────────────────────────

const EXIT_MISSING_INPUT: u8 = 1;
const EXIT_MISSING_FORMAT: u8 = 2;
const EXIT_MISSING_API_KEY: u8 = 3;
const EXIT_CONVERSION_FAILED: u8 = 4;

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per file.
/// Files complete out of order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading conversion history…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.activate_bar(total_files);
    }

    fn on_file_start(&self, index: usize, _total: usize, source: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(source.display().to_string());
    }

    fn on_file_complete(
        &self,
        index: usize,
        total: usize,
        source: &Path,
        outcome: &ConversionOutcome,
    ) {
        let secs = self.elapsed_secs(index);
        let detail = match outcome {
            ConversionOutcome::Converted { bytes } => format!("{bytes} bytes"),
            ConversionOutcome::Reused { bytes } => format!("{bytes} bytes, from history"),
            ConversionOutcome::Delivered { target } => format!("delivered to {target}"),
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            green("✓"),
            index + 1,
            total,
            source.display(),
            dim(&detail),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, error: &FileError) {
        let secs = self.elapsed_secs(index);
        let error = error.to_string();
        let msg = if error.chars().count() > 100 {
            let cut: String = error.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            error
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, stats: &BatchStats) {
        self.bar.finish_and_clear();
        if stats.failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&stats.succeeded().to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if stats.failed == stats.total_files {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&stats.succeeded().to_string()),
                stats.total_files,
                red(&stats.failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one file; the format comes from the destination extension
  ccup photo.png photo.webp

  # Same, naming the format instead of the destination
  ccup --tofmt webp photo.png

  # Convert a batch, four at a time, skipping files converted before
  ccup --batch --tofmt pdf -c 4 *.docx

  # Pass converter options
  ccup --tofmt jpg -O quality=80 -O resize=800x600 scan.tiff

  # Deliver to a configured storage instead of downloading
  ccup --tofmt pdf --output googledrive report.docx

EXIT CODES:
  0  success
  1  input file missing
  2  neither --tofmt nor a destination file name given
  3  API key missing
  4  conversion failed (any file, in batch mode)

ENVIRONMENT VARIABLES:
  CLOUDCONVERT_APIKEY     API key
  CLOUDCONVERT_BASE_URL   API base URL (default https://api.cloudconvert.org)
  RUST_LOG                Log filter, overrides -v/-q
"#;

/// Upload files to CloudConvert and download the converted results.
#[derive(Parser, Debug)]
#[command(
    name = "ccup",
    version,
    about = "Convert files with CloudConvert",
    long_about = "Upload files to the CloudConvert service, wait for the conversion and \
download the result. In batch mode many files are converted concurrently and files \
converted before are fetched from the conversion history instead of being converted again.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source file, optionally followed by the destination. With --batch: all sources.
    files: Vec<PathBuf>,

    /// API key.
    #[arg(long, env = "CLOUDCONVERT_APIKEY", hide_env_values = true)]
    apikey: Option<String>,

    /// Source format. Default: the source extension.
    #[arg(long, env = "CCUP_FROM_FORMAT")]
    fromfmt: Option<String>,

    /// Destination format. Required unless a destination file name is given.
    #[arg(long, env = "CCUP_TO_FORMAT")]
    tofmt: Option<String>,

    /// Treat every positional argument as a source file.
    #[arg(long, env = "CCUP_BATCH")]
    batch: bool,

    /// Output target other than a download (e.g. googledrive, dropbox).
    #[arg(long, env = "CCUP_OUTPUT")]
    output: Option<String>,

    /// URL called by the service when a conversion ends.
    #[arg(long, env = "CCUP_CALLBACK")]
    callback: Option<String>,

    /// Ask the service to send an e-mail when a conversion ends.
    #[arg(long, env = "CCUP_EMAIL")]
    email: bool,

    /// Converter option as name=value. Repeatable.
    #[arg(short = 'O', long = "option", value_parser = parse_key_val)]
    options: Vec<(String, String)>,

    /// Poll interval in seconds when the service reports no progress.
    /// Default: 1, or 5 in batch mode.
    #[arg(long, env = "CCUP_WAIT")]
    wait: Option<f64>,

    /// Conversions in flight at once in batch mode.
    #[arg(short, long, env = "CCUP_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Convert every file, even those found in the conversion history.
    #[arg(long, env = "CCUP_NO_HISTORY")]
    no_history: bool,

    /// API base URL.
    #[arg(long, env = "CLOUDCONVERT_BASE_URL")]
    base_url: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "CCUP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CCUP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CCUP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs in batch mode.
    let show_progress = cli.batch && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<ExitCode> {
    let Some(first) = cli.files.first() else {
        eprintln!("{} a file name to upload is needed", red("error:"));
        return Ok(ExitCode::from(EXIT_MISSING_INPUT));
    };
    if cli.batch {
        run_many(cli, show_progress).await
    } else {
        run_single(cli, first).await
    }
}

async fn run_single(cli: &Cli, source: &Path) -> Result<ExitCode> {
    let destination = match (cli.files.get(1), cli.tofmt.as_deref()) {
        (Some(dest), _) => dest.clone(),
        (None, Some(fmt)) if !fmt.trim().is_empty() => destination_for(source, fmt.trim()),
        _ => {
            return Err(CloudConvertError::MissingOutputFormat {
                path: source.to_path_buf(),
            })
            .context("--tofmt or a destination file name (second argument) is needed");
        }
    };

    let mut request = ConversionRequest::new(source, &destination);
    request.source_format = cli.fromfmt.clone();
    request.destination_format = cli.tofmt.clone();

    let config = build_config(cli, Duration::from_secs(1), None)?;
    let start = Instant::now();
    let outcome = convert(&request, &config)
        .await
        .with_context(|| format!("Converting {} failed", source.display()))?;

    if !cli.quiet {
        let detail = match &outcome {
            ConversionOutcome::Delivered { target } => format!("delivered to {target}"),
            other => format!("{} bytes", other.bytes()),
        };
        eprintln!(
            "{}  {}  →  {}  {}  {}ms",
            green("✔"),
            source.display(),
            bold(&destination.display().to_string()),
            dim(&detail),
            start.elapsed().as_millis(),
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_many(cli: &Cli, show_progress: bool) -> Result<ExitCode> {
    let to_format = cli.tofmt.as_deref().map(str::trim);
    let Some(to_format) = to_format.filter(|f| !f.is_empty()) else {
        return Err(CloudConvertError::MissingOutputFormat {
            path: cli.files[0].clone(),
        })
        .context("--tofmt is needed in batch mode");
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, Duration::from_secs(5), progress)?;
    let api: Arc<dyn ConversionApi> = Arc::new(HttpApi::from_config(&config)?);

    let requests = cli
        .files
        .iter()
        .map(|source| {
            let mut r = ConversionRequest::new(source, destination_for(source, to_format))
                .destination_format(to_format);
            r.source_format = cli.fromfmt.clone();
            r
        })
        .collect();
    let report = run_batch(api, requests, &config).await;

    if !cli.quiet && !show_progress {
        for err in report.errors() {
            eprintln!("  {} {}", red("✗"), err);
        }
        eprintln!(
            "Converted {}/{} files ({} from history) in {}ms",
            report.stats.succeeded(),
            report.stats.total_files,
            report.stats.reused,
            report.stats.total_duration_ms
        );
    }

    if report.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_CONVERSION_FAILED))
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    default_wait: Duration,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let poll_interval = match cli.wait {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .with_context(|| format!("--wait must be a positive number of seconds, got {secs}"))?,
        None => default_wait,
    };

    let upload = UploadOptions {
        email: cli.email,
        output: cli.output.clone(),
        callback: cli.callback.clone(),
        converter_options: cli.options.iter().cloned().collect::<BTreeMap<_, _>>(),
    };

    let mut builder = ConversionConfig::builder()
        .concurrency(cli.concurrency)
        .poll_interval(poll_interval)
        .use_history(!cli.no_history)
        .upload_options(upload);
    if let Some(ref key) = cli.apikey {
        builder = builder.api_key(key);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;
    // Fail early, before any file is touched.
    config.resolve_api_key()?;
    Ok(config)
}

/// Parse a `name=value` converter option.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("option name is empty in '{s}'"));
    }
    Ok((k.to_string(), v.trim().to_string()))
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CloudConvertError>() {
        Some(CloudConvertError::FileNotFound { .. }) => EXIT_MISSING_INPUT,
        Some(CloudConvertError::MissingOutputFormat { .. }) => EXIT_MISSING_FORMAT,
        Some(CloudConvertError::MissingApiKey) => EXIT_MISSING_API_KEY,
        _ => EXIT_CONVERSION_FAILED,
    }
}
