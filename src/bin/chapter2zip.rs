//! CLI binary for chapter2zip.
//!
//! A thin shim over the library crate: maps CLI flags to `JobConfig` and a
//! `JobRequest`, submits the job to a `JobWorker`, prints the share link,
//! then stays alive until the archive is retracted.

use anyhow::{Context, Result};
use chapter2zip::{
    ChapterArchiver, DropboxStore, EnvSettings, HtmlRendererFactory, HttpFetcher, JobConfig,
    JobProgressCallback, JobRequest, JobSummary, JobWorker, LocalStore, NumberingDirection,
    ObjectStore, OutputFormat, ProgressCallback, RendererFactory, RetractionOutcome,
    MAX_RETRACTION_DELAY_SECS,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the chapter plan, one log line
/// per chapter.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    /// Spinner until the chapter plan is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Queued");
        bar.set_message("Waiting for the worker…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chapters  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Fetching");
        self.bar.reset_eta();
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_accepted(&self, job_id: &str) {
        self.bar.set_message(format!("job {}", &job_id[..job_id.len().min(8)]));
    }

    fn on_job_start(&self, total_chapters: usize) {
        self.activate_bar(total_chapters);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Fetching up to {total_chapters} chapter(s)…"))
        ));
    }

    fn on_chapter_start(&self, index: u32, _position: usize, _total: usize) {
        self.bar.set_message(format!("chapter {index}"));
    }

    fn on_chapter_complete(&self, index: u32, pages: usize) {
        self.bar.println(format!(
            "  {} Chapter {:>4}  {}",
            green("✓"),
            index,
            dim(&format!("{pages:>3} pages")),
        ));
        self.bar.inc(1);
    }

    fn on_chapter_error(&self, index: u32, error: &str, terminal: bool) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        let mark = if terminal { yellow("■") } else { red("✗") };
        self.bar
            .println(format!("  {} Chapter {:>4}  {}", mark, index, red(&msg)));
        self.bar.inc(1);
        if terminal {
            self.bar.println(format!(
                "  {} {}",
                dim("…"),
                dim("no further chapters; stopping here")
            ));
        }
    }

    fn on_warning(&self, message: &str) {
        self.bar.println(format!("{} {}", yellow("⚠"), message));
    }

    fn on_batch_complete(&self, processed: usize, attempted: usize) {
        self.bar.finish_and_clear();
        let failed = attempted.saturating_sub(processed);
        if processed == 0 {
            eprintln!("{} no chapters could be processed", red("✘"));
        } else if failed == 0 {
            eprintln!("{} {} chapter(s) fetched", green("✔"), bold(&processed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} chapter(s) fetched  ({} failed)",
                cyan("⚠"),
                bold(&processed.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }

    fn on_publish_start(&self, archive_name: &str, bytes: u64) {
        eprintln!(
            "{} Uploading {}  {}",
            cyan("◆"),
            bold(archive_name),
            dim(&format!("{:.1} MB", bytes as f64 / 1_048_576.0)),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Three chapters starting at the one in the URL, merged JPEG pages
  chapter2zip https://reader.example.com/series/chapter-10 -n 3

  # Explicit start index, WebP output, no merging
  chapter2zip https://reader.example.com/series/chapter-1 --start 25 -n 5 -f webp --no-merge

  # Naver-style list URL, counting downward
  chapter2zip "https://comic.example.com/detail?titleId=1&no=120" -n 4 --direction descending

  # Publish to a local directory instead of Dropbox
  chapter2zip https://reader.example.com/series/chapter-3 --store local --local-dir ./out

  # Script-built viewer pages (build with --features browser)
  chapter2zip "https://viewer.example.com/view?epi=7" --renderer browser

RECOGNIZED CHAPTER NUMBERS IN URLS:
  .../chapter-12   ...?no=12   ...&epi=12
  Any other URL is fetched as a single chapter.

ENVIRONMENT VARIABLES:
  DROPBOX_ACCESS_TOKEN      Dropbox app token (required for --store dropbox)
  CHROME_BIN                Chrome/Chromium binary for --renderer browser
  GOOGLE_CHROME_BIN         Fallback for CHROME_BIN
  CHAPTER2ZIP_STAGING_DIR   Parent directory for per-job scratch space
  RUST_LOG                  Override log filtering (e.g. chapter2zip=debug)

The archive is deleted from the store after --retract-after seconds. The
process waits until then; press Ctrl-C to delete it immediately and exit.
"#;

/// Fetch numbered chapters and publish them as a self-expiring zip link.
#[derive(Parser, Debug)]
#[command(
    name = "chapter2zip",
    version,
    about = "Fetch numbered chapters and publish them as a self-expiring zip link",
    long_about = "Fetch a run of consecutive chapters from a comic/webtoon reader, keep only \
reading-width page images, optionally merge pages pairwise, and publish everything as one zip \
behind a share link that is deleted again after a delay.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// URL of a chapter page; the chapter number is found in it.
    url: String,

    /// Number of chapters to fetch.
    #[arg(short = 'n', long, env = "CHAPTER2ZIP_CHAPTERS", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    chapters: u32,

    /// First chapter index. Default: the number in the URL.
    #[arg(long, env = "CHAPTER2ZIP_START")]
    start: Option<u32>,

    /// Keep pages as they are instead of stacking them in pairs.
    #[arg(long, env = "CHAPTER2ZIP_NO_MERGE")]
    no_merge: bool,

    /// Page format: jpg, webp, png.
    #[arg(short, long, env = "CHAPTER2ZIP_FORMAT", default_value = "jpg")]
    format: String,

    /// Numbering direction: auto (per URL label), ascending, descending.
    #[arg(long, env = "CHAPTER2ZIP_DIRECTION", value_enum, default_value = "auto")]
    direction: DirectionArg,

    /// Minimum page image width in pixels.
    #[arg(long, env = "CHAPTER2ZIP_MIN_WIDTH", default_value_t = 800)]
    min_width: u32,

    /// Seconds to wait for page images to appear.
    #[arg(long, env = "CHAPTER2ZIP_RENDER_TIMEOUT", default_value_t = 30)]
    render_timeout: u64,

    /// Per-image download timeout in seconds.
    #[arg(long, env = "CHAPTER2ZIP_FETCH_TIMEOUT", default_value_t = 50,
          value_parser = clap::value_parser!(u64).range(1..))]
    fetch_timeout: u64,

    /// Pause after each scroll step, in milliseconds.
    #[arg(long, env = "CHAPTER2ZIP_SCROLL_SETTLE_MS", default_value_t = 3000)]
    scroll_settle_ms: u64,

    /// Maximum scroll steps per chapter.
    #[arg(long, env = "CHAPTER2ZIP_MAX_SCROLLS", default_value_t = 8)]
    max_scrolls: u32,

    /// Encoder quality for jpg/webp and merged pages (1–100).
    #[arg(long, env = "CHAPTER2ZIP_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Seconds before the published archive is deleted (at most one week).
    #[arg(long, env = "CHAPTER2ZIP_RETRACT_AFTER", default_value_t = 3000,
          value_parser = clap::value_parser!(u64).range(0..=MAX_RETRACTION_DELAY_SECS))]
    retract_after: u64,

    /// CSS selector for page images.
    #[arg(long, env = "CHAPTER2ZIP_SELECTOR")]
    selector: Option<String>,

    /// Archive name prefix.
    #[arg(long, env = "CHAPTER2ZIP_PREFIX", default_value = "manga")]
    prefix: String,

    /// Page renderer: html (plain fetch) or browser (headless Chrome).
    #[arg(long, env = "CHAPTER2ZIP_RENDERER", value_enum, default_value = "html")]
    renderer: RendererArg,

    /// Where archives are published.
    #[arg(long, env = "CHAPTER2ZIP_STORE", value_enum, default_value = "dropbox")]
    store: StoreArg,

    /// Target directory for --store local.
    #[arg(long, env = "CHAPTER2ZIP_LOCAL_DIR", default_value = "./published")]
    local_dir: PathBuf,

    /// Parent directory for per-job scratch space.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Print the job summary as JSON on stdout.
    #[arg(long, env = "CHAPTER2ZIP_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CHAPTER2ZIP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHAPTER2ZIP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the link.
    #[arg(short, long, env = "CHAPTER2ZIP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Auto,
    Ascending,
    Descending,
}

impl DirectionArg {
    fn resolve(self) -> Option<NumberingDirection> {
        match self {
            DirectionArg::Auto => None,
            DirectionArg::Ascending => Some(NumberingDirection::Ascending),
            DirectionArg::Descending => Some(NumberingDirection::Descending),
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RendererArg {
    Html,
    Browser,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StoreArg {
    Dropbox,
    Local,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback; keep library logs to errors
    // while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Startup checks ───────────────────────────────────────────────────
    // Reject a bad format before anything touches the network.
    let format: OutputFormat = cli.format.parse().context("Invalid --format")?;
    let env = EnvSettings::from_env();

    let store = build_store(&cli, &env)?;
    let identity = store
        .verify()
        .await
        .with_context(|| format!("Could not reach the {} store", store.name()))?;
    if !cli.quiet {
        eprintln!("{} {} store: {}", cyan("◆"), store.name(), dim(&identity));
    }

    let renderers = build_renderer(&cli, &env)?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, &env, progress_cb)?;
    let fetcher =
        Arc::new(HttpFetcher::new(config.fetch_timeout_secs).context("HTTP client setup failed")?);

    // ── Submit and wait ──────────────────────────────────────────────────
    let archiver = Arc::new(ChapterArchiver::new(config, renderers, fetcher, store));
    let worker = JobWorker::spawn(archiver, 1);

    let mut request = JobRequest::new(cli.url.clone(), cli.chapters)
        .merge(!cli.no_merge)
        .format(format);
    if let Some(start) = cli.start {
        request = request.start(start);
    }
    if let Some(direction) = cli.direction.resolve() {
        request = request.direction(direction);
    }

    let ticket = worker.submit(request).await.context("Job rejected")?;
    let report = ticket.outcome().await.context("Job failed")?;
    worker.shutdown().await;

    print_summary(&cli, &report.summary)?;

    // ── Retraction ───────────────────────────────────────────────────────
    let retraction = report.retraction;
    let remaining = retraction.remaining();
    if !cli.quiet {
        eprintln!(
            "{} Link expires in {}  {}",
            cyan("◆"),
            bold(&format_duration(remaining)),
            dim("(Ctrl-C deletes it now)"),
        );
    }

    let outcome = tokio::select! {
        _ = tokio::time::sleep(remaining) => retraction.wait().await,
        _ = tokio::signal::ctrl_c() => {
            if !cli.quiet {
                eprintln!("{} Interrupted; deleting the archive now", yellow("⚠"));
            }
            retraction.retract_now().await
        }
    };

    match outcome {
        RetractionOutcome::Deleted | RetractionOutcome::AlreadyGone => {
            if !cli.quiet {
                eprintln!("{} Archive retracted", green("✔"));
            }
            Ok(())
        }
        RetractionOutcome::Cancelled => Ok(()),
        RetractionOutcome::Failed(detail) => {
            anyhow::bail!("Archive could not be retracted: {detail}")
        }
    }
}

fn build_store(cli: &Cli, env: &EnvSettings) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match cli.store {
        StoreArg::Dropbox => {
            let token = env.require_dropbox_token()?;
            Arc::new(
                DropboxStore::new(token, cli.fetch_timeout.max(60))
                    .context("Dropbox client setup failed")?,
            )
        }
        StoreArg::Local => Arc::new(LocalStore::new(cli.local_dir.clone())),
    };
    Ok(store)
}

fn build_renderer(cli: &Cli, env: &EnvSettings) -> Result<Arc<dyn RendererFactory>> {
    match cli.renderer {
        RendererArg::Html => Ok(Arc::new(
            HtmlRendererFactory::new(cli.render_timeout).context("HTTP client setup failed")?,
        )),
        #[cfg(feature = "browser")]
        RendererArg::Browser => Ok(Arc::new(chapter2zip::BrowserRendererFactory::new(
            env.chrome_bin.clone(),
            cli.render_timeout,
        ))),
        #[cfg(not(feature = "browser"))]
        RendererArg::Browser => {
            let _ = env;
            anyhow::bail!(
                "This build has no browser renderer.\n\
                 Rebuild with `--features browser` or use --renderer html."
            )
        }
    }
}

/// Map CLI args to `JobConfig`.
fn build_config(
    cli: &Cli,
    env: &EnvSettings,
    progress: Option<ProgressCallback>,
) -> Result<JobConfig> {
    let mut builder = JobConfig::builder()
        .min_width(cli.min_width)
        .render_timeout_secs(cli.render_timeout)
        .fetch_timeout_secs(cli.fetch_timeout)
        .scroll_settle_ms(cli.scroll_settle_ms)
        .max_scroll_attempts(cli.max_scrolls)
        .quality(cli.quality)
        .retraction_delay_secs(cli.retract_after)
        .archive_prefix(cli.prefix.clone());

    if let Some(ref selector) = cli.selector {
        builder = builder.image_selector(selector.clone());
    }
    if let Some(dir) = cli.staging_dir.clone().or_else(|| env.staging_root.clone()) {
        builder = builder.staging_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(cli: &Cli, summary: &JobSummary) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(summary).context("Failed to serialise summary")?;
        println!("{json}");
        return Ok(());
    }

    // The link is the product: always on stdout, even with --quiet.
    println!("{}", summary.publication.link);

    if cli.quiet {
        return Ok(());
    }
    if summary.count_clamped {
        eprintln!(
            "{} No chapter number in the URL; fetched that single page only.",
            yellow("⚠")
        );
    }
    eprintln!(
        "{}  {}/{} chapter(s)  {} page(s)  {}  {}ms",
        if summary.is_partial() {
            cyan("⚠")
        } else {
            green("✔")
        },
        summary.processed_count(),
        summary.attempted_chapters,
        summary.total_pages(),
        bold(&summary.archive.name),
        summary.stats.total_duration_ms,
    );
    for failure in &summary.failures {
        eprintln!("   {} {}", red("✗"), dim(&failure.error.to_string()));
    }
    if let Some(index) = summary.stopped_at {
        eprintln!("   {} chapter {} does not exist; stopped there", dim("■"), index);
    }
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, _) => format!("{h}h {m:02}m"),
    }
}
