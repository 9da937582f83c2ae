use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use paperchase_core::config_file;
use paperchase_core::{
    BrowserLauncher, ChecklistStore, Config, DuplicateRegistry, LazyLauncher, Phase, ProgressEvent,
    ProgressFn, RateLimiters, Scheduler, SourceChain,
};

mod output;

use output::ColorMode;

/// Download the article PDFs listed in a sourcing checklist
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Markdown checklist with rows like `12. [ ] https://doi.org/...`
    checklist: PathBuf,

    /// First row index to process (inclusive)
    #[arg(long)]
    start: Option<usize>,

    /// Last row index to process (inclusive)
    #[arg(long)]
    end: Option<usize>,

    /// Concurrent items in the API phase
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between API-phase submissions
    #[arg(long)]
    delay: Option<f64>,

    /// Skip the browser phase entirely
    #[arg(long)]
    skip_browser: bool,

    /// Concurrent items in the browser phase
    #[arg(long)]
    browser_workers: Option<usize>,

    /// Only capture landing-page screenshots in the browser phase
    #[arg(long)]
    screenshots_only: bool,

    /// Where PDFs, stubs and screenshots go (default: the checklist's directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated list of sources to disable
    #[arg(long, value_delimiter = ',')]
    disable_sources: Vec<String>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Per-source progress and debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,paperchase_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn build_config(cli: &Cli, output_dir: PathBuf) -> Config {
    let mut config = Config::default();
    config_file::load_config().apply(&mut config);

    let env_override = |slot: &mut Option<String>, name: &str| {
        if let Some(v) = env_var(name) {
            *slot = Some(v);
        }
    };
    env_override(&mut config.unpaywall_email, "UNPAYWALL_EMAIL");
    env_override(&mut config.core_api_key, "CORE_API_KEY");
    env_override(&mut config.crossref_mailto, "CROSSREF_MAILTO");
    env_override(&mut config.anthropic_api_key, "ANTHROPIC_API_KEY");
    env_override(&mut config.s2_api_key, "S2_API_KEY");
    if let Some(secs) = env_var("PAPERCHASE_SOURCE_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.source_timeout_secs = secs;
    }
    if let Some(model) = env_var("PAPERCHASE_VISION_MODEL") {
        config.vision_model = model;
    }

    config.output_dir = output_dir;
    config.start_index = cli.start;
    config.end_index = cli.end;
    if let Some(n) = cli.workers {
        config.num_workers = n.max(1);
    }
    if let Some(n) = cli.browser_workers {
        config.browser_workers = n.max(1);
    }
    if let Some(secs) = cli.delay.filter(|s| s.is_finite() && *s >= 0.0) {
        config.submit_delay = Duration::from_secs_f64(secs);
    }
    if !cli.disable_sources.is_empty() {
        config.disabled_sources = cli.disable_sources.clone();
    }
    config.skip_browser |= cli.skip_browser;
    config.screenshots_only |= cli.screenshots_only;
    if cli.headful {
        config.headless = false;
    }

    config.rate_limiters = Arc::new(RateLimiters::new(
        config.crossref_mailto.is_some(),
        config.s2_api_key.is_some(),
    ));
    config
}

fn default_output_dir(checklist: &Path) -> PathBuf {
    match checklist.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The browser is only started once the browser phase asks for a page.
fn browser_launcher(config: &Config) -> Option<Arc<dyn BrowserLauncher>> {
    if config.skip_browser {
        return None;
    }
    let headless = config.headless;
    Some(Arc::new(LazyLauncher::new(move || {
        paperchase_browser::ChromiumLauncher::launch(headless)
    })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.checklist.exists() {
        anyhow::bail!("Checklist not found: {}", cli.checklist.display());
    }
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&cli.checklist));
    std::fs::create_dir_all(&output_dir)?;

    let config = build_config(&cli, output_dir);
    tracing::debug!(?config, "resolved configuration");

    let color = ColorMode(!cli.no_color);
    let checklist = ChecklistStore::new(&cli.checklist);
    // Fail before launching anything if the checklist is unusable.
    checklist.parse()?;

    let cancel = CancellationToken::new();
    let launcher = browser_launcher(&config);
    let browser = launcher.is_some();
    let chain = SourceChain::from_config(
        &config,
        Arc::new(paperchase_pdf_mupdf::MupdfBackend::new()),
        launcher,
        cancel.clone(),
    )?;

    let mut stdout = std::io::stdout();
    output::print_header(
        &mut stdout,
        &cli.checklist,
        &config.output_dir,
        &chain.names(Phase::Fast),
        browser,
        color,
    )?;

    let registry = DuplicateRegistry::scan(&config.output_dir, chain.validator()).await;
    let scheduler = Scheduler::new(config, checklist, registry, chain).with_cancel(cancel.clone());

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight items");
            cancel_clone.cancel();
        }
    });

    let progress_writer: Arc<Mutex<Box<dyn Write + Send>>> =
        Arc::new(Mutex::new(Box::new(std::io::stdout())));
    let verbose = cli.verbose;
    let progress: ProgressFn = {
        let pw = Arc::clone(&progress_writer);
        Arc::new(move |event: ProgressEvent| {
            if let Ok(mut w) = pw.lock() {
                let _ = output::print_progress(&mut *w, &event, verbose, color);
                let _ = w.flush();
            }
        })
    };

    let report = scheduler.run(progress).await?;
    output::print_summary(&mut stdout, &report, color)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_defaults_to_checklist_parent() {
        assert_eq!(
            default_output_dir(Path::new("refs/sources.md")),
            PathBuf::from("refs")
        );
        assert_eq!(default_output_dir(Path::new("sources.md")), PathBuf::from("."));
    }

    #[test]
    fn skip_browser_builds_no_launcher() {
        let cli = Cli::parse_from(["paperchase", "refs.md", "--skip-browser"]);
        let config = build_config(&cli, PathBuf::from("out"));
        assert!(browser_launcher(&config).is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "paperchase",
            "refs.md",
            "--workers",
            "0",
            "--delay",
            "1.5",
            "--disable-sources",
            "Sci-Hub,LibGen",
            "--skip-browser",
        ]);
        let config = build_config(&cli, PathBuf::from("out"));
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.submit_delay, Duration::from_millis(1500));
        assert_eq!(config.disabled_sources, vec!["Sci-Hub", "LibGen"]);
        assert!(config.skip_browser);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }
}
