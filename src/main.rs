use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use reqwest::redirect::Policy;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use feedcast::config::{Config, Settings};
use feedcast::delivery::{Deliverer, TelegramClient, Transport};
use feedcast::dispatch::{DispatchReport, Dispatcher};
use feedcast::feed::FeedFetcher;
use feedcast::format::PostFormatter;
use feedcast::pipeline::CategoryPipeline;

const MAX_REDIRECTS: usize = 5;

#[derive(Parser)]
#[command(
    name = "feedcast",
    version,
    about = "Post new RSS/Atom entries to Telegram channels"
)]
struct Args {
    /// Config file
    #[arg(long, value_name = "FILE", default_value = "feedcast.toml")]
    config: PathBuf,

    /// Telegram bot token (overrides bot_token in the config file)
    #[arg(long, value_name = "TOKEN", env = "FEEDCAST_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Run only this category (repeatable)
    #[arg(long = "category", value_name = "NAME")]
    categories: Vec<String>,

    /// Build messages and log them instead of sending
    #[arg(long)]
    dry_run: bool,

    /// End of the time window (RFC 3339), defaults to the current time
    #[arg(long, value_name = "RFC3339")]
    now: Option<DateTime<Utc>>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

/// Follows at most [`MAX_REDIRECTS`] hops and stops on loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev == url) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// `request_timeout` is a backstop; fetcher and Bot API client apply their own
/// per-request deadlines.
fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedcast/", env!("CARGO_PKG_VERSION")))
        .redirect(redirect_policy())
        .connect_timeout(Duration::from_secs(10))
        .timeout(request_timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

fn build_dispatcher(settings: Settings, http: reqwest::Client, dry_run: bool) -> Result<Dispatcher> {
    let delivery_retry = settings.delivery_retry();
    let delivery_timeout = settings.delivery_timeout();

    let fetcher = FeedFetcher::new(http.clone())
        .with_retry(settings.fetch_retry())
        .with_timeout(settings.fetch_timeout())
        .with_max_bytes(settings.fetch.max_feed_bytes);

    let pipeline = CategoryPipeline::new(
        fetcher,
        PostFormatter::new(settings.parse_mode),
        settings.window,
    )
    .with_concurrency(settings.fetch.concurrency)
    .with_sort_by_time(settings.sort_by_time);

    let transport = if dry_run {
        tracing::info!("Dry run: messages will be logged, not sent");
        Transport::DryRun
    } else {
        let client = TelegramClient::new(http, &settings.delivery.api_base_url, settings.bot_token)
            .context("Failed to set up Telegram client")?
            .with_timeout(delivery_timeout)
            .with_link_preview_disabled(settings.disable_link_preview);
        Transport::Telegram(client)
    };
    let deliverer = Deliverer::new(transport, settings.parse_mode).with_retry(delivery_retry);

    Ok(Dispatcher::new(pipeline, deliverer))
}

fn log_summary(report: &DispatchReport) {
    for category in &report.categories {
        if category.panicked {
            tracing::error!(category = %category.name, "Category aborted");
            continue;
        }
        tracing::info!(
            category = %category.name,
            feeds_ok = category.feeds_ok,
            feeds_failed = category.feeds_failed,
            selected = category.selected,
            delivered = category.delivered,
            failed = category.failed,
            "Category finished"
        );
    }
    tracing::info!(
        delivered = report.delivered(),
        failed = report.failed(),
        "Run complete"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        "feedcast=debug"
    } else {
        "feedcast=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let settings = config
        .validate(args.bot_token.map(SecretString::from), &args.categories)
        .context("Invalid configuration")?;

    let now = args.now.unwrap_or_else(Utc::now);
    let window = settings.window.at(now);
    tracing::info!(
        categories = settings.categories.len(),
        window_start = %window.start,
        window_end = %window.end,
        "Starting run"
    );

    let categories = settings.categories.clone();
    let http = build_http_client(settings.fetch_timeout().max(settings.delivery_timeout()))?;
    let dispatcher = build_dispatcher(settings, http, args.dry_run)?;
    let report = dispatcher.run_all(&categories, now).await;

    log_summary(&report);
    Ok(())
}
