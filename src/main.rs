//! Telegram Monitor: binary entrypoint
//!
//! `telegram-monitor`                          live monitoring + status server
//! `telegram-monitor parse <export.json> [out_dir] [--analyze]`
//!                                             one-shot export parsing (+ LLM pass)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telegram_monitor::api::{self, AppState, SharedRegistry};
use telegram_monitor::config::{GroupStore, Settings};
use telegram_monitor::enrich::{self, DosingSummary};
use telegram_monitor::export;
use telegram_monitor::feed::{self, FeedSink, StdoutFeed};
use telegram_monitor::metrics::Metrics;
use telegram_monitor::monitor::{
    BotApiClient, ChannelDispatch, MonitorRegistry, MonitoredSource, Severity,
};

/// How long shutdown waits for the feed to print what is still queued.
const FEED_DRAIN: Duration = Duration::from_secs(2);

/// Logs go to stderr; stdout carries the human-readable feed.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("monitor=info,registry=info,enrich=info,export=info,telegram_monitor=info,warn")
    });
    let json = std::env::var("MONITOR_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load().context("loading settings")?;
    info!(
        "settings loaded: default_token_len={}, groups={}, ai_enabled={}",
        settings.default_bot_token.as_deref().map_or(0, str::len),
        settings.groups_path.display(),
        settings.ai_enabled
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_monitor(settings).await,
        Some("parse") => run_parse(&settings, &args[1..]).await,
        Some(other) => bail!("unknown command '{other}' (expected: parse)"),
    }
}

async fn run_monitor(settings: Settings) -> Result<()> {
    let metrics = Metrics::install()?;
    let fetcher = Arc::new(BotApiClient::new(
        &settings.api_base,
        settings.poll.request_grace(),
    )?);
    let (dispatch, receivers) = ChannelDispatch::new();

    let store = GroupStore::new(&settings.groups_path);
    let persisted = store.load();
    let mut registry = MonitorRegistry::new(fetcher, Arc::new(dispatch), settings.poll.timings())
        .with_default_token(settings.default_bot_token.clone())
        .with_store(store);
    let restored = registry.restore(persisted);
    info!(restored, "groups restored");

    if registry.is_empty() {
        match &settings.default_chat_id {
            Some(chat_id) => {
                registry.add(MonitoredSource::new("Default", chat_id, None))?;
            }
            None => warn!(
                "no groups configured; add entries to {} or set TELEGRAM_CHAT_ID",
                settings.groups_path.display()
            ),
        }
    }

    let started = registry
        .start_all()
        .into_iter()
        .filter(|(_, r)| matches!(r, Ok(true)))
        .count();
    info!(started, total = registry.len(), "monitors started");

    let registry: SharedRegistry = Arc::new(Mutex::new(registry));
    let extractor = enrich::build_extractor(&settings);
    let (feed_stop, feed_stop_rx) = oneshot::channel();
    let feed = tokio::spawn(feed::run_feed(
        receivers,
        Arc::clone(&registry),
        extractor,
        Arc::new(StdoutFeed),
        feed_stop_rx,
    ));

    let app = api::router(AppState {
        registry: Arc::clone(&registry),
    })
    .merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .with_context(|| format!("binding {}", settings.http_addr))?;
    info!(addr = %settings.http_addr, "status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
        })
        .await
        .context("status server")?;

    let stopped = registry.lock().await.stop_all().await;
    info!(stopped, "monitors stopped, shutting down");
    let _ = feed_stop.send(());
    if tokio::time::timeout(FEED_DRAIN, feed).await.is_err() {
        warn!("feed did not drain in time");
    }
    Ok(())
}

fn print_feed(level: &str, msg: &str) {
    StdoutFeed.line(level, msg);
}

async fn run_parse(settings: &Settings, args: &[String]) -> Result<()> {
    let analyze = args.iter().any(|a| a == "--analyze");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let Some(input) = positional.first() else {
        bail!("usage: telegram-monitor parse <export.json> [out_dir] [--analyze]");
    };

    let chats = export::parse_file(&PathBuf::from(input.as_str()))?;
    print_feed(
        &Severity::Success.to_string(),
        &format!(
            "Parsing complete! Processed {} messages.",
            export::message_count(&chats)
        ),
    );

    if let Some(out_dir) = positional.get(1) {
        let written = export::write_jsonl(&chats, &PathBuf::from(out_dir.as_str()))?;
        for p in written {
            print_feed("INFO", &format!("wrote {}", p.display()));
        }
    }

    if analyze {
        let extractor = enrich::build_extractor(settings);
        let events = enrich::analyze_chats(extractor.as_ref(), &chats, |done, total| {
            print_feed("INFO", &format!("AI processing message {done}/{total}..."));
        })
        .await;
        print_feed(
            &Severity::Success.to_string(),
            &format!("AI Analysis complete! Found {} dosing-related entries.", events.len()),
        );
        let summary = DosingSummary::from_events(&events);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
