//! billwatch: binary entrypoint.
//! Loads config, opens the duplicate guard, wires the congress.gov source,
//! scanner and publisher, then runs the chosen command.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use billwatch::config::AppConfig;
use billwatch::ingest::providers::congress_gov::CongressGovSource;
use billwatch::ingest::scheduler::{run_watch, WatchCfg};
use billwatch::metrics::Metrics;
use billwatch::notify::antiflutter::PostCooldown;
use billwatch::notify::dry_run::DryRunPublisher;
use billwatch::notify::x::XPublisher;
use billwatch::notify::{DispatchReport, Dispatcher, Publisher};
use billwatch::render::{CardRenderer, ImageRenderer};
use billwatch::{init_tracing, Scanner, SeenStore};

#[derive(Parser, Debug)]
#[command(name = "billwatch", version, about = "Posts newly introduced federal bills to X")]
struct Cli {
    /// Config file (TOML). Falls back to $BILLWATCH_CONFIG, then config/billwatch.toml.
    #[arg(long, global = true, env = "BILLWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One incremental discovery pass.
    Once {
        /// Publish to X instead of the dry-run log.
        #[arg(long)]
        post: bool,
    },
    /// Catch up, then poll on the configured interval until Ctrl-C.
    Watch {
        #[arg(long)]
        post: bool,
    },
    /// Backfill: page through the listing until nothing new turns up.
    CatchUp {
        #[arg(long)]
        post: bool,
    },
    /// Fetch and classify the recent window without marking anything seen.
    Preview {
        /// Also write summary cards to the render output directory.
        #[arg(long)]
        render: bool,
    },
    /// List logged bills that never got a post.
    Unposted {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn publisher(cfg: &AppConfig, post: bool) -> Result<Arc<dyn Publisher>> {
    if post || cfg.publish.enabled {
        let token = AppConfig::x_access_token()?;
        Ok(Arc::new(XPublisher::from_config(&cfg.publish, token)))
    } else {
        Ok(Arc::new(DryRunPublisher::new()))
    }
}

/// Counts from the scan, not the dispatch: a held batch posts nothing yet.
fn once_summary(found: usize, sent: &DispatchReport) -> String {
    format!("new: {found}, posted: {}, held: {}", sent.posted.len(), sent.deferred)
}

fn card_renderer(cfg: &AppConfig) -> CardRenderer {
    CardRenderer::new(cfg.render.output_dir.clone()).with_format(cfg.render.format)
}

fn dispatcher(cfg: &AppConfig, store: SeenStore, post: bool) -> Result<Dispatcher> {
    let cooldown = PostCooldown::new(i64::try_from(cfg.publish.cooldown_secs).unwrap_or(i64::MAX));
    let mut d = Dispatcher::new(publisher(cfg, post)?, store, cooldown);
    if cfg.render.enabled {
        d = d.with_renderer(Arc::new(card_renderer(cfg)));
        if let Some(root) = &cfg.render.archive_dir {
            d = d.with_archive(root.clone());
        }
    }
    Ok(d)
}

async fn open_store(cfg: &AppConfig) -> Result<SeenStore> {
    if let Some(dir) = cfg.store.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    SeenStore::open(&cfg.store.path)
        .await
        .with_context(|| format!("opening seen store {}", cfg.store.path.display()))
}

fn scanner(cfg: &AppConfig, store: SeenStore) -> Result<Scanner> {
    let api_key = AppConfig::congress_api_key()?;
    let source = CongressGovSource::from_config(&cfg.congress, api_key);
    Ok(Scanner::from_config(Arc::new(source), store, cfg))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;
    init_tracing(cfg.log_format);

    if let Some(listen) = cfg.metrics.listen.clone() {
        let metrics = Metrics::init(cfg.current_congress())?;
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&listen).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        });
    }

    let store = open_store(&cfg).await?;
    tracing::info!(
        congress = cfg.current_congress(),
        strategy = ?cfg.scan.strategy,
        store = %cfg.store.path.display(),
        "billwatch starting"
    );

    match cli.command {
        Command::Once { post } => {
            let scanner = scanner(&cfg, store.clone())?;
            let mut d = dispatcher(&cfg, store.clone(), post)?;
            let report = scanner.incremental().await;
            if let Some(e) = &report.interrupted {
                tracing::warn!(error = %e, "cycle interrupted");
            }
            let found = report.batch.len();
            let sent = d.dispatch(report.batch).await;
            println!("{}", once_summary(found, &sent));
        }
        Command::CatchUp { post } => {
            let scanner = scanner(&cfg, store.clone())?;
            let mut d = dispatcher(&cfg, store.clone(), post)?;
            let report = scanner.catch_up().await;
            let found = report.batch.len();
            let sent = d.dispatch(report.batch).await;
            println!("caught up: {found} new, {} posted", sent.posted.len());
        }
        Command::Watch { post } => {
            let scanner = scanner(&cfg, store.clone())?;
            let mut d = dispatcher(&cfg, store.clone(), post)?;
            let watch = WatchCfg {
                interval: cfg.scan.interval(),
                catch_up_on_start: cfg.scan.catch_up_on_start,
            };
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            };
            run_watch(&scanner, &mut d, watch, shutdown).await;
        }
        Command::Preview { render } => {
            let scanner = scanner(&cfg, store.clone())?;
            let bills = scanner.preview(&scanner.recent_window()).await?;
            for b in &bills {
                println!("{}\t{}\t{}", b.key.display_number(), b.sponsor_display(), b.title);
            }
            if render {
                let media = card_renderer(&cfg).render(&bills)?;
                for m in media {
                    println!("wrote {}", m.path.display());
                }
            }
        }
        Command::Unposted { limit } => {
            for e in store.unposted(limit).await? {
                println!("{}\t{}\t{}", e.key.display_number(), e.logged_at.to_rfc3339(), e.url);
            }
        }
    }

    store.close().await;
    Ok(())
}
