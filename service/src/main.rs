use anyhow::Context;
use clap::Parser;
use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use rallyrank_core::{db::Db, rating::RatingConfig, scorer::Scorer};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
use url::Url;

mod api;
mod notifier;

use api::App;
use notifier::HttpNotifier;

/// Rating service for recorded match results.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// Path to the SQLite database.
    ///
    /// If not given, state is kept in memory and lost on exit.
    #[clap(long, env = "RALLYRANK_DB")]
    db: Option<PathBuf>,

    #[clap(long, env = "RALLYRANK_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Maximum rating change per match, before category and irregular-result multipliers.
    #[clap(
        short,
        long,
        env = "RALLYRANK_K_FACTOR",
        default_value_t = rallyrank_core::rating::DEFAULT_K_FACTOR
    )]
    k_factor: f64,

    /// Endpoint of the badge evaluator.
    #[clap(long, env = "RALLYRANK_BADGE_URL")]
    badge_url: Option<Url>,

    /// Endpoint of the notification dispatcher.
    #[clap(long, env = "RALLYRANK_NOTIFY_URL")]
    notify_url: Option<Url>,

    /// Seconds between attempts to redeliver undelivered signals.
    #[clap(long, env = "RALLYRANK_DISPATCH_INTERVAL", default_value = "30")]
    dispatch_interval: u64,

    /// Seconds a collaborator gets to accept one signal before the attempt counts as failed.
    #[clap(long, env = "RALLYRANK_DELIVERY_TIMEOUT", default_value = "10")]
    delivery_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
    let opt = Options::parse();

    let db = match &opt.db {
        Some(path) => Db::open(path)
            .await
            .with_context(|| format!("opening database {}", path.display()))?,
        None => {
            tracing::warn!("no database given, ratings will not outlive this process");
            Db::memory().await?
        }
    };
    let scorer = Scorer::new(
        db,
        RatingConfig {
            k_factor: opt.k_factor,
        },
        HttpNotifier::new(opt.badge_url.clone(), opt.notify_url.clone()),
    )
    .context("invalid rating configuration")?
    .with_delivery_timeout(Duration::from_secs(opt.delivery_timeout.max(1)));

    tokio::spawn(redeliver(
        scorer.clone(),
        Duration::from_secs(opt.dispatch_interval.max(1)),
    ));

    let app = Arc::new(App::new(scorer));
    let make_service = make_service_fn(move |_| {
        let app = app.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(app.handle(req).await) }
            }))
        }
    });

    tracing::info!(listen = %opt.listen, k_factor = opt.k_factor, "serving");
    Server::bind(&opt.listen).serve(make_service).await?;
    Ok(())
}

#[instrument(skip(scorer))]
async fn redeliver(scorer: Scorer<HttpNotifier>, interval: Duration) {
    loop {
        sleep(interval).await;
        match scorer.dispatch_pending(100).await {
            Ok(0) => {}
            Ok(delivered) => tracing::info!(delivered, "redelivered signals"),
            Err(err) => tracing::warn!("unable to read outbox: {err:#}"),
        }
    }
}
