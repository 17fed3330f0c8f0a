use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sgb_core::{
    access::AccessGate,
    alerts::AlertEngine,
    config::Config,
    ports::{ChannelPlatform, PriceFeed, SubscriptionSource},
    renewal::RenewalReminder,
    scheduler::Scheduler,
    store::{Accounts, JsonFileStore},
    sync::{Registrar, SyncEngine},
    throttled::{ThrottleConfig, ThrottledPlatform},
};
use sgb_sheets::SheetsClient;
use sgb_telegram::{
    router::{run_polling, AppState},
    TelegramPlatform,
};
use sgb_twelvedata::TwelveDataClient;

mod health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sgb_core::logging::init("sgb")?;

    let cfg = Arc::new(Config::load()?);

    let accounts = Arc::new(Accounts::new(Arc::new(JsonFileStore::open(
        &cfg.data_file,
    )?)));

    let flags = cfg.entitlement_flags();
    let source: Arc<dyn SubscriptionSource> = Arc::new(SheetsClient::new(
        cfg.subscription_source_url.clone(),
        flags.clone(),
        cfg.sync_timeout,
    )?);
    let registrar = Registrar::new(source.clone(), cfg.register_attempts, cfg.register_backoff);
    let sync = Arc::new(SyncEngine::new(
        source,
        accounts.clone(),
        registrar,
        flags,
        cfg.sync_timeout,
    ));

    let feed: Arc<dyn PriceFeed> = Arc::new(TwelveDataClient::new(
        cfg.price_feed_url.clone(),
        cfg.twelve_api_key.clone(),
        cfg.price_timeout,
    )?);

    // Keep the Bot API retry on RetryAfter in the adapter; spacing happens here.
    let telegram = TelegramPlatform::from_token(cfg.bot_token.clone());
    let platform: Arc<dyn ChannelPlatform> = Arc::new(ThrottledPlatform::new(
        Arc::new(telegram.clone()),
        ThrottleConfig::default(),
    ));

    let gate = Arc::new(AccessGate::new(sync.clone(), platform.clone(), &cfg));
    let alerts = Arc::new(AlertEngine::new(accounts.clone(), feed, platform.clone()));
    let renewal = Arc::new(RenewalReminder::new(sync.clone(), platform, &cfg));
    let scheduler = Arc::new(Scheduler::new(accounts, alerts.clone(), renewal, &cfg));

    let shutdown = CancellationToken::new();
    let health = {
        let (port, shutdown) = (cfg.health_port, shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, shutdown).await {
                error!(port, error = %e, "health endpoint failed");
            }
        })
    };

    scheduler.start().await;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "cannot listen for ctrl-c; shutting down"),
            }
            shutdown.cancel();
        });
    }

    let state = Arc::new(AppState {
        cfg,
        sync,
        gate,
        alerts,
    });
    let polled = run_polling(telegram.bot(), state, shutdown.clone()).await;

    shutdown.cancel();
    scheduler.shutdown().await;
    if let Err(e) = health.await {
        error!(error = %e, "health task panicked");
    }

    info!("bye");
    polled
}
