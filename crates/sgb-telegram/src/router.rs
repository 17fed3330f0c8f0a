use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sgb_core::{access::AccessGate, alerts::AlertEngine, config::Config, sync::SyncEngine};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub sync: Arc<SyncEngine>,
    pub gate: Arc<AccessGate>,
    pub alerts: Arc<AlertEngine>,
}

/// Long-poll Telegram until `shutdown` fires.
pub async fn run_polling(
    bot: Bot,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot connected"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(channels = state.cfg.channels.len(), "gated channels configured");

    let handler = dptree::entry()
        .branch(Update::filter_chat_join_request().endpoint(handlers::handle_join_request))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match token.shutdown() {
            Ok(done) => {
                done.await;
                info!("dispatcher stopped");
            }
            Err(e) => warn!(error = %e, "dispatcher was not running"),
        }
    });

    dispatcher.dispatch().await;
    Ok(())
}
