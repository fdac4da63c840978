//! Run loop: Telegram long-poll feeding the dispatcher, one task per inbound message.

use crate::channels::{InboundMessage, TelegramTransport, Transport};
use crate::config::ConfigStore;
use crate::dispatch::Dispatcher;
use crate::init;
use crate::llm::HttpBackends;
use crate::media::{load_font, FfmpegTranscoder, MediaConverter};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Build the default dispatcher: HTTP backends and ffmpeg transcoding.
pub fn default_dispatcher() -> Dispatcher {
    Dispatcher::new(
        Arc::new(HttpBackends::new()),
        MediaConverter::new(Arc::new(FfmpegTranscoder)),
    )
}

/// Refresh the config, take a snapshot and dispatch one message. Errors are logged.
pub async fn handle_inbound(
    store: &ConfigStore,
    dispatcher: &Dispatcher,
    transport: &dyn Transport,
    msg: InboundMessage,
) {
    store.refresh().await;
    let config = store.snapshot().await;
    if let Err(e) = dispatcher.dispatch(&msg, &config, transport).await {
        log::warn!("inbound: reply to chat {} failed: {}", msg.chat_id, e);
    }
}

/// Handle messages from `inbound_rx`, one task each, until the channel closes. Returns once
/// every in-flight message has been answered.
pub async fn process_inbound(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    store: Arc<ConfigStore>,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                let store = Arc::clone(&store);
                let dispatcher = dispatcher.clone();
                let transport = Arc::clone(&transport);
                tasks.spawn(async move {
                    handle_inbound(&store, &dispatcher, transport.as_ref(), msg).await;
                });
            }
            Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = res {
                    log::warn!("inbound: message task failed: {}", e);
                }
            }
        }
    }
    if !tasks.is_empty() {
        log::info!("waiting for {} in-flight message(s)", tasks.len());
    }
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            log::warn!("inbound: message task failed: {}", e);
        }
    }
    log::debug!("inbound processor stopped");
}

/// Run the bridge until Ctrl+C. Requires a Telegram bot token.
pub async fn run_bridge(store: ConfigStore) -> Result<()> {
    let config = store.snapshot().await;
    let token = init::require_initialized(store.path(), &config)?;
    log::info!(
        "{}\n\nEnabled Commands:\n{}",
        config.ready_message,
        config.command_summary()
    );
    log::info!(
        "active AI backend: {} ({})",
        config.active_ai.name(),
        config.active_backend().model.as_deref().unwrap_or("default model")
    );
    if let Err(e) = load_font(&config.media).await {
        log::warn!("text stickers will fail until media.fontPath is fixed: {}", e);
    }

    let transport = Arc::new(TelegramTransport::new(token));
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let poll_task = Arc::clone(&transport).start_inbound(inbound_tx);
    let processor = tokio::spawn(process_inbound(
        inbound_rx,
        Arc::new(store),
        default_dispatcher(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    ));

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    transport.stop();
    // Aborting the poll task drops the sender, which lets the processor drain and return.
    poll_task.abort();
    let _ = poll_task.await;
    let _ = processor.await;
    Ok(())
}
