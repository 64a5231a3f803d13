use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineEvent};
use engine::{InstrumentActor, OrderExecutor, PositionEngine};
use paper::PaperClient;
use strategy::{read_records, ReplaySource, SignalRegistry, StrategyFileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(bars = %cfg.bars_path, strategies = %cfg.strategy_config_path, "RiskBot replay starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)
        .with_context(|| format!("loading {}", cfg.strategy_config_path))?;
    let records = read_records(&cfg.bars_path)
        .with_context(|| format!("reading bars from {}", cfg.bars_path))?;

    // ── Signal sources ────────────────────────────────────────────────────────
    let mut registry = SignalRegistry::new();
    for s in &strategy_file.strategies {
        let source = ReplaySource::from_records(&s.pair, &records);
        info!(name = %s.name, pair = %s.pair, signals = source.len(), "Replay source ready");
        registry.register(s.pair.clone(), Box::new(source));
    }

    // ── Channels ──────────────────────────────────────────────────────────────
    let (order_tx, order_rx) = mpsc::channel::<common::Order>(cfg.channel_capacity);
    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(cfg.channel_capacity);

    // ── Instrument actors ─────────────────────────────────────────────────────
    let mut handles = HashMap::new();
    let mut actor_tasks = Vec::new();
    for s in &strategy_file.strategies {
        let engine = PositionEngine::new(s.pair.clone(), s.risk.clone(), s.instrument)
            .with_context(|| format!("building engine for {}", s.pair))?;
        let (actor, handle) =
            InstrumentActor::new(engine, order_tx.clone(), event_tx.clone(), cfg.channel_capacity);
        actor_tasks.push(tokio::spawn(actor.run()));
        handles.insert(s.pair.clone(), handle);
    }
    // Actors own the remaining senders; the executor and logger stop with them.
    drop(order_tx);
    drop(event_tx);

    // ── Order executor ────────────────────────────────────────────────────────
    let paper = Arc::new(PaperClient::new(cfg.paper_slippage_bps));
    let executor = OrderExecutor::new(order_rx, paper.clone(), handles.values().cloned());
    let executor_task = tokio::spawn(executor.run());

    // ── Diagnostic event logger ───────────────────────────────────────────────
    let logger_task = tokio::spawn(async move {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        while let Some(event) = event_rx.recv().await {
            let kind = match &event {
                EngineEvent::EntrySkipped { pair, signal, reason } => {
                    info!(pair = %pair, ?signal, reason = %reason, "Entry skipped");
                    "entry_skipped"
                }
                EngineEvent::ExitTriggered { pair, reason, price } => {
                    info!(pair = %pair, reason = %reason, price, "Protective exit");
                    "exit_triggered"
                }
                EngineEvent::StageFired { pair, stage, volume } => {
                    info!(pair = %pair, stage, volume, "Stage fired");
                    "stage_fired"
                }
                EngineEvent::TrailingAdopted { pair, price } => {
                    info!(pair = %pair, price, "Trailing stop moved");
                    "trailing_adopted"
                }
                EngineEvent::DrawdownBreached { pair, floating_loss, limit } => {
                    warn!(pair = %pair, floating_loss, limit, "Drawdown breaker tripped");
                    "drawdown_breached"
                }
                EngineEvent::OrderFailed { pair, order_id, error } => {
                    warn!(pair = %pair, order_id = %order_id, error = %error, "Order failed");
                    "order_failed"
                }
                EngineEvent::ForcedExitFailed { pair, error } => {
                    error!(pair = %pair, error = %error, "Forced exit failed, instrument halted");
                    "forced_exit_failed"
                }
            };
            *counts.entry(kind).or_default() += 1;
        }
        counts
    });

    // ── Replay ────────────────────────────────────────────────────────────────
    let mut replayed = 0usize;
    for record in records {
        let Some(handle) = handles.get(&record.pair) else {
            warn!(pair = %record.pair, "Bar for unconfigured pair skipped");
            continue;
        };
        paper.update_price(&record.pair, record.bar.close).await;
        let signal = registry.on_bar(&record.pair, record.bar);
        handle.send_bar(record.bar, signal).await;
        // Market fills must price against this bar, not a later one.
        handle.settle().await;
        replayed += 1;
    }
    info!(bars = replayed, "Replay finished");

    // ── Shutdown & summary ────────────────────────────────────────────────────
    for handle in handles.values() {
        handle.shutdown().await;
    }
    let mut engines = Vec::new();
    for task in actor_tasks {
        engines.push(task.await.context("instrument actor panicked")?);
    }
    let routed = executor_task.await.context("executor panicked")?;
    let counts = logger_task.await.context("event logger panicked")?;
    drop(handles);

    for engine in &engines {
        let account = paper.account(engine.pair()).await;
        let sizing = engine.sizing();
        info!(
            pair = %engine.pair(),
            state = %engine.state(),
            side = %engine.position().side,
            volume = engine.position().volume,
            equity = sizing.equity,
            peak_equity = sizing.peak_equity,
            next_volume = sizing.current_volume,
            losses = sizing.consecutive_losses,
            wins = sizing.consecutive_wins,
            realized_pnl = account.realized_pnl,
            fills = account.fills,
            "Instrument summary"
        );
    }
    info!(orders = routed, events = ?counts, "RiskBot replay complete");
    Ok(())
}
