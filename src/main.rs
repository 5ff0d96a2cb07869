//! Funding Sniper - Main Entry Point
//!
//! Paper trading by default; set LIVE_TRADING=true to trade real money.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use funding_sniper::config::{BybitConfig, Config};
use funding_sniper::engine::FundingEngine;
use funding_sniper::exchange::{
    BybitClient, BybitWebSocket, Exchange, InstrumentInfo, LotSizeFilter, PaperExchange,
    PriceFilter, WsEvent,
};
use funding_sniper::persistence::TradeJournal;
use funding_sniper::scanner::{render_table, FundingScanner};
use funding_sniper::schedule::format_countdown;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const JOURNAL_DB_PATH: &str = "data/journal.db";

/// Funding Sniper CLI
#[derive(Parser)]
#[command(name = "funding-sniper")]
#[command(version, about = "Timed order execution around Bybit funding settlements")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the funding-rate leaderboard and exit
    Scan {
        /// Number of symbols to list (overrides config)
        #[arg(short, long)]
        top: Option<usize>,
    },

    /// Show recent orders from the trade journal
    Status {
        /// Path to SQLite journal (default: data/journal.db)
        #[arg(short, long, default_value = JOURNAL_DB_PATH)]
        db: String,

        /// Number of orders to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Trading mode: Live (real money) or Paper (simulated orders).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Scan { top }) => return run_scan(top).await,
        Some(Commands::Status { db, limit }) => return show_status(&db, limit),
        None => {}
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Funding Sniper v{} - Bybit linear             ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let trading_mode = if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
        TradingMode::Live
    } else {
        info!("📝 PAPER TRADING MODE - Orders are simulated");
        TradingMode::Paper
    };

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let bybit_config = resolve_credentials(&config);
    if trading_mode == TradingMode::Live && bybit_config.api_key.is_empty() {
        error!("❌ LIVE mode requires BYBIT_API_KEY / BYBIT_API_SECRET");
        anyhow::bail!("missing API credentials for live trading");
    }

    let market = Arc::new(BybitClient::new(&bybit_config)?);

    let journal = Arc::new(TradeJournal::new(JOURNAL_DB_PATH)?);
    journal.record_session(
        &config.trade.symbol,
        config.trade.qty,
        config.trade.entry_lead_secs,
        config.trade.profit_pct,
        config.trade.stop_loss_pct,
    )?;

    match trading_mode {
        TradingMode::Paper => {
            let paper = Arc::new(PaperExchange::new(dec!(10000))); // $10k paper default
            run_trader(paper.clone(), market, Some(paper), config, journal).await
        }
        TradingMode::Live => run_trader(market.clone(), market, None, config, journal).await,
    }
}

/// The trading run loop, generic over the execution venue.
///
/// `market` always points at the real venue and supplies public market data;
/// in paper mode that data is mirrored into the paper exchange before each
/// snapshot refresh so the engine sees live rates with simulated fills.
async fn run_trader<E: Exchange + 'static>(
    exchange: Arc<E>,
    market: Arc<BybitClient>,
    paper: Option<Arc<PaperExchange>>,
    config: Config,
    journal: Arc<TradeJournal>,
) -> Result<()> {
    let symbol = config.trade.symbol.clone();
    let coin = config.trade.coin.clone();

    // Instrument filters; identity rounding if the venue is unreachable
    let instrument = match market.instrument(&symbol).await {
        Ok(info) => {
            info!(
                tick_size = %info.price_filter.tick_size,
                qty_step = %info.lot_size_filter.qty_step,
                "✅ [INIT] Instrument filters loaded"
            );
            info
        }
        Err(e) => {
            warn!("⚠️  [INIT] Failed to load instrument info: {}", e);
            InstrumentInfo {
                symbol: symbol.clone(),
                price_filter: PriceFilter {
                    tick_size: Decimal::ZERO,
                },
                lot_size_filter: LotSizeFilter {
                    qty_step: Decimal::ZERO,
                    min_order_qty: Decimal::ZERO,
                },
            }
        }
    };

    // Best-effort leverage setup
    if let Err(e) = exchange.set_leverage(&symbol, config.trade.leverage).await {
        warn!("⚠️  [INIT] Failed to set leverage: {}", e);
    }

    let mut engine = FundingEngine::new(exchange.clone(), config.trade.clone(), instrument)
        .with_journal(journal);

    // Prime the snapshot before the first window check
    if let Some(p) = &paper {
        mirror_market_data(&market, p, &symbol).await;
    }
    if let Err(e) = engine.refresh_snapshot().await {
        warn!("⚠️  [INIT] Initial funding snapshot failed: {}", e);
    }

    // Ticker stream for capture-time price freshness
    let (ws_tx, mut ws_rx) = mpsc::channel::<WsEvent>(256);
    let websocket = BybitWebSocket::new(config.bybit.testnet);
    let mut ws_connected = websocket
        .subscribe_ticker(&symbol, ws_tx.clone())
        .await
        .is_ok();
    if !ws_connected {
        warn!("⚠️  [INIT] Ticker stream unavailable, using REST prices only");
    }

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!("🚀 Watching funding windows for {}...", symbol);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut tick_timer = tokio::time::interval(Duration::from_millis(config.poll.tick_ms));
    let mut refresh_timer =
        tokio::time::interval(Duration::from_secs(config.poll.snapshot_refresh_secs));
    let mut ping_timer =
        tokio::time::interval(Duration::from_secs(config.poll.ping_interval_secs));
    let mut capture_at = None;

    while !shutdown.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tick_timer.tick() => {
                if let Some(at) = engine.on_tick(Utc::now()).await {
                    capture_at = Some(at);
                }
            }

            _ = sleep_until(capture_at), if capture_at.is_some() => {
                engine.on_capture().await;
                capture_at = None;
            }

            _ = refresh_timer.tick() => {
                if let Some(p) = &paper {
                    mirror_market_data(&market, p, &symbol).await;
                }
                if let Err(e) = engine.refresh_snapshot().await {
                    error!("❌ [REFRESH] Funding snapshot failed: {}", e);
                }
                log_status(&engine, exchange.as_ref(), &symbol, &coin).await;

                if !ws_connected {
                    ws_connected = websocket
                        .subscribe_ticker(&symbol, ws_tx.clone())
                        .await
                        .is_ok();
                    if ws_connected {
                        info!("🔌 [WS] Ticker stream reconnected");
                    }
                }
            }

            _ = ping_timer.tick() => {
                match market.measure_ping().await {
                    Ok(rtt) => {
                        let ms = rtt.as_millis();
                        if ms > 500 {
                            warn!("🐢 Ping: {} ms", ms);
                        } else {
                            debug!("Ping: {} ms", ms);
                        }
                    }
                    Err(e) => warn!("⚠️  Ping failed: {}", e),
                }
            }

            Some(event) = ws_rx.recv() => {
                match event {
                    WsEvent::Price(update) => {
                        if update.symbol == symbol {
                            engine.record_stream_price(update.last_price);
                        }
                    }
                    WsEvent::Connected => debug!("Ticker stream connected"),
                    WsEvent::Disconnected => {
                        warn!("⚠️  [WS] Ticker stream lost, falling back to REST");
                        ws_connected = false;
                    }
                }
            }
        }
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let stats = engine.stats();
    info!("🏁 Final Statistics:");
    info!("   Entries placed:    {}", stats.entries_placed);
    info!("   Limit closes:      {}", stats.closes_placed);
    info!("   Stop-losses:       {}", stats.stops_placed);
    info!("   Windows skipped:   {}", stats.windows_skipped);
    info!("   Capture failures:  {}", stats.capture_failures);
    info!("   Order failures:    {}", stats.order_failures);
    info!("👋 Funding Sniper shutdown complete");

    Ok(())
}

/// Sleep until a capture deadline. Never polled when the deadline is unset.
async fn sleep_until(deadline: Option<chrono::DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending().await,
    }
}

/// Mirror public market data into the paper exchange so paper fills track the
/// live venue.
async fn mirror_market_data(market: &BybitClient, paper: &PaperExchange, symbol: &str) {
    match market.funding_history(symbol).await {
        Ok(entry) => {
            paper
                .set_funding(symbol, entry.funding_rate, entry.funding_rate_timestamp)
                .await;
        }
        Err(e) => warn!("⚠️  [PAPER] Funding mirror failed: {}", e),
    }
    match market.ticker(symbol).await {
        Ok(ticker) => paper.set_price(symbol, ticker.last_price).await,
        Err(e) => warn!("⚠️  [PAPER] Price mirror failed: {}", e),
    }
}

/// One-line status: rate, countdown, balance.
async fn log_status<E: Exchange>(
    engine: &FundingEngine<E>,
    exchange: &E,
    symbol: &str,
    coin: &str,
) {
    let now = Utc::now();
    let rate = engine
        .snapshot()
        .map(|s| format!("{:.4}%", s.funding_rate * dec!(100)))
        .unwrap_or_else(|| "N/A".to_string());
    let countdown = engine
        .countdown(now)
        .map(format_countdown)
        .unwrap_or_else(|| "N/A".to_string());
    let balance = match exchange.wallet_balance(coin).await {
        Ok(balance) => format!("${:.2}", balance),
        Err(_) => "N/A".to_string(),
    };

    info!(
        "📊 [{}] Funding: {} | Next in: {} | Balance: {}",
        symbol, rate, countdown, balance
    );
}

/// Run the funding-rate leaderboard once and print it.
async fn run_scan(top: Option<usize>) -> Result<()> {
    let mut config = Config::load()?;
    config.validate()?;
    if let Some(top) = top {
        config.scanner.top_n = top;
    }

    let client = BybitClient::new(&resolve_credentials(&config))?;
    let scanner = FundingScanner::new(config.scanner.clone());
    let rows = scanner.scan(&client).await?;

    println!("{}", render_table(&rows, Utc::now()));
    Ok(())
}

/// Print recent journal rows.
fn show_status(db: &str, limit: usize) -> Result<()> {
    let journal = TradeJournal::new(db)?;
    let rows = journal.recent_orders(limit)?;

    if rows.is_empty() {
        println!("No orders journaled yet.");
        return Ok(());
    }

    println!(
        "{:<22} {:<12} {:<12} {:<5} {:>12} {:>14} {}",
        "Time (UTC)", "Symbol", "Kind", "Side", "Qty", "Price", "Order ID"
    );
    for row in rows {
        println!(
            "{:<22} {:<12} {:<12} {:<5} {:>12} {:>14} {}",
            row.timestamp.format("%Y-%m-%d %H:%M:%S"),
            row.symbol,
            row.kind,
            row.side,
            row.qty,
            row.price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.order_id
        );
    }
    Ok(())
}

/// Config credentials with environment fallback (BYBIT_API_KEY/SECRET).
fn resolve_credentials(config: &Config) -> BybitConfig {
    let mut bybit = config.bybit.clone();
    if bybit.api_key.is_empty() {
        bybit.api_key = std::env::var("BYBIT_API_KEY").unwrap_or_default();
    }
    if bybit.api_secret.is_empty() {
        bybit.api_secret = std::env::var("BYBIT_API_SECRET").unwrap_or_default();
    }
    bybit
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "funding-sniper.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funding_sniper=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Symbol: {}", config.trade.symbol);
    info!("   Qty: {}", config.trade.qty);
    info!(
        "   Funding Interval: {}h",
        config.trade.funding_interval_hours
    );
    info!("   Entry Lead: {}s", config.trade.entry_lead_secs);
    info!("   Close Offset: {}s", config.trade.close_offset_secs);
    info!("   Profit Target: {}%", config.trade.profit_pct);
    match config.trade.stop_loss_pct {
        Some(stop) => info!("   Stop Loss: {}%", stop),
        None => info!("   Stop Loss: disabled"),
    }
    if config.trade.reverse {
        info!("   Direction: REVERSED");
    }
    if config.trade.include_funding_in_target {
        info!("   Profit target includes |funding rate|");
    }
    if config.trade.min_abs_rate_pct > Decimal::ZERO {
        info!("   Min |Rate|: {}%", config.trade.min_abs_rate_pct);
    }
    info!("   Leverage: {}x", config.trade.leverage);
    info!("   Testnet: {}", config.bybit.testnet);
}
