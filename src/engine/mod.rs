//! Funding-window execution engine.
//!
//! A 1-second tick drives a two-state machine around each funding settlement:
//!
//! - `Idle`: watch the countdown; inside the entry window, place a market
//!   order in the direction implied by the funding rate.
//! - `EntryPlaced`: a one-shot timer fires shortly before settlement, captures
//!   a reference price and places the reduce-only limit close (and optional
//!   stop-loss), then the machine returns to `Idle`.
//!
//! The engine never talks to the venue outside these two paths; snapshot
//! refreshes are driven by the runner.

pub mod pricing;

use crate::config::TradeConfig;
use crate::exchange::{
    Exchange, ExchangeError, InstrumentInfo, OrderRequest, OrderSide,
};
use crate::persistence::{OrderKind, TradeJournal};
use crate::schedule::{format_countdown, FundingSchedule};
use crate::utils::decimal::round_down_to_lot;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Streamed prices older than this fall back to a REST ticker query.
const STREAM_PRICE_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(2);

/// Execution state across one funding window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// No order outstanding; watching the countdown.
    Idle,
    /// Market entry submitted; capture timer armed.
    EntryPlaced {
        side: OrderSide,
        qty: Decimal,
        order_id: String,
        capture_at: DateTime<Utc>,
    },
}

/// Latest funding observation from the venue.
#[derive(Debug, Clone)]
pub struct FundingSnapshot {
    /// Raw rate, e.g. 0.0001 = 0.01%
    pub funding_rate: Decimal,
    /// Previous settlement instant
    pub last_funding: DateTime<Utc>,
}

/// Counters for the shutdown summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub entries_placed: u64,
    pub closes_placed: u64,
    pub stops_placed: u64,
    pub windows_skipped: u64,
    pub capture_failures: u64,
    pub order_failures: u64,
}

/// The funding-window state machine.
pub struct FundingEngine<E> {
    exchange: Arc<E>,
    trade: TradeConfig,
    instrument: InstrumentInfo,
    snapshot: Option<FundingSnapshot>,
    state: EngineState,
    streamed_price: Option<(Decimal, Instant)>,
    journal: Option<Arc<TradeJournal>>,
    stats: EngineStats,
    /// Window already skipped by the rate gate (keyed by its settlement time)
    gated_window: Option<DateTime<Utc>>,
}

impl<E: Exchange> FundingEngine<E> {
    /// Create an engine for one symbol.
    pub fn new(exchange: Arc<E>, trade: TradeConfig, instrument: InstrumentInfo) -> Self {
        Self {
            exchange,
            trade,
            instrument,
            snapshot: None,
            state: EngineState::Idle,
            streamed_price: None,
            journal: None,
            stats: EngineStats::default(),
            gated_window: None,
        }
    }

    /// Attach a trade journal; journal failures never fail the trading path.
    pub fn with_journal(mut self, journal: Arc<TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn snapshot(&self) -> Option<&FundingSnapshot> {
        self.snapshot.as_ref()
    }

    /// Countdown to the next settlement, if a snapshot is loaded.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.schedule().map(|s| s.countdown(now))
    }

    /// Record a price pushed by the ticker stream.
    pub fn record_stream_price(&mut self, price: Decimal) {
        self.streamed_price = Some((price, Instant::now()));
    }

    /// Refresh the funding snapshot from the venue.
    pub async fn refresh_snapshot(&mut self) -> Result<(), ExchangeError> {
        let entry = self.exchange.funding_history(&self.trade.symbol).await?;
        let last_funding = Utc
            .timestamp_millis_opt(entry.funding_rate_timestamp)
            .single()
            .ok_or(ExchangeError::EmptyResult("funding timestamp"))?;

        debug!(
            symbol = %self.trade.symbol,
            rate_pct = %(entry.funding_rate * dec!(100)),
            %last_funding,
            "Funding snapshot refreshed"
        );

        self.snapshot = Some(FundingSnapshot {
            funding_rate: entry.funding_rate,
            last_funding,
        });
        Ok(())
    }

    fn schedule(&self) -> Option<FundingSchedule> {
        self.snapshot.as_ref().map(|s| {
            FundingSchedule::from_hours(s.last_funding, self.trade.funding_interval_hours)
        })
    }

    /// One timer tick. Returns the capture deadline when an entry was just
    /// placed so the runner can arm the one-shot timer.
    pub async fn on_tick(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(snapshot) = self.snapshot.clone() else {
            debug!("Funding data unavailable");
            return None;
        };
        let schedule = self.schedule()?;
        let ttf = schedule.countdown_secs(now);

        debug!(
            symbol = %self.trade.symbol,
            countdown = %format_countdown(schedule.countdown(now)),
            rate_pct = %(snapshot.funding_rate * dec!(100)),
            "Tick"
        );

        if self.state != EngineState::Idle {
            return None;
        }

        // Entry window: [entry_lead - 1s, entry_lead] before settlement
        if !(self.trade.entry_lead_secs - 1.0 <= ttf && ttf <= self.trade.entry_lead_secs) {
            return None;
        }

        let rate_pct = snapshot.funding_rate.abs() * dec!(100);
        if self.trade.min_abs_rate_pct > Decimal::ZERO && rate_pct < self.trade.min_abs_rate_pct {
            let window = schedule.next_funding(now);
            if self.gated_window != Some(window) {
                info!(
                    symbol = %self.trade.symbol,
                    rate_pct = %rate_pct,
                    threshold_pct = %self.trade.min_abs_rate_pct,
                    "Funding rate below threshold, sitting this window out"
                );
                self.stats.windows_skipped += 1;
                self.gated_window = Some(window);
            }
            return None;
        }

        let side = pricing::entry_side(snapshot.funding_rate, self.trade.reverse);
        let qty = round_down_to_lot(self.trade.qty, self.instrument.lot_size_filter.qty_step);
        if qty < self.instrument.lot_size_filter.min_order_qty {
            error!(
                symbol = %self.trade.symbol,
                %qty,
                min = %self.instrument.lot_size_filter.min_order_qty,
                "Configured qty below minimum order size"
            );
            return None;
        }

        info!(
            symbol = %self.trade.symbol,
            %side,
            %qty,
            time_to_funding_secs = ttf,
            "Entry window open, placing market order"
        );

        match self
            .exchange
            .place_order(&OrderRequest::market(&self.trade.symbol, side, qty))
            .await
        {
            Ok(ack) => {
                let capture_delay_secs = (ttf - self.trade.close_offset_secs).max(0.0);
                let capture_at =
                    now + Duration::milliseconds((capture_delay_secs * 1000.0) as i64);

                info!(
                    symbol = %self.trade.symbol,
                    order_id = %ack.order_id,
                    %capture_at,
                    "Market entry placed"
                );
                self.record(OrderKind::Entry, side, qty, None, &ack.order_id);
                self.stats.entries_placed += 1;

                self.state = EngineState::EntryPlaced {
                    side,
                    qty,
                    order_id: ack.order_id,
                    capture_at,
                };
                Some(capture_at)
            }
            Err(e) => {
                error!(symbol = %self.trade.symbol, error = %e, "Market entry failed");
                self.stats.order_failures += 1;
                None
            }
        }
    }

    /// One-shot capture: snapshot the price and place the exit orders.
    pub async fn on_capture(&mut self) {
        let EngineState::EntryPlaced { side, qty, .. } = self.state.clone() else {
            return;
        };
        // Whatever happens below, the window is over for this position
        self.state = EngineState::Idle;

        let captured = match self.capture_price().await {
            Ok(price) => price,
            Err(e) => {
                error!(
                    symbol = %self.trade.symbol,
                    error = %e,
                    "Failed to capture price at funding time; position left open"
                );
                self.stats.capture_failures += 1;
                return;
            }
        };

        let funding_rate = self
            .snapshot
            .as_ref()
            .map(|s| s.funding_rate)
            .unwrap_or(Decimal::ZERO);
        let tick_size = self.instrument.price_filter.tick_size;

        let margin_pct = pricing::profit_margin_pct(
            self.trade.profit_pct,
            funding_rate,
            self.trade.include_funding_in_target,
        );
        let close_price = pricing::limit_close_price(captured, side, margin_pct, tick_size);
        let close_side = side.opposite();

        info!(
            symbol = %self.trade.symbol,
            %captured,
            %close_price,
            %close_side,
            "Placing limit close order"
        );

        match self
            .exchange
            .place_order(&OrderRequest::limit_close(
                &self.trade.symbol,
                close_side,
                qty,
                close_price,
            ))
            .await
        {
            Ok(ack) => {
                self.record(OrderKind::LimitClose, close_side, qty, Some(close_price), &ack.order_id);
                self.stats.closes_placed += 1;
            }
            Err(e) => {
                error!(symbol = %self.trade.symbol, error = %e, "Limit close failed");
                self.stats.order_failures += 1;
            }
        }

        if let Some(stop_pct) = self.trade.stop_loss_pct {
            let trigger = pricing::stop_trigger_price(captured, side, stop_pct, tick_size);
            let direction = pricing::stop_trigger_direction(side);

            info!(
                symbol = %self.trade.symbol,
                trigger_price = %trigger,
                "Placing stop-loss order"
            );

            match self
                .exchange
                .place_order(&OrderRequest::stop_close(
                    &self.trade.symbol,
                    close_side,
                    qty,
                    trigger,
                    direction,
                ))
                .await
            {
                Ok(ack) => {
                    self.record(OrderKind::StopLoss, close_side, qty, Some(trigger), &ack.order_id);
                    self.stats.stops_placed += 1;
                }
                Err(e) => {
                    error!(symbol = %self.trade.symbol, error = %e, "Stop-loss placement failed");
                    self.stats.order_failures += 1;
                }
            }
        }
    }

    /// Reference price at the capture instant: fresh streamed price if
    /// available, REST ticker otherwise.
    async fn capture_price(&self) -> Result<Decimal, ExchangeError> {
        if let Some((price, at)) = self.streamed_price {
            if at.elapsed() < STREAM_PRICE_MAX_AGE {
                debug!(symbol = %self.trade.symbol, %price, "Using streamed capture price");
                return Ok(price);
            }
        }
        self.exchange.last_price(&self.trade.symbol).await
    }

    fn record(
        &self,
        kind: OrderKind,
        side: OrderSide,
        qty: Decimal,
        price: Option<Decimal>,
        order_id: &str,
    ) {
        if let Some(journal) = &self.journal {
            if let Err(e) =
                journal.record_order(&self.trade.symbol, kind, side, qty, price, order_id)
            {
                warn!(error = %e, "Trade journal write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderType, PaperExchange};
    use chrono::TimeZone;

    const SYMBOL: &str = "XEMUSDT";

    fn trade_config() -> TradeConfig {
        TradeConfig {
            symbol: SYMBOL.to_string(),
            qty: dec!(1800),
            funding_interval_hours: 1.0,
            entry_lead_secs: 5.0,
            close_offset_secs: 1.0,
            profit_pct: dec!(0.3),
            stop_loss_pct: None,
            reverse: false,
            include_funding_in_target: false,
            min_abs_rate_pct: Decimal::ZERO,
            leverage: 4,
            coin: "USDT".to_string(),
        }
    }

    fn instrument() -> InstrumentInfo {
        serde_json::from_str(
            r#"{
                "symbol": "XEMUSDT",
                "priceFilter": {"tickSize": "0.0001"},
                "lotSizeFilter": {"qtyStep": "1", "minOrderQty": "1"}
            }"#,
        )
        .unwrap()
    }

    fn anchor() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// Engine with a snapshot anchored so that `anchor() + 3600s` is the next
    /// settlement.
    async fn engine_with_snapshot(
        paper: Arc<PaperExchange>,
        trade: TradeConfig,
        rate: Decimal,
    ) -> FundingEngine<PaperExchange> {
        paper
            .set_funding(SYMBOL, rate, anchor().timestamp_millis())
            .await;
        let mut engine = FundingEngine::new(paper, trade, instrument());
        engine.refresh_snapshot().await.unwrap();
        engine
    }

    fn in_window() -> DateTime<Utc> {
        // 5.0s before the settlement at anchor + 1h
        anchor() + Duration::seconds(3595)
    }

    #[tokio::test]
    async fn test_no_entry_outside_window() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        // 10s out: too early
        assert!(engine.on_tick(anchor() + Duration::seconds(3590)).await.is_none());
        // 3s out: window already passed
        assert!(engine.on_tick(anchor() + Duration::seconds(3597)).await.is_none());
        assert!(paper.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_entry_fires_inside_window_with_implied_side() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        let capture_at = engine.on_tick(in_window()).await.expect("entry expected");
        // Capture one second before settlement (close_offset_secs = 1)
        assert_eq!(capture_at, anchor() + Duration::seconds(3599));

        let orders = paper.placed_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell); // positive rate -> short
        assert_eq!(orders[0].order_type, OrderType::Market);
        assert_eq!(orders[0].qty, dec!(1800));
        assert!(matches!(engine.state(), EngineState::EntryPlaced { .. }));
    }

    #[tokio::test]
    async fn test_no_double_entry_while_order_open() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        assert!(engine.on_tick(in_window()).await.is_some());
        // Next tick, still inside the window
        assert!(engine
            .on_tick(in_window() + Duration::milliseconds(900))
            .await
            .is_none());
        assert_eq!(paper.placed_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_flag_flips_direction() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut trade = trade_config();
        trade.reverse = true;
        let mut engine = engine_with_snapshot(paper.clone(), trade, dec!(0.0003)).await;

        engine.on_tick(in_window()).await.unwrap();
        assert_eq!(paper.placed_orders().await[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_rate_gate_skips_window_once() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut trade = trade_config();
        trade.min_abs_rate_pct = dec!(0.05);
        // 0.01% rate, below the 0.05% gate
        let mut engine = engine_with_snapshot(paper.clone(), trade, dec!(0.0001)).await;

        assert!(engine.on_tick(in_window()).await.is_none());
        assert!(engine
            .on_tick(in_window() + Duration::milliseconds(900))
            .await
            .is_none());
        assert!(paper.placed_orders().await.is_empty());
        assert_eq!(engine.stats().windows_skipped, 1);
    }

    #[tokio::test]
    async fn test_entry_failure_leaves_engine_idle() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        paper.fail_next_orders(true);
        assert!(engine.on_tick(in_window()).await.is_none());
        assert_eq!(*engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().order_failures, 1);
    }

    #[tokio::test]
    async fn test_capture_places_tick_aligned_limit_close() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        engine.on_tick(in_window()).await.unwrap();
        paper.set_price(SYMBOL, dec!(0.0316)).await;
        engine.on_capture().await;

        let orders = paper.placed_orders().await;
        assert_eq!(orders.len(), 2);
        let close = &orders[1];
        assert_eq!(close.order_type, OrderType::Limit);
        assert_eq!(close.side, OrderSide::Buy); // closes the short
        assert_eq!(close.reduce_only, Some(true));
        // 0.0316 * (1 - 0.003) = 0.0315052 -> 0.0315 on a 0.0001 tick
        assert_eq!(close.price, Some(dec!(0.0315)));
        assert_eq!(*engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().closes_placed, 1);
    }

    #[tokio::test]
    async fn test_capture_places_stop_loss_when_configured() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut trade = trade_config();
        trade.stop_loss_pct = Some(dec!(1));
        let mut engine = engine_with_snapshot(paper.clone(), trade, dec!(-0.0003)).await;

        engine.on_tick(in_window()).await.unwrap();
        paper.set_price(SYMBOL, dec!(0.0400)).await;
        engine.on_capture().await;

        let orders = paper.placed_orders().await;
        assert_eq!(orders.len(), 3);
        // Negative rate -> Buy entry, so the stop triggers on a falling price
        let stop = &orders[2];
        assert_eq!(stop.side, OrderSide::Sell);
        assert_eq!(stop.order_type, OrderType::Market);
        assert_eq!(stop.reduce_only, Some(true));
        assert_eq!(stop.trigger_price, Some(dec!(0.0396)));
        assert_eq!(stop.trigger_direction, Some(pricing::TRIGGER_ON_FALL));
        assert_eq!(engine.stats().stops_placed, 1);
    }

    #[tokio::test]
    async fn test_funding_augmented_close_price() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut trade = trade_config();
        trade.include_funding_in_target = true;
        // -0.05% rate + 0.3% profit = 0.35% margin on a Buy entry
        let mut engine = engine_with_snapshot(paper.clone(), trade, dec!(-0.0005)).await;

        engine.on_tick(in_window()).await.unwrap();
        paper.set_price(SYMBOL, dec!(1.0000)).await;
        engine.on_capture().await;

        let orders = paper.placed_orders().await;
        assert_eq!(orders[1].price, Some(dec!(1.0035)));
    }

    #[tokio::test]
    async fn test_capture_failure_resets_to_idle() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        engine.on_tick(in_window()).await.unwrap();
        // No price scripted and no streamed price: capture fails
        engine.on_capture().await;

        assert_eq!(*engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().capture_failures, 1);
        assert_eq!(paper.placed_orders().await.len(), 1); // entry only
    }

    #[tokio::test]
    async fn test_streamed_price_wins_over_rest() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut engine =
            engine_with_snapshot(paper.clone(), trade_config(), dec!(0.0003)).await;

        engine.on_tick(in_window()).await.unwrap();
        paper.set_price(SYMBOL, dec!(0.0316)).await;
        engine.record_stream_price(dec!(0.0320));
        engine.on_capture().await;

        // 0.0320 * 0.997 = 0.031904 -> 0.0319
        let orders = paper.placed_orders().await;
        assert_eq!(orders[1].price, Some(dec!(0.0319)));
    }

    #[tokio::test]
    async fn test_late_entry_captures_immediately() {
        let paper = Arc::new(PaperExchange::new(dec!(10000)));
        let mut trade = trade_config();
        trade.entry_lead_secs = 2.0;
        trade.close_offset_secs = 3.0;
        let mut engine = engine_with_snapshot(paper.clone(), trade, dec!(0.0003)).await;

        // ttf = 2.0s but offset is 3s: capture delay clamps to zero
        let now = anchor() + Duration::seconds(3598);
        let capture_at = engine.on_tick(now).await.unwrap();
        assert_eq!(capture_at, now);
    }
}
