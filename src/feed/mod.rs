//! Venue feed machinery - owned lifecycle around one streaming connection
//!
//! Each feed runs two tasks: a transport task that owns the websocket and
//! the reconnect policy, and a pump task that drains the inbound channel
//! synchronously through bucketing and candle reconciliation. All state is
//! owned by the pump and published as read-only snapshots; nothing is shared
//! mutable across venues.

pub mod adapter;
pub mod venues;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::bucket::{IntervalBucketer, Rebucketer};
use crate::candles::{CandleStream, ClosedBar};
use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::{VenueAdapter, VenueMessage};
use crate::history::HistoricalFetcher;
use crate::types::{
    Asset, Candle, ConnectionState, Interval, PricePoint, PriceTick, VenueId, VenueState,
};

/// Events delivered to the engine
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Tick(PriceTick),
    State {
        venue: VenueId,
        state: ConnectionState,
    },
    BarClosed {
        venue: VenueId,
        bar: ClosedBar,
    },
}

/// Inbound channel payload: transport and backfill feed the pump
enum PumpInput {
    Message(VenueMessage),
    State(ConnectionState),
    Backfill(Vec<Candle>),
}

/// Per-feed tuning
#[derive(Debug, Clone)]
pub struct FeedParams {
    pub interval: Interval,
    pub reconnect_delay: Duration,
    pub history_cap: usize,
    pub backfill_bars: usize,
}

/// One venue/symbol streaming connection with explicit start/stop lifecycle
pub struct VenueFeed {
    venue: VenueId,
    state_rx: watch::Receiver<VenueState>,
    shutdown: watch::Sender<bool>,
    transport: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    backfill: Option<JoinHandle<()>>,
}

impl VenueFeed {
    /// Start streaming `asset`. Backfill seeds history concurrently and never
    /// gates the stream.
    pub fn start(
        adapter: Arc<dyn VenueAdapter>,
        asset: Asset,
        params: FeedParams,
        fetcher: Arc<HistoricalFetcher>,
        events: mpsc::Sender<FeedEvent>,
    ) -> FeedResult<Self> {
        let venue = adapter.id();
        let symbol = adapter.symbol(asset).ok_or_else(|| {
            FeedError::Configuration(format!("venue {} does not carry asset {}", venue, asset))
        })?;
        let stream_interval = adapter.native_or_finest(params.interval);

        let (input_tx, input_rx) = mpsc::channel::<PumpInput>(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(VenueState::new(venue));

        // history is best-effort: on failure the feed proceeds without it
        let backfill = {
            let input_tx = input_tx.clone();
            let adapter = adapter.clone();
            let interval = params.interval;
            let bars = params.backfill_bars;
            tokio::spawn(async move {
                match fetcher.fetch(adapter.as_ref(), asset, interval, bars).await {
                    Ok(candles) => {
                        let _ = input_tx.send(PumpInput::Backfill(candles)).await;
                    }
                    Err(e) => {
                        tracing::warn!(venue = %venue, error = %e, "Backfill failed; streaming without history")
                    }
                }
            })
        };

        let transport = tokio::spawn(run_transport(
            adapter,
            asset,
            symbol,
            params.interval,
            params.reconnect_delay,
            input_tx,
            shutdown_rx,
        ));
        let pump = tokio::spawn(run_pump(
            venue,
            params,
            stream_interval,
            input_rx,
            state_tx,
            events,
        ));

        Ok(Self {
            venue,
            state_rx,
            shutdown: shutdown_tx,
            transport: Some(transport),
            pump: Some(pump),
            backfill: Some(backfill),
        })
    }

    pub fn venue(&self) -> VenueId {
        self.venue
    }

    /// Watch handle onto this feed's state snapshots
    pub fn state(&self) -> watch::Receiver<VenueState> {
        self.state_rx.clone()
    }

    /// Current connection state
    pub fn connection(&self) -> ConnectionState {
        self.state_rx.borrow().connection
    }

    /// Stop the feed: cancel any pending reconnect timer, close the
    /// transport, and wait until no further tick can be delivered.
    /// Idempotent; the only path to terminal `Disconnected`.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.backfill.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.transport.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.pump.take() {
            let _ = handle.await;
        }
    }
}

enum SessionEnd {
    Shutdown,
    Retry,
}

/// Connection loop: `Connecting -> Subscribed -> Streaming`, then a fixed
/// reconnect delay on any transport failure. Unconditional retry, no backoff
/// growth, no retry cap; `stop()` is the only exit.
async fn run_transport(
    adapter: Arc<dyn VenueAdapter>,
    asset: Asset,
    symbol: String,
    interval: Interval,
    reconnect_delay: Duration,
    input: mpsc::Sender<PumpInput>,
    mut shutdown: watch::Receiver<bool>,
) {
    let venue = adapter.id();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if input
            .send(PumpInput::State(ConnectionState::Connecting))
            .await
            .is_err()
        {
            break;
        }

        match run_session(adapter.as_ref(), asset, &symbol, interval, &input, &mut shutdown).await
        {
            SessionEnd::Shutdown => break,
            SessionEnd::Retry => {
                let _ = input
                    .send(PumpInput::State(ConnectionState::Reconnecting))
                    .await;
                tracing::info!(
                    venue = %venue,
                    delay_secs = reconnect_delay.as_secs(),
                    "Reconnecting after fixed delay"
                );
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    let _ = input
        .send(PumpInput::State(ConnectionState::Disconnected))
        .await;
}

async fn run_session(
    adapter: &dyn VenueAdapter,
    asset: Asset,
    symbol: &str,
    interval: Interval,
    input: &mpsc::Sender<PumpInput>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let venue = adapter.id();
    let url = adapter.ws_url();
    tracing::info!(venue = %venue, url = %url, "Connecting venue stream");

    let ws = tokio::select! {
        _ = shutdown.changed() => return SessionEnd::Shutdown,
        result = connect_async(&url) => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::error!(venue = %venue, error = %e, "Connection failed");
                return SessionEnd::Retry;
            }
        }
    };
    let (mut write, mut read) = ws.split();

    let payloads = match adapter.subscribe_payloads(symbol, interval) {
        Ok(payloads) => payloads,
        Err(e) => {
            tracing::error!(venue = %venue, error = %e, "Cannot build subscription");
            return SessionEnd::Retry;
        }
    };
    for payload in payloads {
        if write.send(Message::Text(payload)).await.is_err() {
            return SessionEnd::Retry;
        }
    }
    let _ = input
        .send(PumpInput::State(ConnectionState::Subscribed))
        .await;
    tracing::info!(venue = %venue, symbol = %symbol, "✅ Subscribed");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(20));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // consume the immediate first tick

    let mut streaming = false;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                if let Some(payload) = adapter.heartbeat_payload() {
                    if write.send(Message::Text(payload)).await.is_err() {
                        return SessionEnd::Retry;
                    }
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match adapter.parse_message(asset, &text) {
                        Ok(messages) => {
                            for message in messages {
                                let is_data = matches!(
                                    message,
                                    VenueMessage::Trade(_) | VenueMessage::Bar(_)
                                );
                                if !is_data {
                                    continue;
                                }
                                if !streaming {
                                    streaming = true;
                                    let _ = input
                                        .send(PumpInput::State(ConnectionState::Streaming))
                                        .await;
                                }
                                if input.send(PumpInput::Message(message)).await.is_err() {
                                    return SessionEnd::Shutdown;
                                }
                            }
                        }
                        // malformed frames are dropped, never fatal
                        Err(e) => {
                            tracing::warn!(venue = %venue, error = %e, "Dropping unparseable frame")
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::warn!(venue = %venue, "Connection closed by server");
                    return SessionEnd::Retry;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(venue = %venue, error = %e, "WebSocket error");
                    return SessionEnd::Retry;
                }
                None => {
                    tracing::warn!(venue = %venue, "Stream ended");
                    return SessionEnd::Retry;
                }
            }
        }
    }
}

/// Drain the inbound channel synchronously: bucketing, candle reconciliation,
/// snapshot publication. Exits when every sender is gone, then clears all
/// accumulated state so nothing survives into the next selection.
async fn run_pump(
    venue: VenueId,
    params: FeedParams,
    stream_interval: Interval,
    mut input: mpsc::Receiver<PumpInput>,
    state: watch::Sender<VenueState>,
    events: mpsc::Sender<FeedEvent>,
) {
    let interval = params.interval;
    let mut bucketer = IntervalBucketer::new(interval);
    let mut candles = CandleStream::new(interval, params.history_cap);
    // bars arrive at the streamed granularity; a coarser target is
    // synthesized client-side from the finer confirmations
    let mut synthesizer = if stream_interval.secs() < interval.secs() {
        Some(Rebucketer::new(interval))
    } else {
        None
    };

    while let Some(update) = input.recv().await {
        match update {
            PumpInput::State(connection) => {
                state.send_modify(|st| st.connection = connection);
                let _ = events
                    .send(FeedEvent::State {
                        venue,
                        state: connection,
                    })
                    .await;
            }
            PumpInput::Message(VenueMessage::Trade(event)) => {
                if let Some(update) = bucketer.observe(event.time, event.price, event.size) {
                    let point = PricePoint {
                        time: update.time,
                        price: event.price,
                    };
                    state.send_modify(|st| {
                        st.last_price = Some(event.price);
                        st.last_tick_time = Some(event.time);
                        st.record_point(point, params.history_cap);
                    });
                    if let Some(closed) = candles.on_trade(&event) {
                        let _ = events.send(FeedEvent::BarClosed { venue, bar: closed }).await;
                    }
                    let _ = events.send(FeedEvent::Tick(event.tick())).await;
                }
            }
            PumpInput::Message(VenueMessage::Bar(bar)) => {
                let confirmed = match synthesizer.as_mut() {
                    Some(rb) => rb.fold(&bar),
                    None => Some(bar),
                };
                if let Some(bar) = confirmed {
                    if let Some(closed) = candles.on_bar(&bar) {
                        let _ = events.send(FeedEvent::BarClosed { venue, bar: closed }).await;
                    }
                }
            }
            PumpInput::Message(_) => {}
            PumpInput::Backfill(history) => {
                let points: Vec<PricePoint> = history
                    .iter()
                    .map(|c| PricePoint {
                        time: c.time,
                        price: c.close,
                    })
                    .collect();
                state.send_modify(|st| st.seed_points(&points, params.history_cap));
                candles.seed_history(&history);
                tracing::info!(venue = %venue, bars = history.len(), "History seeded");
            }
        }
    }
    // selection tear-down: nothing carries over into the next symbol
    state.send_replace(VenueState::new(venue));
}
