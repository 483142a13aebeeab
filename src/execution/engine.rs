//! Execution engine - governed order placement, status polling and Greeks fetch
//!
//! Every outbound call goes through the shared `RateGovernor`. Methods take
//! `&self` so the order task and the Greeks task can share one engine.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::broker::{MarketData, OrderGateway};
use super::config::ExecutionConfig;
use super::governor::{CallClass, RateGovernor};
use super::journal::AuditSink;
use super::order::{OrderRecord, OrderRequest, OrderStatus};
use crate::options::{nearest_expiries, OptionContract};
use crate::trading_core::Signal;

/// Events emitted by the execution engine
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Broker accepted the bracket
    OrderPlaced {
        order_id: String,
        client_ref: Uuid,
        symbol: String,
        quantity: u32,
    },
    /// Order placed but the journal write failed
    OrderUnrecorded { order_id: String },
    /// Placement failed or returned no id
    OrderFailed { symbol: String, message: String },
    /// Latest order book entry
    StatusUpdated(OrderStatus),
    /// Lookups timed out or never found the order
    StatusUnknown { order_id: String },
}

/// Execution engine orchestrates order management
pub struct ExecutionEngine {
    config: ExecutionConfig,
    governor: Arc<RateGovernor>,
    gateway: Arc<dyn OrderGateway>,
    market_data: Arc<dyn MarketData>,
    journal: Arc<dyn AuditSink>,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        gateway: Arc<dyn OrderGateway>,
        market_data: Arc<dyn MarketData>,
        journal: Arc<dyn AuditSink>,
    ) -> Self {
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));
        let (event_tx, _) = broadcast::channel(1000);

        Self {
            config,
            governor,
            gateway,
            market_data,
            journal,
            event_tx,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_tx.subscribe()
    }

    /// Place the bracket for a live signal and journal it.
    ///
    /// Returns the broker order id, or `None` when the broker accepted the
    /// call without one. Placement is attempted once.
    pub async fn execute_signal(&self, signal: &Signal) -> Result<Option<String>> {
        let request = OrderRequest::bracket(signal, &self.config)?;
        let symbol = request.trading_symbol.clone();

        info!(
            "ORDER: {} {} x{} @ {} | premium SL {:.2} TGT {:.2} | underlying entry {:.2}",
            request.side,
            symbol,
            request.quantity,
            request.order_type,
            request.stoploss,
            request.squareoff,
            signal.entry_price
        );

        let placed = if self.config.routes_to_broker() {
            self.governor
                .call_with_retry(CallClass::OrderPlacement, 1, false, || self.gateway.place_order(&request))
                .await
        } else {
            debug!("{} mode, order not routed", self.config.mode);
            Ok(Some(format!("SIM-{}", request.client_ref)))
        };

        let order_id = match placed {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("Order for {} accepted without an order id", symbol);
                let _ = self.event_tx.send(ExecutionEvent::OrderFailed {
                    symbol,
                    message: "no order id returned".to_string(),
                });
                return Ok(None);
            }
            Err(e) => {
                let _ = self.event_tx.send(ExecutionEvent::OrderFailed {
                    symbol: symbol.clone(),
                    message: e.to_string(),
                });
                bail!("Order placement for {} failed: {}", symbol, e);
            }
        };

        info!("Order placed successfully. Order ID: {}", order_id);
        let _ = self.event_tx.send(ExecutionEvent::OrderPlaced {
            order_id: order_id.clone(),
            client_ref: request.client_ref,
            symbol,
            quantity: request.quantity,
        });

        let record = OrderRecord::placed(&order_id, signal, &request, signal.timestamp);
        if let Err(e) = self.journal.record(&record) {
            error!("Order {} was PLACED but NOT RECORDED in the journal: {:#}", order_id, e);
            let _ = self.event_tx.send(ExecutionEvent::OrderUnrecorded { order_id: order_id.clone() });
        }

        Ok(Some(order_id))
    }

    /// Look the order up with bounded retries.
    ///
    /// A lookup that times out, errors or does not list the order is retried
    /// after an exponential backoff. `None` means status unknown.
    pub async fn poll_status(&self, order_id: &str) -> Option<OrderStatus> {
        let attempts = self.config.status_poll_attempts.max(1);
        let limit = self.config.status_timeout();

        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(self.governor.exponential_backoff(attempt)).await;
            }
            self.governor.acquire(CallClass::StatusPoll).await;

            match timeout(limit, self.gateway.order_status(order_id)).await {
                Ok(Ok(Some(status))) => {
                    if status.state.is_terminal() {
                        info!("Order {} final status: {}", order_id, status.state);
                    } else {
                        info!("Order {} status: {} (still open)", order_id, status.state);
                    }
                    let _ = self.event_tx.send(ExecutionEvent::StatusUpdated(status.clone()));
                    return Some(status);
                }
                Ok(Ok(None)) => debug!("Order {} not in order book yet (attempt {})", order_id, attempt + 1),
                Ok(Err(e)) => warn!("Status lookup for {} failed (attempt {}): {}", order_id, attempt + 1, e),
                Err(_) => warn!("Status lookup for {} timed out after {:?}", order_id, limit),
            }
        }

        warn!("Order {} status unknown after {} lookups", order_id, attempts);
        let _ = self.event_tx.send(ExecutionEvent::StatusUnknown { order_id: order_id.to_string() });
        None
    }

    /// Fetch the option chain for the nearest expiries of `name`.
    ///
    /// Expiries are fetched concurrently; the governor still spaces the calls.
    /// Expiries that fail after their retries are skipped. Errors only when
    /// nothing could be fetched at all.
    pub async fn fetch_greeks(&self, name: &str, today: NaiveDate) -> Result<Vec<OptionContract>> {
        let attempts = self.config.greeks_attempts;
        let raw = self
            .governor
            .call_with_retry(CallClass::GreeksFetch, attempts, false, || self.market_data.option_expiries(name))
            .await
            .map_err(|e| anyhow!("Expiry lookup for {} failed: {}", name, e))?;

        let expiries = nearest_expiries(raw.iter().map(String::as_str), today, self.config.greeks_expiries);
        if expiries.is_empty() {
            warn!("No upcoming expiries for {}", name);
            return Ok(Vec::new());
        }

        let fetches = expiries.iter().map(|expiry| async move {
            let fetched = self
                .governor
                .call_with_retry(CallClass::GreeksFetch, attempts, false, || {
                    self.market_data.fetch_option_chain(name, expiry)
                })
                .await;
            (expiry, fetched)
        });

        let mut chain = Vec::new();
        let mut last_err = None;
        for (expiry, fetched) in join_all(fetches).await {
            match fetched {
                Ok(contracts) => {
                    info!("Fetched {} contracts for {} {}", contracts.len(), name, expiry.display);
                    chain.extend(contracts);
                }
                Err(e) => {
                    warn!("Greeks for {} {} unavailable: {}", name, expiry.display, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if chain.is_empty() => Err(anyhow!("Greeks fetch for {} failed: {}", name, e)),
            _ => Ok(chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDateTime;

    use crate::error::ProviderError;
    use crate::execution::config::{ClassLimits, ExecutionMode, GovernorConfig};
    use crate::execution::order::tests::signal;
    use crate::execution::order::OrderState;
    use crate::options::contract::test_contract;
    use crate::options::Expiry;
    use crate::trading_core::Candle;

    #[derive(Default)]
    struct MockGateway {
        placed: Mutex<Vec<OrderRequest>>,
        statuses: Mutex<VecDeque<Option<OrderStatus>>>,
        status_delay: Option<Duration>,
        reject: bool,
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn place_order(&self, request: &OrderRequest) -> Result<Option<String>, ProviderError> {
            if self.reject {
                return Err(ProviderError::Rejected("insufficient margin".into()));
            }
            self.placed.lock().unwrap().push(request.clone());
            Ok(Some("B1".to_string()))
        }

        async fn order_status(&self, _order_id: &str) -> Result<Option<OrderStatus>, ProviderError> {
            if let Some(delay) = self.status_delay {
                sleep(delay).await;
            }
            Ok(self.statuses.lock().unwrap().pop_front().flatten())
        }
    }

    #[derive(Default)]
    struct MockData {
        expiries: Vec<String>,
        throttle_first: AtomicU32,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MarketData for MockData {
        async fn fetch_historical(
            &self,
            _instrument: &str,
            _from: NaiveDateTime,
            _to: NaiveDateTime,
            _width_minutes: u32,
        ) -> Result<Vec<Candle>, ProviderError> {
            Ok(Vec::new())
        }

        async fn option_expiries(&self, _name: &str) -> Result<Vec<String>, ProviderError> {
            Ok(self.expiries.clone())
        }

        async fn fetch_option_chain(&self, _name: &str, expiry: &Expiry) -> Result<Vec<OptionContract>, ProviderError> {
            self.requested.lock().unwrap().push(expiry.api_code.clone());
            if self.throttle_first.load(Ordering::SeqCst) > 0 {
                self.throttle_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Rejected("Too many requests".into()));
            }
            Ok(vec![test_contract("NIFTY21OCT2625000CE", 0.5, 0.0, 0.0, 80.0)])
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<OrderRecord>>,
        fail: bool,
    }

    impl AuditSink for MemorySink {
        fn record(&self, record: &OrderRecord) -> Result<()> {
            if self.fail {
                bail!("disk full");
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn paper_config() -> ExecutionConfig {
        let free = ClassLimits { per_minute: 1000, min_interval_ms: 0 };
        ExecutionConfig {
            mode: ExecutionMode::Paper,
            governor: GovernorConfig {
                order_placement: free,
                status_poll: free,
                greeks_fetch: free,
                ..GovernorConfig::default()
            },
            ..ExecutionConfig::default()
        }
    }

    fn engine(config: ExecutionConfig, gateway: Arc<MockGateway>, sink: Arc<MemorySink>) -> ExecutionEngine {
        ExecutionEngine::new(config, gateway, Arc::new(MockData::default()), sink)
    }

    #[tokio::test]
    async fn test_places_and_journals() {
        let gateway = Arc::new(MockGateway::default());
        let sink = Arc::new(MemorySink::default());
        let engine = engine(paper_config(), gateway.clone(), sink.clone());
        let mut events = engine.subscribe();

        let id = engine.execute_signal(&signal()).await.unwrap();
        assert_eq!(id.as_deref(), Some("B1"));

        let placed = gateway.placed.lock().unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].stoploss, 50.0);
        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].order_id, "B1");
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::OrderPlaced { quantity: 75, .. })));
    }

    #[tokio::test]
    async fn test_unrecorded_order_still_returned() {
        let gateway = Arc::new(MockGateway::default());
        let sink = Arc::new(MemorySink { fail: true, ..MemorySink::default() });
        let engine = engine(paper_config(), gateway, sink);
        let mut events = engine.subscribe();

        let id = engine.execute_signal(&signal()).await.unwrap();
        assert_eq!(id.as_deref(), Some("B1"));
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::OrderPlaced { .. })));
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::OrderUnrecorded { order_id }) if order_id == "B1"));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let gateway = Arc::new(MockGateway { reject: true, ..MockGateway::default() });
        let sink = Arc::new(MemorySink::default());
        let engine = engine(paper_config(), gateway.clone(), sink.clone());

        assert!(engine.execute_signal(&signal()).await.is_err());
        assert_eq!(engine.governor().used(CallClass::OrderPlacement).await, 1);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_does_not_route() {
        let gateway = Arc::new(MockGateway::default());
        let sink = Arc::new(MemorySink::default());
        let config = ExecutionConfig { mode: ExecutionMode::Simulation, ..paper_config() };
        let engine = engine(config, gateway.clone(), sink.clone());

        let id = engine.execute_signal(&signal()).await.unwrap().unwrap();
        assert!(id.starts_with("SIM-"));
        assert!(gateway.placed.lock().unwrap().is_empty());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_retries_until_listed() {
        let filled = OrderStatus {
            order_id: "B1".into(),
            state: OrderState::Filled,
            filled_quantity: 75,
            average_price: 121.5,
        };
        let gateway = Arc::new(MockGateway {
            statuses: Mutex::new(VecDeque::from(vec![None, Some(filled.clone())])),
            ..MockGateway::default()
        });
        let engine = engine(paper_config(), gateway, Arc::new(MemorySink::default()));

        assert_eq!(engine.poll_status("B1").await, Some(filled));
        assert_eq!(engine.governor().used(CallClass::StatusPoll).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_timeout_is_unknown() {
        let gateway = Arc::new(MockGateway {
            status_delay: Some(Duration::from_secs(10)),
            ..MockGateway::default()
        });
        let config = ExecutionConfig { status_poll_attempts: 2, ..paper_config() };
        let engine = engine(config, gateway, Arc::new(MemorySink::default()));
        let mut events = engine.subscribe();

        assert_eq!(engine.poll_status("B1").await, None);
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::StatusUnknown { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeks_nearest_expiry_after_throttle() {
        let data = Arc::new(MockData {
            expiries: vec!["28-Oct-26".into(), "21OCT2026".into(), "14-10-2026".into()],
            throttle_first: AtomicU32::new(1),
            ..MockData::default()
        });
        let engine = ExecutionEngine::new(
            paper_config(),
            Arc::new(MockGateway::default()),
            data.clone(),
            Arc::new(MemorySink::default()),
        );

        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let chain = engine.fetch_greeks("NIFTY", today).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(*data.requested.lock().unwrap(), vec!["21OCT2026", "21OCT2026"]);
    }
}
