//! Outbound call pacing
//!
//! Each call class keeps its own minute window and spacing clock. Callers
//! wait their turn; nothing is ever dropped. Waiting only parks the calling
//! task, never the runtime.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::config::{ClassLimits, GovernorConfig};
use crate::error::ProviderError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    OrderPlacement,
    StatusPoll,
    GreeksFetch,
}

impl CallClass {
    fn slot(self) -> usize {
        match self {
            Self::OrderPlacement => 0,
            Self::StatusPoll => 1,
            Self::GreeksFetch => 2,
        }
    }
}

impl std::fmt::Display for CallClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderPlacement => write!(f, "order"),
            Self::StatusPoll => write!(f, "status"),
            Self::GreeksFetch => write!(f, "greeks"),
        }
    }
}

#[derive(Debug)]
struct Budget {
    limits: ClassLimits,
    window_start: Instant,
    count: u32,
    last_call: Option<Instant>,
}

impl Budget {
    fn new(limits: ClassLimits) -> Self {
        Self {
            limits,
            window_start: Instant::now(),
            count: 0,
            last_call: None,
        }
    }
}

/// Per-process pacing for broker calls
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    budgets: [Mutex<Budget>; 3],
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let budgets = [
            Mutex::new(Budget::new(config.order_placement)),
            Mutex::new(Budget::new(config.status_poll)),
            Mutex::new(Budget::new(config.greeks_fetch)),
        ];
        Self { config, budgets }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Wait until a `class` call may go out, then count it.
    ///
    /// Same-class callers queue on the budget lock in arrival order.
    pub async fn acquire(&self, class: CallClass) {
        let mut budget = self.budgets[class.slot()].lock().await;

        let elapsed = budget.window_start.elapsed();
        if elapsed >= WINDOW {
            budget.window_start = Instant::now();
            budget.count = 0;
        } else if budget.count >= budget.limits.per_minute {
            let wait = WINDOW - elapsed;
            info!("{} rate limit reached ({}/min), waiting {:.2}s", class, budget.limits.per_minute, wait.as_secs_f64());
            sleep(wait).await;
            budget.window_start = Instant::now();
            budget.count = 0;
        }

        if let Some(last) = budget.last_call {
            let since = last.elapsed();
            let spacing = budget.limits.min_interval();
            if since < spacing {
                sleep(spacing - since).await;
            }
        }

        budget.count += 1;
        budget.last_call = Some(Instant::now());
    }

    /// Calls counted in the current window for `class`
    pub async fn used(&self, class: CallClass) -> u32 {
        self.budgets[class.slot()].lock().await.count
    }

    /// Pause after a throttling reply: grows linearly per attempt up to the cap.
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        let secs = self.config.transient_step_secs.saturating_mul(attempt as u64 + 1);
        Duration::from_secs(secs.min(self.config.transient_cap_secs))
    }

    /// `min(2^attempt + U(0, jitter), cap)` seconds
    pub fn exponential_backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.config.backoff_jitter_secs > 0.0 {
            rand::thread_rng().gen_range(0.0..self.config.backoff_jitter_secs)
        } else {
            0.0
        };
        let secs = (2f64.powi(attempt.min(31) as i32) + jitter).min(self.config.backoff_cap_secs);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op` under the `class` budget with up to `attempts` tries.
    ///
    /// A throttling failure waits out the transient backoff before the next
    /// try. Other failures end the loop unless `retry_permanent` is set, in
    /// which case they back off exponentially.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        class: CallClass,
        attempts: u32,
        retry_permanent: bool,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            self.acquire(class).await;

            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            warn!("{} call failed (attempt {}/{}): {}", class, attempt + 1, attempts, e);
            let transient = e.is_transient();
            last_err = Some(e);

            if attempt + 1 == attempts {
                break;
            }
            if transient {
                let wait = self.transient_backoff(attempt);
                info!("{} throttled, retrying in {}s", class, wait.as_secs());
                sleep(wait).await;
            } else if retry_permanent {
                sleep(self.exponential_backoff(attempt + 1)).await;
            } else {
                break;
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Rejected(format!("{} call never attempted", class))))
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}
