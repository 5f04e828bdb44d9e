//! Spend tracking and budget gating
//!
//! Spend is read from a `UsageLedger`, so limits hold across restarts when
//! the ledger is persistent. The check is a soft limit: two concurrent
//! callers may both pass just below the ceiling.

use crate::clock::{Clock, SystemClock};
use crate::error::{EmbedResult, EmbeddingError};
use crate::types::EmbeddingResult;
use async_trait::async_trait;
use caredex_common::CorrelationId;
use caredex_config::{BudgetConfig, ProviderKind};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Tolerance for float comparisons against a ceiling
const CEILING_EPSILON: f64 = 1e-9;

/// Which spending window a limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCeiling {
    Daily,
    Monthly,
}

impl fmt::Display for BudgetCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        })
    }
}

/// One billed generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: ProviderKind,
    pub model: String,
    pub input_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl UsageRecord {
    pub fn from_result(result: &EmbeddingResult, correlation_id: Option<CorrelationId>) -> Self {
        Self {
            provider: result.provider,
            model: result.model.clone(),
            input_tokens: result.usage.input_tokens,
            total_tokens: result.usage.total_tokens,
            estimated_cost: result.estimated_cost,
            recorded_at: result.generated_at,
            correlation_id,
        }
    }
}

/// Durable record of spend
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Total estimated cost recorded at or after `since`
    async fn spend_since(&self, since: DateTime<Utc>) -> EmbedResult<f64>;

    /// Append one record
    async fn record(&self, record: UsageRecord) -> EmbedResult<()>;
}

/// Process-local ledger; spend resets on restart
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far, oldest first
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn spend_since(&self, since: DateTime<Utc>) -> EmbedResult<f64> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.recorded_at >= since)
            .map(|r| r.estimated_cost)
            .sum())
    }

    async fn record(&self, record: UsageRecord) -> EmbedResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Spend and limits at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetState {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub warning_threshold: f64,
}

impl BudgetState {
    pub fn daily_remaining(&self) -> f64 {
        (self.daily_limit - self.daily_spend).max(0.0)
    }

    pub fn monthly_remaining(&self) -> f64 {
        (self.monthly_limit - self.monthly_spend).max(0.0)
    }

    /// Fraction of the daily limit used (0.0 when the limit is zero)
    pub fn daily_utilization(&self) -> f64 {
        utilization(self.daily_spend, self.daily_limit)
    }

    pub fn monthly_utilization(&self) -> f64 {
        utilization(self.monthly_spend, self.monthly_limit)
    }

    /// Decide whether spending `estimated_cost` more is allowed
    ///
    /// Spending exactly up to a ceiling is allowed; anything beyond is not.
    pub fn evaluate(&self, estimated_cost: f64) -> BudgetDecision {
        let estimated_cost = estimated_cost.max(0.0);
        let windows = [
            (BudgetCeiling::Daily, self.daily_spend, self.daily_limit),
            (BudgetCeiling::Monthly, self.monthly_spend, self.monthly_limit),
        ];

        let mut warnings = Vec::new();
        for (ceiling, spend, limit) in windows {
            let projected = spend + estimated_cost;
            if projected > limit + CEILING_EPSILON {
                return BudgetDecision {
                    allowed: false,
                    ceiling: Some(ceiling),
                    reason: Some(format!(
                        "{ceiling} limit ${limit:.4} would be exceeded by ${:.6} (spent ${spend:.6}, estimated ${estimated_cost:.6})",
                        projected - limit
                    )),
                    warnings,
                };
            }
            if limit > 0.0 && projected / limit >= self.warning_threshold {
                warnings.push(format!(
                    "{ceiling} spend at {:.0}% of ${limit:.4} limit",
                    projected / limit * 100.0
                ));
            }
        }

        BudgetDecision {
            allowed: true,
            ceiling: None,
            reason: None,
            warnings,
        }
    }
}

fn utilization(spend: f64, limit: f64) -> f64 {
    if limit > 0.0 { spend / limit } else { 0.0 }
}

/// Outcome of a budget check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    /// Ceiling that blocked the request
    pub ceiling: Option<BudgetCeiling>,
    /// Names the ceiling and the overshoot when blocked
    pub reason: Option<String>,
    /// Threshold warnings raised while still allowed
    pub warnings: Vec<String>,
}

impl BudgetDecision {
    /// Convert a rejection into `EmbeddingError::BudgetExceeded`
    ///
    /// # Errors
    /// Returns `EmbeddingError::BudgetExceeded` when not allowed
    pub fn into_result(self) -> EmbedResult<()> {
        if self.allowed {
            return Ok(());
        }
        Err(EmbeddingError::BudgetExceeded {
            ceiling: self.ceiling.unwrap_or(BudgetCeiling::Daily),
            reason: self.reason.unwrap_or_default(),
        })
    }
}

/// Budget gate backed by a usage ledger
pub struct BudgetMonitor {
    ledger: Arc<dyn UsageLedger>,
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
}

impl BudgetMonitor {
    pub fn new(config: BudgetConfig, ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            ledger,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Monitor with an in-memory ledger
    pub fn in_memory(config: BudgetConfig) -> Self {
        Self::new(config, Arc::new(InMemoryUsageLedger::new()))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Read current spend for the UTC day and month containing "now"
    ///
    /// # Errors
    /// Returns `EmbeddingError::Ledger` if the ledger cannot be read
    pub async fn state(&self) -> EmbedResult<BudgetState> {
        let now = self.clock.now();
        let day_start = start_of_day(now);
        let month_start = start_of_month(now);

        let daily_spend = self.ledger.spend_since(day_start).await?;
        let monthly_spend = self.ledger.spend_since(month_start).await?;

        Ok(BudgetState {
            daily_spend,
            monthly_spend,
            daily_limit: self.config.daily_limit,
            monthly_limit: self.config.monthly_limit,
            warning_threshold: self.config.warning_threshold,
        })
    }

    /// Check whether `estimated_cost` more spend is allowed
    ///
    /// An unreadable ledger does not block generation; the failure is logged
    /// and reported as a warning.
    pub async fn check_budget(&self, estimated_cost: f64) -> BudgetDecision {
        let state = match self.state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Usage ledger unavailable; allowing request without budget check");
                return BudgetDecision {
                    allowed: true,
                    ceiling: None,
                    reason: None,
                    warnings: vec![format!("usage ledger unavailable: {e}")],
                };
            }
        };

        let decision = state.evaluate(estimated_cost);
        if decision.allowed {
            for warning in &decision.warnings {
                tracing::warn!(estimated_cost, "Budget threshold reached: {warning}");
            }
        } else {
            tracing::warn!(
                estimated_cost,
                daily_spend = state.daily_spend,
                monthly_spend = state.monthly_spend,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Budget check rejected request"
            );
            metrics::counter!("caredex_budget_rejections_total").increment(1);
        }
        decision
    }

    /// Record the cost of a generated embedding
    ///
    /// # Errors
    /// Returns `EmbeddingError::Ledger` if the ledger write fails
    pub async fn record_usage(
        &self,
        result: &EmbeddingResult,
        correlation_id: Option<CorrelationId>,
    ) -> EmbedResult<()> {
        self.ledger
            .record(UsageRecord::from_result(result, correlation_id))
            .await
    }
}

impl fmt::Debug for BudgetMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap_or_else(|| now.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}
