//! Periodic threshold checking
//!
//! Every tick takes one snapshot of the rule list and checks each rule in
//! order. There is no memory between ticks: a rule whose condition keeps
//! holding is notified again on every tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::{AlertRule, EvaluationResult, Series};
use crate::resolver::LatestValueSource;

use super::evaluator::AlertEvaluator;
use super::notifier::NotificationSink;
use super::repository::RuleStore;

/// Outcome of checking a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCheck {
    /// No value could be resolved for the rule's currency
    Unresolved,
    /// The rule was evaluated; `delivered` is set when a notification was attempted
    Evaluated {
        /// Comparison of the resolved value with the threshold
        result: EvaluationResult,
        /// Delivery outcome, `None` when the rule did not trigger
        delivered: Option<bool>,
    },
}

/// Counters and results of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Evaluations, in snapshot order
    pub results: Vec<EvaluationResult>,
    /// Rules skipped because no value was found
    pub skipped: usize,
    /// Notifications delivered
    pub delivered: usize,
    /// Notifications that failed, and rule checks that panicked
    pub failed: usize,
}

impl TickSummary {
    /// Number of rules that were evaluated
    pub fn evaluated(&self) -> usize {
        self.results.len()
    }

    fn record(&mut self, check: RuleCheck) {
        match check {
            RuleCheck::Unresolved => self.skipped += 1,
            RuleCheck::Evaluated { result, delivered } => {
                match delivered {
                    Some(true) => self.delivered += 1,
                    Some(false) => self.failed += 1,
                    None => {}
                }
                self.results.push(result);
            }
        }
    }
}

/// One evaluation pass over the stored rules
pub struct ThresholdCheck {
    rules: Arc<dyn RuleStore>,
    values: Arc<dyn LatestValueSource>,
    sink: Arc<dyn NotificationSink>,
}

impl ThresholdCheck {
    /// Create a check over the given collaborators
    pub fn new(
        rules: Arc<dyn RuleStore>,
        values: Arc<dyn LatestValueSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { rules, values, sink }
    }

    /// Resolve, evaluate and, if triggered, notify a single rule
    pub async fn check_rule(&self, rule: &AlertRule) -> RuleCheck {
        let series = Series::Currency(rule.series_key.clone());

        let Some(observed) = self.values.latest(&series).await else {
            warn!(rule_id = %rule.id, currency = %rule.series_key, "No current rate, skipping rule");
            return RuleCheck::Unresolved;
        };

        let result = AlertEvaluator::evaluate_rule(rule, observed.value);

        debug!(
            rule_id = %rule.id,
            currency = %rule.series_key,
            value = %observed.value,
            threshold = %rule.threshold,
            direction = %rule.direction,
            triggered = result.triggered,
            "Evaluated rule"
        );

        let delivered = if result.triggered {
            info!(
                rule_id = %rule.id,
                currency = %rule.series_key,
                value = %observed.value,
                threshold = %rule.threshold,
                "Rule triggered, notifying {}",
                rule.recipient
            );
            Some(self.sink.send(rule, observed.value).await)
        } else {
            None
        };

        RuleCheck::Evaluated { result, delivered }
    }

    /// Run one tick over a fresh snapshot of the rule list
    pub async fn run_tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let rules = match self.rules.list().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "Failed to list alert rules, skipping tick");
                return summary;
            }
        };

        if rules.is_empty() {
            info!("No alert rules to check");
            return summary;
        }

        info!(count = rules.len(), "Checking alert rules");
        for rule in &rules {
            match AssertUnwindSafe(self.check_rule(rule)).catch_unwind().await {
                Ok(check) => summary.record(check),
                Err(panic) => {
                    error!(
                        rule_id = %rule.id,
                        currency = %rule.series_key,
                        reason = panic_message(panic.as_ref()),
                        "Rule check panicked, continuing with the next rule"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            evaluated = summary.evaluated(),
            skipped = summary.skipped,
            delivered = summary.delivered,
            failed = summary.failed,
            "Alert check complete"
        );
        summary
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

/// Lifecycle state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No background loop
    Stopped,
    /// Ticking every period
    Running,
}

/// Runs a [`ThresholdCheck`] on a fixed interval in a background task
pub struct Scheduler {
    check: Arc<ThresholdCheck>,
    period: Duration,
    running: Arc<Mutex<Option<CancellationToken>>>,
}

/// Resets the scheduler to stopped if its loop ends without `stop()`
struct LoopGuard {
    running: Arc<Mutex<Option<CancellationToken>>>,
    token: CancellationToken,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock();
        // An uncancelled token is still the one in the slot
        if !self.token.is_cancelled() {
            error!("Scheduler loop ended unexpectedly, marking scheduler stopped");
            self.token.cancel();
            running.take();
        }
    }
}

impl Scheduler {
    /// Create a stopped scheduler; `period` must be non-zero
    pub fn new(check: Arc<ThresholdCheck>, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::config("scheduler interval must be greater than zero"));
        }
        Ok(Self {
            check,
            period,
            running: Arc::new(Mutex::new(None)),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        if self.running.lock().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Start ticking; the first tick runs one period from now.
    ///
    /// Returns `false` if the scheduler was already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Scheduler already running");
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let check = self.check.clone();
        let period = self.period;
        let first_tick = Instant::now() + period;
        let guard = LoopGuard {
            running: self.running.clone(),
            token: token.clone(),
        };
        *running = Some(token);
        // The guard locks the slot when the loop ends
        drop(running);

        tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // stop() only takes effect between ticks
                check.run_tick().await;
            }

            debug!("Scheduler loop exited");
        });

        info!(interval_secs = period.as_secs(), "Alert scheduler started");
        true
    }

    /// Stop future ticks. Returns `false` if the scheduler was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                info!("Alert scheduler stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::testing::RecordingSink;
    use rust_decimal::Decimal;
    use crate::alerting::repository::InMemoryRuleStore;
    use crate::models::{CurrencyCode, Direction, NewAlertRule, Observation};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    /// Fixed latest values keyed by currency; missing keys are not found
    struct FixedValues(HashMap<String, &'static str>);

    #[async_trait]
    impl LatestValueSource for FixedValues {
        async fn latest(&self, series: &Series) -> Option<Observation> {
            self.0.get(series.key()).map(|v| Observation {
                date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
                value: v.parse().unwrap(),
            })
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RuleStore for BrokenStore {
        async fn list(&self) -> Result<Vec<AlertRule>> {
            Err(Error::internal("store offline"))
        }

        async fn create(&self, _rule: NewAlertRule) -> Result<AlertRule> {
            Err(Error::internal("store offline"))
        }

        async fn exists_duplicate(&self, _candidate: &NewAlertRule) -> Result<bool> {
            Err(Error::internal("store offline"))
        }
    }

    struct PanickingStore;

    #[async_trait]
    impl RuleStore for PanickingStore {
        async fn list(&self) -> Result<Vec<AlertRule>> {
            panic!("rule store corrupted")
        }

        async fn create(&self, _rule: NewAlertRule) -> Result<AlertRule> {
            unreachable!()
        }

        async fn exists_duplicate(&self, _candidate: &NewAlertRule) -> Result<bool> {
            unreachable!()
        }
    }

    /// Records every recipient and panics when sending to `recipient`
    struct PanickingSink {
        recipient: &'static str,
        attempts: Mutex<Vec<String>>,
    }

    impl PanickingSink {
        fn new(recipient: &'static str) -> Self {
            Self {
                recipient,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for PanickingSink {
        async fn send(&self, rule: &AlertRule, _observed: Decimal) -> bool {
            self.attempts.lock().push(rule.recipient.clone());
            if rule.recipient == self.recipient {
                panic!("mail transport crashed for {}", rule.recipient);
            }
            true
        }
    }

    fn rule(code: &str, direction: Direction, threshold: &str) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            series_key: CurrencyCode::parse(code).unwrap(),
            threshold: threshold.parse().unwrap(),
            recipient: format!("{}@example.com", code.to_lowercase()),
            direction,
            created_at: Utc::now(),
        }
    }

    fn values(pairs: &[(&str, &'static str)]) -> Arc<FixedValues> {
        Arc::new(FixedValues(
            pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        ))
    }

    fn check_with(
        rules: Vec<AlertRule>,
        values: Arc<FixedValues>,
        sink: Arc<dyn NotificationSink>,
    ) -> ThresholdCheck {
        ThresholdCheck::new(Arc::new(InMemoryRuleStore::with_rules(rules)), values, sink)
    }

    #[tokio::test]
    async fn unresolved_rule_does_not_stop_the_tick() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = check_with(
            vec![
                rule("EUR", Direction::Above, "4.5"),
                rule("USD", Direction::Above, "3.5"),
                rule("CHF", Direction::Above, "4.5"),
            ],
            values(&[("EUR", "4.70"), ("CHF", "4.80")]),
            sink.clone(),
        );

        let summary = check.run_tick().await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.delivered, 2);
        let notified: Vec<_> = sink
            .sent
            .lock()
            .iter()
            .map(|(r, _)| r.series_key.to_string())
            .collect();
        assert_eq!(notified, vec!["EUR", "CHF"]);
    }

    #[tokio::test]
    async fn repeated_ticks_notify_every_time() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = check_with(
            vec![rule("EUR", Direction::Below, "5.0")],
            values(&[("EUR", "4.30")]),
            sink.clone(),
        );

        for _ in 0..3 {
            check.run_tick().await;
        }

        assert_eq!(sink.count(), 3);
    }

    #[tokio::test]
    async fn untriggered_rule_is_not_notified() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = check_with(
            vec![rule("EUR", Direction::Above, "4.30")],
            values(&[("EUR", "4.30")]),
            sink.clone(),
        );

        let summary = check.run_tick().await;

        assert_eq!(sink.count(), 0);
        assert_eq!(summary.results.len(), 1);
        assert!(!summary.results[0].triggered);
    }

    #[tokio::test]
    async fn delivery_failures_are_counted_and_contained() {
        let sink = Arc::new(RecordingSink::new(false));
        let check = check_with(
            vec![
                rule("EUR", Direction::Above, "4.0"),
                rule("GBP", Direction::Above, "5.0"),
            ],
            values(&[("EUR", "4.7"), ("GBP", "5.4")]),
            sink.clone(),
        );

        let summary = check.run_tick().await;

        assert_eq!(sink.count(), 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.delivered, 0);
    }

    #[tokio::test]
    async fn panicking_rule_is_counted_as_failed_and_the_tick_continues() {
        let sink = Arc::new(PanickingSink::new("eur@example.com"));
        let check = check_with(
            vec![
                rule("EUR", Direction::Above, "4.0"),
                rule("USD", Direction::Above, "3.5"),
            ],
            values(&[("EUR", "4.5"), ("USD", "3.9")]),
            sink.clone(),
        );

        let summary = check.run_tick().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.evaluated(), 1);
        assert_eq!(sink.attempts(), vec!["eur@example.com", "usd@example.com"]);
    }

    #[tokio::test]
    async fn store_failure_skips_the_tick() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = ThresholdCheck::new(Arc::new(BrokenStore), values(&[]), sink.clone());

        assert_eq!(check.run_tick().await, TickSummary::default());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_ticks_until_stopped() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = Arc::new(check_with(
            vec![rule("EUR", Direction::Above, "4.0")],
            values(&[("EUR", "4.5")]),
            sink.clone(),
        ));
        let period = Duration::from_secs(900);
        let scheduler = Scheduler::new(check, period).unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        tokio::time::sleep(period / 2).await;
        assert_eq!(sink.count(), 0);

        tokio::time::sleep(period / 2 + Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 1);

        tokio::time::sleep(period).await;
        assert_eq!(sink.count(), 2);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        tokio::time::sleep(period * 3).await;
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_can_be_restarted() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = Arc::new(check_with(
            vec![rule("EUR", Direction::Above, "4.0")],
            values(&[("EUR", "4.5")]),
            sink.clone(),
        ));
        let period = Duration::from_secs(60);
        let scheduler = Scheduler::new(check, period).unwrap();

        scheduler.start();
        scheduler.stop();
        assert!(scheduler.start());

        tokio::time::sleep(period + Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_rule_does_not_stop_the_scheduler() {
        let sink = Arc::new(PanickingSink::new("eur@example.com"));
        let check = Arc::new(check_with(
            vec![
                rule("EUR", Direction::Above, "4.0"),
                rule("USD", Direction::Above, "3.5"),
            ],
            values(&[("EUR", "4.5"), ("USD", "3.9")]),
            sink.clone(),
        ));
        let period = Duration::from_secs(60);
        let scheduler = Scheduler::new(check, period).unwrap();

        assert!(scheduler.start());
        tokio::time::sleep(period * 3 + Duration::from_secs(1)).await;

        assert_eq!(sink.attempts().len(), 6);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(!scheduler.start());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_loop_leaves_the_scheduler_stopped() {
        let check = Arc::new(ThresholdCheck::new(
            Arc::new(PanickingStore),
            values(&[]),
            Arc::new(RecordingSink::new(true)),
        ));
        let period = Duration::from_secs(60);
        let scheduler = Scheduler::new(check, period).unwrap();

        assert!(scheduler.start());
        tokio::time::sleep(period + Duration::from_secs(1)).await;

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.start());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let sink = Arc::new(RecordingSink::new(true));
        let check = Arc::new(check_with(vec![], values(&[]), sink));
        assert!(Scheduler::new(check, Duration::ZERO).is_err());
    }
}
