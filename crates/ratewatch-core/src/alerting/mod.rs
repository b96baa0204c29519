//! Threshold alerting for RateWatch
//!
//! Rule storage, evaluation, notification delivery and the periodic check loop.

mod evaluator;
mod notifier;
mod repository;
mod scheduler;

pub use evaluator::AlertEvaluator;
pub use notifier::{EmailNotifier, Mailer, NotificationError, NotificationSink, SmtpMailer};
pub use repository::{InMemoryRuleStore, RuleStore};
pub use scheduler::{RuleCheck, Scheduler, SchedulerState, ThresholdCheck, TickSummary};

#[cfg(test)]
pub(crate) use notifier::testing;
