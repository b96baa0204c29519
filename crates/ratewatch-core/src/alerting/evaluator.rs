//! Alert rule evaluation

use rust_decimal::Decimal;

use crate::models::{AlertRule, EvaluationResult};

/// Stateless threshold evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertEvaluator;

impl AlertEvaluator {
    /// Whether `observed` satisfies the rule's condition
    pub fn evaluate(rule: &AlertRule, observed: Decimal) -> bool {
        rule.check(observed)
    }

    /// Evaluate and package the outcome for the current tick
    pub fn evaluate_rule(rule: &AlertRule, observed: Decimal) -> EvaluationResult {
        EvaluationResult {
            rule: rule.clone(),
            observed_value: observed,
            triggered: Self::evaluate(rule, observed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CurrencyCode, Direction};
    use chrono::Utc;
    use rstest::rstest;
    use uuid::Uuid;

    fn rule(direction: Direction, threshold: &str) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            series_key: CurrencyCode::parse("EUR").unwrap(),
            threshold: threshold.parse().unwrap(),
            recipient: "ops@example.com".to_string(),
            direction,
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(Direction::Above, "4.0", "4.0", false)]
    #[case(Direction::Above, "4.0", "4.01", true)]
    #[case(Direction::Above, "4.0", "3.99", false)]
    #[case(Direction::Below, "4.0", "3.99", true)]
    #[case(Direction::Below, "4.0", "4.0", false)]
    #[case(Direction::Below, "4.0", "4.01", false)]
    #[case(Direction::Above, "4.0000", "4", false)]
    fn threshold_comparison(
        #[case] direction: Direction,
        #[case] threshold: &str,
        #[case] observed: &str,
        #[case] expected: bool,
    ) {
        let rule = rule(direction, threshold);
        assert_eq!(AlertEvaluator::evaluate(&rule, observed.parse().unwrap()), expected);
    }

    #[test]
    fn evaluate_rule_carries_observed_value() {
        let rule = rule(Direction::Below, "4.5");
        let result = AlertEvaluator::evaluate_rule(&rule, "4.2".parse().unwrap());
        assert!(result.triggered);
        assert_eq!(result.observed_value, "4.2".parse().unwrap());
        assert_eq!(result.rule.id, rule.id);
    }
}
