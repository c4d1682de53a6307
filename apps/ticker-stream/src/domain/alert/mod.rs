//! Price Alerts
//!
//! Alert rules are symbol-scoped and survive symbol switches. Evaluation is
//! a pure function of a rule and a view of the price buffer; [`AlertBook`] owns the
//! rule set and the bounded log of fired events.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::buffer::BufferView;
use super::market::{PriceSample, Symbol, SymbolError};

/// Default number of alert events kept in the history log.
pub const DEFAULT_HISTORY_LIMIT: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(n) => n,
    None => unreachable!(),
};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while creating or managing alert rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// Price target must be positive.
    #[error("price threshold must be greater than zero, got {0}")]
    NonPositiveThreshold(Decimal),

    /// Percent must be in `(0, 100]`.
    #[error("percent change must be in (0, 100], got {0}")]
    PercentOutOfRange(Decimal),

    /// Window must be non-zero.
    #[error("percent change window must be greater than zero")]
    EmptyWindow,

    /// No rule with this id.
    #[error("unknown alert rule {0}")]
    UnknownRule(RuleId),

    /// Rule spec could not be parsed.
    #[error("invalid alert rule spec {spec:?}: {reason}")]
    InvalidSpec {
        /// Offending spec.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Rule symbol is invalid.
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

// =============================================================================
// Rules
// =============================================================================

/// Unique alert rule identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RuleId(Uuid);

impl RuleId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Crossing direction for price targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Fires when price rises to or through the threshold.
    Above,
    /// Fires when price falls to or through the threshold.
    Below,
}

impl Direction {
    fn reached(self, price: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Above => price >= threshold,
            Self::Below => price <= threshold,
        }
    }
}

/// What an alert rule watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    /// Price crosses a fixed level.
    PriceTarget {
        /// Level to cross.
        threshold: Decimal,
        /// Crossing direction.
        direction: Direction,
    },
    /// Price moves by at least `pct` percent within `window`.
    PercentChange {
        /// Magnitude in percent, either direction.
        pct: Decimal,
        /// Lookback window.
        window: Duration,
    },
}

impl AlertKind {
    fn validate(&self) -> Result<(), AlertError> {
        match *self {
            Self::PriceTarget { threshold, .. } => {
                if threshold <= Decimal::ZERO {
                    return Err(AlertError::NonPositiveThreshold(threshold));
                }
            }
            Self::PercentChange { pct, window } => {
                if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                    return Err(AlertError::PercentOutOfRange(pct));
                }
                if window.is_zero() {
                    return Err(AlertError::EmptyWindow);
                }
            }
        }
        Ok(())
    }
}

/// User input for a new rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlertRule {
    /// Symbol the rule applies to.
    pub symbol: Symbol,
    /// Condition.
    pub kind: AlertKind,
}

impl NewAlertRule {
    /// Price-target rule.
    #[must_use]
    pub const fn price_target(symbol: Symbol, threshold: Decimal, direction: Direction) -> Self {
        Self {
            symbol,
            kind: AlertKind::PriceTarget {
                threshold,
                direction,
            },
        }
    }

    /// Percent-change rule.
    #[must_use]
    pub const fn percent_change(symbol: Symbol, pct: Decimal, window: Duration) -> Self {
        Self {
            symbol,
            kind: AlertKind::PercentChange { pct, window },
        }
    }

    /// Parse a rule spec.
    ///
    /// Accepted forms: `SYMBOL:above:PRICE`, `SYMBOL:below:PRICE` and
    /// `SYMBOL:change:PCT:WINDOW_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError`] for malformed specs or invalid values.
    pub fn parse(spec: &str) -> Result<Self, AlertError> {
        let invalid = |reason: &str| AlertError::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };
        let decimal = |raw: &str| {
            raw.trim()
                .parse::<Decimal>()
                .map_err(|_| invalid(&format!("{raw:?} is not a number")))
        };

        let parts: Vec<&str> = spec.trim().split(':').collect();
        let rule = match parts.as_slice() {
            [symbol, kind, price] if kind.eq_ignore_ascii_case("above") => {
                Self::price_target(Symbol::new(symbol)?, decimal(price)?, Direction::Above)
            }
            [symbol, kind, price] if kind.eq_ignore_ascii_case("below") => {
                Self::price_target(Symbol::new(symbol)?, decimal(price)?, Direction::Below)
            }
            [symbol, kind, pct, secs] if kind.eq_ignore_ascii_case("change") => {
                let secs = secs
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| invalid(&format!("{secs:?} is not a number of seconds")))?;
                Self::percent_change(
                    Symbol::new(symbol)?,
                    decimal(pct)?,
                    Duration::from_secs(secs),
                )
            }
            _ => return Err(invalid("expected SYMBOL:above|below:PRICE or SYMBOL:change:PCT:SECS")),
        };
        rule.kind.validate()?;
        Ok(rule)
    }
}

/// A registered alert rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRule {
    /// Rule id.
    pub id: RuleId,
    /// Symbol the rule applies to.
    pub symbol: Symbol,
    /// Condition.
    pub kind: AlertKind,
    /// Inactive rules are skipped until reset.
    pub active: bool,
}

impl AlertRule {
    /// Validate and register a new rule, starting active.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError`] if the threshold, percent or window is invalid.
    pub fn new(new: NewAlertRule) -> Result<Self, AlertError> {
        new.kind.validate()?;
        Ok(Self {
            id: RuleId::generate(),
            symbol: new.symbol,
            kind: new.kind,
            active: true,
        })
    }
}

/// One fired alert. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    /// Rule as it was when it fired.
    pub rule: AlertRule,
    /// Sample that triggered it.
    pub sample: PriceSample,
    /// Percent change for percent-change rules.
    pub change_pct: Option<Decimal>,
    /// When the alert fired.
    pub fired_at: DateTime<Utc>,
}

impl AlertEvent {
    /// Human-readable alert message.
    #[must_use]
    pub fn message(&self) -> String {
        match (self.rule.kind, self.change_pct) {
            (AlertKind::PriceTarget { threshold, direction }, _) => {
                let verb = match direction {
                    Direction::Above => "rose above",
                    Direction::Below => "fell below",
                };
                format!(
                    "{} {verb} {threshold}: {}",
                    self.rule.symbol, self.sample.price
                )
            }
            (AlertKind::PercentChange { window, .. }, Some(change)) => format!(
                "{} moved {}% in {}s: {}",
                self.rule.symbol,
                change.round_dp(2),
                window.as_secs(),
                self.sample.price
            ),
            (AlertKind::PercentChange { pct, .. }, None) => {
                format!("{} moved {pct}%: {}", self.rule.symbol, self.sample.price)
            }
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Stateless rule evaluation.
pub struct AlertEvaluator;

impl AlertEvaluator {
    /// Evaluate `rule` against the newest sample in `history`.
    ///
    /// Returns `None` for inactive rules, rules for another symbol, empty
    /// histories and percent-change rules without enough history.
    #[must_use]
    pub fn evaluate(
        rule: &AlertRule,
        history: &BufferView<'_>,
        fired_at: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        if !rule.active || &rule.symbol != history.symbol() {
            return None;
        }
        let latest = history.latest()?;

        let change_pct = match rule.kind {
            AlertKind::PriceTarget {
                threshold,
                direction,
            } => {
                if !direction.reached(latest.price, threshold) {
                    return None;
                }
                // Already past the level on the previous sample: no crossing.
                if history
                    .previous()
                    .is_some_and(|prev| direction.reached(prev.price, threshold))
                {
                    return None;
                }
                None
            }
            AlertKind::PercentChange { pct, window } => {
                let change = history.percent_change(window)?;
                if change.abs() < pct {
                    return None;
                }
                Some(change)
            }
        };

        Some(AlertEvent {
            rule: rule.clone(),
            sample: latest.clone(),
            change_pct,
            fired_at,
        })
    }
}

// =============================================================================
// Rule Book
// =============================================================================

/// Rule set plus bounded alert history.
#[derive(Debug, Clone)]
pub struct AlertBook {
    rules: Vec<AlertRule>,
    history: VecDeque<AlertEvent>,
    history_limit: NonZeroUsize,
}

impl Default for AlertBook {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl AlertBook {
    /// Empty book keeping at most `history_limit` events.
    #[must_use]
    pub fn new(history_limit: NonZeroUsize) -> Self {
        Self {
            rules: Vec::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Register a rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError`] if the rule is invalid.
    pub fn add_rule(&mut self, new: NewAlertRule) -> Result<RuleId, AlertError> {
        let rule = AlertRule::new(new)?;
        let id = rule.id;
        self.rules.push(rule);
        Ok(id)
    }

    /// Remove a rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::UnknownRule`] if no such rule exists.
    pub fn clear_rule(&mut self, id: RuleId) -> Result<AlertRule, AlertError> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(AlertError::UnknownRule(id))?;
        Ok(self.rules.remove(index))
    }

    /// Re-activate a rule after it fired.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::UnknownRule`] if no such rule exists.
    pub fn reset_rule(&mut self, id: RuleId) -> Result<(), AlertError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AlertError::UnknownRule(id))?;
        rule.active = true;
        Ok(())
    }

    /// Rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate every active rule against `history`.
    ///
    /// Fired rules are deactivated and their events appended to the history.
    /// Returns the events fired by this call.
    pub fn evaluate(
        &mut self,
        history: &BufferView<'_>,
        fired_at: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let mut fired = Vec::new();
        for rule in &mut self.rules {
            if let Some(event) = AlertEvaluator::evaluate(rule, history, fired_at) {
                rule.active = false;
                fired.push(event);
            }
        }
        for event in &fired {
            if self.history.len() == self.history_limit.get() {
                self.history.pop_front();
            }
            self.history.push_back(event.clone());
        }
        fired
    }

    /// Alert history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<AlertEvent> {
        self.history.iter().cloned().collect()
    }

    /// Drop all recorded events.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
