//! Price/volume condition evaluator.
//!
//! Maps one rule and one market snapshot to a [`TriggerResult`]. Pure and
//! deterministic: no clock, no I/O, no hidden state.

use pricewatch_core::{AlertRule, Direction, MarketSnapshot, TriggerResult};

/// Evaluate `rule` against `snap`.
///
/// - Wrong symbol or a non-finite/negative price yields `Indeterminate`.
/// - `price <= min_price` is a floor breach, `price >= max_price` a ceiling
///   breach. When both hold (a `min_price >= max_price` rule) a single
///   `Floor` result is returned.
/// - A set `min_volume` gates the trigger: price satisfied but volume short
///   yields `PriceOkVolumeLow`.
pub fn evaluate(rule: &AlertRule, snap: &MarketSnapshot) -> TriggerResult {
    if snap.symbol != rule.symbol {
        return TriggerResult::Indeterminate;
    }
    if !snap.price.is_finite() || snap.price < 0.0 {
        return TriggerResult::Indeterminate;
    }

    let direction = match price_breach(rule, snap.price) {
        Some(d) => d,
        None => return TriggerResult::NoTrigger,
    };

    if let Some(min_volume) = rule.min_volume {
        if !snap.volume.is_finite() || snap.volume < 0.0 {
            return TriggerResult::Indeterminate;
        }
        if snap.volume < min_volume {
            return TriggerResult::PriceOkVolumeLow;
        }
    }

    TriggerResult::Triggered(direction)
}

fn price_breach(rule: &AlertRule, price: f64) -> Option<Direction> {
    if matches!(rule.min_price, Some(min) if price <= min) {
        return Some(Direction::Floor);
    }
    if matches!(rule.max_price, Some(max) if price >= max) {
        return Some(Direction::Ceiling);
    }
    None
}
