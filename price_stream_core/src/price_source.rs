// Read-only price source abstraction
// Aggregate consumers (profit calculator, CLI) read prices through this trait so they work
// against the live manager, a bare cache, or a fixed table in tests.

use crate::manager::ConnectionManager;
use crate::price_cache::PriceCache;
use std::collections::HashMap;

pub trait PriceSource: Send + Sync {
    /// Current price for `key`, or None if unknown
    fn price(&self, key: &str) -> Option<f64>;

    /// Prices for several keys at once, keyed as requested. Unknown keys are omitted.
    fn prices(&self, keys: &[&str]) -> HashMap<String, f64> {
        let mut prices = HashMap::new();
        for key in keys {
            if let Some(price) = self.price(key) {
                prices.insert(key.to_string(), price);
            }
        }
        prices
    }

    fn all_prices(&self) -> HashMap<String, f64>;
}

impl PriceSource for PriceCache {
    fn price(&self, key: &str) -> Option<f64> {
        self.resolve(key).map(|hit| hit.price)
    }

    fn all_prices(&self) -> HashMap<String, f64> {
        self.snapshot()
    }
}

impl PriceSource for ConnectionManager {
    fn price(&self, key: &str) -> Option<f64> {
        self.price_cache().price(key)
    }

    fn all_prices(&self) -> HashMap<String, f64> {
        self.get_all_prices()
    }
}

/// Fixed table, exact keys only
impl PriceSource for HashMap<String, f64> {
    fn price(&self, key: &str) -> Option<f64> {
        self.get(key).copied()
    }

    fn all_prices(&self) -> HashMap<String, f64> {
        self.clone()
    }
}
