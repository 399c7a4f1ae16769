// Position profit calculation
// Replays each token's trade history in time order, tracking the open position at average
// cost, and values every trade against the current stream price.

use crate::models::{TradeProfit, TradeRecord, TradeSide};
use crate::price_source::PriceSource;
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
struct Position {
    holding: f64,
    cost: f64,
}

impl Position {
    fn average_cost(&self) -> Option<f64> {
        (self.holding > 0.0 && self.cost > 0.0).then(|| self.cost / self.holding)
    }

    fn buy(&mut self, amount: f64, sol_amount: f64) {
        self.holding += amount;
        self.cost += sol_amount;
    }

    /// Reduce the position, releasing cost pro rata
    fn sell(&mut self, amount: f64) {
        let remaining = self.holding - amount;
        if remaining > 0.0 {
            self.cost *= remaining / self.holding;
            self.holding = remaining;
        } else {
            self.holding = 0.0;
            self.cost = 0.0;
        }
    }
}

fn percent_change(current: f64, reference: f64) -> f64 {
    if reference > 0.0 {
        (current / reference - 1.0) * 100.0
    } else {
        0.0
    }
}

/// Profit figures for every trade, newest first. A token without a known price is
/// valued at its entry (0 % open-position profit).
pub fn calculate_profits<S>(trades: &[TradeRecord], source: &S) -> Vec<TradeProfit>
where
    S: PriceSource + ?Sized,
{
    let mut by_token: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for trade in trades {
        by_token
            .entry(trade.token_address.as_str())
            .or_default()
            .push(trade);
    }

    let tokens: Vec<&str> = by_token.keys().copied().collect();
    let prices = source.prices(&tokens);

    let mut results = Vec::with_capacity(trades.len());
    for (token, mut history) in by_token {
        history.sort_by_key(|t| t.timestamp);
        let current_price = prices.get(token).copied().unwrap_or(0.0);
        debug!(
            "Valuing {} trades of {} at current price {}",
            history.len(),
            token,
            current_price
        );
        results.extend(token_profits(&history, current_price));
    }

    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    results
}

fn token_profits(history: &[&TradeRecord], current_price: f64) -> Vec<TradeProfit> {
    let mut position = Position::default();
    let priced = current_price > 0.0;

    history
        .iter()
        .map(|trade| {
            let mut out = TradeProfit {
                signature: trade.signature.clone(),
                token_address: trade.token_address.clone(),
                side: trade.side,
                timestamp: trade.timestamp,
                current_price,
                profit: None,
                profit_percentage: None,
                position_profit: 0.0,
                position_profit_percentage: 0.0,
            };

            match trade.side {
                TradeSide::Buy => {
                    position.buy(trade.amount, trade.sol_amount);
                    if priced {
                        let pct = percent_change(current_price, trade.price);
                        out.position_profit_percentage = pct;
                        out.position_profit = trade.sol_amount * pct / 100.0;
                    } else {
                        out.current_price = trade.price;
                    }
                }
                TradeSide::Sell => {
                    match position.average_cost() {
                        Some(avg) => {
                            out.profit = Some(trade.sol_amount - avg * trade.amount);
                            out.profit_percentage = Some(percent_change(trade.price, avg));
                            position.sell(trade.amount);
                        }
                        None => {
                            out.profit = Some(0.0);
                            out.profit_percentage = Some(0.0);
                        }
                    }

                    if let Some(avg) = position.average_cost() {
                        if priced {
                            let pct = percent_change(current_price, avg);
                            out.position_profit_percentage = pct;
                            out.position_profit = position.cost * pct / 100.0;
                        } else {
                            out.current_price = avg;
                        }
                    }
                }
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashMap;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn trade(sig: &str, token: &str, side: TradeSide, minute: i64, amount: f64, sol: f64) -> TradeRecord {
        TradeRecord {
            signature: sig.to_string(),
            token_address: token.to_string(),
            side,
            timestamp: at(minute),
            amount,
            sol_amount: sol,
            price: sol / amount,
        }
    }

    fn prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_buy_marked_to_current_price() {
        let trades = vec![trade("b1", "mint", TradeSide::Buy, 0, 1000.0, 1.0)];
        let out = calculate_profits(&trades, &prices(&[("mint", 0.002)]));

        assert_eq!(out.len(), 1);
        assert!(close(out[0].position_profit_percentage, 100.0));
        assert!(close(out[0].position_profit, 1.0));
        assert_eq!(out[0].profit, None);
    }

    #[test]
    fn test_sell_realizes_against_average_cost() {
        let trades = vec![
            trade("b1", "mint", TradeSide::Buy, 0, 1000.0, 1.0),
            trade("b2", "mint", TradeSide::Buy, 1, 1000.0, 3.0),
            // average cost 0.002, sold at 0.004
            trade("s1", "mint", TradeSide::Sell, 2, 1000.0, 4.0),
        ];
        let out = calculate_profits(&trades, &prices(&[("mint", 0.003)]));
        let sell = out.iter().find(|p| p.signature == "s1").unwrap();

        assert!(close(sell.profit.unwrap(), 2.0));
        assert!(close(sell.profit_percentage.unwrap(), 100.0));
        // 1000 tokens left at 0.002 average, now worth 0.003
        assert!(close(sell.position_profit_percentage, 50.0));
        assert!(close(sell.position_profit, 1.0));
    }

    #[test]
    fn test_sell_without_position() {
        let trades = vec![trade("s1", "mint", TradeSide::Sell, 0, 10.0, 0.1)];
        let out = calculate_profits(&trades, &prices(&[("mint", 0.02)]));

        assert_eq!(out[0].profit, Some(0.0));
        assert_eq!(out[0].profit_percentage, Some(0.0));
        assert_eq!(out[0].position_profit, 0.0);
    }

    #[test]
    fn test_unknown_price_shows_entry() {
        let trades = vec![
            trade("b1", "mint", TradeSide::Buy, 0, 1000.0, 2.0),
            trade("s1", "mint", TradeSide::Sell, 1, 500.0, 1.5),
        ];
        let out = calculate_profits(&trades, &HashMap::<String, f64>::new());
        let buy = out.iter().find(|p| p.signature == "b1").unwrap();
        let sell = out.iter().find(|p| p.signature == "s1").unwrap();

        assert!(close(buy.current_price, 0.002));
        assert_eq!(buy.position_profit_percentage, 0.0);
        assert!(close(sell.current_price, 0.002));
        assert_eq!(sell.position_profit, 0.0);
        assert!(close(sell.profit.unwrap(), 0.5));
    }

    #[test]
    fn test_output_newest_first_across_tokens() {
        let trades = vec![
            trade("a1", "alpha", TradeSide::Buy, 5, 10.0, 1.0),
            trade("b1", "beta", TradeSide::Buy, 1, 10.0, 1.0),
            trade("a2", "alpha", TradeSide::Sell, 9, 10.0, 2.0),
            trade("b2", "beta", TradeSide::Buy, 7, 10.0, 1.0),
        ];
        let out = calculate_profits(&trades, &prices(&[("alpha", 0.1), ("beta", 0.2)]));
        let order: Vec<&str> = out.iter().map(|p| p.signature.as_str()).collect();

        assert_eq!(order, vec!["a2", "b2", "a1", "b1"]);
        assert!(out.iter().filter(|p| p.token_address == "beta").all(|p| p.current_price == 0.2));
    }
}
