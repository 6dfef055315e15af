//! Seeded random-walk feed for offline runs and demos.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use papertrail_core::Tick;

use super::{FeedStats, OrderGuard, Subscription, TickFeed};
use crate::config::SimulatedConfig;

#[derive(Debug, Clone)]
pub struct SimulatedFeed {
    config: SimulatedConfig,
    channel_capacity: usize,
}

impl SimulatedFeed {
    pub fn new(config: SimulatedConfig, channel_capacity: usize) -> Self {
        Self {
            config,
            channel_capacity,
        }
    }
}

impl TickFeed for SimulatedFeed {
    fn name(&self) -> &str {
        "simulated"
    }

    fn subscribe(&self, symbols: &BTreeSet<String>) -> Subscription {
        let (tx, rx) = mpsc::channel::<Tick>(self.channel_capacity.max(1));
        let stats = Arc::new(FeedStats::default());
        let mut guard = OrderGuard::new(symbols.clone(), Arc::clone(&stats));
        let config = self.config.clone();
        let symbols: Vec<String> = symbols.iter().cloned().collect();
        let task_stats = Arc::clone(&stats);

        let task = tokio::spawn(async move {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut walk = RandomWalk::new(&symbols, config.start_price, config.volatility);
            let mut interval =
                tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let now = Utc::now();
                for (symbol, price) in walk.step(&mut rng) {
                    let Ok(tick) = Tick::new(symbol, price, now) else {
                        continue;
                    };
                    if !guard.admit(&tick) {
                        continue;
                    }
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                    task_stats.record_delivered();
                }
            }
        });
        Subscription::new(rx, task, stats)
    }
}

/// Multiplicative random walk, one price per symbol.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    prices: Vec<(String, f64)>,
    volatility: f64,
}

impl RandomWalk {
    pub fn new(symbols: &[String], start_price: f64, volatility: f64) -> Self {
        Self {
            prices: symbols.iter().map(|s| (s.clone(), start_price)).collect(),
            volatility: volatility.abs(),
        }
    }

    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Vec<(String, f64)> {
        let vol = self.volatility;
        self.prices
            .iter_mut()
            .map(|(symbol, price)| {
                if vol > 0.0 {
                    *price *= 1.0 + rng.gen_range(-vol..vol);
                }
                (symbol.clone(), *price)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_is_deterministic_for_a_seed() {
        let symbols = vec!["A".to_string(), "B".to_string()];
        let mut a = RandomWalk::new(&symbols, 100.0, 0.01);
        let mut b = RandomWalk::new(&symbols, 100.0, 0.01);
        let mut ra = StdRng::seed_from_u64(9);
        let mut rb = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            assert_eq!(a.step(&mut ra), b.step(&mut rb));
        }
    }

    #[test]
    fn walk_stays_positive() {
        let symbols = vec!["A".to_string()];
        let mut walk = RandomWalk::new(&symbols, 100.0, 0.05);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(walk.step(&mut rng)[0].1 > 0.0);
        }
    }

    #[tokio::test]
    async fn subscription_delivers_subscribed_symbols() {
        use futures::StreamExt;

        let feed = SimulatedFeed::new(
            SimulatedConfig {
                tick_interval_ms: 1,
                volatility: 0.001,
                seed: Some(3),
                start_price: 50.0,
            },
            64,
        );
        let symbols: BTreeSet<String> = ["AAA", "BBB"].iter().map(|s| s.to_string()).collect();
        let mut sub = feed.subscribe(&symbols);
        for _ in 0..10 {
            let tick = sub.next().await.unwrap();
            assert!(symbols.contains(&tick.symbol));
        }
        sub.cancel();
        assert!(sub.is_cancelled());
    }
}
