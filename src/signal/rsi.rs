/// Wilder's RSI over a close-price series.
///
/// `replace` swaps the most recent close in place: the averages roll
/// back to their pre-`add` values and re-apply with the new close, so a
/// forming bar can be updated on every tick without biasing the
/// smoothing.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    core: Core,
    rollback: Option<Core>,
}

#[derive(Debug, Clone, Copy)]
struct Core {
    count: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be positive");
        Self {
            period,
            core: Core {
                count: 0,
                prev_close: None,
                avg_gain: 0.0,
                avg_loss: 0.0,
            },
            rollback: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Number of closes fed so far.
    pub fn len(&self) -> usize {
        self.core.count
    }

    pub fn is_empty(&self) -> bool {
        self.core.count == 0
    }

    /// Stable once `period + 1` closes (i.e. `period` deltas) are in.
    pub fn is_stable(&self) -> bool {
        self.core.count > self.period
    }

    pub fn add(&mut self, close: f64) {
        if !close.is_finite() {
            return;
        }
        self.rollback = Some(self.core);

        if let Some(prev) = self.core.prev_close {
            let delta = close - prev;
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            let n = self.period as f64;
            let deltas_after = self.core.count; // count is pre-increment

            if deltas_after <= self.period {
                // warmup: simple sums, averaged once the window fills
                self.core.avg_gain += gain;
                self.core.avg_loss += loss;
                if deltas_after == self.period {
                    self.core.avg_gain /= n;
                    self.core.avg_loss /= n;
                }
            } else {
                self.core.avg_gain = (self.core.avg_gain * (n - 1.0) + gain) / n;
                self.core.avg_loss = (self.core.avg_loss * (n - 1.0) + loss) / n;
            }
        }

        self.core.prev_close = Some(close);
        self.core.count += 1;
    }

    /// Replace the last added close. O(1): restores the pre-`add` state
    /// and re-applies. Repeated replaces converge to the same result.
    pub fn replace(&mut self, close: f64) {
        match self.rollback {
            Some(saved) => {
                self.core = saved;
                self.add(close);
            }
            None => self.add(close),
        }
    }

    pub fn value(&self) -> Option<f64> {
        if !self.is_stable() {
            return None;
        }
        if self.core.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.core.avg_gain / self.core.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(rsi: &mut WilderRsi, closes: &[f64]) {
        for c in closes {
            rsi.add(*c);
        }
    }

    #[test]
    fn stable_exactly_after_period_plus_one_closes() {
        let mut rsi = WilderRsi::new(14);
        for i in 0..14 {
            rsi.add(100.0 + i as f64);
            assert!(!rsi.is_stable(), "unstable at {} closes", i + 1);
            assert_eq!(rsi.value(), None);
        }
        rsi.add(114.0);
        assert!(rsi.is_stable());
        assert!(rsi.value().is_some());
    }

    #[test]
    fn monotone_up_series_pegs_at_100() {
        let mut rsi = WilderRsi::new(14);
        feed(&mut rsi, &(0..20).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        assert_eq!(rsi.value(), Some(100.0));
    }

    #[test]
    fn classic_wilder_values() {
        // Wilder's worked example from New Concepts in Technical
        // Trading Systems, RSI(14) over the first 15 closes = 70.46.
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28,
        ];
        let mut rsi = WilderRsi::new(14);
        feed(&mut rsi, &closes);
        let v = rsi.value().unwrap();
        assert!((v - 70.46).abs() < 0.1, "got {v}");
    }

    #[test]
    fn replace_matches_fresh_series() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28, 46.00,
        ];

        // path A: add everything, then churn the forming bar
        let mut a = WilderRsi::new(14);
        feed(&mut a, &closes);
        a.replace(47.0);
        a.replace(45.5);
        a.replace(46.41);

        // path B: the same series with the final close straight away
        let mut b = WilderRsi::new(14);
        feed(&mut b, &closes[..closes.len() - 1]);
        b.add(46.41);

        let (va, vb) = (a.value().unwrap(), b.value().unwrap());
        assert!((va - vb).abs() < 1e-12, "{va} vs {vb}");
    }

    #[test]
    fn replace_during_warmup_is_exact() {
        let mut a = WilderRsi::new(3);
        feed(&mut a, &[10.0, 11.0, 9.0]);
        a.replace(12.0);
        a.add(13.0);

        let mut b = WilderRsi::new(3);
        feed(&mut b, &[10.0, 11.0, 12.0, 13.0]);

        assert_eq!(a.len(), b.len());
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn non_finite_closes_are_dropped() {
        let mut rsi = WilderRsi::new(2);
        rsi.add(f64::NAN);
        rsi.add(f64::INFINITY);
        assert!(rsi.is_empty());
    }
}
