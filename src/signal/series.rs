use super::rsi::WilderRsi;

/// The slice of a candle this tracker cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub close: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleOutcome {
    Added,
    Replaced,
    /// Out-of-order bar, dropped.
    Ignored,
}

/// RSI over closed candles plus the forming one. Keeps only the last
/// open time seen; same-bar updates replace the forming close in place.
#[derive(Debug, Clone)]
pub struct RsiSeries {
    rsi: WilderRsi,
    current_open_time: Option<i64>,
    last_close: f64,
    candle_closed: bool,
}

impl RsiSeries {
    pub fn new(period: usize) -> Self {
        Self {
            rsi: WilderRsi::new(period),
            current_open_time: None,
            last_close: 0.0,
            candle_closed: false,
        }
    }

    /// Rebuild from historical candles (REST seed). Bars are sorted
    /// ascending before feeding; the last bar is marked forming so the
    /// live stream replaces it.
    pub fn seed(&mut self, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);

        let mut rsi = WilderRsi::new(self.rsi.period());
        let mut current = None;
        let mut last_close = 0.0;
        for candle in &candles {
            rsi.add(candle.close);
            current = Some(candle.open_time);
            last_close = candle.close;
        }

        self.rsi = rsi;
        self.current_open_time = current;
        self.last_close = last_close;
        self.candle_closed = false;
    }

    pub fn apply(&mut self, candle: &Candle) -> CandleOutcome {
        match self.current_open_time {
            Some(current) if candle.open_time < current => CandleOutcome::Ignored,
            Some(current) if candle.open_time == current => {
                self.rsi.replace(candle.close);
                self.last_close = candle.close;
                self.candle_closed = candle.is_closed;
                CandleOutcome::Replaced
            }
            _ => {
                self.rsi.add(candle.close);
                self.current_open_time = Some(candle.open_time);
                self.last_close = candle.close;
                self.candle_closed = candle.is_closed;
                CandleOutcome::Added
            }
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.rsi.value()
    }

    pub fn is_stable(&self) -> bool {
        self.rsi.is_stable()
    }

    pub fn last_close(&self) -> f64 {
        self.last_close
    }

    pub fn current_open_time(&self) -> Option<i64> {
        self.current_open_time
    }

    pub fn candle_closed(&self) -> bool {
        self.candle_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close,
            is_closed,
        }
    }

    #[test]
    fn seed_sorts_and_marks_last_bar_forming() {
        let mut series = RsiSeries::new(2);
        series.seed(vec![
            candle(3000, 12.0, true),
            candle(1000, 10.0, true),
            candle(2000, 11.0, true),
        ]);

        assert_eq!(series.current_open_time(), Some(3000));
        assert_eq!(series.last_close(), 12.0);
        assert!(!series.candle_closed());
        assert!(series.is_stable());
    }

    #[test]
    fn same_open_time_replaces_in_place() {
        let mut series = RsiSeries::new(2);
        series.seed(vec![
            candle(1000, 10.0, true),
            candle(2000, 11.0, true),
            candle(3000, 12.0, true),
        ]);
        let baseline = series.value();

        assert_eq!(series.apply(&candle(3000, 13.0, false)), CandleOutcome::Replaced);
        assert_eq!(series.apply(&candle(3000, 12.0, false)), CandleOutcome::Replaced);

        // back at the seeded close, the indicator must match exactly
        assert_eq!(series.value(), baseline);
    }

    #[test]
    fn duplicate_event_is_idempotent() {
        let mut series = RsiSeries::new(2);
        series.seed(vec![
            candle(1000, 10.0, true),
            candle(2000, 11.0, true),
            candle(3000, 12.0, true),
        ]);

        series.apply(&candle(3000, 12.5, false));
        let once = series.value();
        series.apply(&candle(3000, 12.5, false));
        assert_eq!(series.value(), once);
    }

    #[test]
    fn out_of_order_bars_are_ignored() {
        let mut series = RsiSeries::new(2);
        series.apply(&candle(2000, 11.0, true));
        assert_eq!(series.apply(&candle(1000, 99.0, true)), CandleOutcome::Ignored);
        assert_eq!(series.last_close(), 11.0);
    }

    #[test]
    fn newer_bar_rolls_over() {
        let mut series = RsiSeries::new(2);
        series.apply(&candle(1000, 10.0, true));
        series.apply(&candle(2000, 11.0, false));
        series.apply(&candle(2000, 11.5, true));
        assert_eq!(series.apply(&candle(3000, 12.0, false)), CandleOutcome::Added);
        assert_eq!(series.current_open_time(), Some(3000));
        assert!(series.is_stable());
        assert!(!series.candle_closed());
    }
}
