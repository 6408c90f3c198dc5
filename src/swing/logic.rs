//! Pure swing decision core: RSI threshold crossings in, at most one
//! order action out. No I/O, no clocks, no side effects.

/// Below this absolute size a position counts as flat for arming.
const FLAT_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    Both,
}

impl Direction {
    pub fn allows_long(&self) -> bool {
        matches!(self, Direction::Long | Direction::Both)
    }

    pub fn allows_short(&self) -> bool {
        matches!(self, Direction::Short | Direction::Both)
    }

    pub fn parse(raw: &str) -> Option<Direction> {
        match raw.to_ascii_lowercase().as_str() {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SwingThresholds {
    pub direction: Direction,
    pub rsi_high: f64,
    pub rsi_low: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SwingState {
    pub prev_rsi: Option<f64>,
    pub armed_short_entry: bool,
    pub armed_short_exit: bool,
    pub armed_long_entry: bool,
    pub armed_long_exit: bool,
}

/// One observation per tick.
#[derive(Debug, Clone, Copy)]
pub struct SwingTick {
    pub rsi: Option<f64>,
    pub position_amt: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingAction {
    OpenShort,
    OpenLong,
    ClosePosition,
}

fn cross_up(prev: Option<f64>, next: f64, threshold: f64) -> bool {
    matches!(prev, Some(p) if p <= threshold && next > threshold)
}

fn cross_down(prev: Option<f64>, next: f64, threshold: f64) -> bool {
    matches!(prev, Some(p) if p >= threshold && next < threshold)
}

/// Advance the state machine by one observation.
///
/// Thresholds compare the previous sample against the current one, so
/// the first sample only primes `prev_rsi`. Exits are evaluated no
/// matter what `direction` says, so a position opened under an older
/// config can always be unwound.
pub fn step(
    state: SwingState,
    cfg: &SwingThresholds,
    tick: &SwingTick,
) -> (SwingState, Vec<SwingAction>) {
    let rsi = match tick.rsi {
        Some(v) if v.is_finite() => v,
        _ => return (state, Vec::new()),
    };

    let prev = state.prev_rsi;
    let mut next = state;
    let mut actions = Vec::new();

    if tick.position_amt.abs() <= FLAT_EPS {
        // flat: exit arms are meaningless
        next.armed_short_exit = false;
        next.armed_long_exit = false;

        let mut fire_short = false;
        let mut fire_long = false;

        if cfg.direction.allows_short() {
            if cross_up(prev, rsi, cfg.rsi_high) {
                next.armed_short_entry = true;
            }
            if next.armed_short_entry && cross_down(prev, rsi, cfg.rsi_high) {
                fire_short = true;
            }
        }
        if cfg.direction.allows_long() {
            if cross_down(prev, rsi, cfg.rsi_low) {
                next.armed_long_entry = true;
            }
            if next.armed_long_entry && cross_up(prev, rsi, cfg.rsi_low) {
                fire_long = true;
            }
        }

        if fire_short && fire_long {
            // disjoint thresholds make this unreachable, but never
            // emit contradictory entries
            next.armed_short_entry = false;
            next.armed_long_entry = false;
        } else if fire_short {
            actions.push(SwingAction::OpenShort);
            next.armed_short_entry = false;
            next.armed_long_entry = false;
        } else if fire_long {
            actions.push(SwingAction::OpenLong);
            next.armed_short_entry = false;
            next.armed_long_entry = false;
        }
    } else if tick.position_amt < 0.0 {
        // short open
        next.armed_short_entry = false;
        next.armed_long_entry = false;
        next.armed_long_exit = false;

        if cross_down(prev, rsi, cfg.rsi_low) {
            next.armed_short_exit = true;
        }
        if next.armed_short_exit && cross_up(prev, rsi, cfg.rsi_low) && tick.pnl > 0.0 {
            actions.push(SwingAction::ClosePosition);
            next.armed_short_exit = false;
        }
    } else {
        // long open
        next.armed_short_entry = false;
        next.armed_long_entry = false;
        next.armed_short_exit = false;

        if cross_up(prev, rsi, cfg.rsi_high) {
            next.armed_long_exit = true;
        }
        if next.armed_long_exit && cross_down(prev, rsi, cfg.rsi_high) && tick.pnl > 0.0 {
            actions.push(SwingAction::ClosePosition);
            next.armed_long_exit = false;
        }
    }

    next.prev_rsi = Some(rsi);
    (next, actions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG_SHORT: SwingThresholds = SwingThresholds {
        direction: Direction::Short,
        rsi_high: 70.0,
        rsi_low: 30.0,
    };

    const CFG_LONG: SwingThresholds = SwingThresholds {
        direction: Direction::Long,
        rsi_high: 70.0,
        rsi_low: 30.0,
    };

    fn flat(rsi: f64) -> SwingTick {
        SwingTick {
            rsi: Some(rsi),
            position_amt: 0.0,
            pnl: 0.0,
        }
    }

    fn short(rsi: f64, pnl: f64) -> SwingTick {
        SwingTick {
            rsi: Some(rsi),
            position_amt: -1.0,
            pnl,
        }
    }

    fn long(rsi: f64, pnl: f64) -> SwingTick {
        SwingTick {
            rsi: Some(rsi),
            position_amt: 1.0,
            pnl,
        }
    }

    #[test]
    fn short_entry_arms_then_fires() {
        let state = SwingState::default();

        // first sample only primes prev_rsi
        let (state, actions) = step(state, &CFG_SHORT, &flat(69.0));
        assert!(actions.is_empty());
        assert!(!state.armed_short_entry);

        let (state, actions) = step(state, &CFG_SHORT, &flat(71.0));
        assert!(actions.is_empty());
        assert!(state.armed_short_entry);

        let (state, actions) = step(state, &CFG_SHORT, &flat(69.0));
        assert_eq!(actions, vec![SwingAction::OpenShort]);
        assert!(!state.armed_short_entry);
        assert!(!state.armed_long_entry);
    }

    #[test]
    fn long_entry_arms_then_fires() {
        let state = SwingState::default();
        let (state, _) = step(state, &CFG_LONG, &flat(31.0));
        let (state, actions) = step(state, &CFG_LONG, &flat(29.0));
        assert!(actions.is_empty());
        assert!(state.armed_long_entry);

        let (state, actions) = step(state, &CFG_LONG, &flat(31.0));
        assert_eq!(actions, vec![SwingAction::OpenLong]);
        assert!(!state.armed_long_entry);
    }

    #[test]
    fn short_exit_requires_profit() {
        let state = SwingState::default();

        let (state, actions) = step(state, &CFG_SHORT, &short(31.0, -1.0));
        assert!(actions.is_empty());

        let (state, actions) = step(state, &CFG_SHORT, &short(29.0, -1.0));
        assert!(actions.is_empty());
        assert!(state.armed_short_exit);

        // crossing back up without profit must not fire, arm stays
        let (state, actions) = step(state, &CFG_SHORT, &short(31.0, 0.0));
        assert!(actions.is_empty());
        assert!(state.armed_short_exit);

        let (state, _) = step(state, &CFG_SHORT, &short(29.0, 0.0));
        let (state, actions) = step(state, &CFG_SHORT, &short(31.0, 0.01));
        assert_eq!(actions, vec![SwingAction::ClosePosition]);
        assert!(!state.armed_short_exit);
    }

    #[test]
    fn long_exit_is_symmetric_on_high_threshold() {
        let state = SwingState::default();
        let (state, _) = step(state, &CFG_LONG, &long(69.0, 1.0));
        let (state, actions) = step(state, &CFG_LONG, &long(71.0, 1.0));
        assert!(actions.is_empty());
        assert!(state.armed_long_exit);

        let (state, actions) = step(state, &CFG_LONG, &long(69.0, 1.0));
        assert_eq!(actions, vec![SwingAction::ClosePosition]);
        assert!(!state.armed_long_exit);
    }

    #[test]
    fn entry_arms_clear_when_a_position_appears() {
        let state = SwingState {
            prev_rsi: Some(71.0),
            armed_short_entry: true,
            ..Default::default()
        };

        let (state, actions) = step(state, &CFG_SHORT, &short(71.0, 0.0));
        assert!(actions.is_empty());
        assert!(!state.armed_short_entry);
        assert!(!state.armed_long_entry);
    }

    #[test]
    fn exit_fires_even_when_direction_forbids_the_side() {
        // long-only config, but a short position must still be exitable
        let state = SwingState::default();
        let (state, _) = step(state, &CFG_LONG, &short(31.0, 1.0));
        let (state, _) = step(state, &CFG_LONG, &short(29.0, 1.0));
        let (_, actions) = step(state, &CFG_LONG, &short(31.0, 1.0));
        assert_eq!(actions, vec![SwingAction::ClosePosition]);
    }

    #[test]
    fn null_or_non_finite_rsi_is_a_no_op() {
        let armed = SwingState {
            prev_rsi: Some(71.0),
            armed_short_entry: true,
            ..Default::default()
        };

        let (state, actions) = step(
            armed,
            &CFG_SHORT,
            &SwingTick {
                rsi: None,
                position_amt: 0.0,
                pnl: 0.0,
            },
        );
        assert!(actions.is_empty());
        assert_eq!(state, armed);

        let (state, actions) = step(
            armed,
            &CFG_SHORT,
            &SwingTick {
                rsi: Some(f64::NAN),
                position_amt: 0.0,
                pnl: 0.0,
            },
        );
        assert!(actions.is_empty());
        assert_eq!(state, armed);
    }

    #[test]
    fn step_is_deterministic() {
        let state = SwingState {
            prev_rsi: Some(71.0),
            armed_short_entry: true,
            ..Default::default()
        };
        let tick = flat(69.0);

        let a = step(state, &CFG_SHORT, &tick);
        let b = step(state, &CFG_SHORT, &tick);
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn never_opens_both_sides_in_one_step() {
        // sweep a grid of transitions on a both-direction config
        let cfg = SwingThresholds {
            direction: Direction::Both,
            rsi_high: 70.0,
            rsi_low: 30.0,
        };
        let samples = [10.0, 29.0, 31.0, 50.0, 69.0, 71.0, 90.0];
        for armed_short in [false, true] {
            for armed_long in [false, true] {
                for prev in samples {
                    for next in samples {
                        let state = SwingState {
                            prev_rsi: Some(prev),
                            armed_short_entry: armed_short,
                            armed_long_entry: armed_long,
                            ..Default::default()
                        };
                        let (_, actions) = step(state, &cfg, &flat(next));
                        assert!(actions.len() <= 1, "prev={prev} next={next}");
                        let opens = actions
                            .iter()
                            .filter(|a| {
                                matches!(a, SwingAction::OpenShort | SwingAction::OpenLong)
                            })
                            .count();
                        assert!(opens <= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn direction_gates_entries() {
        // short-only config never arms longs
        let state = SwingState::default();
        let (state, _) = step(state, &CFG_SHORT, &flat(31.0));
        let (state, _) = step(state, &CFG_SHORT, &flat(29.0));
        assert!(!state.armed_long_entry);
        let (_, actions) = step(state, &CFG_SHORT, &flat(31.0));
        assert!(actions.is_empty());
    }
}
