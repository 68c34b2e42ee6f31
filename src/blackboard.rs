use parking_lot::RwLock;
use std::{sync::Arc, time::Instant};

use pinctl_ranging::Distance;

/// Latest state shared between the ranging, indicator and watchdog tasks.
#[derive(Debug, Clone)]
pub struct State {
    pub distance: Option<Distance>,
    pub last_reading_ts: Instant,
    pub consecutive_misses: u32,
    pub duty: f64,
    pub faults: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            distance: None,
            last_reading_ts: Instant::now(),
            consecutive_misses: 0,
            duty: 0.0,
            faults: Vec::new(),
        }
    }
}

pub type Blackboard = Arc<RwLock<State>>;

pub fn snapshot(bb: &Blackboard) -> State {
    (*bb.read()).clone()
}

pub fn record_distance(bb: &Blackboard, distance: Distance) {
    let mut g = bb.write();
    g.distance = Some(distance);
    g.last_reading_ts = Instant::now();
    g.consecutive_misses = 0;
}

/// Counts a failed measurement and returns the current streak.
pub fn record_miss(bb: &Blackboard) -> u32 {
    let mut g = bb.write();
    g.last_reading_ts = Instant::now();
    g.consecutive_misses += 1;
    g.consecutive_misses
}

pub fn set_duty(bb: &Blackboard, duty: f64) {
    bb.write().duty = duty;
}

pub fn raise_fault(bb: &Blackboard, msg: &str) {
    let mut g = bb.write();
    if !g.faults.iter().any(|s| s == msg) {
        g.faults.push(msg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_resets_miss_streak() {
        let bb: Blackboard = Arc::default();
        assert_eq!(record_miss(&bb), 1);
        assert_eq!(record_miss(&bb), 2);

        record_distance(&bb, Distance::from_cm(42.0));
        let state = snapshot(&bb);
        assert_eq!(state.consecutive_misses, 0);
        assert_eq!(state.distance, Some(Distance::from_cm(42.0)));
    }

    #[test]
    fn test_faults_are_deduplicated() {
        let bb: Blackboard = Arc::default();
        raise_fault(&bb, "ranger stalled");
        raise_fault(&bb, "ranger stalled");
        assert_eq!(snapshot(&bb).faults, vec!["ranger stalled".to_string()]);
    }
}
