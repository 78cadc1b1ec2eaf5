// aerie_core/src/estimation/hysteresis.rs

use crate::types::TimeUs;

/// A boolean that only changes after the requested state has been held long enough.
#[derive(Debug, Clone, Copy)]
pub struct Hysteresis {
    state: bool,
    requested_state: bool,
    last_time_to_change_state: TimeUs,
    time_from_true_us: u64,
    time_from_false_us: u64,
}

impl Hysteresis {
    pub fn new(initial_state: bool) -> Self {
        Self {
            state: initial_state,
            requested_state: initial_state,
            last_time_to_change_state: 0,
            time_from_true_us: 0,
            time_from_false_us: 0,
        }
    }

    /// Sets how long `from_state` must be contradicted before the output flips.
    pub fn set_hysteresis_time_from(&mut self, from_state: bool, time_us: u64) {
        if from_state {
            self.time_from_true_us = time_us;
        } else {
            self.time_from_false_us = time_us;
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn set_state_and_update(&mut self, new_state: bool, now_us: TimeUs) {
        if new_state != self.state {
            if new_state != self.requested_state {
                self.requested_state = new_state;
                self.last_time_to_change_state = now_us;
            }
        } else {
            self.requested_state = self.state;
        }

        self.update(now_us);
    }

    pub fn update(&mut self, now_us: TimeUs) {
        if self.requested_state == self.state {
            return;
        }

        let elapsed = now_us.saturating_sub(self.last_time_to_change_state);
        let required = if self.state {
            self.time_from_true_us
        } else {
            self.time_from_false_us
        };

        if elapsed >= required {
            self.state = self.requested_state;
        }
    }
}
