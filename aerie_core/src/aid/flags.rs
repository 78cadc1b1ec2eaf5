// aerie_core/src/aid/flags.rs

use serde::Serialize;

/// The activation state shared by every aiding source of one estimator instance.
///
/// Only the controllers write the per-source bits, and only on start/stop
/// transitions. Everything else in the estimator reads them to decide which
/// outputs are currently trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControlStatusFlags {
    // --- Aiding Sources ---
    pub ev_pos: bool,
    pub ev_vel: bool,
    pub ev_yaw: bool,
    pub ev_hgt: bool,
    pub gnss_hgt: bool,
    pub fake_hgt: bool,
    pub gravity_vector: bool,
    pub zero_heading: bool,

    // --- Vehicle & Filter Condition ---
    pub tilt_align: bool,
    pub yaw_align: bool,
    pub vehicle_at_rest: bool,
    pub in_air: bool,
}

impl ControlStatusFlags {
    pub fn is_horizontal_aiding_active(&self) -> bool {
        self.ev_pos || self.ev_vel
    }

    pub fn is_vertical_aiding_active(&self) -> bool {
        self.ev_hgt || self.gnss_hgt || self.ev_vel
    }

    pub fn is_yaw_aiding_active(&self) -> bool {
        self.ev_yaw
    }

    /// True when `own_flag` is set and no other vertical position source is.
    pub fn is_only_vertical_position_source(&self, own_flag: bool) -> bool {
        let count = [self.ev_hgt, self.gnss_hgt, self.fake_hgt]
            .iter()
            .filter(|active| **active)
            .count();
        own_flag && count == 1
    }
}
