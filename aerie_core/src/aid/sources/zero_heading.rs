// aerie_core/src/aid/sources/zero_heading.rs

use nalgebra::Vector1;

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{fuse_axes, update_axes_status, AidContext, AidSource};
use crate::nav::{NavAxis, NavigationFilter};
use crate::params::EstimatorParams;
use crate::types::Sample;

pub const ZERO_HEADING_INTERVAL_US: u64 = 200_000;

/// Observation variance once the tilt is aligned, in rad^2.
const OBS_VAR_ALIGNED: f64 = 0.25;
/// Observation variance during initial alignment, in rad^2.
const OBS_VAR_ALIGNING: f64 = 0.001;
/// Below this much heading variance a zero innovation carries no information.
const MIN_HEADING_VAR: f64 = 0.01 * 0.01;

const AXES: [NavAxis; 1] = [NavAxis::Yaw];

/// Fuses the current heading as its own observation (zero innovation).
///
/// Used at rest or whenever nothing observes heading, to keep the heading
/// variance from growing without bound.
#[derive(Debug, Clone, Default)]
pub struct ZeroHeading;

impl AidSource<1> for ZeroHeading {
    type Payload = f64;

    fn name(&self) -> &'static str {
        "zero heading"
    }

    fn is_active(&self, flags: &ControlStatusFlags) -> bool {
        flags.zero_heading
    }

    fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
        flags.zero_heading = active;
    }

    fn fusion_interval_us(&self, _params: &EstimatorParams) -> Option<u64> {
        Some(ZERO_HEADING_INTERVAL_US)
    }

    fn fusion_timeout_us(&self, _params: &EstimatorParams) -> Option<u64> {
        None
    }

    fn synthesize(
        &mut self,
        nav: &dyn NavigationFilter,
        _flags: &ControlStatusFlags,
        cx: &AidContext,
    ) -> Option<Sample<f64>> {
        Some(Sample::new(cx.time_us, nav.observe(NavAxis::Yaw).0))
    }

    fn continuing_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<f64>,
    ) -> bool {
        !flags.is_yaw_aiding_active() || flags.vehicle_at_rest
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        flags: &ControlStatusFlags,
        sample: &Sample<f64>,
        status: &mut AidSourceStatus<1>,
    ) {
        let obs_var = if flags.tilt_align {
            OBS_VAR_ALIGNED
        } else {
            OBS_VAR_ALIGNING
        };

        update_axes_status(
            nav,
            &AXES,
            sample.time_us,
            Vector1::new(sample.payload),
            Vector1::new(obs_var),
            cx.params.heading_gate.max(1.0),
            status,
        );
    }

    fn fuse(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        status: &AidSourceStatus<1>,
    ) -> bool {
        let heading_var = status.innovation_variance[0] - status.observation_variance[0];
        if flags.tilt_align && heading_var <= MIN_HEADING_VAR {
            return false;
        }
        fuse_axes(nav, &AXES, status)
    }

    fn reset(
        &mut self,
        _nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<f64>,
        _status: &AidSourceStatus<1>,
    ) {
    }
}
