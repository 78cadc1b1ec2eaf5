// aerie_core/src/aid/sources/fake_height.rs

use nalgebra::Vector1;

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{fuse_axes, update_axes_status, AidContext, AidSource};
use crate::nav::{NavAxis, NavigationFilter};
use crate::params::EstimatorParams;
use crate::types::Sample;

/// Evaluated at most once per interval.
pub const FAKE_HGT_INTERVAL_US: u64 = 200_000;
/// Twice the fusion interval.
pub const FAKE_HGT_TIMEOUT_US: u64 = 400_000;
const FAKE_HGT_GATE: f64 = 3.0;

const AXES: [NavAxis; 1] = [NavAxis::PosD];

/// Holds the last known down position while nothing else constrains height,
/// so the vertical states cannot drift away while dead reckoning.
#[derive(Debug, Clone, Default)]
pub struct FakeHeight;

impl FakeHeight {
    fn reseed(nav: &mut dyn NavigationFilter, cx: &AidContext) {
        let variance = cx.params.noaid_noise.powi(2);
        nav.reset_axis(NavAxis::PosD, cx.last_known_pos_d, variance);
        nav.reset_axis(NavAxis::VelD, 0.0, variance);
    }
}

impl AidSource<1> for FakeHeight {
    type Payload = f64;

    fn name(&self) -> &'static str {
        "fake height"
    }

    fn is_active(&self, flags: &ControlStatusFlags) -> bool {
        flags.fake_hgt
    }

    fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
        flags.fake_hgt = active;
    }

    fn fusion_interval_us(&self, _params: &EstimatorParams) -> Option<u64> {
        Some(FAKE_HGT_INTERVAL_US)
    }

    fn fusion_timeout_us(&self, _params: &EstimatorParams) -> Option<u64> {
        Some(FAKE_HGT_TIMEOUT_US)
    }

    fn synthesize(
        &mut self,
        _nav: &dyn NavigationFilter,
        _flags: &ControlStatusFlags,
        cx: &AidContext,
    ) -> Option<Sample<f64>> {
        Some(Sample::new(cx.time_us, cx.last_known_pos_d))
    }

    fn continuing_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<f64>,
    ) -> bool {
        !flags.is_vertical_aiding_active()
    }

    fn starting_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<f64>,
    ) -> bool {
        cx.vertical_dead_reckon_exceeded
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<f64>,
        status: &mut AidSourceStatus<1>,
    ) {
        update_axes_status(
            nav,
            &AXES,
            sample.time_us,
            Vector1::new(sample.payload),
            Vector1::new(cx.params.noaid_noise.powi(2)),
            FAKE_HGT_GATE,
            status,
        );
    }

    fn fuse(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        status: &AidSourceStatus<1>,
    ) -> bool {
        fuse_axes(nav, &AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<f64>,
        _status: &AidSourceStatus<1>,
    ) {
        Self::reseed(nav, cx);
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<f64>,
        _status: &AidSourceStatus<1>,
    ) {
        Self::reseed(nav, cx);
    }
}
