// aerie_core/src/aid/sources/gnss_height.rs

use nalgebra::Vector1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{fuse_axes, update_axes_status, AidContext, AidSource};
use crate::estimation::bias::BiasEstimator;
use crate::nav::{NavAxis, NavigationFilter};
use crate::params::{EstimatorParams, HeightRef};
use crate::types::{is_timed_out, Finite, Sample, TimeUs};

/// How long the receiver checks must have held (or failed) to count.
pub const GNSS_CHECKS_PERIOD_US: u64 = 5_000_000;
/// Typical ratio of vertical to horizontal accuracy.
const VACC_RATIO: f64 = 1.5;
const GPS_VEL_NOISE: f64 = 0.3;

const AXES: [NavAxis; 1] = [NavAxis::PosD];

/// One GNSS fix, reduced to what the height source uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GnssSample {
    /// Altitude above mean sea level, in m.
    pub height: f64,
    /// Vertical position accuracy (1-sigma), in m.
    pub vacc: f64,
    /// NED down velocity, in m/s.
    pub vel_d: f64,
    /// Speed accuracy (1-sigma), in m/s.
    pub sacc: f64,
    pub fix_type: u8,
}

impl Finite for GnssSample {
    fn is_finite(&self) -> bool {
        self.height.is_finite() && self.vacc.is_finite() && self.vel_d.is_finite() && self.sacc.is_finite()
    }
}

/// Fuses GNSS altitude as NED down position, corrected by an estimated bias
/// whenever GNSS is not the height reference.
#[derive(Debug, Clone)]
pub struct GnssHeight {
    bias: BiasEstimator,
    origin_alt: Option<f64>,

    time_last_pass_us: TimeUs,
    time_last_fail_us: TimeUs,
    time_last_bias_predict_us: Option<TimeUs>,
    last_bias_sample_us: Option<TimeUs>,

    /// Height above origin and its variance, from the last evaluated sample.
    measurement: f64,
    measurement_var: f64,
}

impl Default for GnssHeight {
    fn default() -> Self {
        Self {
            bias: BiasEstimator::default(),
            origin_alt: None,
            time_last_pass_us: 0,
            time_last_fail_us: 0,
            time_last_bias_predict_us: None,
            last_bias_sample_us: None,
            measurement: 0.0,
            measurement_var: 0.0,
        }
    }
}

impl GnssHeight {
    pub fn bias_estimator(&self) -> &BiasEstimator {
        &self.bias
    }

    /// Variance of the last evaluated height measurement, before the bias variance.
    pub fn measurement_var(&self) -> f64 {
        self.measurement_var
    }

    /// Altitude of the local origin, set from the first good fix.
    pub fn origin_alt(&self) -> Option<f64> {
        self.origin_alt
    }

    /// The receiver checks have not failed for a full check period.
    pub fn checks_passing(&self, now_us: TimeUs) -> bool {
        is_timed_out(self.time_last_fail_us, GNSS_CHECKS_PERIOD_US, now_us)
    }

    /// The receiver checks have not passed for a full check period.
    pub fn checks_failing(&self, now_us: TimeUs) -> bool {
        is_timed_out(self.time_last_pass_us, GNSS_CHECKS_PERIOD_US, now_us)
    }

    fn update_bias(&mut self, nav: &dyn NavigationFilter, cx: &AidContext, sample: &Sample<GnssSample>) {
        if self.last_bias_sample_us == Some(sample.time_us) {
            return;
        }
        self.last_bias_sample_us = Some(sample.time_us);

        if let Some(last) = self.time_last_bias_predict_us {
            let dt = sample.time_us.saturating_sub(last) as f64 * 1e-6;
            self.bias.predict(dt);
        }
        self.time_last_bias_predict_us = Some(sample.time_us);

        if !(self.checks_passing(sample.time_us) && !self.checks_failing(sample.time_us)) {
            return;
        }

        let (pos_d, pos_d_var) = nav.observe(NavAxis::PosD);
        self.bias.set_max_state_noise(self.measurement_var.sqrt());
        self.bias
            .set_process_noise_spectral_density(cx.params.gps_hgt_bias_nsd);

        if let Err(err) = self
            .bias
            .fuse_bias(self.measurement + pos_d, self.measurement_var + pos_d_var)
        {
            debug!(source = self.name(), %err, "skipping bias update");
        }
    }
}

impl AidSource<1> for GnssHeight {
    type Payload = GnssSample;

    fn name(&self) -> &'static str {
        "GNSS height"
    }

    fn is_active(&self, flags: &ControlStatusFlags) -> bool {
        flags.gnss_hgt
    }

    fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
        flags.gnss_hgt = active;
    }

    fn max_sample_interval_us(&self, params: &EstimatorParams) -> u64 {
        2 * params.gnss_max_interval_us
    }

    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64> {
        Some(params.hgt_fusion_timeout_us)
    }

    fn has_quality_channel(&self) -> bool {
        true
    }

    fn quality_sufficient(&self, params: &EstimatorParams, payload: &GnssSample) -> bool {
        payload.fix_type >= 3 && payload.vacc <= params.gps_vacc_max
    }

    fn continuing_conditions(
        &self,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<GnssSample>,
    ) -> bool {
        self.origin_alt.is_some()
    }

    fn starting_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<GnssSample>,
    ) -> bool {
        self.checks_passing(cx.time_us) && !self.checks_failing(cx.time_us)
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        flags: &ControlStatusFlags,
        sample: &Sample<GnssSample>,
        status: &mut AidSourceStatus<1>,
    ) {
        let gnss = &sample.payload;
        let (pos_d, _) = nav.observe(NavAxis::PosD);

        if self.quality_sufficient(cx.params, gnss) {
            self.time_last_pass_us = sample.time_us;
            if self.origin_alt.is_none() {
                // the origin sits where the current state says we are
                self.origin_alt = Some(gnss.height + pos_d);
            }
        } else {
            self.time_last_fail_us = sample.time_us;
        }

        let origin_alt = self.origin_alt.unwrap_or(gnss.height + pos_d);
        self.measurement = gnss.height - origin_alt;
        let mut noise = gnss.vacc.max(VACC_RATIO * cx.params.gps_pos_noise);
        if !flags.is_only_vertical_position_source(flags.gnss_hgt) {
            // capped unless GNSS alone holds the height
            noise = noise.min(cx.params.noaid_noise);
        }
        self.measurement_var = noise.powi(2);

        // GNSS height is positive up, the state is positive down
        update_axes_status(
            nav,
            &AXES,
            sample.time_us,
            Vector1::new(-(self.measurement - self.bias.bias())),
            Vector1::new(self.measurement_var + self.bias.bias_var()),
            cx.params.gps_pos_gate.max(1.0),
            status,
        );

        // the bias is updated only after its current value went into the innovation
        self.update_bias(nav, cx, sample);
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
        _sample: &Sample<GnssSample>,
        _status: &AidSourceStatus<1>,
    ) {
        if cx.params.height_ref == HeightRef::Gnss {
            debug!(source = self.name(), "resetting height to GNSS");
            nav.reset_axis(NavAxis::PosD, -self.measurement, self.measurement_var);
            self.bias.reset();
        } else {
            let (pos_d, _) = nav.observe(NavAxis::PosD);
            self.bias.set_bias(pos_d + self.measurement);
        }

        self.bias.set_fusion_active(true);
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        sample: &Sample<GnssSample>,
        _status: &AidSourceStatus<1>,
    ) {
        nav.reset_axis(
            NavAxis::PosD,
            -(self.measurement - self.bias.bias()),
            self.measurement_var,
        );
        let (pos_d, _) = nav.observe(NavAxis::PosD);
        self.bias.set_bias(pos_d + self.measurement);

        let vel_var = (VACC_RATIO * sample.payload.sacc).max(GPS_VEL_NOISE).powi(2);
        nav.reset_axis(NavAxis::VelD, sample.payload.vel_d, vel_var);
    }

    fn stop(&mut self, _flags: &mut ControlStatusFlags) {
        self.bias.set_fusion_active(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::controller::AidSourceController;
    use crate::aid::Transition;
    use crate::nav::decoupled::DecoupledNavFilter;
    use crate::nav::ImuSample;
    use approx::assert_abs_diff_eq;

    fn fix(time_us: TimeUs, height: f64) -> Sample<GnssSample> {
        Sample::new(
            time_us,
            GnssSample {
                height,
                vacc: 0.5,
                vel_d: -0.2,
                sacc: 0.1,
                fix_type: 3,
            },
        )
    }

    struct Harness {
        controller: AidSourceController<GnssHeight, 1>,
        nav: DecoupledNavFilter,
        flags: ControlStatusFlags,
        params: EstimatorParams,
        imu: ImuSample,
    }

    impl Harness {
        fn new(height_ref: HeightRef) -> Self {
            let params = EstimatorParams {
                height_ref,
                ..Default::default()
            };
            Self {
                controller: AidSourceController::buffered(GnssHeight::default(), 8, 100_000).unwrap(),
                nav: DecoupledNavFilter::default(),
                flags: ControlStatusFlags::default(),
                params,
                imu: ImuSample::at_rest(),
            }
        }

        /// Feeds 5 Hz fixes and evaluates each at its own timestamp.
        fn run(&mut self, from_us: TimeUs, to_us: TimeUs, height: f64) -> Vec<Transition> {
            let mut transitions = Vec::new();
            let mut time_us = from_us;
            while time_us <= to_us {
                self.controller.push(fix(time_us, height)).unwrap();
                let cx = AidContext {
                    time_us,
                    params: &self.params,
                    imu: &self.imu,
                    vertical_dead_reckon_exceeded: false,
                    last_known_pos_d: 0.0,
                };
                transitions.push(self.controller.update(&mut self.nav, &mut self.flags, &cx));
                time_us += 200_000;
            }
            transitions
        }
    }

    #[test]
    fn test_quality_channel() {
        let params = EstimatorParams::default();
        let source = GnssHeight::default();
        let mut sample = fix(0, 100.0).payload;
        assert!(source.quality_sufficient(&params, &sample));

        sample.fix_type = 2;
        assert!(!source.quality_sufficient(&params, &sample));

        sample.fix_type = 3;
        sample.vacc = params.gps_vacc_max + 1.0;
        assert!(!source.quality_sufficient(&params, &sample));
    }

    #[test]
    fn test_waits_for_checks_period_before_starting() {
        let mut h = Harness::new(HeightRef::Gnss);
        let transitions = h.run(200_000, 5_000_000, 100.0);
        assert!(transitions.iter().all(|t| *t == Transition::Idle));
        assert!(h.controller.predicates().continuing);
        assert!(!h.controller.predicates().source_starting);
        assert_eq!(h.controller.source().origin_alt(), Some(100.0));

        let transitions = h.run(5_200_000, 5_200_000, 100.0);
        assert_eq!(transitions, vec![Transition::Started]);
        assert!(h.flags.gnss_hgt);
        assert!(h.controller.source().bias_estimator().is_fusion_active());
    }

    #[test]
    fn test_start_as_reference_resets_height() {
        let mut h = Harness::new(HeightRef::Gnss);
        h.run(200_000, 5_000_000, 100.0);
        // the vehicle climbed while nothing was constraining the height
        h.nav.reset_axis(NavAxis::PosD, 7.0, 100.0);

        h.run(5_200_000, 5_200_000, 103.0);
        assert!(h.flags.gnss_hgt);
        assert_abs_diff_eq!(h.nav.observe(NavAxis::PosD).0, -3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(h.controller.source().bias_estimator().bias(), 0.0);
    }

    #[test]
    fn test_start_as_secondary_initialises_bias() {
        let mut h = Harness::new(HeightRef::Vision);
        h.run(200_000, 5_000_000, 100.0);
        h.nav.reset_axis(NavAxis::PosD, -1.0, 1e-4);

        h.run(5_200_000, 5_200_000, 103.0);
        assert!(h.flags.gnss_hgt);
        // height above origin is 3 m while the state says 1 m
        assert_abs_diff_eq!(h.controller.source().bias_estimator().bias(), 2.0, epsilon = 1e-6);
        assert!(h.controller.status().innovation[0].abs() < 1e-6);
    }

    #[test]
    fn test_timeout_reseeds_height_and_velocity() {
        let mut h = Harness::new(HeightRef::Gnss);
        h.run(200_000, 5_200_000, 100.0);
        assert!(h.flags.gnss_hgt);

        // a jump the gate rejects until the fusion timeout expires
        let transitions = h.run(5_400_000, 11_000_000, 140.0);
        assert!(transitions.contains(&Transition::Reset));
        assert!(h.flags.gnss_hgt);
        assert_abs_diff_eq!(h.nav.observe(NavAxis::PosD).0, -40.0, epsilon = 0.5);
        assert_abs_diff_eq!(h.nav.observe(NavAxis::VelD).0, -0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_noise_capped_when_another_height_source_is_active() {
        let params = EstimatorParams {
            gps_vacc_max: 20.0,
            noaid_noise: 10.0,
            ..Default::default()
        };
        let nav = DecoupledNavFilter::default();
        let imu = ImuSample::at_rest();
        let cx = AidContext {
            time_us: 200_000,
            params: &params,
            imu: &imu,
            vertical_dead_reckon_exceeded: false,
            last_known_pos_d: 0.0,
        };
        let mut sample = fix(200_000, 100.0);
        sample.payload.vacc = 15.0;

        let mut source = GnssHeight::default();
        let mut status = AidSourceStatus::default();

        let flags = ControlStatusFlags {
            ev_hgt: true,
            ..Default::default()
        };
        source.update_status(&nav, &cx, &flags, &sample, &mut status);
        assert_abs_diff_eq!(source.measurement_var(), 100.0);

        // GNSS as the only vertical position source keeps its own accuracy
        let flags = ControlStatusFlags {
            gnss_hgt: true,
            ..Default::default()
        };
        source.update_status(&nav, &cx, &flags, &sample, &mut status);
        assert_abs_diff_eq!(source.measurement_var(), 225.0);
    }
}
