// aerie_core/src/estimator.rs

//! The per-cycle pass: propagate the navigation filter to the fusion horizon,
//! then let every aiding source decide whether to start, continue or stop.

use serde::Serialize;
use tracing::debug;

use crate::aid::controller::{AidSourceController, TransitionCounters};
use crate::aid::flags::ControlStatusFlags;
use crate::aid::sources::{
    FakeHeight, GnssHeight, GnssSample, GravityVector, VisionHeight, VisionPosition,
    VisionSample, VisionVelocity, VisionYaw, ZeroHeading,
};
use crate::aid::status::AidSourceStatus;
use crate::aid::{AidContext, AidSource, Transition};
use crate::buffer::DelayedBuffer;
use crate::error::{BufferError, EstimatorError};
use crate::estimation::hysteresis::Hysteresis;
use crate::nav::decoupled::DecoupledNavFilter;
use crate::nav::{ImuSample, NavAxis, NavState, NavigationFilter};
use crate::params::{ev_ctrl, EstimatorParams};
use crate::types::{is_timed_out, Sample, TimeUs, ONE_G};

/// Initial variances of the default navigation filter.
const INITIAL_POSITION_VAR: f64 = 100.0;
const INITIAL_VELOCITY_VAR: f64 = 25.0;
const INITIAL_ATTITUDE_VAR: f64 = 0.25;

/// One line of the per-source summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceSummary {
    pub name: &'static str,
    pub active: bool,
    pub test_ratio: f64,
    pub time_last_fuse: TimeUs,
    pub counters: TransitionCounters,
}

/// The transitions of one cycle, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleTransitions {
    pub gravity: Transition,
    pub ev_hgt: Transition,
    pub ev_vel: Transition,
    pub ev_yaw: Transition,
    pub ev_pos: Transition,
    pub gnss_hgt: Transition,
    pub fake_hgt: Transition,
    pub zero_heading: Transition,
}

/// One complete estimator instance.
///
/// Owns its navigation filter, activation flags, buffers and controllers;
/// nothing is shared between instances, so a clone is a fully independent
/// redundant estimator.
#[derive(Debug, Clone)]
pub struct AidingEstimator {
    params: EstimatorParams,
    nav: Box<dyn NavigationFilter>,
    flags: ControlStatusFlags,

    imu_buffer: DelayedBuffer<ImuSample>,
    imu_delayed: Option<Sample<ImuSample>>,
    at_rest: Hysteresis,
    time_last_ver_aid_us: TimeUs,
    last_known_pos_d: f64,
    last_transitions: Option<CycleTransitions>,

    // --- Aiding Sources (in evaluation order) ---
    gravity: AidSourceController<GravityVector, 2>,
    ev_hgt: AidSourceController<VisionHeight, 1>,
    ev_vel: AidSourceController<VisionVelocity, 3>,
    ev_yaw: AidSourceController<VisionYaw, 1>,
    ev_pos: AidSourceController<VisionPosition, 2>,
    gnss_hgt: AidSourceController<GnssHeight, 1>,
    fake_hgt: AidSourceController<FakeHeight, 1>,
    zero_heading: AidSourceController<ZeroHeading, 1>,
}

impl AidingEstimator {
    /// Creates an estimator around the default decoupled navigation filter.
    pub fn new(params: EstimatorParams) -> Result<Self, EstimatorError> {
        let nav = DecoupledNavFilter::new(
            params.nav_noise,
            INITIAL_POSITION_VAR,
            INITIAL_VELOCITY_VAR,
            INITIAL_ATTITUDE_VAR,
        );
        Self::with_filter(params, Box::new(nav))
    }

    pub fn with_filter(
        params: EstimatorParams,
        nav: Box<dyn NavigationFilter>,
    ) -> Result<Self, EstimatorError> {
        let window = params.sample_accept_window_us;
        let obs_len = params.obs_buffer_len;

        let mut at_rest = Hysteresis::new(false);
        at_rest.set_hysteresis_time_from(false, params.at_rest_time_us);

        Ok(Self {
            imu_buffer: DelayedBuffer::allocate(params.imu_buffer_len, window)?,
            imu_delayed: None,
            at_rest,
            time_last_ver_aid_us: 0,
            last_known_pos_d: 0.0,
            last_transitions: None,

            gravity: AidSourceController::synthesized(GravityVector),
            ev_hgt: AidSourceController::buffered(VisionHeight, obs_len, window)?,
            ev_vel: AidSourceController::buffered(VisionVelocity, obs_len, window)?,
            ev_yaw: AidSourceController::buffered(VisionYaw, obs_len, window)?,
            ev_pos: AidSourceController::buffered(VisionPosition, obs_len, window)?,
            gnss_hgt: AidSourceController::buffered(GnssHeight::default(), obs_len, window)?,
            fake_hgt: AidSourceController::synthesized(FakeHeight),
            zero_heading: AidSourceController::synthesized(ZeroHeading),

            nav,
            flags: ControlStatusFlags::default(),
            params,
        })
    }

    // --- Inputs ---

    /// Runs one cycle for a new IMU sample.
    ///
    /// Returns `Ok(false)` when no delayed IMU sample was due at the horizon,
    /// in which case nothing else happened this cycle.
    pub fn update(&mut self, imu: Sample<ImuSample>) -> Result<bool, EstimatorError> {
        self.imu_buffer.push(imu)?;

        let horizon_us = imu.time_us.saturating_sub(self.params.fusion_delay_us);
        let Some(delayed) = self.imu_buffer.pop_first_older_than(horizon_us) else {
            return Ok(false);
        };

        let dt = self
            .imu_delayed
            .map_or(0.0, |prev| delayed.time_us.saturating_sub(prev.time_us) as f64 * 1e-6);
        self.nav.predict(&delayed.payload, dt);
        self.imu_delayed = Some(delayed);

        self.update_at_rest(&delayed.payload, delayed.time_us);
        self.last_transitions = Some(self.run_aiding(delayed.time_us, &delayed.payload));

        Ok(true)
    }

    pub fn push_vision(&mut self, sample: Sample<VisionSample>) -> Result<(), BufferError> {
        self.ev_hgt.push(sample)?;
        self.ev_vel.push(sample)?;
        self.ev_yaw.push(sample)?;
        self.ev_pos.push(sample)
    }

    pub fn push_gnss(&mut self, sample: Sample<GnssSample>) -> Result<(), BufferError> {
        self.gnss_hgt.push(sample)
    }

    pub fn set_in_air(&mut self, in_air: bool) {
        self.flags.in_air = in_air;
    }

    /// Applies new parameters. Buffers whose capacity changed are re-created empty.
    ///
    /// Every replacement buffer is allocated before anything is swapped, so a
    /// rejected change leaves the estimator exactly as it was. Vision channels
    /// masked out of `ev_ctrl` stop immediately. The navigation filter keeps
    /// the process noise it was constructed with.
    pub fn set_params(&mut self, params: EstimatorParams) -> Result<(), EstimatorError> {
        let window = params.sample_accept_window_us;
        let obs_len = params.obs_buffer_len;

        let imu_buffer = if params.imu_buffer_len != self.imu_buffer.capacity() {
            Some(DelayedBuffer::allocate(params.imu_buffer_len, window)?)
        } else {
            None
        };
        let ev_hgt = self.ev_hgt.allocate_resized(obs_len, window)?;
        let ev_vel = self.ev_vel.allocate_resized(obs_len, window)?;
        let ev_yaw = self.ev_yaw.allocate_resized(obs_len, window)?;
        let ev_pos = self.ev_pos.allocate_resized(obs_len, window)?;
        let gnss_hgt = self.gnss_hgt.allocate_resized(obs_len, window)?;

        // --- Commit ---
        if let Some(buffer) = imu_buffer {
            debug!(capacity = params.imu_buffer_len, "reallocating IMU buffer");
            self.imu_buffer = buffer;
        }
        self.imu_buffer.set_accept_window_us(window);

        self.ev_hgt.commit_resized(ev_hgt, window);
        self.ev_vel.commit_resized(ev_vel, window);
        self.ev_yaw.commit_resized(ev_yaw, window);
        self.ev_pos.commit_resized(ev_pos, window);
        self.gnss_hgt.commit_resized(gnss_hgt, window);

        if !params.ev_ctrl_enabled(ev_ctrl::VPOS) {
            self.ev_hgt.stop(&mut self.flags);
        }
        if !params.ev_ctrl_enabled(ev_ctrl::VEL) {
            self.ev_vel.stop(&mut self.flags);
        }
        if !params.ev_ctrl_enabled(ev_ctrl::YAW) {
            self.ev_yaw.stop(&mut self.flags);
        }
        if !params.ev_ctrl_enabled(ev_ctrl::HPOS) {
            self.ev_pos.stop(&mut self.flags);
        }

        self.at_rest
            .set_hysteresis_time_from(false, params.at_rest_time_us);
        self.params = params;
        Ok(())
    }

    // --- Accessors ---

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    pub fn flags(&self) -> &ControlStatusFlags {
        &self.flags
    }

    pub fn nav(&self) -> &dyn NavigationFilter {
        self.nav.as_ref()
    }

    pub fn nav_state(&self) -> NavState {
        self.nav.state()
    }

    /// Timestamp of the fusion horizon, once the first delayed sample was processed.
    pub fn time_delayed_us(&self) -> Option<TimeUs> {
        self.imu_delayed.map(|s| s.time_us)
    }

    /// What every source did in the most recent cycle.
    pub fn last_transitions(&self) -> Option<&CycleTransitions> {
        self.last_transitions.as_ref()
    }

    pub fn gravity(&self) -> &AidSourceController<GravityVector, 2> {
        &self.gravity
    }

    pub fn ev_hgt(&self) -> &AidSourceController<VisionHeight, 1> {
        &self.ev_hgt
    }

    pub fn ev_vel(&self) -> &AidSourceController<VisionVelocity, 3> {
        &self.ev_vel
    }

    pub fn ev_yaw(&self) -> &AidSourceController<VisionYaw, 1> {
        &self.ev_yaw
    }

    pub fn ev_pos(&self) -> &AidSourceController<VisionPosition, 2> {
        &self.ev_pos
    }

    pub fn gnss_hgt(&self) -> &AidSourceController<GnssHeight, 1> {
        &self.gnss_hgt
    }

    pub fn fake_hgt(&self) -> &AidSourceController<FakeHeight, 1> {
        &self.fake_hgt
    }

    pub fn zero_heading(&self) -> &AidSourceController<ZeroHeading, 1> {
        &self.zero_heading
    }

    /// Diagnostic summary of every source, in evaluation order.
    pub fn source_summaries(&self) -> Vec<SourceSummary> {
        vec![
            summarize(&self.gravity, &self.flags),
            summarize(&self.ev_hgt, &self.flags),
            summarize(&self.ev_vel, &self.flags),
            summarize(&self.ev_yaw, &self.flags),
            summarize(&self.ev_pos, &self.flags),
            summarize(&self.gnss_hgt, &self.flags),
            summarize(&self.fake_hgt, &self.flags),
            summarize(&self.zero_heading, &self.flags),
        ]
    }

    // --- Private Helper Methods ---

    fn update_at_rest(&mut self, imu: &ImuSample, time_us: TimeUs) {
        let still = !self.flags.in_air
            && imu.gyro.norm() < self.params.at_rest_gyro_max
            && (imu.accel.norm() - ONE_G).abs() < self.params.at_rest_accel_dev_max;

        self.at_rest.set_state_and_update(still, time_us);
        self.flags.vehicle_at_rest = self.at_rest.state();
    }

    fn run_aiding(&mut self, time_us: TimeUs, imu: &ImuSample) -> CycleTransitions {
        if self.flags.is_vertical_aiding_active() {
            self.last_known_pos_d = self.nav.observe(NavAxis::PosD).0;
        }

        let cx = AidContext {
            time_us,
            params: &self.params,
            imu,
            vertical_dead_reckon_exceeded: is_timed_out(
                self.time_last_ver_aid_us,
                self.params.no_aid_timeout_us,
                time_us,
            ),
            last_known_pos_d: self.last_known_pos_d,
        };

        let nav = self.nav.as_mut();
        let flags = &mut self.flags;

        let transitions = CycleTransitions {
            gravity: self.gravity.update(nav, flags, &cx),
            ev_hgt: self.ev_hgt.update(nav, flags, &cx),
            ev_vel: self.ev_vel.update(nav, flags, &cx),
            ev_yaw: self.ev_yaw.update(nav, flags, &cx),
            ev_pos: self.ev_pos.update(nav, flags, &cx),
            gnss_hgt: self.gnss_hgt.update(nav, flags, &cx),
            fake_hgt: self.fake_hgt.update(nav, flags, &cx),
            zero_heading: self.zero_heading.update(nav, flags, &cx),
        };

        let vertical_fuse_times = [
            (self.flags.ev_hgt, self.ev_hgt.status().time_last_fuse),
            (self.flags.gnss_hgt, self.gnss_hgt.status().time_last_fuse),
            (self.flags.ev_vel, self.ev_vel.status().time_last_fuse),
        ];
        for (active, time_last_fuse) in vertical_fuse_times {
            if active {
                self.time_last_ver_aid_us = self.time_last_ver_aid_us.max(time_last_fuse);
            }
        }

        transitions
    }
}

fn summarize<S: AidSource<N>, const N: usize>(
    controller: &AidSourceController<S, N>,
    flags: &ControlStatusFlags,
) -> SourceSummary {
    let status: &AidSourceStatus<N> = controller.status();
    SourceSummary {
        name: controller.source().name(),
        active: controller.source().is_active(flags),
        test_ratio: status.test_ratio,
        time_last_fuse: status.time_last_fuse,
        counters: *controller.counters(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    const IMU_DT_US: TimeUs = 4_000;
    const VISION_PERIOD_US: TimeUs = 48_000;

    fn still_vision() -> VisionSample {
        VisionSample {
            position: Vector3::new(1.0, 2.0, -3.0),
            velocity: Vector3::zeros(),
            yaw: 0.3,
            position_var: Vector3::repeat(0.01),
            velocity_var: Vector3::repeat(0.01),
            yaw_var: 0.01,
            quality: 100,
        }
    }

    /// Drives the estimator with a stationary IMU in `[from_us, to_us)`.
    fn run(estimator: &mut AidingEstimator, from_us: TimeUs, to_us: TimeUs, vision: bool) {
        let mut time_us = from_us;
        while time_us < to_us {
            if vision && time_us % VISION_PERIOD_US == 0 {
                estimator
                    .push_vision(Sample::new(time_us, still_vision()))
                    .unwrap();
            }
            estimator
                .update(Sample::new(time_us, ImuSample::at_rest()))
                .unwrap();
            time_us += IMU_DT_US;
        }
    }

    #[test]
    fn test_horizon_trails_newest_imu_by_fusion_delay() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 400_000, false);

        // last IMU at 396 ms, horizon at 296 ms
        assert_eq!(estimator.time_delayed_us(), Some(296_000));
    }

    #[test]
    fn test_no_aiding_levels_and_holds_height() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 3_000_000, false);

        let flags = estimator.flags();
        assert!(flags.tilt_align);
        assert!(flags.gravity_vector);
        assert!(flags.zero_heading);
        assert!(flags.vehicle_at_rest);
        // nothing constrains height after the no-aid timeout, so the fallback holds it
        assert!(flags.fake_hgt);
        assert_abs_diff_eq!(estimator.nav_state().position.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_vision_takes_over_from_fallbacks() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 2_000_000, true);

        let flags = *estimator.flags();
        assert!(flags.ev_pos && flags.ev_vel && flags.ev_yaw && flags.ev_hgt);
        assert!(flags.yaw_align);
        // gravity leveling yields to horizontal aiding, tilt alignment is kept
        assert!(!flags.gravity_vector);
        assert!(flags.tilt_align);
        assert!(!flags.fake_hgt);

        let state = estimator.nav_state();
        assert_abs_diff_eq!(state.position.x, 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(state.position.y, 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(state.position.z, -3.0, epsilon = 0.05);
        assert_abs_diff_eq!(state.attitude.z, 0.3, epsilon = 0.05);
    }

    #[test]
    fn test_vision_dropout_stops_sources_and_fallbacks_resume() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 2_000_000, true);
        assert!(estimator.flags().ev_hgt);

        run(&mut estimator, 2_000_000, 2_600_000, false);
        let flags = *estimator.flags();
        assert!(!flags.ev_pos && !flags.ev_vel && !flags.ev_yaw && !flags.ev_hgt);
        assert_eq!(estimator.ev_pos().counters().stops, 1);

        assert_eq!(*estimator.ev_hgt().status(), AidSourceStatus::<1>::default());
        assert!(flags.gravity_vector);

        run(&mut estimator, 2_600_000, 4_000_000, false);
        assert!(estimator.flags().fake_hgt);
        // held at the last height vision reported
        assert_abs_diff_eq!(estimator.nav_state().position.z, -3.0, epsilon = 0.1);
    }

    #[test]
    fn test_clone_is_an_independent_instance() {
        let mut primary = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut primary, 0, 500_000, false);

        let mut redundant = primary.clone();
        run(&mut redundant, 500_000, 2_000_000, true);

        assert!(redundant.flags().ev_pos);
        assert!(redundant.last_transitions().is_some());
        assert!(!primary.flags().ev_pos);
        assert_eq!(primary.time_delayed_us(), Some(396_000));
        assert_eq!(primary.ev_pos().counters().starts, 0);
    }

    #[test]
    fn test_non_finite_input_is_refused() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        let mut imu = ImuSample::at_rest();
        imu.gyro.x = f64::NAN;

        let result = estimator.update(Sample::new(0, imu));
        assert!(matches!(
            result,
            Err(EstimatorError::Buffer(BufferError::NonFinite { time_us: 0 }))
        ));

        let mut vision = still_vision();
        vision.yaw = f64::INFINITY;
        assert!(estimator.push_vision(Sample::new(0, vision)).is_err());
    }

    #[test]
    fn test_set_params_resizes_buffers() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        let params = EstimatorParams {
            obs_buffer_len: 20,
            imu_buffer_len: 64,
            sample_accept_window_us: 50_000,
            ..Default::default()
        };
        estimator.set_params(params).unwrap();

        assert_eq!(estimator.ev_pos().buffer().map(|b| b.capacity()), Some(20));
        assert_eq!(
            estimator.gnss_hgt().buffer().map(|b| b.accept_window_us()),
            Some(50_000)
        );

        let bad = EstimatorParams {
            obs_buffer_len: 0,
            ..Default::default()
        };
        assert!(matches!(
            estimator.set_params(bad),
            Err(EstimatorError::Buffer(BufferError::ZeroCapacity))
        ));
    }

    #[test]
    fn test_rejected_params_leave_estimator_unchanged() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        let defaults = EstimatorParams::default();

        let bad = EstimatorParams {
            imu_buffer_len: 64,
            obs_buffer_len: 0,
            ..Default::default()
        };
        assert!(estimator.set_params(bad).is_err());
        assert_eq!(estimator.params().obs_buffer_len, defaults.obs_buffer_len);
        assert_eq!(estimator.imu_buffer.capacity(), defaults.imu_buffer_len);
        assert_eq!(
            estimator.ev_hgt().buffer().map(|b| b.capacity()),
            Some(defaults.obs_buffer_len)
        );

        // a valid change afterwards applies cleanly and every vision push goes through
        estimator.set_params(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 2_000_000, true);
        assert!(estimator.flags().ev_hgt);
        assert!(estimator.flags().ev_pos);
    }

    #[test]
    fn test_clearing_ev_ctrl_bit_stops_channel() {
        let mut estimator = AidingEstimator::new(EstimatorParams::default()).unwrap();
        run(&mut estimator, 0, 2_000_000, true);
        assert!(estimator.flags().ev_hgt);
        let starts = estimator.ev_hgt().counters().starts;

        let params = EstimatorParams {
            ev_ctrl: ev_ctrl::HPOS | ev_ctrl::VEL | ev_ctrl::YAW,
            ..Default::default()
        };
        estimator.set_params(params).unwrap();

        let flags = *estimator.flags();
        assert!(!flags.ev_hgt);
        assert!(flags.ev_pos && flags.ev_vel && flags.ev_yaw);
        assert_eq!(
            estimator.ev_hgt().counters().stops,
            estimator.ev_hgt().counters().starts
        );

        // stays off while the bit is clear
        run(&mut estimator, 2_000_000, 3_000_000, true);
        assert!(!estimator.flags().ev_hgt);
        assert_eq!(estimator.ev_hgt().counters().starts, starts);
    }

    #[test]
    fn test_low_quality_vision_never_starts() {
        let params = EstimatorParams {
            ev_quality_min: 101,
            ..Default::default()
        };
        let mut estimator = AidingEstimator::new(params).unwrap();
        run(&mut estimator, 0, 1_000_000, true);

        assert!(!estimator.flags().ev_pos);
        assert!(!estimator.ev_pos().predicates().quality_sufficient);
        assert_ne!(
            estimator.ev_pos().status().timestamp_sample,
            0,
            "rejected samples are still recorded"
        );
    }
}
