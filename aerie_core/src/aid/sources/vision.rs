// aerie_core/src/aid/sources/vision.rs

//! External vision: one measurement stream feeding four independent sources
//! (horizontal position, velocity, heading, height).

use nalgebra::{Vector1, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{fuse_axes, reset_axes, update_axes_status, AidContext, AidSource};
use crate::nav::{NavAxis, NavigationFilter};
use crate::params::{ev_ctrl, EstimatorParams, HeightRef};
use crate::types::{Finite, Sample};

/// One odometry message from an external vision system, already in NED.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionSample {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub yaw: f64,
    pub position_var: Vector3<f64>,
    pub velocity_var: Vector3<f64>,
    pub yaw_var: f64,
    /// Reported quality, 0 (unusable) to 100 (perfect).
    pub quality: u8,
}

impl Finite for VisionSample {
    fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.yaw.is_finite()
            && self.position_var.is_finite()
            && self.velocity_var.is_finite()
            && self.yaw_var.is_finite()
    }
}

fn vision_quality_sufficient(params: &EstimatorParams, sample: &VisionSample) -> bool {
    sample.quality >= params.ev_quality_min
}

const POS_AXES: [NavAxis; 2] = [NavAxis::PosN, NavAxis::PosE];
const VEL_AXES: [NavAxis; 3] = [NavAxis::VelN, NavAxis::VelE, NavAxis::VelD];
const YAW_AXES: [NavAxis; 1] = [NavAxis::Yaw];
const HGT_AXES: [NavAxis; 1] = [NavAxis::PosD];

/// Implements the parts every vision channel shares.
macro_rules! vision_common {
    ($flag:ident) => {
        type Payload = VisionSample;

        fn is_active(&self, flags: &ControlStatusFlags) -> bool {
            flags.$flag
        }

        fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
            flags.$flag = active;
        }

        fn max_sample_interval_us(&self, params: &EstimatorParams) -> u64 {
            params.ev_max_interval_us
        }

        fn has_quality_channel(&self) -> bool {
            true
        }

        fn quality_sufficient(&self, params: &EstimatorParams, payload: &VisionSample) -> bool {
            vision_quality_sufficient(params, payload)
        }
    };
}

// ============================================================================
// Horizontal Position
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VisionPosition;

impl AidSource<2> for VisionPosition {
    vision_common!(ev_pos);

    fn name(&self) -> &'static str {
        "EV position"
    }

    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64> {
        Some(params.reset_timeout_us)
    }

    fn continuing_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        cx.params.ev_ctrl_enabled(ev_ctrl::HPOS)
    }

    fn starting_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        flags.tilt_align
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<VisionSample>,
        status: &mut AidSourceStatus<2>,
    ) {
        let noise_var = cx.params.ev_pos_noise.powi(2);
        let p = &sample.payload;
        update_axes_status(
            nav,
            &POS_AXES,
            sample.time_us,
            Vector2::new(p.position.x, p.position.y),
            Vector2::new(p.position_var.x.max(noise_var), p.position_var.y.max(noise_var)),
            cx.params.ev_pos_gate.max(1.0),
            status,
        );
    }

    fn fuse(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        status: &AidSourceStatus<2>,
    ) -> bool {
        fuse_axes(nav, &POS_AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<2>,
    ) {
        // nothing else constrains the horizontal position yet
        if !flags.ev_vel {
            reset_axes(nav, &POS_AXES, status);
        }
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<2>,
    ) {
        reset_axes(nav, &POS_AXES, status);
    }
}

// ============================================================================
// Velocity
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VisionVelocity;

impl AidSource<3> for VisionVelocity {
    vision_common!(ev_vel);

    fn name(&self) -> &'static str {
        "EV velocity"
    }

    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64> {
        Some(params.reset_timeout_us)
    }

    fn continuing_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        cx.params.ev_ctrl_enabled(ev_ctrl::VEL)
    }

    fn starting_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        flags.tilt_align
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<VisionSample>,
        status: &mut AidSourceStatus<3>,
    ) {
        let noise_var = cx.params.ev_vel_noise.powi(2);
        update_axes_status(
            nav,
            &VEL_AXES,
            sample.time_us,
            sample.payload.velocity,
            sample.payload.velocity_var.map(|v| v.max(noise_var)),
            cx.params.ev_vel_gate.max(1.0),
            status,
        );
    }

    fn fuse(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        status: &AidSourceStatus<3>,
    ) -> bool {
        fuse_axes(nav, &VEL_AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<3>,
    ) {
        if !flags.is_horizontal_aiding_active() {
            reset_axes(nav, &VEL_AXES, status);
        }
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<3>,
    ) {
        reset_axes(nav, &VEL_AXES, status);
    }
}

// ============================================================================
// Heading
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VisionYaw;

impl AidSource<1> for VisionYaw {
    vision_common!(ev_yaw);

    fn name(&self) -> &'static str {
        "EV yaw"
    }

    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64> {
        Some(params.reset_timeout_us)
    }

    fn continuing_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        cx.params.ev_ctrl_enabled(ev_ctrl::YAW)
    }

    fn starting_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        flags.tilt_align
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<VisionSample>,
        status: &mut AidSourceStatus<1>,
    ) {
        update_axes_status(
            nav,
            &YAW_AXES,
            sample.time_us,
            Vector1::new(sample.payload.yaw),
            Vector1::new(sample.payload.yaw_var.max(cx.params.ev_att_noise.powi(2))),
            cx.params.heading_gate.max(1.0),
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
        fuse_axes(nav, &YAW_AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<1>,
    ) {
        // vision defines the heading reference from now on
        reset_axes(nav, &YAW_AXES, status);
        flags.yaw_align = true;
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<1>,
    ) {
        reset_axes(nav, &YAW_AXES, status);
    }
}

// ============================================================================
// Height
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VisionHeight;

impl AidSource<1> for VisionHeight {
    vision_common!(ev_hgt);

    fn name(&self) -> &'static str {
        "EV height"
    }

    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64> {
        Some(params.hgt_fusion_timeout_us)
    }

    fn continuing_conditions(
        &self,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        cx.params.ev_ctrl_enabled(ev_ctrl::VPOS)
    }

    fn starting_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        _sample: &Sample<VisionSample>,
    ) -> bool {
        flags.tilt_align
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<VisionSample>,
        status: &mut AidSourceStatus<1>,
    ) {
        update_axes_status(
            nav,
            &HGT_AXES,
            sample.time_us,
            Vector1::new(sample.payload.position.z),
            Vector1::new(sample.payload.position_var.z.max(cx.params.ev_pos_noise.powi(2))),
            cx.params.ev_pos_gate.max(1.0),
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
        fuse_axes(nav, &HGT_AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<1>,
    ) {
        if cx.params.height_ref == HeightRef::Vision {
            reset_axes(nav, &HGT_AXES, status);
        }
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<VisionSample>,
        status: &AidSourceStatus<1>,
    ) {
        reset_axes(nav, &HGT_AXES, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::controller::AidSourceController;
    use crate::aid::Transition;
    use crate::nav::decoupled::DecoupledNavFilter;
    use crate::nav::ImuSample;
    use crate::types::TimeUs;

    fn sample(time_us: TimeUs, quality: u8) -> Sample<VisionSample> {
        Sample::new(
            time_us,
            VisionSample {
                position: Vector3::new(2.0, -1.0, -3.0),
                velocity: Vector3::new(0.5, 0.0, 0.0),
                yaw: 0.3,
                position_var: Vector3::repeat(0.01),
                velocity_var: Vector3::repeat(0.01),
                yaw_var: 0.01,
                quality,
            },
        )
    }

    fn cx<'a>(time_us: TimeUs, params: &'a EstimatorParams, imu: &'a ImuSample) -> AidContext<'a> {
        AidContext {
            time_us,
            params,
            imu,
            vertical_dead_reckon_exceeded: false,
            last_known_pos_d: 0.0,
        }
    }

    #[test]
    fn test_quality_threshold() {
        let mut params = EstimatorParams::default();
        params.ev_quality_min = 50;
        assert!(vision_quality_sufficient(&params, &sample(0, 50).payload));
        assert!(!vision_quality_sufficient(&params, &sample(0, 49).payload));
    }

    #[test]
    fn test_non_finite_sample_is_refused() {
        let mut controller = AidSourceController::buffered(VisionPosition, 4, 100_000).unwrap();
        let mut bad = sample(0, 100);
        bad.payload.position.x = f64::NAN;
        assert!(controller.push(bad).is_err());
    }

    #[test]
    fn test_starting_requires_tilt_but_continuing_does_not() {
        let params = EstimatorParams::default();
        let imu = ImuSample::at_rest();
        let c = cx(0, &params, &imu);
        let s = sample(0, 100);
        let mut flags = ControlStatusFlags::default();

        assert!(VisionPosition.continuing_conditions(&c, &flags, &s));
        assert!(!VisionPosition.starting_conditions(&c, &flags, &s));
        assert!(!VisionHeight.starting_conditions(&c, &flags, &s));

        flags.tilt_align = true;
        assert!(VisionPosition.starting_conditions(&c, &flags, &s));
        assert!(VisionVelocity.starting_conditions(&c, &flags, &s));
        assert!(VisionYaw.starting_conditions(&c, &flags, &s));
    }

    #[test]
    fn test_ev_ctrl_masks_channels() {
        let mut params = EstimatorParams::default();
        params.ev_ctrl = ev_ctrl::HPOS;
        let imu = ImuSample::at_rest();
        let c = cx(0, &params, &imu);
        let s = sample(0, 100);
        let flags = ControlStatusFlags::default();

        assert!(VisionPosition.continuing_conditions(&c, &flags, &s));
        assert!(!VisionVelocity.continuing_conditions(&c, &flags, &s));
        assert!(!VisionYaw.continuing_conditions(&c, &flags, &s));
        assert!(!VisionHeight.continuing_conditions(&c, &flags, &s));
    }

    #[test]
    fn test_yaw_start_aligns_heading() {
        let params = EstimatorParams::default();
        let imu = ImuSample::at_rest();
        let mut nav = DecoupledNavFilter::default();
        let mut flags = ControlStatusFlags {
            tilt_align: true,
            ..Default::default()
        };
        let mut controller = AidSourceController::buffered(VisionYaw, 4, 100_000).unwrap();

        controller.push(sample(0, 100)).unwrap();
        controller.update(&mut nav, &mut flags, &cx(0, &params, &imu));
        controller.push(sample(50_000, 100)).unwrap();
        let transition = controller.update(&mut nav, &mut flags, &cx(50_000, &params, &imu));

        assert_eq!(transition, Transition::Started);
        assert!(flags.ev_yaw && flags.yaw_align);
        assert!((nav.observe(NavAxis::Yaw).0 - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_position_noise_floor() {
        let params = EstimatorParams::default();
        let imu = ImuSample::at_rest();
        let nav = DecoupledNavFilter::default();
        let flags = ControlStatusFlags::default();
        let mut status = AidSourceStatus::<2>::default();

        let mut s = sample(0, 100);
        s.payload.position_var = Vector3::repeat(1e-6);
        VisionPosition.update_status(&nav, &cx(0, &params, &imu), &flags, &s, &mut status);

        assert!((status.observation_variance[0] - params.ev_pos_noise.powi(2)).abs() < 1e-12);
        assert!((status.observation[1] + 1.0).abs() < 1e-12);
    }
}
