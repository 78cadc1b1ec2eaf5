// aerie_core/src/aid/sources/gravity.rs

use nalgebra::{Vector2, Vector3};

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{fuse_axes, reset_axes, update_axes_status, AidContext, AidSource};
use crate::nav::{NavAxis, NavigationFilter};
use crate::params::EstimatorParams;
use crate::types::{Sample, ONE_G};

const AXES: [NavAxis; 2] = [NavAxis::Roll, NavAxis::Pitch];

/// Accepted specific-force magnitude while fusing, as a fraction of g.
const CONTINUING_ACCEL_RANGE: (f64, f64) = (0.9, 1.1);
/// Tighter range required to start.
const STARTING_ACCEL_RANGE: (f64, f64) = (0.95, 1.05);

/// Levels roll and pitch using the accelerometer as a gravity sensor.
///
/// Only valid while the vehicle is not accelerating, so it gives way as soon
/// as horizontal aiding is available.
#[derive(Debug, Clone, Default)]
pub struct GravityVector;

impl GravityVector {
    /// Roll and pitch that align body FRD with the measured specific force.
    pub fn tilt_from_accel(accel: &Vector3<f64>) -> Vector2<f64> {
        let roll = (-accel.y).atan2(-accel.z);
        let pitch = accel.x.atan2((accel.y * accel.y + accel.z * accel.z).sqrt());
        Vector2::new(roll, pitch)
    }

    fn accel_norm_within(accel: &Vector3<f64>, range: (f64, f64)) -> bool {
        let norm = accel.norm();
        norm > range.0 * ONE_G && norm < range.1 * ONE_G
    }
}

impl AidSource<2> for GravityVector {
    type Payload = Vector3<f64>;

    fn name(&self) -> &'static str {
        "gravity vector"
    }

    fn is_active(&self, flags: &ControlStatusFlags) -> bool {
        flags.gravity_vector
    }

    fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
        flags.gravity_vector = active;
    }

    fn fusion_timeout_us(&self, _params: &EstimatorParams) -> Option<u64> {
        None
    }

    fn synthesize(
        &mut self,
        _nav: &dyn NavigationFilter,
        _flags: &ControlStatusFlags,
        cx: &AidContext,
    ) -> Option<Sample<Vector3<f64>>> {
        Some(Sample::new(cx.time_us, cx.imu.accel))
    }

    fn competing_aiding_active(&self, flags: &ControlStatusFlags) -> bool {
        flags.is_horizontal_aiding_active()
    }

    fn continuing_conditions(
        &self,
        _cx: &AidContext,
        flags: &ControlStatusFlags,
        sample: &Sample<Vector3<f64>>,
    ) -> bool {
        Self::accel_norm_within(&sample.payload, CONTINUING_ACCEL_RANGE) || flags.vehicle_at_rest
    }

    fn starting_conditions(
        &self,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<Vector3<f64>>,
    ) -> bool {
        Self::accel_norm_within(&sample.payload, STARTING_ACCEL_RANGE)
    }

    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        _flags: &ControlStatusFlags,
        sample: &Sample<Vector3<f64>>,
        status: &mut AidSourceStatus<2>,
    ) {
        // accelerometer noise mapped to an angle
        let angle_var = (cx.params.grav_noise / ONE_G).powi(2);
        update_axes_status(
            nav,
            &AXES,
            sample.time_us,
            Self::tilt_from_accel(&sample.payload),
            Vector2::repeat(angle_var),
            cx.params.grav_gate.max(1.0),
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
        fuse_axes(nav, &AXES, status)
    }

    fn start(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        flags: &mut ControlStatusFlags,
        _sample: &Sample<Vector3<f64>>,
        status: &AidSourceStatus<2>,
    ) {
        if !flags.tilt_align {
            reset_axes(nav, &AXES, status);
            flags.tilt_align = true;
        }
    }

    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<Vector3<f64>>,
        status: &AidSourceStatus<2>,
    ) {
        reset_axes(nav, &AXES, status);
    }
}
