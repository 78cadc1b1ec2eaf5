// aerie_core/src/aid/controller.rs

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::aid::{AdmissionPredicates, AidContext, AidSource, StopReason, Transition};
use crate::buffer::DelayedBuffer;
use crate::error::BufferError;
use crate::nav::NavigationFilter;
use crate::types::{is_timed_out, Sample, TimeUs};

/// Running totals of what a controller has done, for summaries and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransitionCounters {
    pub starts: u32,
    pub stops: u32,
    pub resets: u32,
    pub fused_cycles: u32,
}

/// The start/continue/stop state machine shared by every aiding source.
///
/// Owns the source's sample buffer (none for synthesized sources), its
/// diagnostic record and the bookkeeping the predicates need across cycles.
/// The activation bit itself lives in [`ControlStatusFlags`].
#[derive(Debug, Clone)]
pub struct AidSourceController<S: AidSource<N>, const N: usize> {
    source: S,
    buffer: Option<DelayedBuffer<S::Payload>>,
    status: AidSourceStatus<N>,
    predicates: AdmissionPredicates,
    prev_sample_time_us: Option<TimeUs>,
    prev_quality_sufficient: bool,
    time_last_eval_us: Option<TimeUs>,
    counters: TransitionCounters,
}

impl<S: AidSource<N>, const N: usize> AidSourceController<S, N> {
    /// A controller fed through its own delayed buffer.
    pub fn buffered(source: S, capacity: usize, accept_window_us: u64) -> Result<Self, BufferError> {
        let buffer = DelayedBuffer::allocate(capacity, accept_window_us)?;
        Ok(Self::with_buffer(source, Some(buffer)))
    }

    /// A controller whose samples are synthesized from the current state.
    pub fn synthesized(source: S) -> Self {
        Self::with_buffer(source, None)
    }

    fn with_buffer(source: S, buffer: Option<DelayedBuffer<S::Payload>>) -> Self {
        // without a quality channel there is no "previous bad sample" to wait out
        let prev_quality_sufficient = !source.has_quality_channel();
        Self {
            source,
            buffer,
            status: AidSourceStatus::default(),
            predicates: AdmissionPredicates::default(),
            prev_sample_time_us: None,
            prev_quality_sufficient,
            time_last_eval_us: None,
            counters: TransitionCounters::default(),
        }
    }

    // --- Accessors ---

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn status(&self) -> &AidSourceStatus<N> {
        &self.status
    }

    pub fn predicates(&self) -> &AdmissionPredicates {
        &self.predicates
    }

    pub fn counters(&self) -> &TransitionCounters {
        &self.counters
    }

    pub fn buffer(&self) -> Option<&DelayedBuffer<S::Payload>> {
        self.buffer.as_ref()
    }

    /// Hands a new measurement to the source's buffer.
    pub fn push(&mut self, sample: Sample<S::Payload>) -> Result<(), BufferError> {
        self.buffer
            .as_mut()
            .ok_or(BufferError::NotAllocated)?
            .push(sample)
    }

    /// Allocates the replacement a capacity change needs, leaving the current
    /// buffer untouched.
    ///
    /// Returns `Ok(None)` when the capacity is unchanged or the source has no buffer.
    pub fn allocate_resized(
        &self,
        capacity: usize,
        accept_window_us: u64,
    ) -> Result<Option<DelayedBuffer<S::Payload>>, BufferError> {
        match self.buffer.as_ref() {
            Some(buffer) if buffer.capacity() != capacity => {
                DelayedBuffer::allocate(capacity, accept_window_us).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Installs a buffer from [`Self::allocate_resized`] and applies the accept window.
    pub fn commit_resized(
        &mut self,
        replacement: Option<DelayedBuffer<S::Payload>>,
        accept_window_us: u64,
    ) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        if let Some(replacement) = replacement {
            debug!(
                source = self.source.name(),
                old_capacity = buffer.capacity(),
                capacity = replacement.capacity(),
                "reallocated sample buffer"
            );
            *buffer = replacement;
        }
        buffer.set_accept_window_us(accept_window_us);
    }

    /// Re-creates the buffer if the capacity changed and applies the accept window.
    ///
    /// A failed allocation keeps the current buffer and its samples.
    pub fn resize_buffer(&mut self, capacity: usize, accept_window_us: u64) -> Result<(), BufferError> {
        let replacement = self.allocate_resized(capacity, accept_window_us)?;
        self.commit_resized(replacement, accept_window_us);
        Ok(())
    }

    /// Stops the source if it is active, independent of its predicates.
    pub fn stop(&mut self, flags: &mut ControlStatusFlags) -> Transition {
        if self.source.is_active(flags) {
            self.stop_fusion(flags, StopReason::Requested, None)
        } else {
            Transition::Idle
        }
    }

    // --- Per-Cycle Evaluation ---

    /// Runs one admission cycle at the fusion horizon `cx.time_us`.
    pub fn update(
        &mut self,
        nav: &mut dyn NavigationFilter,
        flags: &mut ControlStatusFlags,
        cx: &AidContext,
    ) -> Transition {
        if self.is_rate_limited(cx) {
            return Transition::Idle;
        }

        // 1. Obtain the sample due at the horizon.
        let sample = match self.buffer.as_mut() {
            Some(buffer) => buffer.pop_first_older_than(cx.time_us),
            None => self.source.synthesize(&*nav, flags, cx),
        };

        let active = self.source.is_active(flags);
        let newest_sample_recent = self.is_newest_sample_recent(cx);

        let Some(sample) = sample else {
            if active && !newest_sample_recent {
                return self.stop_fusion(flags, StopReason::NoData, Some(cx.time_us));
            }
            return Transition::Idle;
        };

        self.time_last_eval_us = Some(cx.time_us);

        // 2. The diagnostic record is written whether or not we end up fusing.
        self.source
            .update_status(&*nav, cx, flags, &sample, &mut self.status);
        self.status.fusion_enabled = false;

        // 3. Admission predicates.
        self.predicates = self.evaluate_predicates(cx, flags, &sample, newest_sample_recent);
        self.prev_quality_sufficient = self.predicates.quality_sufficient;
        self.prev_sample_time_us = Some(sample.time_us);

        // 4. Branch on the current activation.
        match (active, self.predicates.continuing, self.predicates.starting) {
            (true, true, _) => self.continue_fusion(nav, flags, cx, &sample),
            (true, false, _) => {
                self.stop_fusion(flags, StopReason::ContinuingConditionsFailing, Some(cx.time_us))
            }
            (false, _, true) => self.start_fusion(nav, flags, cx, &sample),
            (false, _, false) => Transition::Idle,
        }
    }

    // --- Private Helper Methods ---

    fn is_rate_limited(&self, cx: &AidContext) -> bool {
        match (self.source.fusion_interval_us(cx.params), self.time_last_eval_us) {
            (Some(interval), Some(last)) => {
                cx.time_us >= last && cx.time_us < last.saturating_add(interval)
            }
            _ => false,
        }
    }

    fn is_newest_sample_recent(&self, cx: &AidContext) -> bool {
        match self.buffer.as_ref() {
            Some(buffer) => buffer.newest_time_us().is_some_and(|newest| {
                cx.time_us.saturating_sub(newest) < self.source.max_sample_interval_us(cx.params)
            }),
            None => true,
        }
    }

    fn evaluate_predicates(
        &self,
        cx: &AidContext,
        flags: &ControlStatusFlags,
        sample: &Sample<S::Payload>,
        newest_sample_recent: bool,
    ) -> AdmissionPredicates {
        let quality_sufficient = self.source.quality_sufficient(cx.params, &sample.payload);

        let newest_quality_sufficient = self
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.get_newest())
            .map_or(quality_sufficient, |newest| {
                self.source.quality_sufficient(cx.params, &newest.payload)
            });

        let sample_gap_ok = match (&self.buffer, self.prev_sample_time_us) {
            (None, _) => true,
            (Some(_), Some(prev)) => {
                sample.time_us.saturating_sub(prev) < self.source.max_sample_interval_us(cx.params)
            }
            (Some(_), None) => false,
        };

        AdmissionPredicates {
            quality_sufficient,
            prev_quality_sufficient: self.prev_quality_sufficient,
            newest_quality_sufficient,
            competing_aiding_active: self.source.competing_aiding_active(flags),
            newest_sample_recent,
            sample_gap_ok,
            source_continuing: self.source.continuing_conditions(cx, flags, sample),
            source_starting: self.source.starting_conditions(cx, flags, sample),
            continuing: false,
            starting: false,
        }
        .combine()
    }

    fn try_fuse(&mut self, nav: &mut dyn NavigationFilter, flags: &ControlStatusFlags, cx: &AidContext) {
        self.status.fusion_enabled = !self.status.rejected;

        if self.status.fusion_enabled && self.source.fuse(nav, cx, flags, &self.status) {
            self.status.fused = true;
            self.status.time_last_fuse = cx.time_us;
            self.counters.fused_cycles += 1;
        }
    }

    fn start_fusion(
        &mut self,
        nav: &mut dyn NavigationFilter,
        flags: &mut ControlStatusFlags,
        cx: &AidContext,
        sample: &Sample<S::Payload>,
    ) -> Transition {
        info!(source = self.source.name(), time_us = cx.time_us, "starting {} fusion", self.source.name());

        // the observation is kept so the source can reseed from it
        let observed = self.status;
        self.status.reset();
        self.source.start(nav, cx, flags, sample, &observed);
        self.source.set_active(flags, true);

        // innovations against the (possibly reseeded) state
        self.source
            .update_status(&*nav, cx, flags, sample, &mut self.status);
        self.try_fuse(nav, flags, cx);
        self.status.time_last_fuse = cx.time_us;

        self.counters.starts += 1;
        Transition::Started
    }

    fn continue_fusion(
        &mut self,
        nav: &mut dyn NavigationFilter,
        flags: &mut ControlStatusFlags,
        cx: &AidContext,
        sample: &Sample<S::Payload>,
    ) -> Transition {
        self.try_fuse(nav, flags, cx);

        let timed_out = self
            .source
            .fusion_timeout_us(cx.params)
            .is_some_and(|timeout| is_timed_out(self.status.time_last_fuse, timeout, cx.time_us));

        if !timed_out {
            return Transition::Continued;
        }

        warn!(
            source = self.source.name(),
            time_us = cx.time_us,
            "{} fusion timed out, resetting",
            self.source.name()
        );
        self.source.reset(nav, cx, flags, sample, &self.status);
        self.status.time_last_fuse = cx.time_us;
        self.counters.resets += 1;
        Transition::Reset
    }

    fn stop_fusion(
        &mut self,
        flags: &mut ControlStatusFlags,
        reason: StopReason,
        time_us: Option<TimeUs>,
    ) -> Transition {
        warn!(
            source = self.source.name(),
            time_us,
            "stopping {} fusion, {}",
            self.source.name(),
            reason
        );

        self.source.stop(flags);
        self.source.set_active(flags, false);
        self.status.reset();
        self.counters.stops += 1;
        Transition::Stopped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::{fuse_axes, reset_axes, update_axes_status};
    use crate::nav::decoupled::DecoupledNavFilter;
    use crate::nav::{ImuSample, NavAxis};
    use crate::params::EstimatorParams;
    use nalgebra::Vector1;

    /// A height source with a quality channel; borrows the `ev_hgt` flag.
    #[derive(Debug, Clone)]
    struct TestHeight;

    #[derive(Debug, Clone, Copy)]
    struct TestSample {
        height: f64,
        good: bool,
    }

    impl crate::types::Finite for TestSample {
        fn is_finite(&self) -> bool {
            self.height.is_finite()
        }
    }

    const AXES: [NavAxis; 1] = [NavAxis::PosD];

    impl AidSource<1> for TestHeight {
        type Payload = TestSample;

        fn name(&self) -> &'static str {
            "test height"
        }
        fn is_active(&self, flags: &ControlStatusFlags) -> bool {
            flags.ev_hgt
        }
        fn set_active(&self, flags: &mut ControlStatusFlags, active: bool) {
            flags.ev_hgt = active;
        }
        fn max_sample_interval_us(&self, _params: &EstimatorParams) -> u64 {
            200_000
        }
        fn fusion_timeout_us(&self, _params: &EstimatorParams) -> Option<u64> {
            Some(1_000_000)
        }
        fn has_quality_channel(&self) -> bool {
            true
        }
        fn quality_sufficient(&self, _params: &EstimatorParams, payload: &TestSample) -> bool {
            payload.good
        }
        fn starting_conditions(
            &self,
            _cx: &AidContext,
            flags: &ControlStatusFlags,
            _sample: &Sample<TestSample>,
        ) -> bool {
            flags.tilt_align
        }
        fn update_status(
            &mut self,
            nav: &dyn NavigationFilter,
            _cx: &AidContext,
            _flags: &ControlStatusFlags,
            sample: &Sample<TestSample>,
            status: &mut AidSourceStatus<1>,
        ) {
            update_axes_status(
                nav,
                &AXES,
                sample.time_us,
                Vector1::new(sample.payload.height),
                Vector1::new(0.01),
                3.0,
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
        fn reset(
            &mut self,
            nav: &mut dyn NavigationFilter,
            _cx: &AidContext,
            _flags: &mut ControlStatusFlags,
            _sample: &Sample<TestSample>,
            status: &AidSourceStatus<1>,
        ) {
            reset_axes(nav, &AXES, status);
        }
    }

    struct Harness {
        controller: AidSourceController<TestHeight, 1>,
        nav: DecoupledNavFilter,
        flags: ControlStatusFlags,
        params: EstimatorParams,
        imu: ImuSample,
    }

    impl Harness {
        fn new() -> Self {
            let flags = ControlStatusFlags {
                tilt_align: true,
                ..Default::default()
            };
            Self {
                controller: AidSourceController::buffered(TestHeight, 8, 100_000).unwrap(),
                nav: DecoupledNavFilter::default(),
                flags,
                params: EstimatorParams::default(),
                imu: ImuSample::at_rest(),
            }
        }

        fn push(&mut self, time_us: TimeUs, height: f64, good: bool) {
            self.controller
                .push(Sample::new(time_us, TestSample { height, good }))
                .unwrap();
        }

        fn step(&mut self, time_us: TimeUs) -> Transition {
            let cx = AidContext {
                time_us,
                params: &self.params,
                imu: &self.imu,
                vertical_dead_reckon_exceeded: false,
                last_known_pos_d: 0.0,
            };
            self.controller.update(&mut self.nav, &mut self.flags, &cx)
        }
    }

    #[test]
    fn test_starts_after_two_good_samples() {
        let mut h = Harness::new();

        h.push(0, 1.0, true);
        // first sample: the quality of a previous sample is not known yet
        assert_eq!(h.step(0), Transition::Idle);
        assert!(h.controller.predicates().quality_sufficient);
        assert!(!h.controller.predicates().prev_quality_sufficient);
        assert!(!h.controller.predicates().sample_gap_ok);

        h.push(100_000, 1.0, true);
        assert_eq!(h.step(100_000), Transition::Started);
        assert!(h.flags.ev_hgt);
        assert!(h.controller.status().fused);
        assert_eq!(h.controller.status().time_last_fuse, 100_000);
        assert!((h.nav.observe(NavAxis::PosD).0 - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_bad_quality_blocks_start_for_one_more_sample() {
        let mut h = Harness::new();

        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, false);
        assert_eq!(h.step(100_000), Transition::Idle);
        assert!(!h.controller.predicates().quality_sufficient);

        // current good, previous bad
        h.push(200_000, 1.0, true);
        assert_eq!(h.step(200_000), Transition::Idle);
        assert!(h.controller.predicates().quality_sufficient);
        assert!(!h.controller.predicates().prev_quality_sufficient);

        h.push(300_000, 1.0, true);
        assert_eq!(h.step(300_000), Transition::Started);
    }

    #[test]
    fn test_newest_buffered_quality_gates_start_only() {
        let mut h = Harness::new();

        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        // a bad sample is already waiting behind the one being evaluated
        h.push(150_000, 1.0, false);

        assert_eq!(h.step(100_000), Transition::Idle);
        let predicates = h.controller.predicates();
        assert!(predicates.continuing);
        assert!(!predicates.newest_quality_sufficient);
        assert!(!predicates.starting);
    }

    #[test]
    fn test_missing_readiness_blocks_start() {
        let mut h = Harness::new();
        h.flags.tilt_align = false;

        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        assert_eq!(h.step(100_000), Transition::Idle);
        assert!(h.controller.predicates().continuing);
        assert!(!h.controller.predicates().source_starting);
    }

    #[test]
    fn test_stop_clears_status_and_flag() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        h.step(100_000);
        assert!(h.flags.ev_hgt);

        h.push(200_000, 1.0, false);
        assert_eq!(
            h.step(200_000),
            Transition::Stopped(StopReason::ContinuingConditionsFailing)
        );
        assert!(!h.flags.ev_hgt);
        assert_eq!(*h.controller.status(), AidSourceStatus::<1>::default());
        assert_eq!(h.controller.counters().stops, 1);
    }

    #[test]
    fn test_no_data_stops_active_source() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        h.step(100_000);

        // still within the interval: no sample due is just an idle cycle
        assert_eq!(h.step(250_000), Transition::Idle);
        assert!(h.flags.ev_hgt);

        assert_eq!(h.step(300_000), Transition::Stopped(StopReason::NoData));
        assert!(!h.flags.ev_hgt);
    }

    #[test]
    fn test_rejected_sample_is_still_recorded() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        h.step(100_000);

        h.push(200_000, 50.0, true);
        assert_eq!(h.step(200_000), Transition::Continued);

        let status = h.controller.status();
        assert!(status.rejected);
        assert!(!status.fusion_enabled);
        assert!(!status.fused);
        assert_eq!(status.timestamp_sample, 200_000);
        assert!((status.observation[0] - 50.0).abs() < 1e-12);
        assert_eq!(status.time_last_fuse, 100_000);
    }

    #[test]
    fn test_timeout_reseeds_and_keeps_source_active() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        h.step(100_000);

        // a persistent offset that the gate keeps rejecting
        let mut time_us = 100_000;
        let mut transition = Transition::Idle;
        while transition != Transition::Reset {
            time_us += 100_000;
            h.push(time_us, 20.0, true);
            transition = h.step(time_us);
            assert!(time_us <= 1_300_000, "fusion never timed out");
        }

        assert!(h.flags.ev_hgt);
        assert_eq!(h.controller.status().time_last_fuse, time_us);
        assert!((h.nav.observe(NavAxis::PosD).0 - 20.0).abs() < 1e-9);
        assert_eq!(h.controller.counters().resets, 1);

        // reseeded: the next sample passes the gate again
        time_us += 100_000;
        h.push(time_us, 20.0, true);
        assert_eq!(h.step(time_us), Transition::Continued);
        assert!(h.controller.status().fused);
    }

    #[test]
    fn test_push_without_buffer_fails() {
        let mut controller = AidSourceController::<TestHeight, 1>::synthesized(TestHeight);
        let result = controller.push(Sample::new(0, TestSample { height: 0.0, good: true }));
        assert_eq!(result, Err(BufferError::NotAllocated));
    }

    #[test]
    fn test_resize_keeps_buffer_for_same_capacity() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);
        h.controller.resize_buffer(8, 50_000).unwrap();
        assert_eq!(h.controller.buffer().unwrap().entries(), 1);
        assert_eq!(h.controller.buffer().unwrap().accept_window_us(), 50_000);

        h.controller.resize_buffer(4, 50_000).unwrap();
        assert_eq!(h.controller.buffer().unwrap().capacity(), 4);
        assert_eq!(h.controller.buffer().unwrap().entries(), 0);
    }

    #[test]
    fn test_failed_resize_keeps_buffer() {
        let mut h = Harness::new();
        h.push(0, 1.0, true);

        assert_eq!(
            h.controller.resize_buffer(0, 50_000),
            Err(BufferError::ZeroCapacity)
        );
        let buffer = h.controller.buffer().unwrap();
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.entries(), 1);
        assert_eq!(buffer.accept_window_us(), 100_000);

        // a later valid resize still works
        h.controller.resize_buffer(4, 100_000).unwrap();
        assert_eq!(h.controller.buffer().unwrap().capacity(), 4);
        h.push(100_000, 1.0, true);
    }

    #[test]
    fn test_requested_stop() {
        let mut h = Harness::new();
        assert_eq!(h.controller.stop(&mut h.flags), Transition::Idle);

        h.push(0, 1.0, true);
        h.step(0);
        h.push(100_000, 1.0, true);
        h.step(100_000);
        assert!(h.flags.ev_hgt);

        assert_eq!(
            h.controller.stop(&mut h.flags),
            Transition::Stopped(StopReason::Requested)
        );
        assert!(!h.flags.ev_hgt);
        assert_eq!(h.controller.counters().stops, 1);
        assert_eq!(*h.controller.status(), AidSourceStatus::<1>::default());
    }
}
