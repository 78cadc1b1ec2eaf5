// aerie_core/src/estimation/lowpass.rs

use num_traits::Float;

/// First order exponential low-pass filter, `y += alpha * (x - y)`.
#[derive(Debug, Clone, Copy)]
pub struct AlphaFilter<T> {
    alpha: T,
    state: T,
}

impl<T: Float> Default for AlphaFilter<T> {
    fn default() -> Self {
        Self {
            alpha: T::zero(),
            state: T::zero(),
        }
    }
}

impl<T: Float> AlphaFilter<T> {
    pub fn new(alpha: T) -> Self {
        Self {
            alpha,
            state: T::zero(),
        }
    }

    /// Builds a filter whose gain is `dt / (time_constant + dt)`.
    pub fn from_time_constant(dt: T, time_constant: T) -> Self {
        let mut filter = Self::default();
        filter.set_parameters(dt, time_constant);
        filter
    }

    pub fn set_parameters(&mut self, dt: T, time_constant: T) {
        let denominator = time_constant + dt;
        self.alpha = if denominator > T::epsilon() {
            dt / denominator
        } else {
            T::one()
        };
    }

    pub fn set_alpha(&mut self, alpha: T) {
        self.alpha = alpha;
    }

    pub fn alpha(&self) -> T {
        self.alpha
    }

    pub fn reset(&mut self, state: T) {
        self.state = state;
    }

    pub fn update(&mut self, sample: T) -> T {
        self.state = self.state + self.alpha * (sample - self.state);
        self.state
    }

    pub fn state(&self) -> T {
        self.state
    }
}
