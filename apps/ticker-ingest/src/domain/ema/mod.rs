//! Exponential Moving Average
//!
//! Recursive smoother used to enrich every tick:
//!
//! ```text
//! ema_0 = x_0
//! ema_n = alpha * x_n + (1 - alpha) * ema_{n-1}
//! ```
//!
//! Seeding with the first sample keeps a cold start from being biased
//! toward zero.

/// Errors raised when constructing an EMA.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmaError {
    /// Smoothing factor outside `(0, 1]`.
    #[error("invalid smoothing factor {0}: must be greater than 0 and at most 1")]
    InvalidParameter(f64),
}

/// State of a single exponential moving average.
#[derive(Debug, PartialEq)]
pub struct EmaState {
    alpha: f64,
    current: f64,
    initialized: bool,
}

impl EmaState {
    /// Default smoothing factor.
    pub const DEFAULT_ALPHA: f64 = 0.2;

    /// Create an uninitialized EMA.
    ///
    /// # Errors
    ///
    /// Returns `EmaError::InvalidParameter` unless `0 < alpha <= 1`.
    /// NaN is rejected.
    pub fn new(alpha: f64) -> Result<Self, EmaError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(EmaError::InvalidParameter(alpha));
        }
        Ok(Self {
            alpha,
            current: 0.0,
            initialized: false,
        })
    }

    /// Feed a sample and return the updated average.
    pub fn update(&mut self, sample: f64) -> f64 {
        self.current = self.preview(sample);
        self.initialized = true;
        self.current
    }

    /// Value `update(sample)` would return, without changing state.
    #[must_use]
    pub fn preview(&self, sample: f64) -> f64 {
        if self.initialized {
            sample.mul_add(self.alpha, self.current * (1.0 - self.alpha))
        } else {
            sample
        }
    }

    /// Current average (0.0 before the first sample).
    #[must_use]
    pub const fn current(&self) -> f64 {
        self.current
    }

    /// Whether at least one sample has been seen.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Smoothing factor.
    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Forget all samples.
    pub const fn reset(&mut self) {
        self.current = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_update_seeds_with_sample() {
        let mut ema = EmaState::new(0.2).unwrap();
        assert!(!ema.is_initialized());

        let value = ema.update(100.0);
        assert_eq!(value, 100.0);
        assert!(ema.is_initialized());
        assert_eq!(ema.current(), 100.0);
    }

    #[test]
    fn second_update_applies_recurrence() {
        let mut ema = EmaState::new(0.2).unwrap();
        assert_eq!(ema.update(100.0), 100.0);

        let value = ema.update(110.0);
        assert!((value - 102.0).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn recurrence_matches_closed_form_sequence() {
        let alpha = 0.3;
        let samples = [100.0, 105.0, 102.0, 108.0, 95.0, 101.0, 99.0, 103.0];
        let mut ema = EmaState::new(alpha).unwrap();

        let mut expected = samples[0];
        for (i, &sample) in samples.iter().enumerate() {
            if i > 0 {
                expected = sample * alpha + expected * (1.0 - alpha);
            }
            let actual = ema.update(sample);
            assert!(
                (actual - expected).abs() < 1e-3,
                "step {i}: expected {expected}, got {actual}"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        assert_eq!(
            EmaState::new(1.5).unwrap_err(),
            EmaError::InvalidParameter(1.5)
        );
        assert!(EmaState::new(0.0).is_err());
        assert!(EmaState::new(-0.1).is_err());
        assert!(EmaState::new(f64::NAN).is_err());
    }

    #[test]
    fn alpha_of_one_tracks_latest_sample() {
        let mut ema = EmaState::new(1.0).unwrap();
        ema.update(10.0);
        assert_eq!(ema.update(42.0), 42.0);
        assert_eq!(ema.alpha(), 1.0);
    }

    #[test]
    fn preview_does_not_mutate() {
        let mut ema = EmaState::new(0.5).unwrap();
        assert_eq!(ema.preview(10.0), 10.0);
        assert!(!ema.is_initialized());

        ema.update(10.0);
        assert_eq!(ema.preview(20.0), 15.0);
        assert_eq!(ema.current(), 10.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut ema = EmaState::new(0.2).unwrap();
        ema.update(100.0);
        ema.update(110.0);

        ema.reset();
        assert!(!ema.is_initialized());
        assert_eq!(ema.current(), 0.0);
        assert_eq!(ema.update(50.0), 50.0);
    }

    #[test]
    fn independent_instances_do_not_share_state() {
        let mut price = EmaState::new(0.2).unwrap();
        let mut mid = EmaState::new(0.2).unwrap();

        price.update(100.0);
        price.update(200.0);
        assert_eq!(mid.update(5.0), 5.0);
        assert!((price.current() - 120.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn ema_stays_within_sample_range(
            alpha in 0.01f64..=1.0,
            samples in prop::collection::vec(1.0f64..100_000.0, 1..64),
        ) {
            let mut ema = EmaState::new(alpha).unwrap();
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            for sample in samples {
                let value = ema.update(sample);
                prop_assert!(value >= min - 1e-6 && value <= max + 1e-6);
            }
        }

        #[test]
        fn seed_law_holds_for_any_sample(alpha in 0.01f64..=1.0, sample in -1e9f64..1e9) {
            let mut ema = EmaState::new(alpha).unwrap();
            prop_assert_eq!(ema.update(sample), sample);
        }
    }
}
