//! Pluggable scoring.
//!
//! Components that need a judgement in `[0, 1]` (alert confidence, arbitration
//! preference) take a [`Scorer`] rather than a hardcoded constant, so a real
//! model can be dropped in later.

/// Maps an input to a score in `[0, 1]`.
pub trait Scorer<I: ?Sized>: Send + Sync {
    fn score(&self, input: &I) -> f64;
}

impl<I: ?Sized, F> Scorer<I> for F
where
    F: Fn(&I) -> f64 + Send + Sync,
{
    fn score(&self, input: &I) -> f64 {
        clamp_unit(self(input))
    }
}

/// Clamp to `[0, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
