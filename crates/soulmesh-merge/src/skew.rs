//! Distance between two divergent branches.

use crate::strategy::Versioned;
use serde::{Deserialize, Serialize};

/// Which distance feeds the `skew` of emitted conflict events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkewBasis {
    /// Largest per-node counter difference, in logical-time units.
    #[default]
    Counter,
    /// Difference of the last write times, in milliseconds.
    WallClock,
}

/// Skew measured both ways between two versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skew {
    pub counter: u64,
    pub wall_clock_ms: u64,
}

impl Skew {
    pub fn between<S>(a: &Versioned<S>, b: &Versioned<S>) -> Self {
        Skew {
            counter: a.clock.skew(&b.clock),
            wall_clock_ms: a.wall_clock_ms.abs_diff(b.wall_clock_ms),
        }
    }

    pub fn value(&self, basis: SkewBasis) -> u64 {
        match basis {
            SkewBasis::Counter => self.counter,
            SkewBasis::WallClock => self.wall_clock_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulmesh_core::VectorClock;

    #[test]
    fn test_skew_both_bases() {
        let a_clock = VectorClock::from_entries([("a".to_string(), 1200)]);
        let b_clock = VectorClock::from_entries([("b".to_string(), 3)]);
        let a = Versioned::new((), a_clock, 5_000, "a");
        let b = Versioned::new((), b_clock, 2_000, "b");
        let skew = Skew::between(&a, &b);
        assert_eq!(skew.value(SkewBasis::Counter), 1200);
        assert_eq!(skew.value(SkewBasis::WallClock), 3_000);
    }
}
