//! Capacity vectors
//!
//! The unit of demand, reservation and availability throughout the
//! scheduler. Three dimensions, always in the same order: memory (MB),
//! CPU (shares), disk (MB). All arithmetic is elementwise; "A fits in B"
//! means every dimension of A is at or below the matching dimension of B.
//!
//! There is no implicit clamping: callers must check [`CapacityVector::fits`]
//! before subtracting. Subtracting more than available is a bookkeeping bug,
//! not a valid state.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Number of resource dimensions
pub const DIMENSIONS: usize = 3;

/// Dimension index for memory (MB)
pub const MEMORY: usize = 0;
/// Dimension index for CPU (shares, 100 = 1 core)
pub const CPU: usize = 1;
/// Dimension index for disk (MB)
pub const DISK: usize = 2;

/// Fixed-arity resource vector: `[memory, cpu, disk]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapacityVector([u64; DIMENSIONS]);

impl CapacityVector {
    /// Create a capacity vector from explicit dimensions
    pub const fn new(memory: u64, cpu: u64, disk: u64) -> Self {
        Self([memory, cpu, disk])
    }

    /// The zero vector
    pub const fn zero() -> Self {
        Self([0; DIMENSIONS])
    }

    /// Memory dimension (MB)
    pub fn memory(&self) -> u64 {
        self.0[MEMORY]
    }

    /// CPU dimension (shares)
    pub fn cpu(&self) -> u64 {
        self.0[CPU]
    }

    /// Disk dimension (MB)
    pub fn disk(&self) -> u64 {
        self.0[DISK]
    }

    /// Elementwise sum
    pub fn add(&self, other: &Self) -> Self {
        let mut out = [0; DIMENSIONS];
        for i in 0..DIMENSIONS {
            out[i] = self.0[i] + other.0[i];
        }
        Self(out)
    }

    /// Elementwise difference. The caller must have verified
    /// `other.fits(self)`; underflow is a logic error.
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = [0; DIMENSIONS];
        for i in 0..DIMENSIONS {
            debug_assert!(
                self.0[i] >= other.0[i],
                "capacity underflow in dimension {i}: {} - {}",
                self.0[i],
                other.0[i]
            );
            out[i] = self.0[i] - other.0[i];
        }
        Self(out)
    }

    /// True iff `self` fits in `available`: every dimension at or below
    pub fn fits(&self, available: &Self) -> bool {
        (0..DIMENSIONS).all(|i| self.0[i] <= available.0[i])
    }

    /// Per-dimension `self[i] <= other[i]` flags, for placement explain
    pub fn fits_by_dimension(&self, other: &Self) -> [bool; DIMENSIONS] {
        let mut out = [false; DIMENSIONS];
        for i in 0..DIMENSIONS {
            out[i] = self.0[i] <= other.0[i];
        }
        out
    }

    /// Bottleneck ratio `max_i self[i] / denom[i]`.
    ///
    /// This is the fixed scalar reduction used for over-quota checks:
    /// a dimension with zero denominator and nonzero numerator yields
    /// infinity; 0/0 contributes nothing.
    pub fn bottleneck_ratio(&self, denom: &Self) -> f64 {
        let mut ratio: f64 = 0.0;
        for i in 0..DIMENSIONS {
            let r = if denom.0[i] == 0 {
                if self.0[i] == 0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                self.0[i] as f64 / denom.0[i] as f64
            };
            ratio = ratio.max(r);
        }
        ratio
    }

    /// Bottleneck utilization `max_i (self[i] - reserved[i]) / size[i]`.
    ///
    /// Negative while under the reservation, crosses zero at the
    /// reservation boundary. Dimensions with zero size are skipped unless
    /// demand already exceeds the reservation there, in which case the
    /// result is infinite.
    pub fn bottleneck_utilization(&self, reserved: &Self, size: &Self) -> f64 {
        let mut util = f64::NEG_INFINITY;
        for i in 0..DIMENSIONS {
            let over = self.0[i] as f64 - reserved.0[i] as f64;
            let u = if size.0[i] == 0 {
                if over > 0.0 {
                    f64::INFINITY
                } else {
                    continue;
                }
            } else {
                over / size.0[i] as f64
            };
            util = util.max(u);
        }
        util
    }
}

impl Index<usize> for CapacityVector {
    type Output = u64;

    fn index(&self, index: usize) -> &u64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for CapacityVector {
    fn index_mut(&mut self, index: usize) -> &mut u64 {
        &mut self.0[index]
    }
}

impl From<[u64; DIMENSIONS]> for CapacityVector {
    fn from(dims: [u64; DIMENSIONS]) -> Self {
        Self(dims)
    }
}

impl fmt::Display for CapacityVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[mem={} cpu={} disk={}]",
            self.0[MEMORY], self.0[CPU], self.0[DISK]
        )
    }
}
