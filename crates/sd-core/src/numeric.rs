use crate::{CoreError, CoreResult};

/// Floating point type used throughout the integration core.
pub type Real = f64;

/// Paired relative/absolute tolerances, used both for integration error
/// control and for fuzzy comparisons in tests.
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub rel: Real,
    pub abs: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            rel: 1e-6,
            abs: 1e-9,
        }
    }
}

impl Tolerances {
    /// Error-control scale for a component with magnitude `y`.
    pub fn scale(&self, y: Real) -> Real {
        self.abs + self.rel * y.abs()
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> CoreResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}
