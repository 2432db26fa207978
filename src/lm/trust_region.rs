//! Damping control for the Levenberg-Marquardt algorithm.
//!
//! The damping factor `mu` adapts to the agreement between the actual and
//! the predicted reduction of the sum of squares (the gain ratio `rho`).
//! Accepted steps shrink `mu` by `max(1/3, 1 - (2 rho - 1)^3)`; rejected steps
//! multiply it by a growth factor `nu` that doubles on every consecutive
//! rejection.

/// Damping state of a running fit.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustRegion {
    /// Current value of the damping parameter
    pub mu: f64,

    /// Growth factor applied on the next rejection
    pub nu: f64,

    /// Consecutive rejections since the last accepted step
    pub rejections: usize,

    /// Consecutive rejections tolerated
    pub max_rejections: usize,
}

impl TrustRegion {
    /// Initial damping `scale * max_diagonal`.
    ///
    /// Falls back to `scale` itself when `J^T J` has no positive diagonal,
    /// so the damped system stays solvable.
    pub fn new(scale: f64, max_diagonal: f64, max_rejections: usize) -> Self {
        let mu = if max_diagonal.is_finite() && max_diagonal > 0.0 {
            scale * max_diagonal
        } else {
            scale
        };
        Self {
            mu,
            nu: 2.0,
            rejections: 0,
            max_rejections,
        }
    }

    /// Calculates the gain ratio between actual and predicted reduction.
    pub fn gain_ratio(actual_reduction: f64, predicted_reduction: f64) -> f64 {
        actual_reduction / predicted_reduction
    }

    /// Shrinks the damping after an accepted step.
    pub fn accept(&mut self, rho: f64) {
        let t = 2.0 * rho - 1.0;
        let factor = (1.0 - t * t * t).max(1.0 / 3.0);
        self.mu *= factor;
        self.nu = 2.0;
        self.rejections = 0;
    }

    /// Grows the damping after a rejected step.
    ///
    /// Returns `false` once the rejection cap is exceeded or the damping
    /// overflows; no further error reduction is expected from this point.
    pub fn reject(&mut self) -> bool {
        self.mu *= self.nu;
        self.nu *= 2.0;
        self.rejections += 1;
        self.rejections <= self.max_rejections && self.mu.is_finite() && self.nu.is_finite()
    }

    /// `mu / max(diag(J^T J))`, reported in the fit summary.
    pub fn mu_ratio(&self, max_diagonal: f64) -> f64 {
        if max_diagonal > 0.0 {
            self.mu / max_diagonal
        } else {
            self.mu
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_mu() {
        let tr = TrustRegion::new(1e-3, 50.0, 32);
        assert_relative_eq!(tr.mu, 0.05);
        assert_relative_eq!(tr.mu_ratio(50.0), 1e-3);

        let tr = TrustRegion::new(1e-3, 0.0, 32);
        assert_relative_eq!(tr.mu, 1e-3);
    }

    #[test]
    fn test_accept_and_reject() {
        let mut tr = TrustRegion::new(1.0, 1.0, 3);

        // A perfect model prediction shrinks mu by the maximum factor.
        tr.accept(1.0);
        assert_relative_eq!(tr.mu, 1.0 / 3.0);

        // rho = 0.5 keeps mu unchanged.
        tr.accept(0.5);
        assert_relative_eq!(tr.mu, 1.0 / 3.0);

        assert!(tr.reject());
        assert_relative_eq!(tr.mu, 2.0 / 3.0);
        assert!(tr.reject());
        assert_relative_eq!(tr.mu, 8.0 / 3.0);
        assert!(tr.reject());
        assert!(!tr.reject());

        tr.accept(0.9);
        assert_eq!(tr.rejections, 0);
        assert_eq!(tr.nu, 2.0);
    }
}
