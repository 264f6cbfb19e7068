//! Operator interface at the boundary to a nodal discretisation layer.
//!
//! Consumers of the grid hierarchy implement elemental operators per
//! stratum. Every operation has a default body that reports a logic error,
//! so calling an operation the concrete operator does not provide stays
//! observable instead of silently recursing or aborting.

use crate::error::{Error, Result};

/// Matrix-free operations a multigrid cycle needs from an elemental
/// operator over the strata of a grid hierarchy.
///
/// Stratum 0 is the finest grid. Implementors override the operations they
/// support; the defaults reject the call.
pub trait GridOperator<V> {
    /// Apply the operator: `output = A * input` on `stratum`.
    fn matvec(&mut self, input: &[V], output: &mut [V], stratum: usize) -> Result<()> {
        let _ = (input, output, stratum);
        Err(Error::LogicError("matvec() not implemented by the operator"))
    }

    /// One smoothing sweep of `u` against the right-hand side `f` on
    /// `stratum`.
    fn smooth(&mut self, u: &mut [V], f: &[V], stratum: usize) -> Result<()> {
        let _ = (u, f, stratum);
        Err(Error::LogicError("smooth() not implemented by the operator"))
    }

    /// Residual `r = f - A * x` on `stratum`.
    fn residual(&mut self, x: &[V], f: &[V], r: &mut [V], stratum: usize) -> Result<()> {
        let _ = (x, f, r, stratum);
        Err(Error::LogicError(
            "residual() not implemented by the operator",
        ))
    }

    /// Transfer a fine-grid error down to `fine_stratum + 1`, via the
    /// surrogate aligned to the fine partition.
    fn restriction(
        &mut self,
        fine_error: &[V],
        coarse_error: &mut [V],
        fine_stratum: usize,
    ) -> Result<()> {
        let _ = (fine_error, coarse_error, fine_stratum);
        Err(Error::LogicError(
            "restriction() not implemented by the operator",
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct MassOnly;

    impl GridOperator<f64> for MassOnly {
        fn matvec(&mut self, input: &[f64], output: &mut [f64], _stratum: usize) -> Result<()> {
            output.copy_from_slice(input);
            Ok(())
        }
    }

    #[test]
    fn test_unimplemented_operations_stay_observable() {
        let mut op = MassOnly;

        let input = vec![1.0, 2.0];
        let mut output = vec![0.0, 0.0];
        op.matvec(&input, &mut output, 0).unwrap();
        assert_eq!(output, input);

        let mut u = vec![0.0];
        let err = op.smooth(&mut u, &[1.0], 0).unwrap_err();
        assert!(matches!(err, Error::LogicError(_)));

        let mut r = vec![0.0];
        let err = op.residual(&[1.0], &[1.0], &mut r, 0).unwrap_err();
        assert!(matches!(err, Error::LogicError(_)));
    }
}
