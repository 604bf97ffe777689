//! Rotation matrix A(θ) in the plane spanned by two fixed unit vectors.
//!
//! For a state of dimension `n` the plane is spanned by
//! `u = (√2/2, 0, …, 0, √2/2)` and `v = (0, 1/√(n−2), …, 1/√(n−2), 0)`.
//! With `cross = v⊗u − u⊗v` and `same = u⊗u + v⊗v`:
//!
//! - `A(θ)  = I + sin θ·cross + (cos θ − 1)·same`
//! - `A'(θ) = cos θ·cross − sin θ·same`
//!
//! The basis terms depend only on `n`, so they are computed once per
//! dimension and shared process-wide.

use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

use crate::autodiff::Dual;
use crate::error::{ConfigError, CycleResult};
use crate::traits::Scalar;

/// Smallest dimension for which `v` is defined.
pub const MIN_DIMENSION: usize = 3;

/// Basis vectors and the outer-product tensors built from them.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisTerms {
    pub u: DVector<f64>,
    pub v: DVector<f64>,
    pub cross: DMatrix<f64>,
    pub same: DMatrix<f64>,
}

impl BasisTerms {
    fn new(n: usize) -> Self {
        let mut u = DVector::zeros(n);
        u[0] = std::f64::consts::FRAC_1_SQRT_2;
        u[n - 1] = std::f64::consts::FRAC_1_SQRT_2;

        let mut v = DVector::from_element(n, 1.0 / ((n - 2) as f64).sqrt());
        v[0] = 0.0;
        v[n - 1] = 0.0;

        let cross = &v * u.transpose() - &u * v.transpose();
        let same = &u * u.transpose() + &v * v.transpose();

        Self { u, v, cross, same }
    }

    pub fn dimension(&self) -> usize {
        self.u.len()
    }
}

type BasisCache = RwLock<HashMap<usize, Arc<BasisTerms>>>;

static BASIS_CACHE: OnceLock<BasisCache> = OnceLock::new();

/// Returns the (cached) basis terms for dimension `n`.
///
/// Entries are inserted once and never modified; repeated calls with the
/// same `n` return the same allocation.
pub fn basis_for(n: usize) -> CycleResult<Arc<BasisTerms>> {
    if n < MIN_DIMENSION {
        return Err(ConfigError::DimensionTooSmall(n).into());
    }

    let cache = BASIS_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(terms) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&n)
    {
        return Ok(Arc::clone(terms));
    }

    let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
    let terms = guard.entry(n).or_insert_with(|| {
        debug!(dimension = n, "caching rotation basis");
        Arc::new(BasisTerms::new(n))
    });
    Ok(Arc::clone(terms))
}

/// A(θ) for dimension `n`.
pub fn rotation_matrix(n: usize, theta: f64) -> CycleResult<DMatrix<f64>> {
    let terms = basis_for(n)?;
    let (sin, cos) = theta.sin_cos();
    let mut a = DMatrix::identity(n, n);
    a += &terms.cross * sin;
    a += &terms.same * (cos - 1.0);
    Ok(a)
}

/// dA/dθ for dimension `n`.
pub fn rotation_derivative(n: usize, theta: f64) -> CycleResult<DMatrix<f64>> {
    let terms = basis_for(n)?;
    let (sin, cos) = theta.sin_cos();
    Ok(&terms.cross * cos - &terms.same * sin)
}

/// Evaluates A(θ) over an arbitrary scalar, row-major.
///
/// With `theta = Dual::variable(θ)` the infinitesimal parts of the result
/// are the entries of dA/dθ.
pub fn rotation_entries<T: Scalar>(n: usize, theta: T) -> CycleResult<Vec<T>> {
    let terms = basis_for(n)?;
    let (sin, cos) = theta.sin_cos();
    let cos_m1 = cos - T::one();

    let mut entries = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let identity = if i == j { T::one() } else { T::zero() };
            entries.push(
                identity
                    + sin * T::from_f64(terms.cross[(i, j)])
                    + cos_m1 * T::from_f64(terms.same[(i, j)]),
            );
        }
    }
    Ok(entries)
}

/// A(θ) and dA/dθ from a single dual-number evaluation.
pub fn rotation_with_derivative(
    n: usize,
    theta: f64,
) -> CycleResult<(DMatrix<f64>, DMatrix<f64>)> {
    let entries = rotation_entries(n, Dual::variable(theta))?;
    let a = DMatrix::from_row_iterator(n, n, entries.iter().map(|e| e.val));
    let da = DMatrix::from_row_iterator(n, n, entries.iter().map(|e| e.eps));
    Ok((a, da))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CycleError;
    use approx::assert_relative_eq;

    const ANGLES: [f64; 5] = [0.0, 0.3, -1.2, 2.5, 7.0];

    #[test]
    fn basis_vectors_are_orthonormal() {
        for n in [3, 4, 7, 12] {
            let terms = basis_for(n).expect("basis should build");
            assert!((terms.u.norm() - 1.0).abs() < 1e-12);
            assert!((terms.v.norm() - 1.0).abs() < 1e-12);
            assert!(terms.u.dot(&terms.v).abs() < 1e-12);
            assert_eq!(terms.dimension(), n);
        }
    }

    #[test]
    fn cross_is_antisymmetric_and_same_is_symmetric() {
        let terms = basis_for(6).expect("basis should build");
        assert_relative_eq!(terms.cross.transpose(), -&terms.cross, epsilon = 1e-15);
        assert_relative_eq!(terms.same.transpose(), terms.same.clone(), epsilon = 1e-15);
    }

    #[test]
    fn rotation_is_orthogonal() {
        for n in [3, 5, 9] {
            for theta in ANGLES {
                let a = rotation_matrix(n, theta).expect("rotation should build");
                let gram = a.transpose() * &a;
                assert_relative_eq!(gram, DMatrix::identity(n, n), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn opposite_angles_cancel_and_zero_is_identity() {
        let n = 6;
        for theta in ANGLES {
            let forward = rotation_matrix(n, theta).expect("rotation should build");
            let back = rotation_matrix(n, -theta).expect("rotation should build");
            assert_relative_eq!(forward * back, DMatrix::identity(n, n), epsilon = 1e-12);
        }
        let a0 = rotation_matrix(n, 0.0).expect("rotation should build");
        assert_eq!(a0, DMatrix::identity(n, n));
    }

    #[test]
    fn derivative_matches_central_difference() {
        let n = 5;
        let h = 1e-6;
        for theta in ANGLES {
            let da = rotation_derivative(n, theta).expect("derivative should build");
            let plus = rotation_matrix(n, theta + h).expect("rotation should build");
            let minus = rotation_matrix(n, theta - h).expect("rotation should build");
            let fd = (plus - minus) / (2.0 * h);
            assert_relative_eq!(da, fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn dual_evaluation_matches_analytic_derivative() {
        let n = 4;
        let theta = 0.9;
        let entries = rotation_entries(n, Dual::variable(theta)).expect("entries should build");
        let a = rotation_matrix(n, theta).expect("rotation should build");
        let da = rotation_derivative(n, theta).expect("derivative should build");
        for i in 0..n {
            for j in 0..n {
                let entry = entries[i * n + j];
                assert!((entry.val - a[(i, j)]).abs() < 1e-14);
                assert!((entry.eps - da[(i, j)]).abs() < 1e-14);
            }
        }

        let (a_dual, da_dual) = rotation_with_derivative(n, theta).expect("pair should build");
        assert_relative_eq!(a_dual, a, epsilon = 1e-14);
        assert_relative_eq!(da_dual, da, epsilon = 1e-14);
    }

    #[test]
    fn cache_returns_shared_entry_per_dimension() {
        let first = basis_for(8).expect("basis should build");
        let second = basis_for(8).expect("basis should build");
        assert!(Arc::ptr_eq(&first, &second));

        let other = basis_for(9).expect("basis should build");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_ne!(first.v[1], other.v[1]);
    }

    #[test]
    fn small_dimensions_are_rejected() {
        for n in [0, 1, 2] {
            let err = basis_for(n).expect_err("expected dimension error");
            assert_eq!(
                err,
                CycleError::Configuration(ConfigError::DimensionTooSmall(n))
            );
        }
        assert!(rotation_matrix(2, 0.1).is_err());
    }

    #[test]
    fn three_dimensional_rotation_at_zero_is_identity() {
        let a = rotation_matrix(3, 0.0).expect("rotation should build");
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(a * &x, x);
    }

    #[test]
    fn concurrent_first_use_yields_one_entry() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| basis_for(31).expect("basis should build")))
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should finish"))
            .collect();
        for terms in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], terms));
        }
    }
}
