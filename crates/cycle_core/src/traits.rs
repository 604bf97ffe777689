use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::{Neg, Sub};

use crate::config::JacobianStrategy;
use crate::error::CycleResult;
use crate::marshal::Variables;
use crate::partials::PartialBlock;

/// A trait for types the rotation matrix can be evaluated over.
/// Implemented for `f64` and for the forward-mode `Dual` number.
pub trait Scalar: Copy + Debug + Zero + One + Sub<Output = Self> + Neg<Output = Self> {
    fn from_f64(value: f64) -> Self;

    fn sin_cos(self) -> (Self, Self);
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn sin_cos(self) -> (Self, Self) {
        f64::sin_cos(self)
    }
}

/// Direction of a matrix-free Jacobian product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearMode {
    /// Input perturbations → output perturbations (J·v).
    Forward,
    /// Output perturbations → input perturbations (Jᵀ·w).
    Reverse,
}

/// Collaborator the component declares its variables to.
pub trait VariableRegistry {
    fn add_input(&mut self, name: &str, shape: &[usize], default: f64);

    fn add_output(&mut self, name: &str, shape: &[usize], default: f64);
}

/// Collaborator that receives the structure and values of analytic partials,
/// keyed by (output name, input name).
pub trait PartialRegistry {
    /// Declares the storage encoding and sparsity structure of a sub-Jacobian.
    fn declare(&mut self, of: &str, wrt: &str, structure: PartialBlock);

    /// Assigns the current value of a previously declared sub-Jacobian.
    fn assign(&mut self, of: &str, wrt: &str, value: PartialBlock) -> CycleResult<()>;
}

/// The contract a host framework drives an explicit component through.
pub trait ExplicitComponent {
    fn strategy(&self) -> JacobianStrategy;

    fn declare_variables(&self, registry: &mut impl VariableRegistry);

    fn declare_partials(&self, registry: &mut impl PartialRegistry);

    /// Evaluates the outputs from the inputs.
    fn compute(&self, inputs: &Variables, outputs: &mut Variables) -> CycleResult<()>;

    /// Assigns analytic partials. Only acts under the analytic strategy.
    fn linearize(&self, inputs: &Variables, partials: &mut impl PartialRegistry)
        -> CycleResult<()>;

    /// Accumulates a Jacobian product into the caller's perturbation sets.
    /// Only acts under the matrix-free strategy. Names absent from
    /// `d_inputs`/`d_outputs` are not part of this product and are skipped.
    fn apply_linear(
        &self,
        inputs: &Variables,
        d_inputs: &mut Variables,
        d_outputs: &mut Variables,
        mode: LinearMode,
    ) -> CycleResult<()>;
}
