pub mod autodiff;
pub mod check;
pub mod component;
pub mod config;
pub mod error;
pub mod marshal;
pub mod partials;
pub mod ring;
pub mod ring_ends;
pub mod rotation;
/// The `cycle_core` crate implements the rotation cycle: a chain of explicit
/// components that each rotate a state vector by an angle, closed into a ring
/// by a first and a last component that inject and reconcile a shared phase.
///
/// Key components:
/// - **Rotation**: cached orthonormal basis terms, `A(θ)` and `dA/dθ`, generic over `Scalar`.
/// - **Marshal**: named variables and the flat-vector layout of the state.
/// - **Partials**: dense, CSR and thresholded triplet sub-Jacobians.
/// - **Component**: `CycleComponent` with compute, linearize and matrix-free products.
/// - **Ring**: assembly of members, their connections and ordered sweeps.
/// - **Check**: finite-difference and adjoint consistency of the derivatives.
pub mod traits;

#[cfg(test)]
mod test_support;

pub use check::{check_partials, CheckReport, CheckSettings};
pub use component::CycleComponent;
pub use config::{CycleConfig, JacobianStrategy, Naming, RingPosition};
pub use error::{ConfigError, CycleError, CycleResult};
pub use marshal::{VarLayout, Variable, VariableTable, Variables};
pub use partials::{format_partial, PartialBlock, PartialFormat, PartialTable};
pub use ring::{Ring, RingSettings};
pub use traits::{ExplicitComponent, LinearMode};
