//! Formulas specific to the two ends of a ring.
//!
//! The first component rotates the all-ones vector by the ring phase ψ. The
//! last component closes the ring: it reports `½‖x‖²` and the closing angle
//!
//! `θ_out = θ/2 + (2π·WINDING − ψ)/(2k − 2)`
//!
//! for a ring of `k` components, so iterating the ring halves the angle
//! error on every pass.

use nalgebra::{DMatrix, DVector};
use std::f64::consts::TAU;

use crate::component::{accumulate, check_size, CycleComponent, PSI, X_NORM2};
use crate::error::CycleResult;
use crate::marshal::Variables;
use crate::rotation::rotation_matrix;
use crate::traits::{LinearMode, PartialRegistry};

/// Number of full turns the ring closes over.
pub const WINDING: u32 = 1;

/// ∂θ_out/∂ψ magnitude, `1/(2k − 2)`.
pub fn phase_gain(num_comp: usize) -> f64 {
    1.0 / (2.0 * num_comp as f64 - 2.0)
}

/// Closing angle of the last component.
pub fn closing_angle(theta: f64, psi: f64, num_comp: usize) -> f64 {
    theta / 2.0 + (f64::from(WINDING) * TAU - psi) * phase_gain(num_comp)
}

impl CycleComponent {
    pub(crate) fn compute_first(
        &self,
        inputs: &Variables,
        outputs: &mut Variables,
    ) -> CycleResult<()> {
        let names = self.names();
        let theta = inputs.scalar(&names.theta)?;
        let psi = inputs.scalar(PSI)?;
        let n = self.dimension();
        let y = rotation_matrix(n, psi)? * DVector::from_element(n, 1.0);
        self.y_layout().scatter(&y, outputs)?;
        outputs.insert_scalar(&names.theta_out, theta);
        Ok(())
    }

    /// The `y_i` outputs of the last component are left untouched.
    pub(crate) fn compute_last(
        &self,
        inputs: &Variables,
        outputs: &mut Variables,
        num_comp: usize,
    ) -> CycleResult<()> {
        let names = self.names();
        let theta = inputs.scalar(&names.theta)?;
        let psi = inputs.scalar(PSI)?;
        let x = self.state_vector(inputs)?;

        outputs.insert_scalar(X_NORM2, 0.5 * x.dot(&x));
        outputs.insert_scalar(&names.theta_out, closing_angle(theta, psi, num_comp));
        Ok(())
    }

    pub(crate) fn declare_closure_partials(&self, partials: &mut impl PartialRegistry) {
        let names = self.names();
        for x_j in &names.x {
            self.declare_block(partials, X_NORM2, x_j, 1, self.var_size());
        }
        self.declare_block(partials, &names.theta_out, &names.theta, 1, 1);
        self.declare_block(partials, &names.theta_out, PSI, 1, 1);
    }

    pub(crate) fn linearize_closure(
        &self,
        inputs: &Variables,
        partials: &mut impl PartialRegistry,
        num_comp: usize,
    ) -> CycleResult<()> {
        let names = self.names();
        let vs = self.var_size();
        for x_j in &names.x {
            let value = inputs.require(x_j)?;
            check_size(x_j, value, vs)?;
            let row = DMatrix::from_row_slice(1, vs, value.values.as_slice());
            self.assign_block(partials, X_NORM2, x_j, &row)?;
        }

        let half = DMatrix::from_element(1, 1, 0.5);
        self.assign_block(partials, &names.theta_out, &names.theta, &half)?;
        let d_psi = DMatrix::from_element(1, 1, -phase_gain(num_comp));
        self.assign_block(partials, &names.theta_out, PSI, &d_psi)
    }

    pub(crate) fn apply_closure(
        &self,
        inputs: &Variables,
        d_inputs: &mut Variables,
        d_outputs: &mut Variables,
        mode: LinearMode,
        num_comp: usize,
    ) -> CycleResult<()> {
        let names = self.names();
        let theta = names.theta.as_str();
        let theta_out = names.theta_out.as_str();
        let gain = phase_gain(num_comp);
        let vs = self.var_size();

        match mode {
            LinearMode::Forward => {
                if d_outputs.contains(theta_out) {
                    if d_inputs.contains(theta) {
                        d_outputs.add_scalar(theta_out, 0.5 * d_inputs.scalar(theta)?);
                    }
                    if d_inputs.contains(PSI) {
                        d_outputs.add_scalar(theta_out, -d_inputs.scalar(PSI)? * gain);
                    }
                }
                if d_outputs.contains(X_NORM2) {
                    for x_j in &names.x {
                        let Some(dx) = d_inputs.get(x_j) else {
                            continue;
                        };
                        let x = inputs.require(x_j)?;
                        check_size(x_j, dx, vs)?;
                        check_size(x_j, x, vs)?;
                        d_outputs.add_scalar(X_NORM2, x.values.dot(&dx.values));
                    }
                }
            }
            LinearMode::Reverse => {
                if d_outputs.contains(X_NORM2) {
                    let d_norm = d_outputs.scalar(X_NORM2)?;
                    for x_j in &names.x {
                        if let Some(dx) = d_inputs.get_mut(x_j) {
                            let x = inputs.require(x_j)?;
                            accumulate(x_j, dx, &(&x.values * d_norm))?;
                        }
                    }
                }
                if d_outputs.contains(theta_out) {
                    let d_theta_out = d_outputs.scalar(theta_out)?;
                    d_inputs.add_scalar(theta, 0.5 * d_theta_out);
                    d_inputs.add_scalar(PSI, -d_theta_out * gain);
                }
            }
        }
        Ok(())
    }
}
