//! The rotation cycle component.
//!
//! An interior component maps `(x, θ)` to `(A(θ)·x, θ)`, where `x` is the
//! concatenation of `num_var` sub-variables of shape `var_shape`. The ring
//! ends (`RingPosition::First` / `RingPosition::Last`) reuse the same
//! variables and layout; their specific formulas live in `ring_ends`.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::config::{CycleConfig, JacobianStrategy, Naming, RingPosition};
use crate::error::{CycleError, CycleResult};
use crate::marshal::{VarLayout, Variable, Variables};
use crate::partials::{format_partial, PartialFormat};
use crate::rotation::{basis_for, rotation_matrix, rotation_with_derivative};
use crate::traits::{ExplicitComponent, LinearMode, PartialRegistry, VariableRegistry};

/// Name of the ring phase input.
pub const PSI: &str = "psi";
/// Name of the last component's half squared norm output.
pub const X_NORM2: &str = "x_norm2";
/// Initial value of every declared variable.
pub const DEFAULT_VALUE: f64 = 1.0;

/// Variable names derived from the naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarNames {
    pub x: Vec<String>,
    pub y: Vec<String>,
    pub theta: String,
    pub theta_out: String,
}

impl VarNames {
    pub fn new(naming: Naming, num_var: usize) -> Self {
        match naming {
            Naming::Explicit => Self {
                x: (0..num_var).map(|i| format!("x_{i}")).collect(),
                y: (0..num_var).map(|i| format!("y_{i}")).collect(),
                theta: "theta".to_string(),
                theta_out: "theta_out".to_string(),
            },
            Naming::Implicit { index } => Self {
                x: (0..num_var).map(|i| format!("x_{index}_{i}")).collect(),
                y: (0..num_var)
                    .map(|i| format!("x_{}_{i}", index + 1))
                    .collect(),
                theta: format!("theta_{index}"),
                theta_out: format!("theta_{}", index + 1),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleComponent {
    config: CycleConfig,
    names: VarNames,
    x_layout: VarLayout,
    y_layout: VarLayout,
}

impl CycleComponent {
    pub fn new(config: CycleConfig) -> CycleResult<Self> {
        config.validate()?;
        let n = config.dimension();
        // Populates the shared basis for this dimension up front.
        basis_for(n)?;

        let names = VarNames::new(config.naming, config.num_var);
        let x_layout = VarLayout::new(
            names
                .x
                .iter()
                .map(|name| (name.clone(), config.var_shape.clone())),
        );
        let y_layout = VarLayout::new(
            names
                .y
                .iter()
                .map(|name| (name.clone(), config.var_shape.clone())),
        );
        debug!(
            dimension = n,
            position = ?config.position,
            strategy = ?config.jacobian,
            "built cycle component"
        );

        Ok(Self {
            config,
            names,
            x_layout,
            y_layout,
        })
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn names(&self) -> &VarNames {
        &self.names
    }

    pub fn position(&self) -> RingPosition {
        self.config.position
    }

    pub fn dimension(&self) -> usize {
        self.x_layout.size()
    }

    pub fn var_size(&self) -> usize {
        self.config.var_size()
    }

    pub fn partial_format(&self) -> PartialFormat {
        self.config.partial_format
    }

    /// Input whose value is the rotation angle: θ for interior components,
    /// ψ for the ring ends.
    pub fn angle_name(&self) -> &str {
        match self.config.position {
            RingPosition::Interior => &self.names.theta,
            RingPosition::First | RingPosition::Last { .. } => PSI,
        }
    }

    /// Flattened state `x`.
    pub fn state_vector(&self, inputs: &Variables) -> CycleResult<DVector<f64>> {
        self.x_layout.flatten(inputs)
    }

    pub(crate) fn y_layout(&self) -> &VarLayout {
        &self.y_layout
    }

    /// Formats a dense block and hands it to the registry.
    pub(crate) fn assign_block(
        &self,
        partials: &mut impl PartialRegistry,
        of: &str,
        wrt: &str,
        block: &DMatrix<f64>,
    ) -> CycleResult<()> {
        partials.assign(of, wrt, format_partial(block, self.config.partial_format))
    }

    pub(crate) fn declare_block(
        &self,
        partials: &mut impl PartialRegistry,
        of: &str,
        wrt: &str,
        rows: usize,
        cols: usize,
    ) {
        let ones = DMatrix::from_element(rows, cols, 1.0);
        partials.declare(of, wrt, format_partial(&ones, self.config.partial_format));
    }

    fn declare_rotation_variables(&self, registry: &mut impl VariableRegistry) {
        let shape = &self.config.var_shape;
        for (x_i, y_i) in self.names.x.iter().zip(&self.names.y) {
            registry.add_input(x_i, shape, DEFAULT_VALUE);
            registry.add_output(y_i, shape, DEFAULT_VALUE);
        }
        registry.add_input(&self.names.theta, &[1], DEFAULT_VALUE);
        registry.add_output(&self.names.theta_out, &[1], DEFAULT_VALUE);
    }

    fn declare_rotation_partials(&self, partials: &mut impl PartialRegistry) {
        let vs = self.var_size();
        let angle = self.angle_name();
        for y_i in &self.names.y {
            for x_j in &self.names.x {
                self.declare_block(partials, y_i, x_j, vs, vs);
            }
            self.declare_block(partials, y_i, angle, vs, 1);
        }
        self.declare_block(partials, &self.names.theta_out, &self.names.theta, 1, 1);
    }

    fn compute_rotation(&self, inputs: &Variables, outputs: &mut Variables) -> CycleResult<()> {
        let theta = inputs.scalar(&self.names.theta)?;
        let x = self.state_vector(inputs)?;
        let y = rotation_matrix(self.dimension(), theta)? * x;
        self.y_layout.scatter(&y, outputs)?;
        outputs.insert_scalar(&self.names.theta_out, theta);
        Ok(())
    }

    fn linearize_rotation(
        &self,
        inputs: &Variables,
        partials: &mut impl PartialRegistry,
    ) -> CycleResult<()> {
        let n = self.dimension();
        let vs = self.var_size();
        let angle_name = self.angle_name();
        let angle = inputs.scalar(angle_name)?;
        let x = self.state_vector(inputs)?;
        let (a, da) = rotation_with_derivative(n, angle)?;
        let da_x = da * &x;

        for (i, y_i) in self.names.y.iter().enumerate() {
            for (j, x_j) in self.names.x.iter().enumerate() {
                let a_ij = a.view((i * vs, j * vs), (vs, vs)).into_owned();
                self.assign_block(partials, y_i, x_j, &a_ij)?;
            }
            let d_angle = DMatrix::from_iterator(vs, 1, da_x.rows(i * vs, vs).iter().copied());
            self.assign_block(partials, y_i, angle_name, &d_angle)?;
        }

        let identity = DMatrix::identity(1, 1);
        self.assign_block(partials, &self.names.theta_out, &self.names.theta, &identity)
    }

    fn apply_rotation(
        &self,
        inputs: &Variables,
        d_inputs: &mut Variables,
        d_outputs: &mut Variables,
        mode: LinearMode,
    ) -> CycleResult<()> {
        let n = self.dimension();
        let vs = self.var_size();
        let angle_name = self.angle_name();
        let angle = inputs.scalar(angle_name)?;
        let x = self.state_vector(inputs)?;
        let (a, da) = rotation_with_derivative(n, angle)?;
        let theta = self.names.theta.as_str();
        let theta_out = self.names.theta_out.as_str();

        match mode {
            LinearMode::Forward => {
                for (j, x_j) in self.names.x.iter().enumerate() {
                    let Some(dx) = d_inputs.get(x_j) else {
                        continue;
                    };
                    check_size(x_j, dx, vs)?;
                    for (i, y_i) in self.names.y.iter().enumerate() {
                        if let Some(dy) = d_outputs.get_mut(y_i) {
                            let delta = a.view((i * vs, j * vs), (vs, vs)) * &dx.values;
                            accumulate(y_i, dy, &delta)?;
                        }
                    }
                }

                if d_inputs.contains(theta) && d_outputs.contains(theta_out) {
                    d_outputs.add_scalar(theta_out, d_inputs.scalar(theta)?);
                }

                if d_inputs.contains(angle_name) {
                    let d_angle = d_inputs.scalar(angle_name)?;
                    let dy_dangle = &da * &x * d_angle;
                    for (i, y_i) in self.names.y.iter().enumerate() {
                        if let Some(dy) = d_outputs.get_mut(y_i) {
                            let delta = dy_dangle.rows(i * vs, vs).into_owned();
                            accumulate(y_i, dy, &delta)?;
                        }
                    }
                }
            }
            LinearMode::Reverse => {
                for (i, y_i) in self.names.y.iter().enumerate() {
                    let Some(dy) = d_outputs.get(y_i) else {
                        continue;
                    };
                    check_size(y_i, dy, vs)?;
                    for (j, x_j) in self.names.x.iter().enumerate() {
                        if let Some(dx) = d_inputs.get_mut(x_j) {
                            let delta = a.view((i * vs, j * vs), (vs, vs)).tr_mul(&dy.values);
                            accumulate(x_j, dx, &delta)?;
                        }
                        if d_inputs.contains(angle_name) {
                            let da_ij_t_dy =
                                da.view((i * vs, j * vs), (vs, vs)).tr_mul(&dy.values);
                            let contribution = x.rows(j * vs, vs).dot(&da_ij_t_dy);
                            d_inputs.add_scalar(angle_name, contribution);
                        }
                    }
                }

                if d_outputs.contains(theta_out) && d_inputs.contains(theta) {
                    d_inputs.add_scalar(theta, d_outputs.scalar(theta_out)?);
                }
            }
        }
        Ok(())
    }
}

impl ExplicitComponent for CycleComponent {
    fn strategy(&self) -> JacobianStrategy {
        self.config.jacobian
    }

    fn declare_variables(&self, registry: &mut impl VariableRegistry) {
        match self.config.position {
            RingPosition::Interior => {}
            RingPosition::First => registry.add_input(PSI, &[1], DEFAULT_VALUE),
            RingPosition::Last { .. } => {
                registry.add_output(X_NORM2, &[1], DEFAULT_VALUE);
                registry.add_input(PSI, &[1], DEFAULT_VALUE);
            }
        }
        self.declare_rotation_variables(registry);
    }

    fn declare_partials(&self, partials: &mut impl PartialRegistry) {
        if self.config.jacobian != JacobianStrategy::Analytic {
            return;
        }
        match self.config.position {
            RingPosition::Interior | RingPosition::First => self.declare_rotation_partials(partials),
            RingPosition::Last { .. } => self.declare_closure_partials(partials),
        }
    }

    fn compute(&self, inputs: &Variables, outputs: &mut Variables) -> CycleResult<()> {
        match self.config.position {
            RingPosition::Interior => self.compute_rotation(inputs, outputs),
            RingPosition::First => self.compute_first(inputs, outputs),
            RingPosition::Last { num_comp } => self.compute_last(inputs, outputs, num_comp),
        }
    }

    fn linearize(
        &self,
        inputs: &Variables,
        partials: &mut impl PartialRegistry,
    ) -> CycleResult<()> {
        if self.config.jacobian != JacobianStrategy::Analytic {
            trace!("matrix-free component, skipping linearize");
            return Ok(());
        }
        match self.config.position {
            RingPosition::Interior | RingPosition::First => {
                self.linearize_rotation(inputs, partials)
            }
            RingPosition::Last { num_comp } => self.linearize_closure(inputs, partials, num_comp),
        }
    }

    fn apply_linear(
        &self,
        inputs: &Variables,
        d_inputs: &mut Variables,
        d_outputs: &mut Variables,
        mode: LinearMode,
    ) -> CycleResult<()> {
        if self.config.jacobian != JacobianStrategy::MatrixFree {
            trace!(?mode, "analytic component, skipping apply_linear");
            return Ok(());
        }
        match self.config.position {
            RingPosition::Interior | RingPosition::First => {
                self.apply_rotation(inputs, d_inputs, d_outputs, mode)
            }
            RingPosition::Last { num_comp } => {
                self.apply_closure(inputs, d_inputs, d_outputs, mode, num_comp)
            }
        }
    }
}

pub(crate) fn check_size(name: &str, variable: &Variable, expected: usize) -> CycleResult<()> {
    if variable.size() != expected {
        return Err(CycleError::ShapeMismatch {
            name: name.to_string(),
            expected,
            actual: variable.size(),
        });
    }
    Ok(())
}

/// `target += delta`, checking the length first.
pub(crate) fn accumulate(
    name: &str,
    target: &mut Variable,
    delta: &DVector<f64>,
) -> CycleResult<()> {
    check_size(name, target, delta.len())?;
    target.values += delta;
    Ok(())
}
