//! Derivative consistency check for an explicit component.
//!
//! Central finite differences of `compute` are compared against whatever
//! the component provides itself: assembled partials under the analytic
//! strategy, forward unit-vector products under the matrix-free strategy.
//! Matrix-free components also get an adjoint test
//! `|⟨dy, J·dx⟩ − ⟨Jᵀ·dy, dx⟩|` for a fixed direction pair.

use anyhow::{bail, Context, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JacobianStrategy;
use crate::marshal::{VarMeta, VariableTable, Variables};
use crate::partials::PartialTable;
use crate::traits::{ExplicitComponent, LinearMode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckSettings {
    pub step: f64,
    pub tolerance: f64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            step: 1e-6,
            tolerance: 1e-5,
        }
    }
}

/// Comparison of one sub-Jacobian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialCheck {
    pub of: String,
    pub wrt: String,
    /// Largest |finite difference − provided| entry.
    pub max_abs_error: f64,
    /// Largest |provided| entry.
    pub max_abs_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub strategy: JacobianStrategy,
    pub tolerance: f64,
    pub partials: Vec<PartialCheck>,
    /// Only measured for matrix-free components.
    pub adjoint_gap: Option<f64>,
}

impl CheckReport {
    pub fn worst_error(&self) -> f64 {
        self.partials
            .iter()
            .map(|p| p.max_abs_error)
            .fold(0.0, f64::max)
    }

    pub fn passed(&self) -> bool {
        self.worst_error() <= self.tolerance
            && self.adjoint_gap.map_or(true, |gap| gap <= self.tolerance)
    }

    pub fn find(&self, of: &str, wrt: &str) -> Option<&PartialCheck> {
        self.partials.iter().find(|p| p.of == of && p.wrt == wrt)
    }
}

pub fn check_partials<C: ExplicitComponent>(
    component: &C,
    inputs: &Variables,
    settings: CheckSettings,
) -> Result<CheckReport> {
    if !(settings.step > 0.0) {
        bail!("finite difference step must be positive.");
    }
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }

    let mut table = VariableTable::new();
    component.declare_variables(&mut table);
    let input_metas: Vec<VarMeta> = table.inputs().cloned().collect();
    let output_metas: Vec<VarMeta> = table.outputs().cloned().collect();
    for meta in &input_metas {
        inputs
            .require(&meta.name)
            .with_context(|| format!("Input `{}` is required for the check.", meta.name))?;
    }

    let strategy = component.strategy();
    let analytic = match strategy {
        JacobianStrategy::Analytic => {
            let mut partials = PartialTable::new();
            component.declare_partials(&mut partials);
            component
                .linearize(inputs, &mut partials)
                .context("Failed to linearize component.")?;
            Some(partials)
        }
        JacobianStrategy::MatrixFree => None,
    };

    let mut partials = Vec::with_capacity(input_metas.len() * output_metas.len());
    for wrt in &input_metas {
        let wrt_size = wrt.shape.iter().product::<usize>();
        let fd = finite_difference_columns(component, inputs, &table, wrt, settings.step)?;
        let products = if analytic.is_some() {
            Vec::new()
        } else {
            forward_columns(component, inputs, &table, wrt)?
        };

        for (o, of) in output_metas.iter().enumerate() {
            let of_size = of.shape.iter().product::<usize>();
            let fd_block = DMatrix::from_fn(of_size, wrt_size, |r, c| fd[c][o][r]);
            let reference = match &analytic {
                Some(jac) => jac
                    .dense(&of.name, &wrt.name)
                    .unwrap_or_else(|| DMatrix::zeros(of_size, wrt_size)),
                None => DMatrix::from_fn(of_size, wrt_size, |r, c| products[c][o][r]),
            };
            if reference.shape() != (of_size, wrt_size) {
                bail!(
                    "Partial ({}, {}) has shape {:?}, expected {:?}.",
                    of.name,
                    wrt.name,
                    reference.shape(),
                    (of_size, wrt_size)
                );
            }
            partials.push(PartialCheck {
                of: of.name.clone(),
                wrt: wrt.name.clone(),
                max_abs_error: (&fd_block - &reference).amax(),
                max_abs_value: reference.amax(),
            });
        }
    }

    let adjoint_gap = match strategy {
        JacobianStrategy::MatrixFree => Some(adjoint_gap(component, inputs, &table)?),
        JacobianStrategy::Analytic => None,
    };

    let report = CheckReport {
        strategy,
        tolerance: settings.tolerance,
        partials,
        adjoint_gap,
    };
    debug!(
        worst = report.worst_error(),
        adjoint_gap = ?report.adjoint_gap,
        passed = report.passed(),
        "checked partials"
    );
    Ok(report)
}

/// `columns[k][o]` is ∂(output o)/∂(wrt entry k), flattened.
type Columns = Vec<Vec<Vec<f64>>>;

fn finite_difference_columns<C: ExplicitComponent>(
    component: &C,
    inputs: &Variables,
    table: &VariableTable,
    wrt: &VarMeta,
    step: f64,
) -> Result<Columns> {
    let size = wrt.shape.iter().product::<usize>();
    let mut columns = Vec::with_capacity(size);
    for k in 0..size {
        let plus = evaluate_shifted(component, inputs, table, &wrt.name, k, step)?;
        let minus = evaluate_shifted(component, inputs, table, &wrt.name, k, -step)?;
        let column = table
            .outputs()
            .map(|meta| -> Result<Vec<f64>> {
                let hi = plus.require(&meta.name)?;
                let lo = minus.require(&meta.name)?;
                Ok((&hi.values - &lo.values)
                    .iter()
                    .map(|d| d / (2.0 * step))
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;
        columns.push(column);
    }
    Ok(columns)
}

fn evaluate_shifted<C: ExplicitComponent>(
    component: &C,
    inputs: &Variables,
    table: &VariableTable,
    name: &str,
    entry: usize,
    delta: f64,
) -> Result<Variables> {
    let mut shifted = inputs.clone();
    shifted.require_mut(name)?.values[entry] += delta;
    let mut outputs = table.default_outputs();
    component
        .compute(&shifted, &mut outputs)
        .with_context(|| format!("Failed to evaluate component with `{name}` perturbed."))?;
    Ok(outputs)
}

fn forward_columns<C: ExplicitComponent>(
    component: &C,
    inputs: &Variables,
    table: &VariableTable,
    wrt: &VarMeta,
) -> Result<Columns> {
    let size = wrt.shape.iter().product::<usize>();
    let mut columns = Vec::with_capacity(size);
    for k in 0..size {
        let mut d_inputs = Variables::new();
        let mut seed = vec![0.0; size];
        seed[k] = 1.0;
        d_inputs.insert(&wrt.name, &wrt.shape, seed)?;
        let mut d_outputs = table.output_seeds(0.0);
        component
            .apply_linear(inputs, &mut d_inputs, &mut d_outputs, LinearMode::Forward)
            .context("Forward Jacobian product failed.")?;
        let column = table
            .outputs()
            .map(|meta| -> Result<Vec<f64>> {
                Ok(d_outputs.require(&meta.name)?.values.iter().copied().collect())
            })
            .collect::<Result<Vec<_>>>()?;
        columns.push(column);
    }
    Ok(columns)
}

fn adjoint_gap<C: ExplicitComponent>(
    component: &C,
    inputs: &Variables,
    table: &VariableTable,
) -> Result<f64> {
    let mut dx = table.input_seeds(0.0);
    probe_direction(&mut dx, 0.61);
    let mut dy = table.output_seeds(0.0);
    probe_direction(&mut dy, -1.93);

    let mut fwd_in = dx.clone();
    let mut fwd_out = table.output_seeds(0.0);
    component
        .apply_linear(inputs, &mut fwd_in, &mut fwd_out, LinearMode::Forward)
        .context("Forward Jacobian product failed.")?;

    let mut rev_in = table.input_seeds(0.0);
    let mut rev_out = dy.clone();
    component
        .apply_linear(inputs, &mut rev_in, &mut rev_out, LinearMode::Reverse)
        .context("Reverse Jacobian product failed.")?;

    Ok((inner_product(&dy, &fwd_out) - inner_product(&dx, &rev_in)).abs())
}

/// Fills every variable with a deterministic, irregular pattern.
/// Names are visited in sorted order so the fill does not depend on
/// hash order.
pub(crate) fn probe_direction(vars: &mut Variables, seed: f64) {
    let mut names: Vec<String> = vars.names().map(str::to_string).collect();
    names.sort();
    let mut k = 0.0;
    for name in names {
        if let Some(var) = vars.get_mut(&name) {
            for value in var.values.iter_mut() {
                *value = (seed + 1.37 * k).sin() + 0.25 * (seed * k).cos();
                k += 1.0;
            }
        }
    }
}

/// Σ over shared names of ⟨a, b⟩.
pub(crate) fn inner_product(a: &Variables, b: &Variables) -> f64 {
    a.names()
        .filter_map(|name| Some(a.get(name)?.values.dot(&b.get(name)?.values)))
        .sum()
}
