//! Ring assembly: `k` components chained first → interior… → last.
//!
//! Component `c` feeds its `y_i` and `θ_out` into component `c + 1`; the
//! last component's `θ_out` feeds back into the first component's `θ`. The
//! phase ψ is an external input shared by the first and last components.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{CycleComponent, PSI, X_NORM2};
use crate::config::{CycleConfig, JacobianStrategy, Naming, RingPosition};
use crate::error::{ConfigError, CycleResult};
use crate::marshal::{VariableTable, Variables};
use crate::partials::PartialFormat;
use crate::traits::ExplicitComponent;

/// How ring members name their variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStyle {
    /// Every member uses `x_i`/`y_i`; links are made by connections.
    #[default]
    Explicit,
    /// Member `c` uses `Naming::Implicit { index: c }`, so linked variables
    /// share names.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    pub num_comp: usize,
    pub jacobian: JacobianStrategy,
    pub partial_format: PartialFormat,
    pub num_var: usize,
    pub var_shape: Vec<usize>,
    pub connection: ConnectionStyle,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            num_comp: 2,
            jacobian: JacobianStrategy::MatrixFree,
            partial_format: PartialFormat::Dense,
            num_var: 1,
            var_shape: vec![3],
            connection: ConnectionStyle::Explicit,
        }
    }
}

/// A variable of one ring member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub component: usize,
    pub name: String,
}

impl VarRef {
    fn new(component: usize, name: &str) -> Self {
        Self {
            component,
            name: name.to_string(),
        }
    }
}

/// Output → input link between ring members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub source: VarRef,
    pub target: VarRef,
}

/// Result of one ordered pass through the ring.
#[derive(Debug, Clone)]
pub struct RingSweep {
    /// Outputs of each member, in ring order.
    pub outputs: Vec<Variables>,
    /// `θ_out` of the last member; the next sweep's `θ`.
    pub closing_angle: f64,
    /// `½‖x‖²` reported by the last member.
    pub x_norm2: f64,
}

#[derive(Debug, Clone)]
pub struct Ring {
    settings: RingSettings,
    components: Vec<CycleComponent>,
    tables: Vec<VariableTable>,
}

impl Ring {
    pub fn new(settings: RingSettings) -> CycleResult<Self> {
        let k = settings.num_comp;
        if k < 2 {
            return Err(ConfigError::RingTooShort(k).into());
        }

        let mut components = Vec::with_capacity(k);
        let mut tables = Vec::with_capacity(k);
        for index in 0..k {
            let position = match index {
                0 => RingPosition::First,
                i if i == k - 1 => RingPosition::Last { num_comp: k },
                _ => RingPosition::Interior,
            };
            let naming = match settings.connection {
                ConnectionStyle::Explicit => Naming::Explicit,
                ConnectionStyle::Implicit => Naming::Implicit { index },
            };
            let component = CycleComponent::new(CycleConfig {
                jacobian: settings.jacobian,
                partial_format: settings.partial_format,
                num_var: settings.num_var,
                var_shape: settings.var_shape.clone(),
                position,
                naming,
            })?;
            let mut table = VariableTable::new();
            component.declare_variables(&mut table);
            components.push(component);
            tables.push(table);
        }
        debug!(num_comp = k, connection = ?settings.connection, "assembled ring");

        Ok(Self {
            settings,
            components,
            tables,
        })
    }

    pub fn settings(&self) -> &RingSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[CycleComponent] {
        &self.components
    }

    /// Declared variables of member `index`.
    pub fn variables(&self, index: usize) -> &VariableTable {
        &self.tables[index]
    }

    /// Every output → input link, including the closing θ link.
    pub fn connections(&self) -> Vec<Connection> {
        let mut links = Vec::new();
        for (c, pair) in self.components.windows(2).enumerate() {
            let (src, dst) = (pair[0].names(), pair[1].names());
            for (y_i, x_i) in src.y.iter().zip(&dst.x) {
                links.push(Connection {
                    source: VarRef::new(c, y_i),
                    target: VarRef::new(c + 1, x_i),
                });
            }
            links.push(Connection {
                source: VarRef::new(c, &src.theta_out),
                target: VarRef::new(c + 1, &dst.theta),
            });
        }
        let last = self.len() - 1;
        links.push(Connection {
            source: VarRef::new(last, &self.components[last].names().theta_out),
            target: VarRef::new(0, &self.components[0].names().theta),
        });
        links
    }

    /// Inputs fed by the external phase ψ.
    pub fn phase_targets(&self) -> Vec<VarRef> {
        vec![VarRef::new(0, PSI), VarRef::new(self.len() - 1, PSI)]
    }

    /// Evaluates every member once, in ring order, starting from `theta`
    /// at the first member.
    pub fn sweep(&self, psi: f64, theta: f64) -> CycleResult<RingSweep> {
        let mut outputs: Vec<Variables> = Vec::with_capacity(self.len());
        for (c, (component, table)) in self.components.iter().zip(&self.tables).enumerate() {
            let names = component.names();
            let mut inputs = table.default_inputs();
            match component.position() {
                RingPosition::First | RingPosition::Last { .. } => inputs.set_scalar(PSI, psi)?,
                RingPosition::Interior => {}
            }
            match outputs.last() {
                None => inputs.set_scalar(&names.theta, theta)?,
                Some(upstream) => {
                    let src = self.components[c - 1].names();
                    for (y_i, x_i) in src.y.iter().zip(&names.x) {
                        let value = upstream.require(y_i)?.clone();
                        inputs.insert_variable(x_i, value);
                    }
                    inputs.set_scalar(&names.theta, upstream.scalar(&src.theta_out)?)?;
                }
            }

            let mut out = table.default_outputs();
            component.compute(&inputs, &mut out)?;
            outputs.push(out);
        }

        let last = self.len() - 1;
        let closing = &outputs[last];
        let closing_angle = closing.scalar(&self.components[last].names().theta_out)?;
        let x_norm2 = closing.scalar(X_NORM2)?;
        Ok(RingSweep {
            outputs,
            closing_angle,
            x_norm2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CycleError;
    use crate::rotation::rotation_matrix;
    use nalgebra::DVector;
    use std::f64::consts::{PI, TAU};

    #[test]
    fn ring_positions_follow_order() {
        let ring = Ring::new(RingSettings {
            num_comp: 4,
            ..Default::default()
        })
        .expect("ring should build");
        let positions: Vec<_> = ring.components().iter().map(|c| c.position()).collect();
        assert_eq!(
            positions,
            vec![
                RingPosition::First,
                RingPosition::Interior,
                RingPosition::Interior,
                RingPosition::Last { num_comp: 4 },
            ]
        );
        assert!(ring.variables(0).inputs().any(|m| m.name == PSI));
        assert!(ring.variables(3).outputs().any(|m| m.name == X_NORM2));
    }

    #[test]
    fn short_rings_are_rejected() {
        let err = Ring::new(RingSettings {
            num_comp: 1,
            ..Default::default()
        })
        .expect_err("expected ring length error");
        assert_eq!(err, CycleError::Configuration(ConfigError::RingTooShort(1)));
    }

    #[test]
    fn connections_chain_members_and_close_the_loop() {
        let ring = Ring::new(RingSettings {
            num_comp: 3,
            num_var: 2,
            ..Default::default()
        })
        .unwrap();
        let links = ring.connections();
        assert_eq!(links.len(), 2 * 3 + 1);
        assert_eq!(
            links[0],
            Connection {
                source: VarRef::new(0, "y_0"),
                target: VarRef::new(1, "x_0"),
            }
        );
        assert_eq!(
            links.last().unwrap(),
            &Connection {
                source: VarRef::new(2, "theta_out"),
                target: VarRef::new(0, "theta"),
            }
        );
        assert_eq!(
            ring.phase_targets(),
            vec![VarRef::new(0, PSI), VarRef::new(2, PSI)]
        );
    }

    #[test]
    fn implicit_members_share_linked_names() {
        let ring = Ring::new(RingSettings {
            num_comp: 4,
            num_var: 2,
            connection: ConnectionStyle::Implicit,
            ..Default::default()
        })
        .unwrap();
        let links = ring.connections();
        let (forward, closing) = links.split_at(links.len() - 1);
        assert!(forward.iter().all(|l| l.source.name == l.target.name));
        assert_eq!(closing[0].source.name, "theta_4");
        assert_eq!(closing[0].target.name, "theta_0");
        assert_eq!(forward[0].source.name, "x_1_0");
    }

    #[test]
    fn first_sweep_of_four_member_ring_closes_at_pi_over_three() {
        let ring = Ring::new(RingSettings {
            num_comp: 4,
            ..Default::default()
        })
        .unwrap();
        let sweep = ring.sweep(0.0, 0.0).expect("sweep should succeed");
        assert!((sweep.closing_angle - PI / 3.0).abs() < 1e-15);
        // ψ = 0 leaves the ones vector unrotated and θ = 0 keeps it that way.
        assert!((sweep.x_norm2 - 1.5).abs() < 1e-12);
        assert_eq!(sweep.outputs.len(), 4);
    }

    #[test]
    fn sweeps_state_through_the_chain() {
        let ring = Ring::new(RingSettings {
            num_comp: 3,
            num_var: 1,
            var_shape: vec![4],
            ..Default::default()
        })
        .unwrap();
        let (psi, theta) = (0.3, 0.8);
        let sweep = ring.sweep(psi, theta).unwrap();

        let ones = DVector::from_element(4, 1.0);
        let expected = rotation_matrix(4, theta).unwrap() * (rotation_matrix(4, psi).unwrap() * ones);
        let middle = sweep.outputs[1].get("y_0").unwrap();
        assert!((&middle.values - &expected).norm() < 1e-12);
        assert!((sweep.x_norm2 - 0.5 * expected.norm_squared()).abs() < 1e-12);
    }

    #[test]
    fn repeated_sweeps_converge_to_the_closing_fixed_point() {
        let k = 5;
        let ring = Ring::new(RingSettings {
            num_comp: k,
            num_var: 2,
            var_shape: vec![2],
            ..Default::default()
        })
        .unwrap();
        let psi = 1.0;
        let mut theta = 0.0;
        for _ in 0..80 {
            theta = ring.sweep(psi, theta).unwrap().closing_angle;
        }
        let fixed = (TAU - psi) / (k as f64 - 1.0);
        assert!((theta - fixed).abs() < 1e-12);
    }
}
