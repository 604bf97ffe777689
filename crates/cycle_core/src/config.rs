use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ConfigError, CycleResult};
use crate::marshal::shape_size;
use crate::partials::PartialFormat;
use crate::rotation::MIN_DIMENSION;

/// How the component supplies its derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JacobianStrategy {
    /// Jacobian-vector products only; nothing is materialized.
    #[default]
    MatrixFree,
    /// Explicit sub-Jacobians in the configured `PartialFormat`.
    Analytic,
}

impl FromStr for JacobianStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matrix-free" | "matvec" => Ok(Self::MatrixFree),
            "analytic" | "dense" | "sparse-coo" | "sparse-csr" => Ok(Self::Analytic),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Where a component sits in a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "position", rename_all = "snake_case")]
pub enum RingPosition {
    #[default]
    Interior,
    /// Rotates by the ring phase ψ instead of θ.
    First,
    /// Closes the ring; `num_comp` is the total ring length.
    Last { num_comp: usize },
}

/// Variable naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "naming", rename_all = "snake_case")]
pub enum Naming {
    /// `x_{i}` → `y_{i}`, `theta` → `theta_out`; wiring is done by connections.
    #[default]
    Explicit,
    /// `x_{index}_{i}` → `x_{index+1}_{i}`, `theta_{index}` → `theta_{index+1}`;
    /// neighbouring components share names.
    Implicit { index: usize },
}

/// Construction-time options of a cycle component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub jacobian: JacobianStrategy,
    pub partial_format: PartialFormat,
    pub num_var: usize,
    pub var_shape: Vec<usize>,
    pub position: RingPosition,
    pub naming: Naming,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            jacobian: JacobianStrategy::MatrixFree,
            partial_format: PartialFormat::Dense,
            num_var: 1,
            var_shape: vec![3],
            position: RingPosition::Interior,
            naming: Naming::Explicit,
        }
    }
}

impl CycleConfig {
    /// Entries in one sub-variable.
    pub fn var_size(&self) -> usize {
        shape_size(&self.var_shape)
    }

    /// Flattened state dimension `n`.
    pub fn dimension(&self) -> usize {
        self.num_var * self.var_size()
    }

    pub fn validate(&self) -> CycleResult<()> {
        if self.num_var == 0 {
            return Err(ConfigError::NoVariables.into());
        }
        // `[]` is a scalar sub-variable of size 1.
        if self.var_size() == 0 {
            return Err(ConfigError::ZeroSizedShape(self.var_shape.clone()).into());
        }
        let n = self.dimension();
        if n < MIN_DIMENSION {
            return Err(ConfigError::DimensionTooSmall(n).into());
        }
        if let RingPosition::Last { num_comp } = self.position {
            if num_comp < 2 {
                return Err(ConfigError::RingTooShort(num_comp).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CycleError;

    #[test]
    fn defaults_describe_a_three_state_interior_component() {
        let config = CycleConfig::default();
        assert_eq!(config.dimension(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn scalar_sub_variables_are_valid() {
        let config = CycleConfig {
            num_var: 3,
            var_shape: vec![],
            ..Default::default()
        };
        assert_eq!(config.var_size(), 1);
        assert_eq!(config.dimension(), 3);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_degenerate_configurations() {
        let cases = [
            (
                CycleConfig {
                    num_var: 0,
                    ..Default::default()
                },
                ConfigError::NoVariables,
            ),
            (
                CycleConfig {
                    var_shape: vec![2, 0],
                    ..Default::default()
                },
                ConfigError::ZeroSizedShape(vec![2, 0]),
            ),
            (
                CycleConfig {
                    var_shape: vec![2],
                    ..Default::default()
                },
                ConfigError::DimensionTooSmall(2),
            ),
            (
                CycleConfig {
                    position: RingPosition::Last { num_comp: 1 },
                    ..Default::default()
                },
                ConfigError::RingTooShort(1),
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(CycleError::Configuration(expected)));
        }
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("matvec".parse::<JacobianStrategy>(), Ok(JacobianStrategy::MatrixFree));
        assert_eq!("sparse-csr".parse::<JacobianStrategy>(), Ok(JacobianStrategy::Analytic));
        assert_eq!(
            "finite-difference".parse::<JacobianStrategy>(),
            Err(ConfigError::UnknownStrategy("finite-difference".to_string()))
        );
    }

    #[test]
    fn unknown_format_names_are_configuration_errors() {
        let err = "banded"
            .parse::<PartialFormat>()
            .expect_err("expected unknown format");
        assert_eq!(err, ConfigError::UnknownFormat("banded".to_string()));
        assert_eq!(
            CycleError::from(err),
            CycleError::Configuration(ConfigError::UnknownFormat("banded".to_string()))
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "jacobian": "analytic",
            "partial_format": "triplet",
            "num_var": 2,
            "position": { "position": "last", "num_comp": 4 }
        }"#;
        let config: CycleConfig = serde_json::from_str(json).expect("config should parse");
        assert_eq!(config.jacobian, JacobianStrategy::Analytic);
        assert_eq!(config.partial_format, PartialFormat::Triplet);
        assert_eq!(config.var_shape, vec![3]);
        assert_eq!(config.position, RingPosition::Last { num_comp: 4 });
        assert_eq!(config.naming, Naming::Explicit);
        assert_eq!(config.dimension(), 6);

        let round_trip: CycleConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }
}
