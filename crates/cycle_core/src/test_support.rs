//! Fixtures shared by the unit tests.

use crate::component::CycleComponent;
use crate::config::CycleConfig;
use crate::marshal::VariableTable;
use crate::traits::ExplicitComponent;

pub(crate) fn component(config: CycleConfig) -> (CycleComponent, VariableTable) {
    let comp = CycleComponent::new(config).expect("component should build");
    let mut table = VariableTable::new();
    comp.declare_variables(&mut table);
    (comp, table)
}

pub(crate) use crate::check::{inner_product as inner, probe_direction as fill};
