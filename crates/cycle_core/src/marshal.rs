//! Named variable storage and the flat-vector layout used by the rotation.

use nalgebra::DVector;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::{CycleError, CycleResult};
use crate::traits::VariableRegistry;

/// A numeric variable of arbitrary shape, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub shape: Vec<usize>,
    pub values: DVector<f64>,
}

impl Variable {
    pub fn new(name: &str, shape: &[usize], values: Vec<f64>) -> CycleResult<Self> {
        let expected = shape_size(shape);
        if values.len() != expected {
            return Err(CycleError::ShapeMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            values: DVector::from_vec(values),
        })
    }

    pub fn filled(shape: &[usize], value: f64) -> Self {
        Self {
            shape: shape.to_vec(),
            values: DVector::from_element(shape_size(shape), value),
        }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }
}

/// Number of entries in an array of the given shape.
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// A set of named variables, e.g. a component's inputs or a perturbation
/// working set. Membership matters: a name missing from a working set means
/// that variable does not take part in the product being computed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    entries: HashMap<String, Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, shape: &[usize], values: Vec<f64>) -> CycleResult<()> {
        let variable = Variable::new(name, shape, values)?;
        self.entries.insert(name.to_string(), variable);
        Ok(())
    }

    pub fn insert_scalar(&mut self, name: &str, value: f64) {
        self.entries
            .insert(name.to_string(), Variable::filled(&[1], value));
    }

    pub fn insert_variable(&mut self, name: &str, variable: Variable) {
        self.entries.insert(name.to_string(), variable);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.entries.get_mut(name)
    }

    /// Like `get`, but a missing name is an error.
    pub fn require(&self, name: &str) -> CycleResult<&Variable> {
        self.entries
            .get(name)
            .ok_or_else(|| CycleError::MissingVariable(name.to_string()))
    }

    pub fn require_mut(&mut self, name: &str) -> CycleResult<&mut Variable> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| CycleError::MissingVariable(name.to_string()))
    }

    /// First entry of a (scalar) variable.
    pub fn scalar(&self, name: &str) -> CycleResult<f64> {
        let variable = self.require(name)?;
        variable
            .values
            .iter()
            .next()
            .copied()
            .ok_or_else(|| CycleError::ShapeMismatch {
                name: name.to_string(),
                expected: 1,
                actual: 0,
            })
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) -> CycleResult<()> {
        let variable = self.require_mut(name)?;
        variable.values.fill(value);
        Ok(())
    }

    /// Adds `value` to every entry of a scalar variable, if present.
    pub fn add_scalar(&mut self, name: &str, value: f64) {
        if let Some(variable) = self.entries.get_mut(name) {
            variable.values.add_scalar_mut(value);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed ordering of named variables inside one flat vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VarLayout {
    entries: Vec<(String, Vec<usize>)>,
    offsets: Vec<usize>,
}

impl VarLayout {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<usize>)>,
        S: Into<String>,
    {
        let entries: Vec<(String, Vec<usize>)> = entries
            .into_iter()
            .map(|(name, shape)| (name.into(), shape))
            .collect();
        let mut offsets = Vec::with_capacity(entries.len() + 1);
        let mut offset = 0;
        offsets.push(offset);
        for (_, shape) in &entries {
            offset += shape_size(shape);
            offsets.push(offset);
        }
        Self { entries, offsets }
    }

    /// Total flattened size.
    pub fn size(&self) -> usize {
        self.offsets[self.entries.len()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.entries[index].0
    }

    /// Flat index range of block `index`.
    pub fn block_range(&self, index: usize) -> Range<usize> {
        self.offsets[index]..self.offsets[index + 1]
    }

    pub fn flatten(&self, vars: &Variables) -> CycleResult<DVector<f64>> {
        let mut flat = DVector::zeros(self.size());
        for (index, (name, _)) in self.entries.iter().enumerate() {
            let range = self.block_range(index);
            let variable = vars.require(name)?;
            if variable.size() != range.len() {
                return Err(CycleError::ShapeMismatch {
                    name: name.clone(),
                    expected: range.len(),
                    actual: variable.size(),
                });
            }
            flat.rows_mut(range.start, range.len())
                .copy_from(&variable.values);
        }
        Ok(flat)
    }

    pub fn unflatten(&self, flat: &DVector<f64>) -> CycleResult<Variables> {
        self.check_flat_len(flat)?;
        let mut vars = Variables::new();
        for (index, (name, shape)) in self.entries.iter().enumerate() {
            let range = self.block_range(index);
            vars.insert_variable(
                name,
                Variable {
                    shape: shape.clone(),
                    values: flat.rows(range.start, range.len()).into_owned(),
                },
            );
        }
        Ok(vars)
    }

    /// Writes the blocks of `flat` into existing variables of `vars`.
    pub fn scatter(&self, flat: &DVector<f64>, vars: &mut Variables) -> CycleResult<()> {
        self.check_flat_len(flat)?;
        for (index, (name, shape)) in self.entries.iter().enumerate() {
            let range = self.block_range(index);
            let block = flat.rows(range.start, range.len()).into_owned();
            match vars.get_mut(name) {
                Some(variable) if variable.size() == block.len() => variable.values = block,
                Some(variable) => {
                    return Err(CycleError::ShapeMismatch {
                        name: name.clone(),
                        expected: variable.size(),
                        actual: block.len(),
                    })
                }
                None => vars.insert_variable(
                    name,
                    Variable {
                        shape: shape.clone(),
                        values: block,
                    },
                ),
            }
        }
        Ok(())
    }

    fn check_flat_len(&self, flat: &DVector<f64>) -> CycleResult<()> {
        if flat.len() != self.size() {
            return Err(CycleError::ShapeMismatch {
                name: "<flat>".to_string(),
                expected: self.size(),
                actual: flat.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Input,
    Output,
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VarMeta {
    pub name: String,
    pub shape: Vec<usize>,
    pub default: f64,
    pub kind: VarKind,
}

/// Records declarations in order and hands out value sets built from them.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    declared: Vec<VarMeta>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declared(&self) -> &[VarMeta] {
        &self.declared
    }

    pub fn inputs(&self) -> impl Iterator<Item = &VarMeta> {
        self.declared.iter().filter(|m| m.kind == VarKind::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VarMeta> {
        self.declared.iter().filter(|m| m.kind == VarKind::Output)
    }

    /// Inputs at their declared defaults.
    pub fn default_inputs(&self) -> Variables {
        collect_filled(self.inputs(), None)
    }

    /// Outputs at their declared defaults.
    pub fn default_outputs(&self) -> Variables {
        collect_filled(self.outputs(), None)
    }

    /// Every input, filled with `value`; a full perturbation working set.
    pub fn input_seeds(&self, value: f64) -> Variables {
        collect_filled(self.inputs(), Some(value))
    }

    /// Every output, filled with `value`.
    pub fn output_seeds(&self, value: f64) -> Variables {
        collect_filled(self.outputs(), Some(value))
    }

    fn push(&mut self, name: &str, shape: &[usize], default: f64, kind: VarKind) {
        self.declared.push(VarMeta {
            name: name.to_string(),
            shape: shape.to_vec(),
            default,
            kind,
        });
    }
}

impl VariableRegistry for VariableTable {
    fn add_input(&mut self, name: &str, shape: &[usize], default: f64) {
        self.push(name, shape, default, VarKind::Input);
    }

    fn add_output(&mut self, name: &str, shape: &[usize], default: f64) {
        self.push(name, shape, default, VarKind::Output);
    }
}

fn collect_filled<'a>(metas: impl Iterator<Item = &'a VarMeta>, fill: Option<f64>) -> Variables {
    let mut vars = Variables::new();
    for meta in metas {
        let value = fill.unwrap_or(meta.default);
        vars.insert_variable(&meta.name, Variable::filled(&meta.shape, value));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> VarLayout {
        VarLayout::new(vec![
            ("a", vec![2, 3]),
            ("b", vec![1]),
            ("c", vec![4]),
        ])
    }

    fn sample_data(len: usize, seed: f64) -> Vec<f64> {
        (0..len).map(|k| (seed + k as f64 * 0.37).sin() * 10.0).collect()
    }

    #[test]
    fn layout_offsets_follow_insertion_order() {
        let layout = sample_layout();
        assert_eq!(layout.size(), 11);
        assert_eq!(layout.block_range(0), 0..6);
        assert_eq!(layout.block_range(1), 6..7);
        assert_eq!(layout.block_range(2), 7..11);
        assert_eq!(layout.name(2), "c");
    }

    #[test]
    fn flatten_then_unflatten_restores_variables() {
        let layout = sample_layout();
        let mut vars = Variables::new();
        vars.insert("a", &[2, 3], sample_data(6, 0.1)).unwrap();
        vars.insert("b", &[1], sample_data(1, 2.0)).unwrap();
        vars.insert("c", &[4], sample_data(4, -1.3)).unwrap();

        let flat = layout.flatten(&vars).expect("flatten should succeed");
        assert_eq!(flat.len(), 11);
        assert_eq!(flat[6], vars.get("b").unwrap().values[0]);

        let restored = layout.unflatten(&flat).expect("unflatten should succeed");
        assert_eq!(restored, vars);
    }

    #[test]
    fn unflatten_then_flatten_restores_vector() {
        let layout = VarLayout::new((0..5).map(|i| (format!("x_{i}"), vec![3, 2])));
        let flat = DVector::from_vec(sample_data(30, 0.5));
        let vars = layout.unflatten(&flat).expect("unflatten should succeed");
        assert_eq!(vars.len(), 5);
        assert_eq!(vars.get("x_4").unwrap().shape, vec![3, 2]);
        assert_eq!(layout.flatten(&vars).expect("flatten should succeed"), flat);
    }

    #[test]
    fn scatter_overwrites_existing_storage() {
        let layout = sample_layout();
        let mut vars = Variables::new();
        vars.insert("a", &[2, 3], vec![0.0; 6]).unwrap();
        let flat = DVector::from_vec(sample_data(11, 3.0));
        layout.scatter(&flat, &mut vars).expect("scatter should succeed");
        assert_eq!(vars.len(), 3);
        assert_eq!(layout.flatten(&vars).unwrap(), flat);
    }

    #[test]
    fn missing_or_misshapen_variables_are_errors() {
        let layout = sample_layout();
        let mut vars = Variables::new();
        vars.insert("a", &[2, 3], vec![0.0; 6]).unwrap();
        vars.insert("b", &[1], vec![0.0]).unwrap();
        assert_eq!(
            layout.flatten(&vars),
            Err(CycleError::MissingVariable("c".to_string()))
        );

        vars.insert("c", &[2], vec![0.0; 2]).unwrap();
        assert!(matches!(
            layout.flatten(&vars),
            Err(CycleError::ShapeMismatch { expected: 4, actual: 2, .. })
        ));

        assert!(matches!(
            Variable::new("bad", &[2, 2], vec![1.0]),
            Err(CycleError::ShapeMismatch { expected: 4, actual: 1, .. })
        ));
        assert!(layout.unflatten(&DVector::zeros(3)).is_err());
    }

    #[test]
    fn variable_table_keeps_declaration_order() {
        let mut table = VariableTable::new();
        table.add_input("psi", &[1], 1.0);
        table.add_input("x_0", &[2, 2], 1.0);
        table.add_output("y_0", &[2, 2], 1.0);

        let names: Vec<_> = table.declared().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["psi", "x_0", "y_0"]);
        assert_eq!(table.inputs().count(), 2);

        let inputs = table.default_inputs();
        assert_eq!(inputs.get("x_0").unwrap().values.as_slice(), &[1.0; 4]);
        assert!(!inputs.contains("y_0"));

        let seeds = table.output_seeds(0.0);
        assert_eq!(seeds.get("y_0").unwrap().values.sum(), 0.0);
    }

    #[test]
    fn scalar_helpers_touch_every_entry() {
        let mut vars = Variables::new();
        vars.insert_scalar("theta", 0.25);
        vars.add_scalar("theta", 0.5);
        vars.add_scalar("absent", 1.0);
        assert_eq!(vars.scalar("theta").unwrap(), 0.75);
        assert!(!vars.contains("absent"));
        vars.set_scalar("theta", 2.0).unwrap();
        assert_eq!(vars.scalar("theta").unwrap(), 2.0);
    }
}
