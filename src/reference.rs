use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Tree-shaped, possibly multi-dimensional container of leaf values.
///
/// References hold the data flowing through one inference: concept seeds,
/// selected values, the prepared input dicts and the actuation results.
/// `Unpacked` is an ordinary list carrying the "explode into separate
/// positional inputs" marker consumed during input-dict formatting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Reference {
    Leaf(Value),
    Items(Vec<Reference>),
    Unpacked(Vec<Reference>),
    Named(BTreeMap<String, Reference>),
}

impl Reference {
    /// Reference holding exactly one leaf
    #[must_use]
    pub fn single(value: Value) -> Self {
        Self::Items(vec![Self::Leaf(value)])
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::Items(Vec::new())
    }

    /// Leaves in deterministic depth-first order
    #[must_use]
    pub fn leaves(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Value>) {
        match self {
            Self::Leaf(value) => out.push(value),
            Self::Items(children) | Self::Unpacked(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Self::Named(children) => {
                for child in children.values() {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Owned leaves in depth-first order
    #[must_use]
    pub fn into_leaves(self) -> Vec<Value> {
        match self {
            Self::Leaf(value) => vec![value],
            Self::Items(children) | Self::Unpacked(children) => children
                .into_iter()
                .flat_map(Reference::into_leaves)
                .collect(),
            Self::Named(children) => children
                .into_values()
                .flat_map(Reference::into_leaves)
                .collect(),
        }
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Rebuild this reference's shape with each leaf replaced by the next
    /// entry of `replacements` (depth-first order). The caller supplies one
    /// replacement sub-reference per leaf, which allows a leaf to expand
    /// into a new axis.
    pub fn with_leaves_replaced(
        &self,
        replacements: &mut std::vec::IntoIter<Reference>,
    ) -> EngineResult<Reference> {
        match self {
            Self::Leaf(_) => replacements.next().ok_or_else(|| EngineError::Serialization {
                reason: "leaf replacement underflow".to_string(),
            }),
            Self::Items(children) => Ok(Self::Items(
                children
                    .iter()
                    .map(|c| c.with_leaves_replaced(replacements))
                    .collect::<EngineResult<Vec<_>>>()?,
            )),
            Self::Unpacked(children) => Ok(Self::Unpacked(
                children
                    .iter()
                    .map(|c| c.with_leaves_replaced(replacements))
                    .collect::<EngineResult<Vec<_>>>()?,
            )),
            Self::Named(children) => {
                let mut out = BTreeMap::new();
                for (key, child) in children {
                    out.insert(key.clone(), child.with_leaves_replaced(replacements)?);
                }
                Ok(Self::Named(out))
            }
        }
    }

    /// Axis elements this reference contributes to a cross-product.
    ///
    /// Nested plain lists flatten into the axis; an `Unpacked` node counts
    /// as a single element so its contents stay together for positional
    /// explosion later; `Named` and `Leaf` nodes are single elements.
    #[must_use]
    pub fn axis_elements(&self) -> Vec<Reference> {
        match self {
            Self::Items(children) => children
                .iter()
                .flat_map(Reference::axis_elements)
                .collect(),
            Self::Leaf(_) | Self::Unpacked(_) | Self::Named(_) => vec![self.clone()],
        }
    }
}

/// Pointwise application of `f` over aligned leaves of one or more
/// references. All inputs must share the same shape.
pub fn element_action<F>(f: &mut F, refs: &[&Reference]) -> EngineResult<Reference>
where
    F: FnMut(&[&Value]) -> EngineResult<Value>,
{
    let Some(first) = refs.first() else {
        return Ok(Reference::empty());
    };
    match first {
        Reference::Leaf(_) => {
            let mut values = Vec::with_capacity(refs.len());
            for r in refs {
                match r {
                    Reference::Leaf(v) => values.push(v),
                    _ => {
                        return Err(EngineError::Serialization {
                            reason: "element_action over misaligned references".to_string(),
                        })
                    }
                }
            }
            Ok(Reference::Leaf(f(&values)?))
        }
        Reference::Items(children) | Reference::Unpacked(children) => {
            let len = children.len();
            let mut columns: Vec<&Vec<Reference>> = Vec::with_capacity(refs.len());
            for r in refs {
                match r {
                    Reference::Items(c) | Reference::Unpacked(c) if c.len() == len => {
                        columns.push(c);
                    }
                    _ => {
                        return Err(EngineError::Serialization {
                            reason: "element_action over misaligned references".to_string(),
                        })
                    }
                }
            }
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let row: Vec<&Reference> = columns.iter().map(|c| &c[i]).collect();
                out.push(element_action(f, &row)?);
            }
            if matches!(first, Reference::Unpacked(_)) {
                Ok(Reference::Unpacked(out))
            } else {
                Ok(Reference::Items(out))
            }
        }
        Reference::Named(children) => {
            let mut out = BTreeMap::new();
            for key in children.keys() {
                let mut row: Vec<&Reference> = Vec::with_capacity(refs.len());
                for r in refs {
                    match r {
                        Reference::Named(c) => match c.get(key) {
                            Some(child) => row.push(child),
                            None => {
                                return Err(EngineError::Serialization {
                                    reason: format!(
                                        "element_action key '{key}' missing in aligned reference"
                                    ),
                                })
                            }
                        },
                        _ => {
                            return Err(EngineError::Serialization {
                                reason: "element_action over misaligned references".to_string(),
                            })
                        }
                    }
                }
                out.insert(key.clone(), element_action(f, &row)?);
            }
            Ok(Reference::Named(out))
        }
    }
}

/// Cartesian product of references.
///
/// Each input contributes one axis whose elements are its `axis_elements`
/// in order. The output is a list of combinations in row-major order (the
/// last axis varies fastest); each combination is a list of the combined
/// elements.
#[must_use]
pub fn cross_product(refs: &[Reference]) -> Reference {
    let axes: Vec<Vec<Reference>> = refs.iter().map(Reference::axis_elements).collect();
    if axes.iter().any(Vec::is_empty) {
        return Reference::empty();
    }
    let total: usize = axes.iter().map(Vec::len).product();
    let mut combos = Vec::with_capacity(total);
    let mut indices = vec![0usize; axes.len()];
    for _ in 0..total {
        let combo: Vec<Reference> = axes
            .iter()
            .zip(&indices)
            .map(|(axis, &i)| axis[i].clone())
            .collect();
        combos.push(Reference::Items(combo));
        for axis_idx in (0..axes.len()).rev() {
            indices[axis_idx] += 1;
            if indices[axis_idx] < axes[axis_idx].len() {
                break;
            }
            indices[axis_idx] = 0;
        }
    }
    Reference::Items(combos)
}
