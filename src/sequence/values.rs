//! Value perception: order, select, transform and resolve the input
//! values, then cross them into the ready-to-consume input dicts.
//!
//! Each ordered entry is either selected from a named source concept
//! through a selector (shared sources allowed) or taken from the first
//! unused seed record matching the entry name. Selected references are
//! resolved leaf-by-leaf through the wrapper resolution table, crossed
//! into combinations, and formatted as dicts: special instructional
//! values land at their canonical keys, everything else becomes
//! `input_1, input_2, …` in order of appearance.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{InferenceState, Selector, States, ValueRecord, STEP_MVP};
use crate::error::EngineResult;
use crate::reference::{cross_product, Reference};
use crate::tools::{coerce_string, Body};
use crate::wrapper::{self, resolve::resolve_leaf, WrapperKind};

/// Prepare the input dicts and store them under the `MVP` step slot.
pub async fn perceive_values(body: &Body, states: &mut States) -> EngineResult<()> {
    let order = states.value_order.clone();
    let mut entries: Vec<Reference> = Vec::with_capacity(order.len());

    for (entry_name, _) in &order {
        let selected = if let Some(selector) = states.value_selectors.get(entry_name).cloned() {
            match find_source(&states.values, &selector.source_concept) {
                Some(source) => Some(apply_selector(body, &selector, &source).await?),
                None => {
                    warn!(
                        entry = %entry_name,
                        source = %selector.source_concept,
                        "selector source concept not found, slot omitted"
                    );
                    None
                }
            }
        } else {
            match take_first_unused(&mut states.values, entry_name) {
                Some(reference) => Some(reference),
                None => {
                    warn!(entry = %entry_name, "no seed record for entry, slot omitted");
                    None
                }
            }
        };
        if let Some(reference) = selected {
            entries.push(resolve_entry(body, reference).await?);
        }
    }

    let product = cross_product(&entries);
    let combos = match product {
        Reference::Items(combos) => combos,
        other => vec![other],
    };
    let dicts: Vec<Reference> = combos
        .iter()
        .map(|combo| Reference::Leaf(format_combo(combo)))
        .collect();

    debug!(
        entries = entries.len(),
        combinations = dicts.len(),
        "value perception complete"
    );
    states
        .inference
        .insert(STEP_MVP.to_string(), Reference::Items(dicts));
    states.advance(InferenceState::MvpDone)
}

/// Selectors never consume their source; the same concept may feed
/// several entries.
fn find_source(records: &[ValueRecord], source_concept: &str) -> Option<Reference> {
    records
        .iter()
        .find(|record| record.concept == source_concept)
        .map(|record| record.reference.clone())
}

fn take_first_unused(records: &mut [ValueRecord], entry_name: &str) -> Option<Reference> {
    let record = records
        .iter_mut()
        .find(|record| !record.used && record.concept == entry_name)?;
    record.used = true;
    Some(record.reference.clone())
}

/// Apply a selector to every leaf of its source reference, preserving
/// the source shape.
async fn apply_selector(
    body: &Body,
    selector: &Selector,
    source: &Reference,
) -> EngineResult<Reference> {
    let mut replacements = Vec::new();
    for leaf in source.leaves() {
        replacements.push(apply_selector_leaf(body, selector, leaf).await?);
    }
    source.with_leaves_replaced(&mut replacements.into_iter())
}

async fn apply_selector_leaf(
    body: &Body,
    selector: &Selector,
    leaf: &Value,
) -> EngineResult<Reference> {
    let needs_drill = selector.index.is_some()
        || selector.key.is_some()
        || selector.unpack_before_selection
        || selector.unpack;
    let needs_rewrap = selector.strip_wrapper || selector.new_wrapper.is_some();

    // strip then drill: wrapped leaves are decoded before any drill-down
    // or rewrap, attempting the inner content as a literal first
    let start = if needs_drill || needs_rewrap {
        decode_wrapped(leaf)
    } else {
        leaf.clone()
    };

    let (mut items, unpacked) = select_items(selector, start);

    if let Some(branch) = &selector.branch {
        // branching replaces final-item processing; strip_wrapper and
        // new_wrapper never apply to branch-produced dicts
        let mut branched = Vec::with_capacity(items.len());
        for item in &items {
            let mut fields = Map::new();
            for (branch_key, wrapper_name) in branch {
                fields.insert(branch_key.clone(), branch_value(body, item, wrapper_name).await);
            }
            branched.push(Value::Object(fields));
        }
        items = branched;
    } else if needs_rewrap {
        items = items
            .iter()
            .map(|item| {
                let inner = raw_inner(item);
                match &selector.new_wrapper {
                    Some(name) => Value::String(wrapper::wrap(
                        &inner,
                        Some(&WrapperKind::from_name(name)),
                    )),
                    None => Value::String(inner),
                }
            })
            .collect();
    }

    Ok(materialize(items, unpacked))
}

/// Drill into the starting value per the selector, reporting whether the
/// result is an unpacked list.
fn select_items(selector: &Selector, start: Value) -> (Vec<Value>, bool) {
    if selector.unpack_before_selection {
        if let Value::Array(entries) = &start {
            let items = entries
                .iter()
                .map(|entry| match &selector.key {
                    Some(key) => entry.get(key).cloned().unwrap_or(Value::Null),
                    None => entry.clone(),
                })
                .collect();
            return (items, true);
        }
    }
    let mut current = start;
    if let Some(index) = selector.index {
        current = current.get(index).cloned().unwrap_or(Value::Null);
    }
    if let Some(key) = &selector.key {
        current = current.get(key).cloned().unwrap_or(Value::Null);
    }
    if selector.unpack {
        if let Value::Array(entries) = current {
            return (entries, true);
        }
    }
    (vec![current], false)
}

/// One branch output: the raw inner content for the `"NULL"` transform,
/// otherwise the raw content rewrapped under the named kind and pushed
/// through the resolution table.
async fn branch_value(body: &Body, item: &Value, wrapper_name: &str) -> Value {
    let raw = raw_inner(item);
    if wrapper_name == "NULL" {
        return Value::String(raw);
    }
    let rewrapped = wrapper::wrap(&raw, Some(&WrapperKind::from_name(wrapper_name)));
    resolve_leaf(body, &Value::String(rewrapped)).await
}

fn raw_inner(item: &Value) -> String {
    match item {
        Value::String(text) => wrapper::extract_inner(text),
        other => coerce_string(other),
    }
}

/// Decode a wrapped leaf: the inner content as a JSON literal when it
/// parses, the raw string otherwise. Unwrapped leaves pass through.
fn decode_wrapped(leaf: &Value) -> Value {
    let Value::String(text) = leaf else {
        return leaf.clone();
    };
    let Some(wrapped) = wrapper::parse(text) else {
        return leaf.clone();
    };
    serde_json::from_str(&wrapped.content)
        .unwrap_or_else(|_| Value::String(wrapped.content.clone()))
}

fn materialize(items: Vec<Value>, unpacked: bool) -> Reference {
    if unpacked {
        Reference::Unpacked(items.into_iter().map(Reference::Leaf).collect())
    } else if items.len() == 1 {
        let mut items = items;
        Reference::Leaf(items.remove(0))
    } else {
        Reference::Items(items.into_iter().map(Reference::Leaf).collect())
    }
}

/// Resolve every wrapped leaf of an entry through the resolution table.
/// A list-valued resolution (e.g. `file_location_list`) expands into new
/// elements in place.
async fn resolve_entry(body: &Body, reference: Reference) -> EngineResult<Reference> {
    let mut replacements = Vec::new();
    for leaf in reference.leaves() {
        let resolved = resolve_leaf(body, leaf).await;
        replacements.push(match resolved {
            Value::Array(values) => {
                Reference::Items(values.into_iter().map(Reference::Leaf).collect())
            }
            other => Reference::Leaf(other),
        });
    }
    reference.with_leaves_replaced(&mut replacements.into_iter())
}

/// Format one cross-product combination as the runtime input dict.
fn format_combo(combo: &Reference) -> Value {
    let elements: Vec<&Reference> = match combo {
        Reference::Items(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut dict = Map::new();
    let mut position = 0usize;
    for element in elements {
        match element {
            Reference::Unpacked(children) => {
                // explode into consecutive entries
                for child in children {
                    for leaf in child.leaves() {
                        route_value(leaf, &mut dict, &mut position);
                    }
                }
            }
            Reference::Leaf(value) => route_value(value, &mut dict, &mut position),
            other => {
                let collected = reference_to_value(other);
                route_value(&collected, &mut dict, &mut position);
            }
        }
    }
    Value::Object(dict)
}

fn route_value(value: &Value, dict: &mut Map<String, Value>, position: &mut usize) {
    if let Value::String(text) = value {
        if let Some((key, payload)) = wrapper::parse_special(text) {
            dict.insert(key, Value::String(payload));
            return;
        }
    }
    *position += 1;
    dict.insert(format!("input_{position}"), value.clone());
}

fn reference_to_value(reference: &Reference) -> Value {
    match reference {
        Reference::Leaf(value) => value.clone(),
        Reference::Items(children) | Reference::Unpacked(children) => {
            Value::Array(children.iter().map(reference_to_value).collect())
        }
        Reference::Named(children) => Value::Object(
            children
                .iter()
                .map(|(key, child)| (key.clone(), reference_to_value(child)))
                .collect(),
        ),
    }
}
