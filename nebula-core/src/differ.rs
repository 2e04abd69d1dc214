//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in configuration with the "current state"
//! fetched from the Provider, and generates a list of required Effects (Plan).
//!
//! Only attributes present in the desired state are compared. Computed-only
//! attributes are never compared, and write-only attributes are skipped when the
//! remote does not report them. Repeated blocks are compared as sets: each
//! declared element must match a distinct observed element on the keys it sets.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult, ResourceType};
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{AttributeSchema, BlockSchema, ResourceSchema};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences that can be applied in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with differences that need it destroyed and recreated
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
        forced_by: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// A single attribute's old and new value
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Mutable view of a pending diff, handed to [`ResourceType::customize_diff`]
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    current: HashMap<String, Value>,
    changes: BTreeMap<String, AttributeChange>,
    forced: BTreeSet<String>,
}

impl ResourceDiff {
    pub fn new(current: HashMap<String, Value>) -> Self {
        Self {
            current,
            changes: BTreeMap::new(),
            forced: BTreeSet::new(),
        }
    }

    /// The value the attribute will have after apply: the new value when it
    /// changes, the observed value otherwise.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.changes.get(key) {
            Some(change) => change.new.as_ref(),
            None => self.current.get(key),
        }
    }

    /// The observed value
    pub fn get_old(&self, key: &str) -> Option<&Value> {
        self.current.get(key)
    }

    pub fn has_change(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// Record a new value for an attribute
    pub fn set_new(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let old = self.current.get(&key).cloned();
        self.changes.insert(
            key,
            AttributeChange {
                old,
                new: Some(value),
            },
        );
    }

    /// Require replacement of the resource because of this attribute.
    ///
    /// The attribute must already carry a change.
    pub fn force_new(&mut self, key: &str) -> ProviderResult<()> {
        if !self.has_change(key) {
            return Err(ProviderError::new(format!(
                "Cannot force replacement on '{}': attribute has no change",
                key
            )));
        }
        self.forced.insert(key.to_string());
        Ok(())
    }

    pub fn is_forced(&self, key: &str) -> bool {
        self.forced.contains(key)
    }

    pub fn changes(&self) -> &BTreeMap<String, AttributeChange> {
        &self.changes
    }

    pub fn changed_attributes(&self) -> Vec<String> {
        self.changes.keys().cloned().collect()
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(
    desired: &Resource,
    current: &State,
    resource_type: &dyn ResourceType,
) -> ProviderResult<Diff> {
    if !current.exists {
        return Ok(Diff::Create(desired.clone()));
    }

    let schema = resource_type.schema();
    let mut pending = ResourceDiff::new(current.attributes.clone());
    for key in find_changed_attributes(&desired.attributes, &current.attributes, &schema) {
        if let Some(value) = desired.attributes.get(&key) {
            pending.set_new(key, value.clone());
        }
    }

    resource_type
        .customize_diff(&mut pending)
        .map_err(|e| e.for_resource(desired.id.clone()))?;

    let changed = pending.changed_attributes();
    if changed.is_empty() {
        return Ok(Diff::NoChange(desired.id.clone()));
    }

    let forced_by: Vec<String> = changed
        .iter()
        .filter(|key| pending.is_forced(key) || schema.get(key).is_some_and(|a| a.force_new))
        .cloned()
        .collect();

    if forced_by.is_empty() {
        Ok(Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        })
    } else {
        log::debug!("{} requires replacement due to {:?}", desired.id, forced_by);
        Ok(Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
            forced_by,
        })
    }
}

/// Find changed attributes between desired and current state, sorted by name
pub fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: &ResourceSchema,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        let attr = schema.get(key);
        if attr.is_some_and(|a| a.is_computed_only() || a.is_unset(desired_value)) {
            continue;
        }

        match current.get(key) {
            Some(current_value) if attribute_matches(desired_value, current_value, attr) => {}
            None if attr.is_some_and(|a| a.write_only) => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

fn attribute_matches(desired: &Value, current: &Value, attr: Option<&AttributeSchema>) -> bool {
    match (attr.and_then(|a| a.attr_type.as_block()), desired, current) {
        (Some(block), Value::List(d), Value::List(c)) => {
            blocks_match(d, c, block, attr.and_then(|a| a.identity))
        }
        _ => scalars_match(desired, current),
    }
}

/// Numbers compare across Int/Float; everything else compares exactly
fn scalars_match(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Float(_), Value::Int(_)) | (Value::Int(_), Value::Float(_)) => {
            desired.as_float() == current.as_float()
        }
        (Value::List(d), Value::List(c)) => {
            d.len() == c.len() && d.iter().zip(c).all(|(a, b)| scalars_match(a, b))
        }
        _ => desired == current,
    }
}

fn blocks_match(
    desired: &[Value],
    current: &[Value],
    block: &BlockSchema,
    identity: Option<fn(&Value) -> String>,
) -> bool {
    if desired.len() != current.len() {
        return false;
    }

    let mut used = vec![false; current.len()];
    desired.iter().all(|want| {
        let candidate = current.iter().enumerate().position(|(i, have)| {
            !used[i]
                && match identity {
                    Some(key) => key(want) == key(have),
                    None => element_matches(want, have, block),
                }
        });
        match candidate {
            Some(i) => {
                used[i] = true;
                identity.is_none() || element_matches(want, &current[i], block)
            }
            None => false,
        }
    })
}

/// The declared element is a subset of the observed one
fn element_matches(desired: &Value, current: &Value, block: &BlockSchema) -> bool {
    let (Value::Map(want), Value::Map(have)) = (desired, current) else {
        return scalars_match(desired, current);
    };

    want.iter().all(|(key, value)| {
        let attr = block.attributes.get(key);
        if attr.is_some_and(|a| a.is_computed_only() || a.is_unset(value)) {
            return true;
        }
        match have.get(key) {
            Some(observed) => attribute_matches(value, observed, attr),
            None => attr.is_some_and(|a| a.write_only),
        }
    })
}

/// Compute Diff for multiple resources and generate a Plan
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    provider: &dyn Provider,
) -> ProviderResult<Plan> {
    let mut plan = Plan::new();

    for resource in desired {
        let resource_type = provider
            .resource_type(&resource.id.resource_type)
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "Unknown resource type: {}",
                    resource.id.resource_type
                ))
                .for_resource(resource.id.clone())
            })?;

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        match diff(resource, &current, resource_type.as_ref())? {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update { id, from, to, .. } => plan.add(Effect::Update { id, from, to }),
            Diff::Replace { id, from, to, .. } => plan.add(Effect::Replace { id, from, to }),
            Diff::NoChange(_) => {}
        }
    }

    Ok(plan)
}
