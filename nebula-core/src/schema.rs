//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type. A schema declares every
//! attribute's type and whether it is required, optional or computed, and
//! drives both configuration validation and the differ.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Fractional number (integers are accepted)
    Float,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Repeated nested block, represented as a list of maps
    Block(Box<BlockSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Float, Value::Float(_) | Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(block), Value::List(items)) => block.validate_items(items),

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Float => "Float".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }

    /// Nested block schema, if this is a block type
    pub fn as_block(&self) -> Option<&BlockSchema> {
        match self {
            AttributeType::Block(block) => Some(block),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedOnly { name: String },

    #[error("Attribute '{name}' conflicts with '{other}'")]
    Conflict { name: String, other: String },

    #[error("Expected between {min} and {max} items, got {got}")]
    ItemCount { min: usize, max: usize, got: usize },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },
}

/// Schema of a nested block (e.g. a VM disk)
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    pub attributes: HashMap<String, AttributeSchema>,
    pub min_items: usize,
    pub max_items: Option<usize>,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_items(mut self, min: usize, max: usize) -> Self {
        self.min_items = min;
        self.max_items = Some(max);
        self
    }

    fn validate_items(&self, items: &[Value]) -> Result<(), TypeError> {
        let max = self.max_items.unwrap_or(usize::MAX);
        if items.len() < self.min_items || items.len() > max {
            return Err(TypeError::ItemCount {
                min: self.min_items,
                max,
                got: items.len(),
            });
        }

        for (index, item) in items.iter().enumerate() {
            let Value::Map(map) = item else {
                return Err(TypeError::ListItemError {
                    index,
                    inner: Box::new(TypeError::TypeMismatch {
                        expected: "Map".to_string(),
                        got: item.type_name(),
                    }),
                });
            };
            if let Some(e) = validate_attributes(&self.attributes, map).into_iter().next() {
                return Err(TypeError::ListItemError {
                    index,
                    inner: Box::new(e),
                });
            }
        }
        Ok(())
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Whether the configuration may set this attribute
    pub optional: bool,
    /// Whether the provider fills this attribute from the remote state
    pub computed: bool,
    /// Changing this attribute requires replacing the resource
    pub force_new: bool,
    /// Sent on create but never reported back, so drift is not detected
    pub write_only: bool,
    pub conflicts_with: Vec<String>,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Key identifying an element of a block set, used to pair old and new elements
    pub identity: Option<fn(&Value) -> String>,
    /// A zero value means the attribute is not set
    pub zero_is_unset: bool,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: true,
            computed: false,
            force_new: false,
            write_only: false,
            conflicts_with: Vec::new(),
            default: None,
            description: None,
            identity: None,
            zero_is_unset: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark as computed. Chain `.optional()` afterwards to also allow configuration.
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn conflicts_with(mut self, other: impl Into<String>) -> Self {
        self.conflicts_with.push(other.into());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_identity(mut self, identity: fn(&Value) -> String) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn zero_is_unset(mut self) -> Self {
        self.zero_is_unset = true;
        self
    }

    /// Whether a configured value stands for "not set"
    pub fn is_unset(&self, value: &Value) -> bool {
        self.zero_is_unset && value.as_float() == Some(0.0)
    }

    /// Computed and not settable from configuration
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let errors = validate_attributes(&self.attributes, attributes);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in schema defaults for attributes (and nested block attributes) left unset
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        apply_defaults(&self.attributes, attributes);
    }
}

fn validate_attributes(
    schemas: &HashMap<String, AttributeSchema>,
    attributes: &HashMap<String, Value>,
) -> Vec<TypeError> {
    let mut errors = Vec::new();

    // Check required attributes
    for (name, schema) in schemas {
        if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
            errors.push(TypeError::MissingRequired { name: name.clone() });
        }
    }

    // Type check each attribute
    for (name, value) in attributes {
        let Some(schema) = schemas.get(name) else {
            // Unknown attributes are allowed (for flexibility)
            continue;
        };

        if schema.is_computed_only() {
            errors.push(TypeError::ComputedOnly { name: name.clone() });
            continue;
        }

        for other in &schema.conflicts_with {
            if attributes.contains_key(other) {
                errors.push(TypeError::Conflict {
                    name: name.clone(),
                    other: other.clone(),
                });
            }
        }

        if let Err(e) = schema.attr_type.validate(value) {
            errors.push(TypeError::AttributeError {
                name: name.clone(),
                inner: Box::new(e),
            });
        }
    }

    errors
}

fn apply_defaults(schemas: &HashMap<String, AttributeSchema>, attributes: &mut HashMap<String, Value>) {
    for (name, schema) in schemas {
        if let Some(default) = &schema.default
            && !attributes.contains_key(name)
        {
            attributes.insert(name.clone(), default.clone());
        }

        if let (Some(block), Some(Value::List(items))) =
            (schema.attr_type.as_block(), attributes.get_mut(name))
        {
            for item in items.iter_mut() {
                if let Value::Map(map) = item {
                    apply_defaults(&block.attributes, map);
                }
            }
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// Non-negative integer type (ids, sizes where 0 means unset)
    pub fn non_negative_int() -> AttributeType {
        AttributeType::Custom {
            name: "NonNegativeInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n >= 0 => Ok(()),
                Value::Int(_) => Err("Value must not be negative".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// Positive fractional number
    pub fn positive_float() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveFloat".to_string(),
            base: Box::new(AttributeType::Float),
            validate: |value| match value.as_float() {
                Some(f) if f > 0.0 => Ok(()),
                Some(_) => Err("Value must be positive".to_string()),
                None => Err("Expected number".to_string()),
            },
        }
    }
}
