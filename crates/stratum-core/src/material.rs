//! Material: what callers hand to a stack, and what comes back out.
//!
//! Stages never interpret tensor payloads or wire formats; everything a
//! stack ingests is carried as JSON plus a display-only type signature. The
//! real computation engine lives below the bottom stage and is out of scope
//! here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known intrinsic URIs understood by the leaf evaluator.
pub const INTRINSIC_IDENTITY: &str = "identity";
pub const INTRINSIC_SUM: &str = "sum";
pub const INTRINSIC_MEAN: &str = "federated_mean";
pub const INTRINSIC_BROADCAST: &str = "federated_broadcast";

/// Display-only description of a value's type. Opaque to every stage; it is
/// carried along and printed, never inspected for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature(String);

impl TypeSignature {
    pub fn new(repr: impl Into<String>) -> Self {
        Self(repr.into())
    }

    pub fn unknown() -> Self {
        Self("?".to_string())
    }

    /// Best-effort signature for a raw JSON payload.
    pub fn of_json(value: &serde_json::Value) -> Self {
        let repr = match value {
            serde_json::Value::Null => "unit",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(n) if n.is_f64() => "float64",
            serde_json::Value::Number(_) => "int64",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "list",
            serde_json::Value::Object(_) => "struct",
        };
        Self(repr.to_string())
    }

    /// Signature of a federated placement over `member`.
    pub fn federated(member: &TypeSignature) -> Self {
        Self(format!("{{{}}}@federated", member.0))
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an intrinsic function by URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrinsicRef {
    pub uri: String,
}

impl IntrinsicRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// The body of a serialized computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompForm {
    /// Call an intrinsic by URI.
    Intrinsic { uri: String },
    /// A literal constant.
    Constant { value: serde_json::Value },
    /// A reference into the enclosing scope, resolved by a scope stage.
    Reference { name: String },
}

/// An opaque computation handed to a stack for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationDef {
    pub form: CompForm,
    pub signature: TypeSignature,
}

impl ComputationDef {
    pub fn intrinsic(uri: impl Into<String>, signature: TypeSignature) -> Self {
        Self {
            form: CompForm::Intrinsic { uri: uri.into() },
            signature,
        }
    }

    pub fn constant(value: serde_json::Value) -> Self {
        let signature = TypeSignature::of_json(&value);
        Self {
            form: CompForm::Constant { value },
            signature,
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            form: CompForm::Reference { name: name.into() },
            signature: TypeSignature::unknown(),
        }
    }

    /// URI of the intrinsic this computation calls, if it is one.
    pub fn intrinsic_uri(&self) -> Option<&str> {
        match &self.form {
            CompForm::Intrinsic { uri } => Some(uri),
            _ => None,
        }
    }
}

/// Raw material accepted by a stage's `ingest` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Material {
    /// Nothing; the unit payload.
    Unit,
    /// A plain data payload.
    Data(serde_json::Value),
    /// A bare intrinsic reference.
    Intrinsic(IntrinsicRef),
    /// A serialized computation.
    Computation(ComputationDef),
}

impl Material {
    pub fn data(value: serde_json::Value) -> Self {
        Material::Data(value)
    }

    pub fn intrinsic(uri: impl Into<String>) -> Self {
        Material::Intrinsic(IntrinsicRef::new(uri))
    }

    /// URI of the intrinsic this material names, whether bare or wrapped in
    /// a computation.
    pub fn intrinsic_uri(&self) -> Option<&str> {
        match self {
            Material::Intrinsic(r) => Some(&r.uri),
            Material::Computation(c) => c.intrinsic_uri(),
            _ => None,
        }
    }
}

/// A fully materialized result, produced by `StageValue::compute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materialized {
    pub payload: serde_json::Value,
    pub signature: TypeSignature,
}

impl Materialized {
    pub fn new(payload: serde_json::Value, signature: TypeSignature) -> Self {
        Self { payload, signature }
    }

    pub fn unit() -> Self {
        Self {
            payload: serde_json::Value::Null,
            signature: TypeSignature::new("unit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_of_json() {
        assert_eq!(TypeSignature::of_json(&json!(1.5)).to_string(), "float64");
        assert_eq!(TypeSignature::of_json(&json!(3)).to_string(), "int64");
        assert_eq!(TypeSignature::of_json(&json!([1, 2])).to_string(), "list");
        assert_eq!(TypeSignature::of_json(&json!(null)).to_string(), "unit");
    }

    #[test]
    fn test_federated_signature_display() {
        let member = TypeSignature::new("float64");
        assert_eq!(
            TypeSignature::federated(&member).to_string(),
            "{float64}@federated"
        );
    }

    #[test]
    fn test_material_intrinsic_uri() {
        assert_eq!(
            Material::intrinsic(INTRINSIC_MEAN).intrinsic_uri(),
            Some(INTRINSIC_MEAN)
        );
        let comp = Material::Computation(ComputationDef::intrinsic(
            INTRINSIC_SUM,
            TypeSignature::unknown(),
        ));
        assert_eq!(comp.intrinsic_uri(), Some(INTRINSIC_SUM));
        assert_eq!(Material::data(json!(1)).intrinsic_uri(), None);
        assert_eq!(
            Material::Computation(ComputationDef::constant(json!(2))).intrinsic_uri(),
            None
        );
    }
}
