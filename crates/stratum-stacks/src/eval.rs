//! Leaf evaluator: the bottom of every stack.
//!
//! Holds a deliberately small placeholder engine: JSON payloads and a few
//! builtin intrinsics, enough for end-to-end traces to carry real values.
//! The production numeric engine lives behind this interface and is not
//! part of this repository.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageValue, StratumError,
    StratumResult, TypeSignature, ValueRef, CompForm,
    INTRINSIC_BROADCAST, INTRINSIC_IDENTITY, INTRINSIC_MEAN, INTRINSIC_SUM,
};

pub struct EvalStage {
    id: ObjectId,
}

impl EvalStage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::next(),
        })
    }
}

pub(crate) enum EvalForm {
    Data(serde_json::Value),
    Intrinsic(String),
    Tuple(Vec<(Option<String>, ValueRef)>),
    Call {
        function: ValueRef,
        argument: Option<ValueRef>,
    },
}

pub struct EvalValue {
    form: EvalForm,
    signature: TypeSignature,
}

impl EvalValue {
    fn new(form: EvalForm, signature: TypeSignature) -> Arc<Self> {
        Arc::new(Self { form, signature })
    }
}

#[async_trait]
impl StageValue for EvalValue {
    fn type_signature(&self) -> TypeSignature {
        self.signature.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn compute(&self) -> StratumResult<Materialized> {
        match &self.form {
            EvalForm::Data(payload) => {
                Ok(Materialized::new(payload.clone(), self.signature.clone()))
            }
            EvalForm::Intrinsic(uri) => Err(StratumError::Stage(format!(
                "intrinsic '{}' is a function, not a materializable value",
                uri
            ))),
            EvalForm::Tuple(elements) => {
                if elements.iter().all(|(name, _)| name.is_some()) && !elements.is_empty() {
                    let mut object = serde_json::Map::new();
                    for (name, value) in elements {
                        let materialized = value.compute().await?;
                        object.insert(name.clone().unwrap_or_default(), materialized.payload);
                    }
                    Ok(Materialized::new(
                        serde_json::Value::Object(object),
                        self.signature.clone(),
                    ))
                } else {
                    let mut array = Vec::with_capacity(elements.len());
                    for (_, value) in elements {
                        array.push(value.compute().await?.payload);
                    }
                    Ok(Materialized::new(
                        serde_json::Value::Array(array),
                        self.signature.clone(),
                    ))
                }
            }
            EvalForm::Call { function, argument } => {
                let function = function
                    .as_any()
                    .downcast_ref::<EvalValue>()
                    .ok_or_else(|| {
                        StratumError::Type("call function is not an evaluator value".to_string())
                    })?;
                let uri = match &function.form {
                    EvalForm::Intrinsic(uri) => uri.clone(),
                    _ => {
                        return Err(StratumError::Type(
                            "call function is not an intrinsic".to_string(),
                        ))
                    }
                };
                let argument = match argument {
                    Some(value) => Some(value.compute().await?),
                    None => None,
                };
                apply_intrinsic(&uri, argument)
            }
        }
    }
}

/// The builtin intrinsic table.
fn apply_intrinsic(uri: &str, argument: Option<Materialized>) -> StratumResult<Materialized> {
    let require_arg = |argument: Option<Materialized>| {
        argument.ok_or_else(|| {
            StratumError::Stage(format!("intrinsic '{}' requires an argument", uri))
        })
    };
    match uri {
        INTRINSIC_IDENTITY | INTRINSIC_BROADCAST => require_arg(argument),
        INTRINSIC_SUM => {
            let arg = require_arg(argument)?;
            let total = numeric_items(&arg)?.into_iter().sum::<f64>();
            Ok(Materialized::new(
                serde_json::json!(total),
                TypeSignature::new("float64"),
            ))
        }
        INTRINSIC_MEAN => {
            let arg = require_arg(argument)?;
            let items = numeric_items(&arg)?;
            if items.is_empty() {
                return Err(StratumError::Stage(
                    "cannot take the mean of an empty collection".to_string(),
                ));
            }
            let mean = items.iter().sum::<f64>() / items.len() as f64;
            Ok(Materialized::new(
                serde_json::json!(mean),
                TypeSignature::new("float64"),
            ))
        }
        other => Err(StratumError::Stage(format!("unknown intrinsic '{}'", other))),
    }
}

fn numeric_items(arg: &Materialized) -> StratumResult<Vec<f64>> {
    let as_number = |value: &serde_json::Value| {
        value.as_f64().ok_or_else(|| {
            StratumError::Type(format!("expected a number, got {}", value))
        })
    };
    match &arg.payload {
        serde_json::Value::Array(items) => items.iter().map(as_number).collect(),
        single => Ok(vec![as_number(single)?]),
    }
}

#[async_trait]
impl Stage for EvalStage {
    fn kind(&self) -> &'static str {
        "EvalStage"
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn ingest(
        &self,
        material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef> {
        let value = match material {
            Material::Unit => EvalValue::new(
                EvalForm::Data(serde_json::Value::Null),
                type_spec.unwrap_or_else(|| TypeSignature::new("unit")),
            ),
            Material::Data(payload) => {
                let signature = type_spec.unwrap_or_else(|| TypeSignature::of_json(&payload));
                EvalValue::new(EvalForm::Data(payload), signature)
            }
            Material::Intrinsic(intrinsic) => {
                let signature =
                    type_spec.unwrap_or_else(|| TypeSignature::new(format!("fn:{}", intrinsic.uri)));
                EvalValue::new(EvalForm::Intrinsic(intrinsic.uri), signature)
            }
            Material::Computation(computation) => match computation.form {
                CompForm::Intrinsic { uri } => {
                    EvalValue::new(EvalForm::Intrinsic(uri), computation.signature)
                }
                CompForm::Constant { value } => {
                    let signature = type_spec.unwrap_or_else(|| TypeSignature::of_json(&value));
                    EvalValue::new(EvalForm::Data(value), signature)
                }
                CompForm::Reference { name } => {
                    return Err(StratumError::Stage(format!(
                        "unresolved reference '{}' reached the evaluator",
                        name
                    )))
                }
            },
        };
        Ok(value)
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let function = comp.as_any().downcast_ref::<EvalValue>().ok_or_else(|| {
            StratumError::Type("evaluator invoked with a foreign value".to_string())
        })?;
        let uri = match &function.form {
            EvalForm::Intrinsic(uri) => uri.clone(),
            _ => {
                return Err(StratumError::Type(
                    "evaluator can only invoke intrinsic values".to_string(),
                ))
            }
        };
        if let Some(arg) = &arg {
            if arg.as_any().downcast_ref::<EvalValue>().is_none() {
                return Err(StratumError::Type(
                    "evaluator invoked with a foreign argument".to_string(),
                ));
            }
        }
        Ok(EvalValue::new(
            EvalForm::Call {
                function: comp.clone(),
                argument: arg,
            },
            TypeSignature::new(format!("result<{}>", uri)),
        ))
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let mut stored = Vec::with_capacity(elements.len());
        for element in elements {
            if element.value.as_any().downcast_ref::<EvalValue>().is_none() {
                return Err(StratumError::Type(
                    "evaluator combined with a foreign element".to_string(),
                ));
            }
            stored.push((element.name, element.value));
        }
        Ok(EvalValue::new(
            EvalForm::Tuple(stored),
            TypeSignature::new("struct"),
        ))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let tuple = source.as_any().downcast_ref::<EvalValue>().ok_or_else(|| {
            StratumError::Type("evaluator projected a foreign value".to_string())
        })?;
        let elements = match &tuple.form {
            EvalForm::Tuple(elements) => elements,
            _ => {
                return Err(StratumError::Type(
                    "projection source is not a combined value".to_string(),
                ))
            }
        };
        let found = match &selector {
            Selector::Index(index) => elements.get(*index).map(|(_, v)| v.clone()),
            Selector::Name(name) => elements
                .iter()
                .find(|(n, _)| n.as_deref() == Some(name.as_str()))
                .map(|(_, v)| v.clone()),
        };
        found.ok_or_else(|| {
            StratumError::Stage(format!("no element at selector {}", selector))
        })
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratum_core::IntrinsicRef;

    #[tokio::test]
    async fn test_ingest_and_compute_data() {
        let stage = EvalStage::new();
        let value = stage
            .ingest(Material::data(json!(2.5)), None)
            .await
            .unwrap();
        assert_eq!(value.type_signature().to_string(), "float64");
        assert_eq!(value.compute().await.unwrap().payload, json!(2.5));
    }

    #[tokio::test]
    async fn test_invoke_mean_intrinsic() {
        let stage = EvalStage::new();
        let comp = stage
            .ingest(Material::Intrinsic(IntrinsicRef::new(INTRINSIC_MEAN)), None)
            .await
            .unwrap();
        let arg = stage
            .ingest(Material::data(json!([1.0, 2.0, 3.0])), None)
            .await
            .unwrap();
        let result = stage.invoke(comp, Some(arg)).await.unwrap();
        assert_eq!(result.compute().await.unwrap().payload, json!(2.0));
    }

    #[tokio::test]
    async fn test_unknown_intrinsic_fails_at_compute() {
        let stage = EvalStage::new();
        let comp = stage
            .ingest(Material::intrinsic("no_such_intrinsic"), None)
            .await
            .unwrap();
        let arg = stage.ingest(Material::data(json!(1)), None).await.unwrap();
        let result = stage.invoke(comp, Some(arg)).await.unwrap();
        let err = result.compute().await.unwrap_err();
        assert!(matches!(err, StratumError::Stage(_)));
    }

    #[tokio::test]
    async fn test_combine_and_project() {
        let stage = EvalStage::new();
        let a = stage.ingest(Material::data(json!(1)), None).await.unwrap();
        let b = stage.ingest(Material::data(json!(2)), None).await.unwrap();
        let tuple = stage
            .combine(vec![
                NamedElement::named("left", a),
                NamedElement::named("right", b.clone()),
            ])
            .await
            .unwrap();
        assert_eq!(
            tuple.compute().await.unwrap().payload,
            json!({"left": 1, "right": 2})
        );

        let picked = stage
            .project(tuple.clone(), Selector::Name("right".into()))
            .await
            .unwrap();
        assert_eq!(picked.compute().await.unwrap().payload, json!(2));

        let err = stage
            .project(tuple, Selector::Index(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StratumError::Stage(_)));
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_rejected() {
        let stage = EvalStage::new();
        let err = stage
            .ingest(
                Material::Computation(stratum_core::ComputationDef::reference("x")),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StratumError::Stage(_)));
    }
}
