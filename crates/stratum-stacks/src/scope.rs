//! Scope-resolving wrapper.
//!
//! Resolves `Reference` computations against names recorded from earlier
//! `combine` calls, so the stages below only ever see concrete material.
//! Everything it cannot answer locally is delegated unchanged.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use stratum_core::{
    ChildSlot, CompForm, Material, Materialized, NamedElement, ObjectId, Selector, Stage,
    StageRef, StageValue, StratumError, StratumResult, TypeSignature, ValueRef,
};

pub struct ScopeStage {
    id: ObjectId,
    inner: ChildSlot,
    bindings: RwLock<HashMap<String, ValueRef>>,
}

impl ScopeStage {
    pub fn new(inner: StageRef) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::next(),
            inner: ChildSlot::new(inner),
            bindings: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn inner_slot(&self) -> ChildSlot {
        self.inner.clone()
    }

    fn unwrap_own(&self, value: &ValueRef) -> StratumResult<ValueRef> {
        value
            .as_any()
            .downcast_ref::<ScopeValue>()
            .map(|v| v.inner.clone())
            .ok_or_else(|| {
                StratumError::Type(format!(
                    "scope stage {} received a value it does not own",
                    self.id
                ))
            })
    }
}

pub struct ScopeValue {
    inner: ValueRef,
}

impl ScopeValue {
    fn wrap(inner: ValueRef) -> ValueRef {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl StageValue for ScopeValue {
    fn type_signature(&self) -> TypeSignature {
        self.inner.type_signature()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn compute(&self) -> StratumResult<Materialized> {
        self.inner.compute().await
    }
}

#[async_trait]
impl Stage for ScopeStage {
    fn kind(&self) -> &'static str {
        "ScopeStage"
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
        if let Material::Computation(computation) = &material {
            if let CompForm::Reference { name } = &computation.form {
                let bound = self.bindings.read().get(name).cloned();
                return match bound {
                    Some(value) => Ok(ScopeValue::wrap(value)),
                    None => Err(StratumError::Stage(format!(
                        "unbound reference '{}'",
                        name
                    ))),
                };
            }
        }
        let value = self.inner.get().ingest(material, type_spec).await?;
        Ok(ScopeValue::wrap(value))
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let result = self.inner.get().invoke(comp, arg).await?;
        Ok(ScopeValue::wrap(result))
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let mut unwrapped = Vec::with_capacity(elements.len());
        for element in elements {
            let value = self.unwrap_own(&element.value)?;
            if let Some(name) = &element.name {
                self.bindings.write().insert(name.clone(), value.clone());
            }
            unwrapped.push(NamedElement {
                name: element.name,
                value,
            });
        }
        let result = self.inner.get().combine(unwrapped).await?;
        Ok(ScopeValue::wrap(result))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let source = self.unwrap_own(&source)?;
        let result = self.inner.get().project(source, selector).await?;
        Ok(ScopeValue::wrap(result))
    }

    fn close(&self) {
        self.bindings.write().clear();
        self.inner.get().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalStage;
    use serde_json::json;
    use stratum_core::ComputationDef;

    #[tokio::test]
    async fn test_combine_binds_names_for_later_references() {
        let stage = ScopeStage::new(EvalStage::new());
        let value = stage
            .ingest(Material::data(json!(41)), None)
            .await
            .unwrap();
        stage
            .combine(vec![NamedElement::named("x", value)])
            .await
            .unwrap();

        let resolved = stage
            .ingest(
                Material::Computation(ComputationDef::reference("x")),
                None,
            )
            .await
            .unwrap();
        assert_eq!(resolved.compute().await.unwrap().payload, json!(41));
    }

    #[tokio::test]
    async fn test_unbound_reference_fails() {
        let stage = ScopeStage::new(EvalStage::new());
        let err = stage
            .ingest(
                Material::Computation(ComputationDef::reference("missing")),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unbound reference"));
    }

    #[tokio::test]
    async fn test_foreign_value_is_rejected() {
        let scope_a = ScopeStage::new(EvalStage::new());
        let scope_b = ScopeStage::new(EvalStage::new());
        let comp = scope_a
            .ingest(Material::intrinsic("identity"), None)
            .await
            .unwrap();
        let raw = scope_b
            .ingest(Material::data(json!(1)), None)
            .await
            .unwrap();
        // A value from another scope unwraps fine (same concrete type), but
        // a bare evaluator value does not.
        let foreign = scope_b.unwrap_own(&raw).unwrap();
        let err = scope_a.invoke(comp, Some(foreign)).await.unwrap_err();
        assert!(matches!(err, StratumError::Type(_)));
    }
}
