//! Concurrency-delegating wrapper: runs inner operations on spawned tasks.
//!
//! Keeps slow inner stages off the caller's task. Ordering guarantees are
//! unchanged because each operation still awaits its own delegation.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    ChildSlot, Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageRef,
    StageValue, StratumError, StratumResult, TypeSignature, ValueRef,
};

pub struct SpawnStage {
    id: ObjectId,
    inner: ChildSlot,
}

impl SpawnStage {
    pub fn new(inner: StageRef) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::next(),
            inner: ChildSlot::new(inner),
        })
    }

    pub(crate) fn inner_slot(&self) -> ChildSlot {
        self.inner.clone()
    }

    fn unwrap_own(&self, value: &ValueRef) -> StratumResult<ValueRef> {
        value
            .as_any()
            .downcast_ref::<SpawnValue>()
            .map(|v| v.inner.clone())
            .ok_or_else(|| {
                StratumError::Type(format!(
                    "spawn stage {} received a value it does not own",
                    self.id
                ))
            })
    }
}

pub struct SpawnValue {
    inner: ValueRef,
}

impl SpawnValue {
    fn wrap(inner: ValueRef) -> ValueRef {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl StageValue for SpawnValue {
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

fn join_failure(err: tokio::task::JoinError) -> StratumError {
    StratumError::Stage(format!("delegated task failed: {}", err))
}

#[async_trait]
impl Stage for SpawnStage {
    fn kind(&self) -> &'static str {
        "SpawnStage"
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
        let inner = self.inner.get();
        let result = tokio::spawn(async move { inner.ingest(material, type_spec).await })
            .await
            .map_err(join_failure)??;
        Ok(SpawnValue::wrap(result))
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let inner = self.inner.get();
        let result = tokio::spawn(async move { inner.invoke(comp, arg).await })
            .await
            .map_err(join_failure)??;
        Ok(SpawnValue::wrap(result))
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let mut unwrapped = Vec::with_capacity(elements.len());
        for element in elements {
            unwrapped.push(NamedElement {
                value: self.unwrap_own(&element.value)?,
                name: element.name,
            });
        }
        let inner = self.inner.get();
        let result = tokio::spawn(async move { inner.combine(unwrapped).await })
            .await
            .map_err(join_failure)??;
        Ok(SpawnValue::wrap(result))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let source = self.unwrap_own(&source)?;
        let inner = self.inner.get();
        let result = tokio::spawn(async move { inner.project(source, selector).await })
            .await
            .map_err(join_failure)??;
        Ok(SpawnValue::wrap(result))
    }

    fn close(&self) {
        self.inner.get().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalStage;
    use serde_json::json;

    #[tokio::test]
    async fn test_delegates_through_a_task() {
        let stage = SpawnStage::new(EvalStage::new());
        let value = stage
            .ingest(Material::data(json!([1.0, 3.0])), None)
            .await
            .unwrap();
        let comp = stage
            .ingest(Material::intrinsic(stratum_core::INTRINSIC_SUM), None)
            .await
            .unwrap();
        let result = stage.invoke(comp, Some(value)).await.unwrap();
        assert_eq!(result.compute().await.unwrap().payload, json!(4.0));
    }

    #[tokio::test]
    async fn test_inner_errors_propagate() {
        let stage = SpawnStage::new(EvalStage::new());
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
