//! Pass-through security-annotation stage.
//!
//! Forwards every operation to its inner stage unchanged, but inspects
//! ingested material for audited intrinsics and emits a diagnostic when one
//! enters the stack. This is also the reference for the minimal extension
//! contract: implement the four operations, wrap results in your own value
//! type, and register a recursion strategy naming your children; no other
//! component changes.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    ChildSlot, Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageRef,
    StageValue, StratumError, StratumResult, TypeSignature, ValueRef, INTRINSIC_MEAN,
};

/// Intrinsics whose ingestion is worth a diagnostic: aggregations that move
/// client data toward the server.
pub const AUDITED_INTRINSICS: &[&str] = &[INTRINSIC_MEAN];

pub struct SecureStage {
    id: ObjectId,
    inner: ChildSlot,
}

impl SecureStage {
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
            .downcast_ref::<SecureValue>()
            .map(|v| v.inner.clone())
            .ok_or_else(|| {
                StratumError::Type(format!(
                    "secure stage {} received a value it does not own",
                    self.id
                ))
            })
    }
}

pub struct SecureValue {
    inner: ValueRef,
}

impl SecureValue {
    fn wrap(inner: ValueRef) -> ValueRef {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl StageValue for SecureValue {
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
impl Stage for SecureStage {
    fn kind(&self) -> &'static str {
        "SecureStage"
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
        if let Some(uri) = material.intrinsic_uri() {
            if AUDITED_INTRINSICS.contains(&uri) {
                tracing::warn!(stage = %self.id, uri, "audited intrinsic entering the stack");
            }
        }
        let value = self.inner.get().ingest(material, type_spec).await?;
        Ok(SecureValue::wrap(value))
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let result = self.inner.get().invoke(comp, arg).await?;
        Ok(SecureValue::wrap(result))
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let mut unwrapped = Vec::with_capacity(elements.len());
        for element in elements {
            unwrapped.push(NamedElement {
                value: self.unwrap_own(&element.value)?,
                name: element.name,
            });
        }
        let result = self.inner.get().combine(unwrapped).await?;
        Ok(SecureValue::wrap(result))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let source = self.unwrap_own(&source)?;
        let result = self.inner.get().project(source, selector).await?;
        Ok(SecureValue::wrap(result))
    }

    fn close(&self) {
        self.inner.get().close();
    }
}
