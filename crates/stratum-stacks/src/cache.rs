//! Caching wrapper: memoizes `ingest` by content hash.
//!
//! The key is a blake3 hash over the serialized material and type spec, so
//! re-ingesting identical material returns the identical value without
//! touching the stages below. Other operations delegate unconditionally.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use stratum_core::{
    ChildSlot, Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageRef,
    StageValue, StratumError, StratumResult, TypeSignature, ValueRef,
};

pub struct CachingStage {
    id: ObjectId,
    inner: ChildSlot,
    cache: RwLock<HashMap<String, ValueRef>>,
}

impl CachingStage {
    pub fn new(inner: StageRef) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::next(),
            inner: ChildSlot::new(inner),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn inner_slot(&self) -> ChildSlot {
        self.inner.clone()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    fn cache_key(
        material: &Material,
        type_spec: &Option<TypeSignature>,
    ) -> StratumResult<String> {
        let bytes = serde_json::to_vec(&(material, type_spec)).map_err(|e| {
            StratumError::Stage(format!("material is not hashable: {}", e))
        })?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    fn unwrap_own(&self, value: &ValueRef) -> StratumResult<ValueRef> {
        value
            .as_any()
            .downcast_ref::<CachedValue>()
            .map(|v| v.inner.clone())
            .ok_or_else(|| {
                StratumError::Type(format!(
                    "caching stage {} received a value it does not own",
                    self.id
                ))
            })
    }
}

pub struct CachedValue {
    inner: ValueRef,
}

impl CachedValue {
    fn wrap(inner: ValueRef) -> ValueRef {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl StageValue for CachedValue {
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
impl Stage for CachingStage {
    fn kind(&self) -> &'static str {
        "CachingStage"
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
        let key = Self::cache_key(&material, &type_spec)?;
        if let Some(hit) = self.cache.read().get(&key) {
            tracing::debug!(stage = %self.id, key = %key, "ingest cache hit");
            return Ok(hit.clone());
        }
        let value = self.inner.get().ingest(material, type_spec).await?;
        let wrapped = CachedValue::wrap(value);
        self.cache.write().insert(key, wrapped.clone());
        Ok(wrapped)
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let result = self.inner.get().invoke(comp, arg).await?;
        Ok(CachedValue::wrap(result))
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
        Ok(CachedValue::wrap(result))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let source = self.unwrap_own(&source)?;
        let result = self.inner.get().project(source, selector).await?;
        Ok(CachedValue::wrap(result))
    }

    fn close(&self) {
        self.cache.write().clear();
        self.inner.get().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalStage;
    use serde_json::json;

    #[tokio::test]
    async fn test_repeat_ingest_returns_the_cached_value() {
        let stage = CachingStage::new(EvalStage::new());
        let first = stage
            .ingest(Material::data(json!(7)), None)
            .await
            .unwrap();
        let second = stage
            .ingest(Material::data(json!(7)), None)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stage.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_material_misses() {
        let stage = CachingStage::new(EvalStage::new());
        let first = stage
            .ingest(Material::data(json!(7)), None)
            .await
            .unwrap();
        let other = stage
            .ingest(Material::data(json!(8)), None)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(stage.cached_count(), 2);
    }

    #[tokio::test]
    async fn test_type_spec_is_part_of_the_key() {
        let stage = CachingStage::new(EvalStage::new());
        let untyped = stage
            .ingest(Material::data(json!(7)), None)
            .await
            .unwrap();
        let typed = stage
            .ingest(
                Material::data(json!(7)),
                Some(TypeSignature::new("int64")),
            )
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&untyped, &typed));
    }

    #[tokio::test]
    async fn test_close_clears_the_cache() {
        let stage = CachingStage::new(EvalStage::new());
        stage
            .ingest(Material::data(json!(7)), None)
            .await
            .unwrap();
        assert_eq!(stage.cached_count(), 1);
        stage.close();
        assert_eq!(stage.cached_count(), 0);
    }
}
