//! Remote-delegation leaf.
//!
//! Stands in for a stage running in another process: every operation goes
//! through a connection guard that refuses work once the stage is closed.
//! The transport here is a loopback onto an in-process evaluator; swapping
//! in a real wire client only replaces the `Connection` internals.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageRef, StageValue,
    StratumError, StratumResult, TypeSignature, ValueRef,
};

use crate::eval::EvalStage;

struct Connection {
    target: String,
    open: AtomicBool,
    backend: StageRef,
}

impl Connection {
    fn loopback(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            open: AtomicBool::new(true),
            backend: EvalStage::new(),
        }
    }

    fn backend(&self) -> StratumResult<&StageRef> {
        if self.open.load(Ordering::Acquire) {
            Ok(&self.backend)
        } else {
            Err(StratumError::Closed(format!(
                "connection to '{}' is closed",
                self.target
            )))
        }
    }

    fn shut(&self) {
        // swap keeps repeat closes from re-closing the backend
        if self.open.swap(false, Ordering::AcqRel) {
            self.backend.close();
        }
    }
}

/// Backend failures cross the connection as strings, the way a wire client
/// would report them.
fn remote_failure(err: StratumError) -> StratumError {
    match err {
        err @ (StratumError::Remote(_) | StratumError::Closed(_) | StratumError::Type(_)) => err,
        other => StratumError::Remote(other.to_string()),
    }
}

pub struct RemoteStage {
    id: ObjectId,
    connection: Connection,
}

impl RemoteStage {
    pub fn new(target: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::next(),
            connection: Connection::loopback(target),
        })
    }

    pub fn target(&self) -> &str {
        &self.connection.target
    }

    pub fn is_open(&self) -> bool {
        self.connection.open.load(Ordering::Acquire)
    }

    fn unwrap_own(&self, value: &ValueRef) -> StratumResult<ValueRef> {
        value
            .as_any()
            .downcast_ref::<RemoteValue>()
            .map(|v| v.inner.clone())
            .ok_or_else(|| {
                StratumError::Type(format!(
                    "remote stage {} received a value it does not own",
                    self.id
                ))
            })
    }
}

pub struct RemoteValue {
    inner: ValueRef,
}

impl RemoteValue {
    fn wrap(inner: ValueRef) -> ValueRef {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl StageValue for RemoteValue {
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
impl Stage for RemoteStage {
    fn kind(&self) -> &'static str {
        "RemoteStage"
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
        let value = self
            .connection
            .backend()?
            .ingest(material, type_spec)
            .await
            .map_err(remote_failure)?;
        Ok(RemoteValue::wrap(value))
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let backend = self.connection.backend()?;
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let result = backend.invoke(comp, arg).await.map_err(remote_failure)?;
        Ok(RemoteValue::wrap(result))
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let backend = self.connection.backend()?;
        let mut unwrapped = Vec::with_capacity(elements.len());
        for element in elements {
            unwrapped.push(NamedElement {
                value: self.unwrap_own(&element.value)?,
                name: element.name,
            });
        }
        let result = backend.combine(unwrapped).await.map_err(remote_failure)?;
        Ok(RemoteValue::wrap(result))
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let backend = self.connection.backend()?;
        let source = self.unwrap_own(&source)?;
        let result = backend
            .project(source, selector)
            .await
            .map_err(remote_failure)?;
        Ok(RemoteValue::wrap(result))
    }

    fn close(&self) {
        tracing::debug!(stage = %self.id, target = %self.connection.target, "closing connection");
        self.connection.shut();
    }
}
