//! Execution Context: a built stack installed for use.
//!
//! A context owns one stack built by a [`StackFactory`] for a given
//! placement. The stack is built fresh per context, used for any number of
//! operations, and closed when the context is torn down. With a sink
//! attached, the context logs its own (unindented) `call`/`retr` lines for
//! every operation it forwards to the root stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::StratumResult;
use crate::material::{Material, TypeSignature};
use crate::sink::SinkRef;
use crate::stage::{ObjectId, StageRef, ValueRef};

/// Placement cardinalities handed to a factory at build time, e.g.
/// `{"clients": 3}`. Factories may ignore it if their topology is fixed.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    cardinalities: HashMap<String, usize>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cardinality(mut self, placement: impl Into<String>, count: usize) -> Self {
        self.cardinalities.insert(placement.into(), count);
        self
    }

    pub fn cardinality(&self, placement: &str) -> Option<usize> {
        self.cardinalities.get(placement).copied()
    }
}

/// Builds a fresh stage tree for a placement. Decorators wrap factories,
/// returning new factories with the identical signature.
pub type StackFactory = Arc<dyn Fn(&Placement) -> StratumResult<StageRef> + Send + Sync>;

pub struct ExecutionContext {
    id: ObjectId,
    root: StageRef,
    sink: Option<SinkRef>,
    closed: AtomicBool,
}

impl ExecutionContext {
    /// Build the stack for `placement` and take ownership of it.
    pub fn new(factory: &StackFactory, placement: &Placement) -> StratumResult<Self> {
        let root = factory(placement)?;
        let id = ObjectId::next();
        tracing::debug!(context = %id, root = root.kind(), "execution context created");
        Ok(Self {
            id,
            root,
            sink: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Attach a sink for the context's own operation lines.
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn root(&self) -> &StageRef {
        &self.root
    }

    pub async fn ingest(
        &self,
        material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef> {
        if let Some(sink) = &self.sink {
            let spec = type_spec
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            sink.line(&format!(
                "ExecutionContext {} ingest call {:?} , {}",
                self.id, material, spec
            ));
        }
        let res = self.root.ingest(material, type_spec).await?;
        if let Some(sink) = &self.sink {
            sink.line(&format!(
                "ExecutionContext {} ingest retr <{}>",
                self.id,
                res.type_signature()
            ));
        }
        Ok(res)
    }

    pub async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        if let Some(sink) = &self.sink {
            let arg_sig = arg
                .as_ref()
                .map(|v| format!("<{}>", v.type_signature()))
                .unwrap_or_else(|| "-".to_string());
            sink.line(&format!(
                "ExecutionContext {} invoke call <{}> , {}",
                self.id,
                comp.type_signature(),
                arg_sig
            ));
        }
        let res = self.root.invoke(comp, arg).await?;
        if let Some(sink) = &self.sink {
            sink.line(&format!(
                "ExecutionContext {} invoke retr <{}>",
                self.id,
                res.type_signature()
            ));
        }
        Ok(res)
    }

    /// Close the stack. Idempotent; only the first call propagates.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(context = %self.id, "execution context closed");
        self.root.close();
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.close();
    }
}
