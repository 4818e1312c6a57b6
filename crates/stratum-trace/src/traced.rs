//! Instrumentation Wrapper: a stage that logs what it delegates.
//!
//! `TracedStage` implements the same operation interface as the stage it
//! holds, so callers cannot tell the difference. Every operation logs a
//! `call` line with formatted arguments, delegates, and logs a `retr` line
//! with the formatted result. `ingest` and `invoke` may recurse into nested
//! evaluation, so those two also hold the call-depth counter while the
//! inner operation runs; delegation errors propagate unchanged and still
//! release the counter.
//!
//! The wrapper reports its inner stage's kind and identity, and its
//! recursion strategy forwards to the inner stage's, so traversal and
//! dumping see straight through it.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    Material, NamedElement, ObjectId, Selector, Stage, StageRef, StratumResult, TypeSignature,
    ValueRef,
};

use crate::registry::{
    children_of, format_object, format_value, register_recursion_strategy,
};
use crate::tracer::Tracer;

pub struct TracedStage {
    inner: StageRef,
    tracer: Arc<Tracer>,
    depth: AtomicUsize,
}

impl TracedStage {
    /// Wrap a stage. Wrapping an already-traced stage is a no-op, so the
    /// instrumentation pass is idempotent per stage.
    pub fn wrap(stage: StageRef, tracer: Arc<Tracer>) -> StageRef {
        if stage.as_any().is::<TracedStage>() {
            return stage;
        }
        ensure_strategy_registered();
        Arc::new(Self {
            inner: stage,
            tracer,
            depth: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &StageRef {
        &self.inner
    }

    /// Static tree depth, assigned by the instrumentation pass.
    pub fn set_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    fn prefix(&self) -> String {
        format!(
            "{}{} {}",
            self.tracer.indent_for(self.depth.load(Ordering::Relaxed)),
            self.inner.kind(),
            self.inner.id()
        )
    }

    fn fmt_type_spec(spec: &Option<TypeSignature>) -> String {
        match spec {
            Some(signature) => format_object(signature),
            None => "-".to_string(),
        }
    }

    fn fmt_opt_value(value: &Option<ValueRef>) -> String {
        match value {
            Some(value) => format_value(value.as_ref()),
            None => "-".to_string(),
        }
    }

    fn fmt_elements(elements: &[NamedElement]) -> String {
        let parts: Vec<String> = elements
            .iter()
            .map(|e| match &e.name {
                Some(name) => format!("{}={}", name, format_value(e.value.as_ref())),
                None => format_value(e.value.as_ref()),
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

/// The wrapper's recursion strategy is its inner stage's, which keeps
/// instrumented and plain trees structurally identical to every traversal.
fn ensure_strategy_registered() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        register_recursion_strategy(
            std::any::TypeId::of::<TracedStage>(),
            Arc::new(|stage: &dyn Stage| match stage.as_any().downcast_ref::<TracedStage>() {
                Some(traced) => children_of(traced.inner().as_ref()),
                None => Ok(Vec::new()),
            }),
        );
    });
}

#[async_trait]
impl Stage for TracedStage {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn id(&self) -> ObjectId {
        self.inner.id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn ingest(
        &self,
        material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef> {
        self.tracer.line(&format!(
            "{} ingest call {} , {}",
            self.prefix(),
            format_object(&material),
            Self::fmt_type_spec(&type_spec)
        ));
        let res = {
            let _depth = self.tracer.enter();
            self.inner.ingest(material, type_spec).await?
        };
        self.tracer.line(&format!(
            "{} ingest retr {}",
            self.prefix(),
            format_value(res.as_ref())
        ));
        Ok(res)
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        self.tracer.line(&format!(
            "{} invoke call {} , {}",
            self.prefix(),
            format_value(comp.as_ref()),
            Self::fmt_opt_value(&arg)
        ));
        let res = {
            let _depth = self.tracer.enter();
            self.inner.invoke(comp, arg).await?
        };
        self.tracer.line(&format!(
            "{} invoke retr {}",
            self.prefix(),
            format_value(res.as_ref())
        ));
        Ok(res)
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        self.tracer.line(&format!(
            "{} combine call {}",
            self.prefix(),
            Self::fmt_elements(&elements)
        ));
        let res = self.inner.combine(elements).await?;
        self.tracer.line(&format!(
            "{} combine retr {}",
            self.prefix(),
            format_value(res.as_ref())
        ));
        Ok(res)
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        self.tracer.line(&format!(
            "{} project call {} {}",
            self.prefix(),
            format_value(source.as_ref()),
            format_object(&selector)
        ));
        let res = self.inner.project(source, selector).await?;
        self.tracer.line(&format!(
            "{} project retr {}",
            self.prefix(),
            format_value(res.as_ref())
        ));
        Ok(res)
    }

    fn close(&self) {
        self.inner.close();
    }
}
