//! Factory decorators: add dumping and instrumentation to a stack factory
//! by function composition, leaving the factory signature unchanged.

use std::sync::Arc;

use stratum_core::{
    ChildSlot, ExecutionContext, Placement, SinkRef, StackFactory, StageRef, StratumResult,
};

use crate::dump::dump_stack;
use crate::traced::TracedStage;
use crate::tracer::Tracer;
use crate::visitor::{visit_stack, StackVisitor};

struct InstrumentVisitor {
    tracer: Arc<Tracer>,
    level: usize,
}

impl StackVisitor for InstrumentVisitor {
    fn before(&mut self, slot: &ChildSlot) {
        let wrapped = TracedStage::wrap(slot.get(), self.tracer.clone());
        if let Some(traced) = wrapped.as_any().downcast_ref::<TracedStage>() {
            traced.set_depth(self.level);
        }
        slot.replace(wrapped);
        self.level += 1;
    }

    fn after(&mut self, _slot: &ChildSlot) {
        self.level -= 1;
    }
}

/// Interpose a traced wrapper on every child edge of a built tree (and on
/// the root), assigning each wrapper its static tree depth. Stage logic is
/// untouched; applying the pass twice changes nothing.
pub fn instrument_stack(root: StageRef, tracer: Arc<Tracer>) -> StratumResult<StageRef> {
    let slot = ChildSlot::new(root);
    let mut visitor = InstrumentVisitor {
        tracer,
        level: 0,
    };
    visit_stack(&mut visitor, &slot)?;
    let root = slot.get();
    tracing::debug!(root = root.kind(), "stack instrumented");
    Ok(root)
}

/// Decorate a factory to dump every stack it builds.
pub fn dumping(factory: StackFactory, sink: SinkRef) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        let root = factory(placement)?;
        sink.line("created execution stack");
        dump_stack(&sink, &root)?;
        Ok(root)
    })
}

/// Decorate a factory to instrument every stack it builds.
pub fn traced(factory: StackFactory, tracer: Arc<Tracer>) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        let root = factory(placement)?;
        instrument_stack(root, tracer.clone())
    })
}

/// Compose the standard debugging setup: instrument, dump on construction,
/// and return a ready execution context that logs its own operations.
pub fn install(
    factory: StackFactory,
    tracer: Arc<Tracer>,
    sink: SinkRef,
    placement: &Placement,
) -> StratumResult<ExecutionContext> {
    let factory = dumping(traced(factory, tracer), sink.clone());
    Ok(ExecutionContext::new(&factory, placement)?.with_sink(sink))
}
