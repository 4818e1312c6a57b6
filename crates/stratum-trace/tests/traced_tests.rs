//! Instrumentation wrapper behavior over a synthetic two-level stack.

use std::any::Any;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use serde_json::json;

use stratum_core::{
    BufferSink, ChildSlot, Material, Materialized, NamedElement, ObjectId, Selector, Stage,
    StageRef, StratumError, StratumResult, TypeSignature, ValueRef,
};
use stratum_trace::{
    dump_stack, instrument_stack, IndentStrategy, TracedStage, Tracer,
};

struct EchoValue {
    signature: TypeSignature,
}

#[async_trait]
impl stratum_core::StageValue for EchoValue {
    fn type_signature(&self) -> TypeSignature {
        self.signature.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn compute(&self) -> StratumResult<Materialized> {
        Ok(Materialized::unit())
    }
}

/// Leaf that echoes ingests and optionally fails them.
struct EchoStage {
    id: ObjectId,
    fail_ingest: bool,
}

impl EchoStage {
    fn new(fail_ingest: bool) -> Arc<Self> {
        register_echo_strategies();
        Arc::new(Self {
            id: ObjectId::next(),
            fail_ingest,
        })
    }
}

/// Wrapper that forwards everything to one child.
struct RelayStage {
    id: ObjectId,
    inner: ChildSlot,
}

impl RelayStage {
    fn new(inner: StageRef) -> Arc<Self> {
        register_echo_strategies();
        Arc::new(Self {
            id: ObjectId::next(),
            inner: ChildSlot::new(inner),
        })
    }
}

fn register_echo_strategies() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        stratum_trace::register_recursion_strategy_for::<EchoStage, _>(|_| vec![]);
        stratum_trace::register_recursion_strategy_for::<RelayStage, _>(|s| {
            vec![s.inner.clone()]
        });
    });
}

#[async_trait]
impl Stage for EchoStage {
    fn kind(&self) -> &'static str {
        "EchoStage"
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn ingest(
        &self,
        _material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef> {
        if self.fail_ingest {
            return Err(StratumError::Stage("echo refused the material".into()));
        }
        Ok(Arc::new(EchoValue {
            signature: type_spec.unwrap_or_else(TypeSignature::unknown),
        }))
    }

    async fn invoke(&self, comp: ValueRef, _arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        Ok(comp)
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let signature = TypeSignature::new(format!("tuple[{}]", elements.len()));
        Ok(Arc::new(EchoValue { signature }))
    }

    async fn project(&self, source: ValueRef, _selector: Selector) -> StratumResult<ValueRef> {
        Ok(source)
    }

    fn close(&self) {}
}

#[async_trait]
impl Stage for RelayStage {
    fn kind(&self) -> &'static str {
        "RelayStage"
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
        self.inner.get().ingest(material, type_spec).await
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        self.inner.get().invoke(comp, arg).await
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        self.inner.get().combine(elements).await
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        self.inner.get().project(source, selector).await
    }

    fn close(&self) {
        self.inner.get().close();
    }
}

fn build_relay_over_echo(fail_ingest: bool) -> StageRef {
    RelayStage::new(EchoStage::new(fail_ingest))
}

#[tokio::test]
async fn test_parent_lines_bracket_child_lines() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sink = BufferSink::new();
    let tracer = Tracer::with_strategy(sink.clone(), IndentStrategy::TreeDepth);
    let root = instrument_stack(build_relay_over_echo(false), tracer).unwrap();

    root.ingest(Material::data(json!(1.5)), Some(TypeSignature::new("float64")))
        .await
        .unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("RelayStage"));
    assert!(lines[0].contains("ingest call"));
    assert!(lines[1].starts_with("  EchoStage"));
    assert!(lines[1].contains("ingest call"));
    assert!(lines[2].starts_with("  EchoStage"));
    assert!(lines[2].contains("ingest retr"));
    assert!(lines[3].starts_with("RelayStage"));
    assert!(lines[3].contains("ingest retr"));
}

#[tokio::test]
async fn test_call_depth_strategy_indents_by_live_nesting() {
    let sink = BufferSink::new();
    let tracer = Tracer::with_strategy(sink.clone(), IndentStrategy::CallDepth);
    let root = instrument_stack(build_relay_over_echo(false), tracer.clone()).unwrap();

    root.ingest(Material::Unit, None).await.unwrap();

    let lines = sink.lines();
    // Outer call at depth 0, inner call at depth 1, retr lines back out.
    assert!(!lines[0].starts_with(' '));
    assert!(lines[1].starts_with("  "));
    assert!(!lines[3].starts_with(' '));
    assert_eq!(tracer.call_depth(), 0);
}

#[tokio::test]
async fn test_call_depth_released_on_failure() {
    let sink = BufferSink::new();
    let tracer = Tracer::with_strategy(sink.clone(), IndentStrategy::CallDepth);
    let root = instrument_stack(build_relay_over_echo(true), tracer.clone()).unwrap();

    let err = root.ingest(Material::Unit, None).await.unwrap_err();
    assert!(matches!(err, StratumError::Stage(_)));
    assert_eq!(tracer.call_depth(), 0);

    // No retr lines on the failing path, and the error escaped verbatim.
    let lines = sink.lines();
    assert!(lines.iter().all(|l| !l.contains("retr")));
}

#[tokio::test]
async fn test_wrap_is_idempotent() {
    let sink = BufferSink::new();
    let tracer = Tracer::new(sink.clone());
    let once = TracedStage::wrap(build_relay_over_echo(false), tracer.clone());
    let twice = TracedStage::wrap(once.clone(), tracer.clone());
    assert!(Arc::ptr_eq(&once, &twice));

    // Instrumenting an already-instrumented tree adds no further wrappers.
    let root = instrument_stack(build_relay_over_echo(false), tracer.clone()).unwrap();
    let again = instrument_stack(root, tracer).unwrap();
    again.ingest(Material::Unit, None).await.unwrap();
    let ingest_calls = sink
        .lines()
        .iter()
        .filter(|l| l.contains("ingest call"))
        .count();
    assert_eq!(ingest_calls, 2);
}

#[tokio::test]
async fn test_dump_sees_through_instrumentation() {
    let plain = build_relay_over_echo(false);
    let sink_plain = BufferSink::new();
    let plain_ref: stratum_core::SinkRef = sink_plain.clone();
    dump_stack(&plain_ref, &plain).unwrap();

    let tracer = Tracer::new(BufferSink::new());
    let instrumented = instrument_stack(build_relay_over_echo(false), tracer).unwrap();
    let sink_traced = BufferSink::new();
    let traced_ref: stratum_core::SinkRef = sink_traced.clone();
    dump_stack(&traced_ref, &instrumented).unwrap();

    let kinds = |lines: Vec<String>| -> Vec<String> {
        lines
            .iter()
            .map(|l| l.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    };
    assert_eq!(kinds(sink_plain.lines()), kinds(sink_traced.lines()));

    // Dumping twice without mutation is stable.
    let sink_again = BufferSink::new();
    let again_ref: stratum_core::SinkRef = sink_again.clone();
    dump_stack(&again_ref, &instrumented).unwrap();
    assert_eq!(sink_traced.lines(), sink_again.lines());
}
