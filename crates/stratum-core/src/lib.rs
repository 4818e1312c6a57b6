//! Stratum Core: the Stage contract, value model, and execution context.
//!
//! A stratum stack is a tree of composable stages. Each stage implements the
//! same four asynchronous operations (ingest, invoke, combine, project) and
//! delegates to the stages below it, so cross-cutting behavior (caching,
//! task delegation, fan-out, tracing) is added by stacking rather than by
//! editing any single stage.

pub mod context;
pub mod error;
pub mod material;
pub mod sink;
pub mod stage;

pub use context::{ExecutionContext, Placement, StackFactory};
pub use error::{StratumError, StratumResult};
pub use material::{
    CompForm, ComputationDef, IntrinsicRef, Material, Materialized, TypeSignature,
    INTRINSIC_BROADCAST, INTRINSIC_IDENTITY, INTRINSIC_MEAN, INTRINSIC_SUM,
};
pub use sink::{BufferSink, SinkRef, StdoutSink, TraceSink};
pub use stage::{ChildSlot, NamedElement, ObjectId, Selector, Stage, StageRef, StageValue, ValueRef};

/// Version of the stratum engine
pub const STRATUM_VERSION: &str = "0.1.0";
