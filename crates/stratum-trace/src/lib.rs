//! Stratum Trace: non-invasive observability for stage stacks.
//!
//! Three cooperating pieces:
//! - strategy registries mapping concrete stage types to their children and
//!   concrete value types to display strings,
//! - a pre/post-order visitor over any registered stage tree,
//! - a traced wrapper stage that logs every operation with depth-computed
//!   indentation while delegating unchanged to the stage it wraps.
//!
//! Instrumentation and dumping are applied to stack *factories* through the
//! decorators in [`decorate`], so a built context sees only ordinary stages.

pub mod decorate;
pub mod dump;
pub mod registry;
pub mod traced;
pub mod tracer;
pub mod visitor;

pub use decorate::{dumping, install, instrument_stack, traced};
pub use dump::dump_stack;
pub use registry::{
    children_of, format_object, format_value, register_formatting_strategy,
    register_formatting_strategy_for, register_recursion_strategy,
    register_recursion_strategy_for,
};
pub use traced::TracedStage;
pub use tracer::{DepthGuard, IndentStrategy, Tracer};
pub use visitor::{visit_from_root, visit_stack, StackVisitor};
