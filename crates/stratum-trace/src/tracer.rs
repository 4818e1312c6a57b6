//! Call-Depth Tracker & Indentation.
//!
//! A `Tracer` is the one piece of state shared by every traced stage in a
//! stack: the sink, the indentation strategy, and the live call-depth
//! counter. It is passed explicitly into instrumentation rather than living
//! in an ambient global.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use stratum_core::{SinkRef, StratumError};

/// How trace indentation is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndentStrategy {
    /// Indent by the node's static position in the tree, assigned once by
    /// the instrumentation pass. Unaffected by concurrency.
    TreeDepth,
    /// Indent by the live nesting depth of in-flight operation calls across
    /// the whole tree. Under concurrent chains the counter is shared, so
    /// the indentation is only approximately accurate.
    CallDepth,
}

impl FromStr for IndentStrategy {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree-depth" => Ok(IndentStrategy::TreeDepth),
            "call-depth" => Ok(IndentStrategy::CallDepth),
            other => Err(StratumError::Config(format!(
                "unknown indentation strategy '{}'",
                other
            ))),
        }
    }
}

const STRATEGY_TREE: u8 = 0;
const STRATEGY_CALL: u8 = 1;

pub struct Tracer {
    sink: SinkRef,
    strategy: AtomicU8,
    call_depth: AtomicUsize,
}

impl Tracer {
    /// Call-depth indentation by default, matching the historical behavior
    /// of this trace surface.
    pub fn new(sink: SinkRef) -> Arc<Self> {
        Self::with_strategy(sink, IndentStrategy::CallDepth)
    }

    pub fn with_strategy(sink: SinkRef, strategy: IndentStrategy) -> Arc<Self> {
        let tracer = Arc::new(Self {
            sink,
            strategy: AtomicU8::new(STRATEGY_TREE),
            call_depth: AtomicUsize::new(0),
        });
        tracer.set_strategy(strategy);
        tracer
    }

    pub fn strategy(&self) -> IndentStrategy {
        match self.strategy.load(Ordering::Relaxed) {
            STRATEGY_CALL => IndentStrategy::CallDepth,
            _ => IndentStrategy::TreeDepth,
        }
    }

    /// Switching mid-run is legal; it affects only subsequent lines.
    pub fn set_strategy(&self, strategy: IndentStrategy) {
        let raw = match strategy {
            IndentStrategy::TreeDepth => STRATEGY_TREE,
            IndentStrategy::CallDepth => STRATEGY_CALL,
        };
        self.strategy.store(raw, Ordering::Relaxed);
    }

    pub fn call_depth(&self) -> usize {
        self.call_depth.load(Ordering::Relaxed)
    }

    /// Indentation for a line emitted by a stage at `tree_depth`.
    pub fn indent_for(&self, tree_depth: usize) -> String {
        let level = match self.strategy() {
            IndentStrategy::TreeDepth => tree_depth,
            IndentStrategy::CallDepth => self.call_depth(),
        };
        "  ".repeat(level)
    }

    /// Bump the call depth for the duration of a delegation. The guard
    /// releases on drop, so the failing path stays symmetric with the
    /// successful one.
    pub fn enter(&self) -> DepthGuard<'_> {
        self.call_depth.fetch_add(1, Ordering::Relaxed);
        DepthGuard { tracer: self }
    }

    pub fn line(&self, line: &str) {
        self.sink.line(line);
    }
}

pub struct DepthGuard<'a> {
    tracer: &'a Tracer,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.tracer.call_depth.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::BufferSink;

    #[test]
    fn test_depth_guard_is_symmetric_on_early_exit() {
        let tracer = Tracer::new(BufferSink::new());
        assert_eq!(tracer.call_depth(), 0);
        {
            let _outer = tracer.enter();
            let _inner = tracer.enter();
            assert_eq!(tracer.call_depth(), 2);
        }
        assert_eq!(tracer.call_depth(), 0);

        let result: Result<(), &str> = (|| {
            let _guard = tracer.enter();
            Err("delegation failed")
        })();
        assert!(result.is_err());
        assert_eq!(tracer.call_depth(), 0);
    }

    #[test]
    fn test_indent_follows_active_strategy() {
        let tracer = Tracer::with_strategy(BufferSink::new(), IndentStrategy::TreeDepth);
        assert_eq!(tracer.indent_for(2), "    ");
        let _guard = tracer.enter();
        assert_eq!(tracer.indent_for(2), "    ");
        tracer.set_strategy(IndentStrategy::CallDepth);
        assert_eq!(tracer.indent_for(2), "  ");
    }

    #[test]
    fn test_unknown_strategy_name_is_a_config_error() {
        assert!("tree-depth".parse::<IndentStrategy>().is_ok());
        assert!("call-depth".parse::<IndentStrategy>().is_ok());
        let err = "spiral".parse::<IndentStrategy>().unwrap_err();
        assert!(err.to_string().starts_with("CONFIG/"));
    }
}
