//! Tree dumping: one indented line per stage, pre-order.

use stratum_core::{ChildSlot, SinkRef, StageRef, StratumResult};

use crate::visitor::{visit_from_root, StackVisitor};

struct DumpVisitor {
    sink: SinkRef,
    level: usize,
}

impl StackVisitor for DumpVisitor {
    fn before(&mut self, slot: &ChildSlot) {
        let stage = slot.get();
        self.sink.line(&format!(
            "{}{} {}",
            "  ".repeat(self.level),
            stage.kind(),
            stage.id()
        ));
        self.level += 1;
    }

    fn after(&mut self, _slot: &ChildSlot) {
        self.level -= 1;
    }
}

/// Print the stack shape. Traced wrappers report their inner stage's kind
/// and identity, so dumping a tree before and after instrumentation yields
/// the same lines; dumping twice without mutation is likewise identical.
pub fn dump_stack(sink: &SinkRef, root: &StageRef) -> StratumResult<()> {
    let mut visitor = DumpVisitor {
        sink: sink.clone(),
        level: 0,
    };
    visit_from_root(&mut visitor, root)
}
