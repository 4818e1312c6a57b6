//! Stack Visitor: depth-first traversal over a registered stage tree.

use stratum_core::{ChildSlot, StageRef, StratumResult};

use crate::registry::children_of;

/// Pre/post-order callbacks over child edges. The visitor receives the
/// [`ChildSlot`] rather than the stage so an instrumentation pass can swap
/// the edge in place; read-only passes just call `slot.get()`.
pub trait StackVisitor {
    fn before(&mut self, slot: &ChildSlot);
    fn after(&mut self, slot: &ChildSlot);
}

/// Visit every node exactly once: `before`, children in the order the
/// recursion strategy returns them, then `after`. Fails only when a node's
/// type has no registered recursion strategy.
pub fn visit_stack(visitor: &mut dyn StackVisitor, root: &ChildSlot) -> StratumResult<()> {
    visitor.before(root);
    // Re-read after `before`: the visitor may have swapped the edge.
    let stage = root.get();
    for child in children_of(stage.as_ref())? {
        visit_stack(visitor, &child)?;
    }
    visitor.after(root);
    Ok(())
}

/// Traverse from a bare root stage, wrapping it in a throwaway edge.
pub fn visit_from_root(visitor: &mut dyn StackVisitor, root: &StageRef) -> StratumResult<()> {
    visit_stack(visitor, &ChildSlot::new(root.clone()))
}
