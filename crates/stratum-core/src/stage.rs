//! Stage Trait: the single contract every stack node satisfies.
//!
//! A stage implements four asynchronous operations plus `close`. Wrapper
//! stages own exactly one child, fan-out stages own named child groups;
//! either way children are held through [`ChildSlot`] so an instrumentation
//! pass can interpose on a built tree without touching stage logic.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StratumResult;
use crate::material::{Material, Materialized, TypeSignature};

pub type StageRef = Arc<dyn Stage>;
pub type ValueRef = Arc<dyn StageValue>;

/// Process-unique identity for logged objects (stages, contexts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate the next identity.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ObjectId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}", self.0)
    }
}

/// One element of a `combine` call: an optionally named value.
#[derive(Clone)]
pub struct NamedElement {
    pub name: Option<String>,
    pub value: ValueRef,
}

impl NamedElement {
    pub fn named(name: impl Into<String>, value: ValueRef) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn unnamed(value: ValueRef) -> Self {
        Self { name: None, value }
    }
}

/// How `project` addresses into a combined value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    Index(usize),
    Name(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "[{}]", i),
            Selector::Name(n) => write!(f, ".{}", n),
        }
    }
}

/// A child edge in the stage tree.
///
/// Stages call through the slot on every delegation, so replacing its
/// content (the instrumentation pass does) reroutes all subsequent calls
/// without the owning stage noticing.
#[derive(Clone, Debug)]
pub struct ChildSlot(Arc<RwLock<StageRef>>);

impl ChildSlot {
    pub fn new(stage: StageRef) -> Self {
        Self(Arc::new(RwLock::new(stage)))
    }

    /// Current occupant of the slot.
    pub fn get(&self) -> StageRef {
        self.0.read().clone()
    }

    /// Swap the occupant, returning the previous one.
    pub fn replace(&self, stage: StageRef) -> StageRef {
        std::mem::replace(&mut *self.0.write(), stage)
    }
}

/// A node in the execution stack.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Stage kind, e.g. "EvalStage". Used in dump and trace prefixes.
    fn kind(&self) -> &'static str;

    /// Identity used in dump and trace prefixes.
    fn id(&self) -> ObjectId;

    /// Concrete-type access for the strategy registries.
    fn as_any(&self) -> &dyn Any;

    /// Accept raw material, returning a value owned by this stage.
    async fn ingest(
        &self,
        material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef>;

    /// Apply a computation value to an optional argument value.
    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef>;

    /// Combine an ordered sequence of named elements into one value.
    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef>;

    /// Project one constituent out of a combined value.
    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef>;

    /// Release owned resources and propagate to children.
    fn close(&self);
}

impl fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

/// The opaque result of a stage operation.
#[async_trait]
pub trait StageValue: Send + Sync + 'static {
    /// Display-only type of this value.
    fn type_signature(&self) -> TypeSignature;

    /// Concrete-type access for the formatting registry.
    fn as_any(&self) -> &dyn Any;

    /// Resolve to a concrete materialized value.
    async fn compute(&self) -> StratumResult<Materialized>;
}

impl fmt::Debug for dyn StageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageValue")
            .field("type_signature", &self.type_signature())
            .finish()
    }
}
