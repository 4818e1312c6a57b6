//! Prebuilt stack factories.
//!
//! Each factory builds a fresh tree per call, so contexts never share
//! stages. Every factory registers the builtin strategies first; a stack
//! built here can always be walked and instrumented.

use std::sync::Arc;

use stratum_core::{Placement, StackFactory, StageRef, StratumError, StratumResult};

use crate::cache::CachingStage;
use crate::eval::EvalStage;
use crate::fanout::FanOutStage;
use crate::remote::RemoteStage;
use crate::scope::ScopeStage;
use crate::secure::SecureStage;
use crate::spawn::SpawnStage;
use crate::register_builtin_strategies;

/// How many clients a stack serves.
#[derive(Debug, Clone)]
pub enum Topology {
    /// A fixed number of anonymous clients.
    Count(usize),
    /// One client per named remote worker.
    Named(Vec<String>),
}

impl Topology {
    pub fn client_count(&self) -> usize {
        match self {
            Topology::Count(count) => *count,
            Topology::Named(targets) => targets.len(),
        }
    }
}

/// The `clients` cardinality in the placement wins over the topology's own
/// count, so one factory serves differently sized rounds.
fn resolve_client_count(topology: &Topology, placement: &Placement) -> StratumResult<usize> {
    let count = placement
        .cardinality("clients")
        .unwrap_or_else(|| topology.client_count());
    if count == 0 {
        return Err(StratumError::Config(
            "a stack needs at least one client".to_string(),
        ));
    }
    Ok(count)
}

fn bottom() -> StageRef {
    ScopeStage::new(EvalStage::new())
}

fn fan_out(client_bottoms: Vec<StageRef>) -> StageRef {
    FanOutStage::new(vec![bottom()], vec![bottom()], client_bottoms)
}

/// Scope over a fan-out over plain evaluator bottoms. The default stack.
pub fn standard_stack(topology: Topology) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        register_builtin_strategies();
        let count = resolve_client_count(&topology, placement)?;
        let clients = (0..count).map(|_| bottom()).collect();
        Ok(ScopeStage::new(fan_out(clients)) as StageRef)
    })
}

/// The standard stack with a security-annotation stage above the fan-out.
pub fn secure_stack(topology: Topology) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        register_builtin_strategies();
        let count = resolve_client_count(&topology, placement)?;
        let clients = (0..count).map(|_| bottom()).collect();
        Ok(ScopeStage::new(SecureStage::new(fan_out(clients))) as StageRef)
    })
}

/// A deeper stack for repeated rounds: each client bottom memoizes its
/// ingests and runs on its own task.
pub fn cached_stack(topology: Topology) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        register_builtin_strategies();
        let count = resolve_client_count(&topology, placement)?;
        let clients = (0..count)
            .map(|_| CachingStage::new(SpawnStage::new(bottom())) as StageRef)
            .collect();
        Ok(ScopeStage::new(fan_out(clients)) as StageRef)
    })
}

/// One remote leaf per named worker. The placement cannot resize this
/// topology past the workers it names.
pub fn remote_stack(targets: Vec<String>) -> StackFactory {
    Arc::new(move |placement: &Placement| {
        register_builtin_strategies();
        if targets.is_empty() {
            return Err(StratumError::Config(
                "a remote stack needs at least one target".to_string(),
            ));
        }
        if let Some(requested) = placement.cardinality("clients") {
            if requested > targets.len() {
                return Err(StratumError::Config(format!(
                    "placement asks for {} clients but only {} targets are configured",
                    requested,
                    targets.len()
                )));
            }
        }
        let take = placement
            .cardinality("clients")
            .unwrap_or_else(|| targets.len());
        if take == 0 {
            return Err(StratumError::Config(
                "a stack needs at least one client".to_string(),
            ));
        }
        let clients = targets[..take]
            .iter()
            .map(|target| RemoteStage::new(target.clone()) as StageRef)
            .collect();
        Ok(ScopeStage::new(fan_out(clients)) as StageRef)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::Stage;

    #[test]
    fn test_placement_overrides_topology_count() {
        let factory = standard_stack(Topology::Count(2));
        let placement = Placement::new().with_cardinality("clients", 5);
        let root = factory(&placement).unwrap();
        let scope = root
            .as_any()
            .downcast_ref::<ScopeStage>()
            .unwrap();
        let fanout = scope.inner_slot().get();
        let fanout = fanout.as_any().downcast_ref::<FanOutStage>().unwrap();
        assert_eq!(fanout.client_count(), 5);
    }

    #[test]
    fn test_zero_clients_is_a_config_error() {
        let factory = standard_stack(Topology::Count(0));
        let err = factory(&Placement::new()).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }

    #[test]
    fn test_remote_stack_is_bounded_by_its_targets() {
        let factory = remote_stack(vec!["a".into(), "b".into()]);
        let placement = Placement::new().with_cardinality("clients", 3);
        let err = factory(&placement).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }

    #[test]
    fn test_remote_stack_rejects_zero_clients() {
        let factory = remote_stack(vec!["a".into(), "b".into()]);
        let placement = Placement::new().with_cardinality("clients", 0);
        let err = factory(&placement).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }

    #[test]
    fn test_each_call_builds_a_fresh_tree() {
        let factory = standard_stack(Topology::Count(1));
        let first = factory(&Placement::new()).unwrap();
        let second = factory(&Placement::new()).unwrap();
        assert_ne!(first.id(), second.id());
    }
}
