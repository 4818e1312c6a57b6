//! Concrete stage kinds and prebuilt stack factories.
//!
//! Seven stage kinds cover the usual shapes: a leaf evaluator, four
//! single-child wrappers (scope, spawn, caching, secure), a multi-group
//! fan-out, and a remote leaf. [`register_builtin_strategies`] installs the
//! recursion and formatting strategies for all of them; the stack factories
//! call it themselves.

mod cache;
mod eval;
mod factory;
mod fanout;
mod remote;
mod scope;
mod secure;
mod spawn;

pub use cache::{CachedValue, CachingStage};
pub use eval::{EvalStage, EvalValue};
pub use factory::{cached_stack, remote_stack, secure_stack, standard_stack, Topology};
pub use fanout::{FanOutStage, FanOutValue};
pub use remote::{RemoteStage, RemoteValue};
pub use scope::{ScopeStage, ScopeValue};
pub use secure::{SecureStage, SecureValue, AUDITED_INTRINSICS};
pub use spawn::{SpawnStage, SpawnValue};

use std::sync::Once;

use stratum_core::{Material, Selector, StageValue, TypeSignature};
use stratum_trace::{register_formatting_strategy_for, register_recursion_strategy_for};

static BUILTINS: Once = Once::new();

/// Register recursion and formatting strategies for every stage kind in
/// this crate. Idempotent; call before walking or instrumenting a stack
/// built by hand (the factories already do).
pub fn register_builtin_strategies() {
    BUILTINS.call_once(|| {
        // Leaves have no children.
        register_recursion_strategy_for::<EvalStage, _>(|_| vec![]);
        register_recursion_strategy_for::<RemoteStage, _>(|_| vec![]);

        // Wrappers have exactly one.
        register_recursion_strategy_for::<ScopeStage, _>(|s| vec![s.inner_slot()]);
        register_recursion_strategy_for::<SpawnStage, _>(|s| vec![s.inner_slot()]);
        register_recursion_strategy_for::<CachingStage, _>(|s| vec![s.inner_slot()]);
        register_recursion_strategy_for::<SecureStage, _>(|s| vec![s.inner_slot()]);

        register_recursion_strategy_for::<FanOutStage, _>(|s| s.child_slots());

        register_formatting_strategy_for::<Material, _>(|material| match material {
            Material::Unit => "-".to_string(),
            Material::Data(payload) => format!("<{} : data>", payload),
            Material::Intrinsic(intrinsic) => format!("<{} : intrinsic>", intrinsic.uri),
            Material::Computation(computation) => {
                format!("<computation : {}>", computation.signature)
            }
        });
        register_formatting_strategy_for::<TypeSignature, _>(|sig| format!("<{}>", sig));
        register_formatting_strategy_for::<Selector, _>(|selector| selector.to_string());

        register_formatting_strategy_for::<EvalValue, _>(|v| {
            format!("<eval value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<ScopeValue, _>(|v| {
            format!("<scoped value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<SpawnValue, _>(|v| {
            format!("<spawned value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<CachedValue, _>(|v| {
            format!("<cached value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<SecureValue, _>(|v| {
            format!("<secure value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<RemoteValue, _>(|v| {
            format!("<remote value : {}>", v.type_signature())
        });
        register_formatting_strategy_for::<FanOutValue, _>(|v| {
            format!(
                "<federated value : {}, {} clients>",
                v.type_signature(),
                v.client_values().len()
            )
        });
    });
}
