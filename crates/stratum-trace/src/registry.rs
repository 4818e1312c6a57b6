//! Strategy Registries: open, type-indexed dispatch.
//!
//! Two process-wide tables keyed by concrete `TypeId`:
//! - recursion strategies map a stage to its ordered children,
//! - formatting strategies map any logged object to a display string.
//!
//! Registration installs or overwrites; there is no removal. Both tables are
//! static and safe to populate at process start, before any tree exists. A
//! recursion lookup miss is a fatal configuration error (the tree shape must
//! always be statically known); a formatting lookup always succeeds through
//! the generic default.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use stratum_core::{ChildSlot, Stage, StageValue, StratumError, StratumResult};

pub type RecursionStrategy =
    Arc<dyn Fn(&dyn Stage) -> StratumResult<Vec<ChildSlot>> + Send + Sync>;
pub type FormattingStrategy = Arc<dyn Fn(&dyn Any) -> String + Send + Sync>;

static RECURSION: Lazy<RwLock<HashMap<TypeId, RecursionStrategy>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static FORMATTING: Lazy<RwLock<HashMap<TypeId, FormattingStrategy>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Install (or overwrite) the recursion strategy for a stage type.
pub fn register_recursion_strategy(type_id: TypeId, strategy: RecursionStrategy) {
    RECURSION.write().insert(type_id, strategy);
}

/// Typed convenience over [`register_recursion_strategy`] for infallible
/// strategies, which is all a stage implementer normally needs.
pub fn register_recursion_strategy_for<S, F>(strategy: F)
where
    S: Stage,
    F: Fn(&S) -> Vec<ChildSlot> + Send + Sync + 'static,
{
    register_recursion_strategy(
        TypeId::of::<S>(),
        Arc::new(move |stage: &dyn Stage| {
            // The table is keyed by the concrete TypeId, so the downcast
            // cannot miss.
            Ok(stage
                .as_any()
                .downcast_ref::<S>()
                .map(&strategy)
                .unwrap_or_default())
        }),
    );
}

/// Install (or overwrite) the formatting strategy for an object type.
pub fn register_formatting_strategy(type_id: TypeId, strategy: FormattingStrategy) {
    FORMATTING.write().insert(type_id, strategy);
}

/// Typed convenience over [`register_formatting_strategy`].
pub fn register_formatting_strategy_for<T, F>(strategy: F)
where
    T: Any,
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    register_formatting_strategy(
        TypeId::of::<T>(),
        Arc::new(move |object: &dyn Any| {
            object
                .downcast_ref::<T>()
                .map(&strategy)
                .unwrap_or_else(|| default_format(object))
        }),
    );
}

/// Ordered children of a stage, per its registered recursion strategy.
pub fn children_of(stage: &dyn Stage) -> StratumResult<Vec<ChildSlot>> {
    // Clone the strategy out so a strategy may re-enter the registry
    // (the traced wrapper's does).
    let strategy = RECURSION.read().get(&stage.as_any().type_id()).cloned();
    match strategy {
        Some(strategy) => strategy(stage),
        None => Err(StratumError::Config(format!(
            "no recursion strategy registered for stage kind '{}'",
            stage.kind()
        ))),
    }
}

/// Format any logged object. Falls back to [`default_format`]; never fails.
pub fn format_object(object: &dyn Any) -> String {
    let strategy = FORMATTING.read().get(&object.type_id()).cloned();
    match strategy {
        Some(strategy) => strategy(object),
        None => default_format(object),
    }
}

/// Format a stage value. Tries the registry first, then a value-aware
/// default carrying the type signature.
pub fn format_value(value: &dyn StageValue) -> String {
    let strategy = FORMATTING.read().get(&value.as_any().type_id()).cloned();
    match strategy {
        Some(strategy) => strategy(value.as_any()),
        None => format!("<value : {}>", value.type_signature()),
    }
}

/// Generic fallback formatter. Handles arbitrary unregistered objects,
/// including unit, primitives, and containers, and always returns a
/// non-empty string.
pub fn default_format(object: &dyn Any) -> String {
    if object.downcast_ref::<()>().is_some() {
        return "-".to_string();
    }
    if let Some(v) = object.downcast_ref::<f64>() {
        return format!("<{} : float>", v);
    }
    if let Some(v) = object.downcast_ref::<i64>() {
        return format!("<{} : int>", v);
    }
    if let Some(v) = object.downcast_ref::<bool>() {
        return format!("<{} : bool>", v);
    }
    if let Some(v) = object.downcast_ref::<String>() {
        return format!("<{:?} : string>", v);
    }
    if let Some(v) = object.downcast_ref::<&str>() {
        return format!("<{:?} : string>", v);
    }
    if let Some(v) = object.downcast_ref::<serde_json::Value>() {
        return format!("<{} : json>", v);
    }
    format!("<opaque {:?}>", object.type_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unregistered {
        #[allow(dead_code)]
        marker: u8,
    }

    #[test]
    fn test_formatting_fallback_never_fails_and_is_non_empty() {
        let odd = Unregistered { marker: 7 };
        assert!(!format_object(&odd).is_empty());
        assert_eq!(format_object(&()), "-");
        assert_eq!(format_object(&2.5f64), "<2.5 : float>");
        assert!(!format_object(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn test_registered_strategy_overwrites() {
        register_formatting_strategy_for::<u128, _>(|v| format!("first:{}", v));
        register_formatting_strategy_for::<u128, _>(|v| format!("second:{}", v));
        assert_eq!(format_object(&9u128), "second:9");
    }
}
