//! Request-scoped value bag threaded through scheduled tasks.
//!
//! A [`Context`] is an immutable, cloneable map from value *types* to values.
//! The scheduler stores the current task handle in the context it hands to a
//! spawned body; embedders are free to stash their own request data (deadlines,
//! cancellation flags, trace ids) alongside it and read them back around
//! cooperation points.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An immutable bag of values keyed by their type.
///
/// Deriving a child context with [`Context::with_value`] leaves the parent
/// untouched, so a context can be shared across many tasks while each task
/// sees its own additions.
///
/// # Examples
///
/// ```
/// use yieldgate::Context;
///
/// struct RequestId(u64);
///
/// let root = Context::new();
/// let ctx = root.with_value(RequestId(7));
///
/// assert_eq!(ctx.value::<RequestId>().map(|r| r.0), Some(7));
/// assert!(root.value::<RequestId>().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Context {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context that additionally carries `value`.
    ///
    /// At most one value per type is kept; a second insert of the same type
    /// shadows the first.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut child = self.clone();
        child.values.insert(TypeId::of::<T>(), Arc::new(value));
        child
    }

    /// Look up the value stored under type `T`, if any.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tenant(String);
    struct Deadline(u64);

    #[test]
    fn test_empty_context() {
        let ctx = Context::new();
        assert!(ctx.value::<Tenant>().is_none());
    }

    #[test]
    fn test_with_value_and_lookup() {
        let ctx = Context::new()
            .with_value(Tenant("acme".into()))
            .with_value(Deadline(99));

        assert_eq!(ctx.value::<Tenant>().map(|t| t.0.as_str()), Some("acme"));
        assert_eq!(ctx.value::<Deadline>().map(|d| d.0), Some(99));
    }

    #[test]
    fn test_child_does_not_mutate_parent() {
        let parent = Context::new().with_value(Deadline(1));
        let child = parent.with_value(Deadline(2));

        assert_eq!(parent.value::<Deadline>().map(|d| d.0), Some(1));
        assert_eq!(child.value::<Deadline>().map(|d| d.0), Some(2));
    }

    #[test]
    fn test_clone_shares_values() {
        let ctx = Context::new().with_value(Tenant("acme".into()));
        let copy = ctx.clone();
        assert_eq!(copy.value::<Tenant>().map(|t| t.0.as_str()), Some("acme"));
    }
}
