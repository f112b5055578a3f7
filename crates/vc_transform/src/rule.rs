use alloc::string::String;
use alloc::sync::Arc;

use crate::{DispatchError, Dispatcher, TransformPath};

// -----------------------------------------------------------------------------
// Domain

/// The family of types a set of rules works on.
///
/// Every rule registered in a [`RuleRegistry`] shares one `Domain`, so the
/// dispatcher can hand the same value and context to any of them.
///
/// [`RuleRegistry`]: crate::RuleRegistry
pub trait Domain: 'static {
    /// The input of a transformation, usually a trait object.
    type Value: ?Sized;
    /// Mutable state threaded through a whole traversal.
    type Context;
    /// What a rule produces for one value.
    type Output;
    /// The error type rules return. Dispatch failures convert into it.
    type Error: From<DispatchError>;

    /// A short human readable description of `value`, used in error messages.
    fn describe(value: &Self::Value) -> String;
}

// -----------------------------------------------------------------------------
// TransformRule

/// One transformation strategy.
///
/// A rule is immutable once registered. [`is_applicable`] must be a pure
/// predicate on the value's runtime shape; [`apply`] may mutate the context
/// and recurse through the dispatcher for composite values.
///
/// [`is_applicable`]: TransformRule::is_applicable
/// [`apply`]: TransformRule::apply
pub trait TransformRule<D: Domain>: Send + Sync {
    /// Identifies the rule in diagnostics, e.g. in [`DispatchError::AmbiguousRule`].
    fn name(&self) -> &str;

    /// The path this rule is registered under.
    fn path(&self) -> &TransformPath;

    /// Precedence of the rule. Smaller values win.
    fn priority(&self) -> i32;

    /// Returns `true` if this rule can transform `value`.
    fn is_applicable(&self, value: &D::Value) -> bool;

    /// Transforms `value`.
    fn apply(
        &self,
        value: &D::Value,
        dispatcher: &Dispatcher<D>,
        ctx: &mut D::Context,
    ) -> Result<D::Output, D::Error>;
}

/// A reference counted, type-erased rule as stored in the registry.
pub type SharedRule<D> = Arc<dyn TransformRule<D>>;
