//! Rule-based transformation dispatch.
//!
//! A transformation turns a value of one classification into another, for
//! example an in-memory object graph into a document tree. Many competing
//! strategies may exist for the same pair of classifications; this crate
//! stores them and picks exactly one per value.
//!
//! ## Menu
//!
//! - [`TransformPath`]: The `(origin, destination)` key that partitions rules.
//! - [`Domain`]: Bundles the value, context, output and error types of a rule family.
//! - [`TransformRule`]: A single strategy with a path, a priority and an applicability test.
//! - [`RuleRegistry`]: Stores rules bucketed by path.
//! - [`Dispatcher`]: Selects the unique applicable rule of highest precedence and invokes it.
//! - [`DispatchError`]: Unknown path, no applicable rule, or ambiguous rules.
//!
//! ## Priority
//!
//! Priorities are plain integers and **smaller means stronger**: a rule with
//! priority `0` beats a rule with priority `1`. If two applicable rules tie at
//! the strongest priority present, dispatch fails with
//! [`DispatchError::AmbiguousRule`] instead of picking one arbitrarily.
//!
//! Registration never checks for such ties. Use [`RuleRegistry::audit`] to
//! list buckets that *could* become ambiguous.
//!
//! # Example
//!
//! ```
//! use vc_transform::{Dispatcher, Domain, DispatchError, RuleRegistry, TransformPath, TransformRule};
//!
//! struct Numbers;
//!
//! impl Domain for Numbers {
//!     type Value = i64;
//!     type Context = ();
//!     type Output = String;
//!     type Error = DispatchError;
//!
//!     fn describe(value: &i64) -> String {
//!         value.to_string()
//!     }
//! }
//!
//! static TO_TEXT: TransformPath = TransformPath::new_static("number", "text");
//!
//! struct Decimal;
//!
//! impl TransformRule<Numbers> for Decimal {
//!     fn name(&self) -> &str { "decimal" }
//!     fn path(&self) -> &TransformPath { &TO_TEXT }
//!     fn priority(&self) -> i32 { 10 }
//!     fn is_applicable(&self, _: &i64) -> bool { true }
//!     fn apply(&self, value: &i64, _: &Dispatcher<Numbers>, _: &mut ()) -> Result<String, DispatchError> {
//!         Ok(value.to_string())
//!     }
//! }
//!
//! let mut registry = RuleRegistry::new();
//! registry.register(Decimal);
//!
//! let dispatcher = Dispatcher::new(registry);
//! assert_eq!(dispatcher.transform(&42, &TO_TEXT, &mut ()).unwrap(), "42");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

// -----------------------------------------------------------------------------
// no_std support

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

// -----------------------------------------------------------------------------
// Modules

mod dispatch;
mod error;
mod path;
mod registry;
mod rule;

// -----------------------------------------------------------------------------
// Exports

pub use dispatch::Dispatcher;
pub use error::DispatchError;
pub use path::TransformPath;
pub use registry::{PriorityConflict, RuleRegistry};
pub use rule::{Domain, SharedRule, TransformRule};
