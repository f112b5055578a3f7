use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Debug;

use foldhash::fast::FixedState;
use hashbrown::HashMap;

use crate::{Domain, SharedRule, TransformPath, TransformRule};

/// Fixed seed, paths are not attacker controlled.
const PATH_HASH_STATE: FixedState = FixedState::with_seed(0x3C6E_F372_FE94_F82B);

// -----------------------------------------------------------------------------
// PriorityConflict

/// Rules on one path that share a priority.
///
/// Returned by [`RuleRegistry::audit`]. Such a group only fails at dispatch
/// time if more than one of its rules applies to the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityConflict {
    pub path: TransformPath,
    pub priority: i32,
    /// Names of the rules in the group, sorted.
    pub rules: Vec<String>,
}

// -----------------------------------------------------------------------------
// RuleRegistry

/// Stores [`TransformRule`]s bucketed by their [`TransformPath`].
///
/// The registry is meant to be filled once during start-up and then handed to
/// a [`Dispatcher`], which freezes it behind an `Arc`.
///
/// Registration performs no uniqueness check. Two rules with the same
/// priority on the same path are legal until a value shows up that both
/// accept; see [`Dispatcher::select`].
///
/// [`Dispatcher`]: crate::Dispatcher
/// [`Dispatcher::select`]: crate::Dispatcher::select
pub struct RuleRegistry<D: Domain> {
    buckets: HashMap<TransformPath, Vec<SharedRule<D>>, FixedState>,
    len: usize,
}

impl<D: Domain> Default for RuleRegistry<D> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Domain> RuleRegistry<D> {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self {
            buckets: HashMap::with_hasher(PATH_HASH_STATE),
            len: 0,
        }
    }

    /// Appends `rule` to the bucket of its path.
    pub fn register(&mut self, rule: impl TransformRule<D> + 'static) {
        self.register_shared(Arc::new(rule));
    }

    /// Appends an already shared rule to the bucket of its path.
    pub fn register_shared(&mut self, rule: SharedRule<D>) {
        log::trace!(
            "register rule `{}` on `{}` at priority {}",
            rule.name(),
            rule.path(),
            rule.priority()
        );
        self.buckets
            .entry(rule.path().clone())
            .or_default()
            .push(rule);
        self.len += 1;
    }

    /// Chaining form of [`register`](Self::register).
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, rule: impl TransformRule<D> + 'static) -> Self {
        self.register(rule);
        self
    }

    /// Returns every rule registered under `path`, in registration order.
    ///
    /// Returns an empty slice for unknown paths.
    pub fn rules_for(&self, path: &TransformPath) -> &[SharedRule<D>] {
        self.buckets.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns `true` if at least one rule is registered under `path`.
    #[inline]
    pub fn contains_path(&self, path: &TransformPath) -> bool {
        self.buckets.contains_key(path)
    }

    /// Iterates over every path that has rules, in no particular order.
    #[inline]
    pub fn paths(&self) -> impl Iterator<Item = &TransformPath> {
        self.buckets.keys()
    }

    /// Total number of registered rules across all paths.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lists every `(path, priority)` group holding more than one rule.
    ///
    /// The result is sorted by path, then priority.
    pub fn audit(&self) -> Vec<PriorityConflict> {
        let mut conflicts = Vec::new();

        for (path, rules) in &self.buckets {
            let mut priorities: Vec<i32> = rules.iter().map(|rule| rule.priority()).collect();
            priorities.sort_unstable();
            priorities.dedup();

            for priority in priorities {
                let mut names: Vec<String> = rules
                    .iter()
                    .filter(|rule| rule.priority() == priority)
                    .map(|rule| rule.name().to_owned())
                    .collect();

                if names.len() > 1 {
                    names.sort_unstable();
                    conflicts.push(PriorityConflict {
                        path: path.clone(),
                        priority,
                        rules: names,
                    });
                }
            }
        }

        conflicts.sort_by(|a, b| a.path.cmp(&b.path).then(a.priority.cmp(&b.priority)));
        conflicts
    }
}

impl<D: Domain> Debug for RuleRegistry<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (path, rules) in &self.buckets {
            let names: Vec<(&str, i32)> = rules
                .iter()
                .map(|rule| (rule.name(), rule.priority()))
                .collect();
            map.entry(path, &names);
        }
        map.finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::string::{String, ToString};
    use alloc::vec;

    use super::{PriorityConflict, RuleRegistry};
    use crate::{DispatchError, Dispatcher, Domain, TransformPath, TransformRule};

    struct Texts;

    impl Domain for Texts {
        type Value = str;
        type Context = ();
        type Output = ();
        type Error = DispatchError;

        fn describe(value: &str) -> String {
            value.to_string()
        }
    }

    struct Named(&'static str, TransformPath, i32);

    impl TransformRule<Texts> for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn path(&self) -> &TransformPath {
            &self.1
        }
        fn priority(&self) -> i32 {
            self.2
        }
        fn is_applicable(&self, _: &str) -> bool {
            true
        }
        fn apply(&self, _: &str, _: &Dispatcher<Texts>, _: &mut ()) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    const A: TransformPath = TransformPath::new_static("a", "b");
    const B: TransformPath = TransformPath::new_static("b", "a");

    #[test]
    fn rules_are_bucketed_by_path() {
        let registry = RuleRegistry::<Texts>::new()
            .with_rule(Named("one", A, 1))
            .with_rule(Named("two", A, 2))
            .with_rule(Named("back", B, 1));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.rules_for(&A).len(), 2);
        assert_eq!(registry.rules_for(&B).len(), 1);
        assert!(registry.rules_for(&TransformPath::new_static("x", "y")).is_empty());
        assert!(!registry.contains_path(&TransformPath::new_static("x", "y")));
    }

    #[test]
    fn duplicates_are_accepted_and_audited() {
        let registry = RuleRegistry::<Texts>::new()
            .with_rule(Named("zeta", A, 1))
            .with_rule(Named("alpha", A, 1))
            .with_rule(Named("solo", A, 5))
            .with_rule(Named("other", B, 1));

        assert_eq!(registry.rules_for(&A).len(), 3);
        assert_eq!(
            registry.audit(),
            vec![PriorityConflict {
                path: A,
                priority: 1,
                rules: vec!["alpha".to_string(), "zeta".to_string()],
            }]
        );
    }
}
