use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::{DispatchError, Domain, RuleRegistry, SharedRule, TransformPath};

// -----------------------------------------------------------------------------
// Dispatcher

/// Selects and invokes the single applicable rule of highest precedence.
///
/// # Selection Rules
///
/// For a value `v` and a path `p`:
///
/// 1. Look up every rule registered under `p`.
///    Fails with [`DispatchError::UnknownPath`] if there are none.
/// 2. Keep the rules whose [`is_applicable`] accepts `v`.
///    Fails with [`DispatchError::NoApplicableRule`] if none survive.
/// 3. Keep the survivors holding the **smallest** priority value.
///    Fails with [`DispatchError::AmbiguousRule`] if more than one remains.
/// 4. Invoke the remaining rule and return its result verbatim.
///
/// The dispatcher holds no other state. Caching, identity tracking and
/// document mutation are the business of the rules and their context.
///
/// The registry is frozen once it is handed to a dispatcher. Cloning a
/// dispatcher shares the same registry.
///
/// [`is_applicable`]: crate::TransformRule::is_applicable
pub struct Dispatcher<D: Domain> {
    registry: Arc<RuleRegistry<D>>,
}

impl<D: Domain> Clone for Dispatcher<D> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<D: Domain> Dispatcher<D> {
    /// Freezes `registry` and creates a dispatcher over it.
    #[inline]
    pub fn new(registry: RuleRegistry<D>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Creates a dispatcher over an already shared registry.
    #[inline]
    pub fn from_shared(registry: Arc<RuleRegistry<D>>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[inline]
    pub fn registry(&self) -> &RuleRegistry<D> {
        &self.registry
    }

    /// Picks the rule that [`transform`](Self::transform) would invoke,
    /// without invoking it.
    pub fn select(
        &self,
        value: &D::Value,
        path: &TransformPath,
    ) -> Result<&SharedRule<D>, DispatchError> {
        let rules = self.registry.rules_for(path);
        if rules.is_empty() {
            return Err(DispatchError::UnknownPath { path: path.clone() });
        }

        let mut best: Option<i32> = None;
        let mut winners: Vec<&SharedRule<D>> = Vec::new();

        for rule in rules {
            if !rule.is_applicable(value) {
                continue;
            }
            let priority = rule.priority();
            match best {
                Some(current) if priority > current => {}
                Some(current) if priority == current => winners.push(rule),
                _ => {
                    best = Some(priority);
                    winners.clear();
                    winners.push(rule);
                }
            }
        }

        match (best, winners.as_slice()) {
            (Some(_), [rule]) => {
                log::trace!(
                    "dispatch `{path}`: selected `{}` at priority {}",
                    rule.name(),
                    rule.priority()
                );
                Ok(*rule)
            }
            (Some(priority), contenders) if !contenders.is_empty() => {
                let mut names: Vec<String> = contenders
                    .iter()
                    .map(|rule| rule.name().to_owned())
                    .collect();
                names.sort_unstable();
                Err(DispatchError::AmbiguousRule {
                    path: path.clone(),
                    value: D::describe(value),
                    priority,
                    rules: names,
                })
            }
            _ => Err(DispatchError::NoApplicableRule {
                path: path.clone(),
                value: D::describe(value),
            }),
        }
    }

    /// Transforms `value` along `path` with the selected rule.
    ///
    /// See the [type-level documentation](Self) for the selection rules.
    pub fn transform(
        &self,
        value: &D::Value,
        path: &TransformPath,
        ctx: &mut D::Context,
    ) -> Result<D::Output, D::Error> {
        let rule = self.select(value, path)?;
        rule.apply(value, self, ctx)
    }
}

impl<D: Domain> Debug for Dispatcher<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::{String, ToString};
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::{DispatchError, Dispatcher, Domain, RuleRegistry, TransformPath, TransformRule};

    struct Numbers;

    impl Domain for Numbers {
        type Value = i64;
        type Context = Vec<&'static str>;
        type Output = String;
        type Error = DispatchError;

        fn describe(value: &i64) -> String {
            format!("number {value}")
        }
    }

    static TEXT: TransformPath = TransformPath::new_static("number", "text");
    static BYTES: TransformPath = TransformPath::new_static("number", "bytes");

    /// Applies to every value above `min`.
    struct Above {
        name: &'static str,
        priority: i32,
        min: i64,
    }

    impl TransformRule<Numbers> for Above {
        fn name(&self) -> &str {
            self.name
        }
        fn path(&self) -> &TransformPath {
            &TEXT
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn is_applicable(&self, value: &i64) -> bool {
            *value > self.min
        }
        fn apply(
            &self,
            value: &i64,
            _: &Dispatcher<Numbers>,
            ctx: &mut Vec<&'static str>,
        ) -> Result<String, DispatchError> {
            ctx.push(self.name);
            Ok(format!("{}:{value}", self.name))
        }
    }

    /// Splits a number into digits and recurses through the dispatcher.
    struct Digits;

    impl TransformRule<Numbers> for Digits {
        fn name(&self) -> &str {
            "digits"
        }
        fn path(&self) -> &TransformPath {
            &TEXT
        }
        fn priority(&self) -> i32 {
            0
        }
        fn is_applicable(&self, value: &i64) -> bool {
            *value >= 10
        }
        fn apply(
            &self,
            value: &i64,
            dispatcher: &Dispatcher<Numbers>,
            ctx: &mut Vec<&'static str>,
        ) -> Result<String, DispatchError> {
            ctx.push("digits");
            let head = dispatcher.transform(&(value / 10), &TEXT, ctx)?;
            let tail = dispatcher.transform(&(value % 10), &TEXT, ctx)?;
            Ok(format!("[{head},{tail}]"))
        }
    }

    fn above(name: &'static str, priority: i32, min: i64) -> Above {
        Above {
            name,
            priority,
            min,
        }
    }

    #[test]
    fn smallest_priority_wins() {
        let registry = RuleRegistry::new()
            .with_rule(above("weak", 2, 0))
            .with_rule(above("strong", 1, 0));
        let dispatcher = Dispatcher::new(registry);

        for _ in 0..16 {
            let mut trail = Vec::new();
            assert_eq!(dispatcher.transform(&5, &TEXT, &mut trail).unwrap(), "strong:5");
            assert_eq!(trail, vec!["strong"]);
        }
    }

    #[test]
    fn tie_at_best_priority_is_ambiguous() {
        let registry = RuleRegistry::new()
            .with_rule(above("weak", 2, 0))
            .with_rule(above("strong", 1, 0))
            .with_rule(above("also-strong", 1, 0));
        let dispatcher = Dispatcher::new(registry);

        let err = dispatcher.transform(&5, &TEXT, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err,
            DispatchError::AmbiguousRule {
                path: TEXT.clone(),
                value: "number 5".to_string(),
                priority: 1,
                rules: vec!["also-strong".to_string(), "strong".to_string()],
            }
        );
    }

    #[test]
    fn tie_below_best_priority_is_harmless() {
        let registry = RuleRegistry::new()
            .with_rule(above("weak-a", 2, 0))
            .with_rule(above("weak-b", 2, 0))
            .with_rule(above("strong", 1, 0));
        let dispatcher = Dispatcher::new(registry);

        assert_eq!(dispatcher.select(&1, &TEXT).unwrap().name(), "strong");
    }

    #[test]
    fn tie_is_only_ambiguous_when_both_apply() {
        let registry = RuleRegistry::new()
            .with_rule(above("small", 1, 0))
            .with_rule(above("large", 1, 100));
        let dispatcher = Dispatcher::new(registry);

        assert_eq!(dispatcher.select(&5, &TEXT).unwrap().name(), "small");
        assert!(matches!(
            dispatcher.select(&500, &TEXT),
            Err(DispatchError::AmbiguousRule { .. })
        ));
    }

    #[test]
    fn unknown_path_and_no_applicable_rule() {
        let dispatcher = Dispatcher::new(RuleRegistry::new().with_rule(above("positive", 1, 0)));

        assert_eq!(
            dispatcher.select(&5, &BYTES).err(),
            Some(DispatchError::UnknownPath { path: BYTES.clone() })
        );
        assert_eq!(
            dispatcher.select(&-5, &TEXT).err(),
            Some(DispatchError::NoApplicableRule {
                path: TEXT.clone(),
                value: "number -5".to_string(),
            })
        );
    }

    #[test]
    fn rules_recurse_through_the_dispatcher() {
        let registry = RuleRegistry::new()
            .with_rule(Digits)
            .with_rule(above("leaf", 5, -1));
        let dispatcher = Dispatcher::new(registry);

        let mut trail = Vec::new();
        let out = dispatcher.transform(&123, &TEXT, &mut trail).unwrap();
        assert_eq!(out, "[[leaf:1,leaf:2],leaf:3]");
        assert_eq!(trail, vec!["digits", "digits", "leaf", "leaf", "leaf"]);
    }
}
