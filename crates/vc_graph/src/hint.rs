use alloc::string::String;
use core::fmt::Display;

use foldhash::fast::FixedState;
use hashbrown::HashMap;

const HINT_HASH_STATE: FixedState = FixedState::with_seed(0x6A09_E667_F3BC_C908);

// -----------------------------------------------------------------------------
// HintSlot

/// The place a container value occupies: an owner and a slot within it.
///
/// - A field `children` of class `Node` is `Node.children`.
/// - Nested containers extend their parent's slot with `element`, `key`
///   or `value`, e.g. `Board.cells.element`.
/// - The root value sits in [`HintSlot::root`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HintSlot {
    owner: String,
    slot: String,
}

impl HintSlot {
    pub const ROOT: &'static str = "root";

    #[inline]
    pub fn new(owner: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slot: slot.into(),
        }
    }

    /// The slot of the value passed to the encoder.
    #[inline]
    pub fn root() -> Self {
        Self::new("", Self::ROOT)
    }

    /// The slot of a value nested inside the container at `self`.
    pub fn nested(&self, slot: &str) -> Self {
        Self::new(self.to_string(), slot)
    }

    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[inline]
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl Display for HintSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.owner.is_empty() {
            f.write_str(&self.slot)
        } else {
            write!(f, "{}.{}", self.owner, self.slot)
        }
    }
}

// -----------------------------------------------------------------------------
// ContainerHint

/// Declared types of a container's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerHint {
    Sequence { element: String },
    Map { key: String, value: String },
}

impl ContainerHint {
    #[inline]
    pub fn sequence(element: impl Into<String>) -> Self {
        Self::Sequence {
            element: element.into(),
        }
    }

    #[inline]
    pub fn map(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Map {
            key: key.into(),
            value: value.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// HintProvider

/// Supplies [`ContainerHint`]s out of band.
///
/// Closures of the right shape are providers too.
pub trait HintProvider: Send + Sync {
    fn hint(&self, slot: &HintSlot) -> Option<ContainerHint>;
}

impl<F> HintProvider for F
where
    F: Fn(&HintSlot) -> Option<ContainerHint> + Send + Sync,
{
    #[inline]
    fn hint(&self, slot: &HintSlot) -> Option<ContainerHint> {
        self(slot)
    }
}

// -----------------------------------------------------------------------------
// TypeHints

/// A table of container hints.
///
/// # Examples
///
/// ```
/// use vc_graph::{ContainerHint, HintProvider, HintSlot, TypeHints};
///
/// let hints = TypeHints::new()
///     .with_sequence("Node", "children", "Node")
///     .with_map("Node", "tags", "String", "u32");
///
/// assert_eq!(
///     hints.hint(&HintSlot::new("Node", "children")),
///     Some(ContainerHint::sequence("Node")),
/// );
/// assert_eq!(hints.hint(&HintSlot::root()), None);
/// ```
#[derive(Debug, Clone)]
pub struct TypeHints {
    hints: HashMap<HintSlot, ContainerHint, FixedState>,
}

impl Default for TypeHints {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl TypeHints {
    #[inline]
    pub fn new() -> Self {
        Self {
            hints: HashMap::with_hasher(HINT_HASH_STATE),
        }
    }

    /// Sets the hint of `slot`, returning the previous one.
    pub fn insert(&mut self, slot: HintSlot, hint: ContainerHint) -> Option<ContainerHint> {
        self.hints.insert(slot, hint)
    }

    #[must_use]
    pub fn with_hint(mut self, slot: HintSlot, hint: ContainerHint) -> Self {
        self.insert(slot, hint);
        self
    }

    #[must_use]
    pub fn with_sequence(self, owner: &str, slot: &str, element: &str) -> Self {
        self.with_hint(HintSlot::new(owner, slot), ContainerHint::sequence(element))
    }

    #[must_use]
    pub fn with_map(self, owner: &str, slot: &str, key: &str, value: &str) -> Self {
        self.with_hint(HintSlot::new(owner, slot), ContainerHint::map(key, value))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}

impl HintProvider for TypeHints {
    #[inline]
    fn hint(&self, slot: &HintSlot) -> Option<ContainerHint> {
        self.hints.get(slot).cloned()
    }
}

// -----------------------------------------------------------------------------
// Tests
