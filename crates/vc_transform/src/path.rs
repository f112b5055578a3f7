use alloc::borrow::Cow;
use alloc::string::String;
use core::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// TransformPath

/// The `(origin, destination)` classification pair that keys the rule registry.
///
/// Rules are partitioned by path and a dispatch only ever compares rules
/// registered under the exact same path.
///
/// # Examples
///
/// ```
/// use vc_transform::TransformPath;
///
/// const ENCODE: TransformPath = TransformPath::new_static("graph", "tree");
///
/// let path = TransformPath::new(String::from("graph"), "tree");
/// assert_eq!(path, ENCODE);
/// assert_eq!(path.to_string(), "graph -> tree");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransformPath {
    origin: Cow<'static, str>,
    destination: Cow<'static, str>,
}

impl TransformPath {
    /// Creates a path from two static classifications, usable in `const` items.
    #[inline]
    pub const fn new_static(origin: &'static str, destination: &'static str) -> Self {
        Self {
            origin: Cow::Borrowed(origin),
            destination: Cow::Borrowed(destination),
        }
    }

    /// Creates a path from any owned or static classifications.
    #[inline]
    pub fn new(
        origin: impl Into<Cow<'static, str>>,
        destination: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
        }
    }

    /// Returns the origin classification.
    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the destination classification.
    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the path that undoes this one.
    pub fn reversed(&self) -> Self {
        Self {
            origin: self.destination.clone(),
            destination: self.origin.clone(),
        }
    }
}

impl From<(String, String)> for TransformPath {
    #[inline]
    fn from((origin, destination): (String, String)) -> Self {
        Self::new(origin, destination)
    }
}

impl From<(&'static str, &'static str)> for TransformPath {
    #[inline]
    fn from((origin, destination): (&'static str, &'static str)) -> Self {
        Self::new_static(origin, destination)
    }
}

impl Debug for TransformPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TransformPath({} -> {})", self.origin, self.destination)
    }
}

impl Display for TransformPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.origin, self.destination)
    }
}

// -----------------------------------------------------------------------------
// Tests
