use alloc::string::String;
use alloc::sync::Arc;
use core::any::TypeId;
use core::cmp::Ordering;
use core::fmt::{Debug, Display};
use core::hash::Hash;
use core::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::TokenError;

// -----------------------------------------------------------------------------
// IdentityToken

/// A durable identifier standing in for one object instance.
///
/// Tokens are immutable and cheap to clone. They render to and parse from
/// plain strings, which is how they appear in persisted documents.
///
/// # Ordering
///
/// Tokens are ordered *shortlex*: shorter tokens first, equal lengths
/// compared byte-wise. Decimal counter tokens therefore sort numerically
/// (`"9" < "10"`), and every generator in this crate emits tokens in
/// strictly increasing order.
///
/// # Examples
///
/// ```
/// use vc_ident::IdentityToken;
///
/// let a: IdentityToken = "9".parse().unwrap();
/// let b: IdentityToken = "10".parse().unwrap();
///
/// assert!(a < b);
/// assert_eq!(b.to_string(), "10");
/// assert!("".parse::<IdentityToken>().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdentityToken(Arc<str>);

impl IdentityToken {
    /// Creates a token from its textual form.
    ///
    /// Tokens must be non-empty and must not contain whitespace, so they
    /// can be embedded in attribute values and file contents verbatim.
    pub fn new(text: impl AsRef<str>) -> Result<Self, TokenError> {
        let text = text.as_ref();
        if text.is_empty() || text.chars().any(char::is_whitespace) {
            return Err(TokenError::InvalidToken { text: text.into() });
        }
        Ok(Self(Arc::from(text)))
    }

    /// Returns the textual form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for IdentityToken {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdentityToken {
    type Err = TokenError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl PartialOrd for IdentityToken {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl Debug for IdentityToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IdentityToken({})", self.0)
    }
}

impl Display for IdentityToken {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl Serialize for IdentityToken {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IdentityToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::new(text).map_err(D::Error::custom)
    }
}

// -----------------------------------------------------------------------------
// ObjectId

/// The identity of a live value: its address together with its type.
///
/// Two values that are equal by value but live in different places get
/// different ids. The type component keeps a struct apart from its first
/// field, which shares the struct's address.
///
/// Smart pointers should report the id of their pointee so that clones of
/// one allocation compare equal; the `Decomposable` implementations in
/// `vc_graph` do so for `Rc`, `Arc` and `Box`.
///
/// An id only means something while the value is alive and not moved.
/// Zero-sized values may share an address and therefore an id.
///
/// # Examples
///
/// ```
/// use vc_ident::ObjectId;
///
/// let a = String::from("same");
/// let b = String::from("same");
///
/// assert_eq!(ObjectId::of(&a), ObjectId::of(&a));
/// assert_ne!(ObjectId::of(&a), ObjectId::of(&b));
/// ```
#[derive(Clone, Copy)]
pub struct ObjectId {
    addr: usize,
    type_id: TypeId,
    type_name: &'static str,
}

impl ObjectId {
    /// Returns the identity of `value`.
    #[inline]
    pub fn of<T: ?Sized + 'static>(value: &T) -> Self {
        Self {
            addr: core::ptr::from_ref(value).cast::<()>().addr(),
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
        }
    }

    /// Returns the address component.
    #[inline]
    pub const fn addr(self) -> usize {
        self.addr
    }

    /// Returns the name of the value's type, for diagnostics only.
    #[inline]
    pub const fn type_name(self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ObjectId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.type_id == other.type_id
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    #[inline]
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.addr);
        self.type_id.hash(state);
    }
}

impl PartialOrd for ObjectId {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr
            .cmp(&other.addr)
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ObjectId({:#x}: {})", self.addr, self.type_name)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{:#x}", self.type_name, self.addr)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{IdentityToken, ObjectId};

    #[test]
    fn shortlex_order() {
        let mut tokens: Vec<IdentityToken> = ["10", "9", "a", "1", "100", "ab"]
            .into_iter()
            .map(|t| t.parse().unwrap())
            .collect();
        tokens.sort();
        let rendered: Vec<String> = tokens.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["1", "9", "a", "10", "ab", "100"]);
    }

    #[test]
    fn rejects_blank_tokens() {
        assert!(IdentityToken::new("").is_err());
        assert!(IdentityToken::new("a b").is_err());
        assert!(IdentityToken::new("a\n").is_err());
    }

    #[test]
    fn serde_uses_plain_strings() {
        let token = IdentityToken::new("42").unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"42\"");
        assert_eq!(serde_json::from_str::<IdentityToken>(&json).unwrap(), token);
        assert!(serde_json::from_str::<IdentityToken>("\"\"").is_err());
    }

    #[test]
    fn struct_and_first_field_differ() {
        struct Outer {
            inner: u64,
        }
        let outer = Outer { inner: 7 };

        let a = ObjectId::of(&outer);
        let b = ObjectId::of(&outer.inner);
        assert_eq!(a.addr(), b.addr());
        assert_ne!(a, b);
    }
}
