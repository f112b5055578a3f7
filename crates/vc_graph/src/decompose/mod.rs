//! The decomposition capability.

// -----------------------------------------------------------------------------
// Modules

mod impls;

use alloc::string::String;
use core::fmt::Display;

use vc_ident::ObjectId;

use crate::EncodeError;

// -----------------------------------------------------------------------------
// Kind

/// The shape of a value as far as encoding is concerned.
///
/// Only `Object`, `Sequence` and `Map` values receive identity tokens.
/// Scalars and nulls are written inline wherever they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Scalar,
    Object,
    Sequence,
    Map,
}

impl Kind {
    /// The name used for this kind in documents.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar => "scalar",
            Self::Object => "object",
            Self::Sequence => "sequence",
            Self::Map => "map",
        }
    }

    /// Parses a name produced by [`Kind::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(Self::Null),
            "scalar" => Some(Self::Scalar),
            "object" => Some(Self::Object),
            "sequence" => Some(Self::Sequence),
            "map" => Some(Self::Map),
            _ => None,
        }
    }

    /// Returns `true` for kinds that are tokenised.
    #[inline]
    pub const fn is_composite(self) -> bool {
        matches!(self, Self::Object | Self::Sequence | Self::Map)
    }
}

impl Display for Kind {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// Field

/// How a field is stored in its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Storage {
    #[default]
    Mutable,
    /// The field is fixed at construction and a decoder cannot write it
    /// back. Such fields are refused by the object rule.
    Immutable,
}

/// A named child of an object.
///
/// The declared type defaults to the value's runtime type name.
#[derive(Clone, Copy)]
pub struct Field<'a> {
    name: &'a str,
    declared_type: &'a str,
    value: &'a dyn Decomposable,
    storage: Storage,
}

impl<'a> Field<'a> {
    #[inline]
    pub fn new(name: &'a str, value: &'a dyn Decomposable) -> Self {
        Self {
            name,
            declared_type: value.type_name(),
            value,
            storage: Storage::Mutable,
        }
    }

    /// Overrides the declared type written for this field.
    #[inline]
    #[must_use]
    pub fn declared(mut self, declared_type: &'a str) -> Self {
        self.declared_type = declared_type;
        self
    }

    /// Marks the field as [`Storage::Immutable`].
    #[inline]
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.storage = Storage::Immutable;
        self
    }

    #[inline]
    pub fn name(&self) -> &'a str {
        self.name
    }

    #[inline]
    pub fn declared_type(&self) -> &'a str {
        self.declared_type
    }

    #[inline]
    pub fn value(&self) -> &'a dyn Decomposable {
        self.value
    }

    #[inline]
    pub fn storage(&self) -> Storage {
        self.storage
    }
}

// -----------------------------------------------------------------------------
// ChildSink

/// Receives the children of a value during [`Decomposable::decompose`].
///
/// Objects report [`field`](Self::field)s, sequences report
/// [`element`](Self::element)s and maps report [`entry`](Self::entry)s.
/// Each child is encoded before the call returns.
pub trait ChildSink {
    fn field(&mut self, field: Field<'_>) -> Result<(), EncodeError>;

    fn element(&mut self, value: &dyn Decomposable) -> Result<(), EncodeError>;

    fn entry(&mut self, key: &dyn Decomposable, value: &dyn Decomposable) -> Result<(), EncodeError>;
}

// -----------------------------------------------------------------------------
// Decomposable

/// A value the graph encoder can take apart.
///
/// The defaults describe an object without fields whose identity is its
/// own address. Implementors usually override [`type_name`] and
/// [`decompose`]; wrappers that should share identity with what they wrap
/// forward every method.
///
/// # Examples
///
/// ```
/// use vc_graph::{ChildSink, Decomposable, EncodeError, Field};
///
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// impl Decomposable for Point {
///     fn type_name(&self) -> &'static str {
///         "Point"
///     }
///
///     fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
///         sink.field(Field::new("x", &self.x))?;
///         sink.field(Field::new("y", &self.y))
///     }
/// }
/// ```
///
/// [`type_name`]: Decomposable::type_name
/// [`decompose`]: Decomposable::decompose
pub trait Decomposable: 'static {
    /// The runtime class written into documents.
    fn type_name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    fn kind(&self) -> Kind {
        Kind::Object
    }

    /// The identity under which this value is tokenised.
    fn object_id(&self) -> ObjectId {
        ObjectId::of(self)
    }

    /// The textual form of a scalar. Only consulted for [`Kind::Scalar`].
    fn scalar(&self) -> Option<String> {
        None
    }

    /// Reports the children of this value to `sink`, in document order.
    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        let _ = sink;
        Ok(())
    }
}
