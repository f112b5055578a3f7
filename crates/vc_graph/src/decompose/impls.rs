use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use std::collections::HashMap;

use vc_ident::ObjectId;

use super::{ChildSink, Decomposable, Kind};
use crate::EncodeError;

// -----------------------------------------------------------------------------
// Scalars

macro_rules! impl_scalar {
    ($($ty:ty => $name:literal),* $(,)?) => {$(
        impl Decomposable for $ty {
            #[inline]
            fn type_name(&self) -> &'static str {
                $name
            }

            #[inline]
            fn kind(&self) -> Kind {
                Kind::Scalar
            }

            #[inline]
            fn scalar(&self) -> Option<String> {
                Some(self.to_string())
            }
        }
    )*};
}

impl_scalar! {
    bool => "bool",
    char => "char",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    i128 => "i128",
    isize => "isize",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    u128 => "u128",
    usize => "usize",
    f32 => "f32",
    f64 => "f64",
    String => "String",
    &'static str => "str",
}

// -----------------------------------------------------------------------------
// Transparent wrappers

impl<T: Decomposable> Decomposable for Option<T> {
    fn type_name(&self) -> &'static str {
        match self {
            Some(value) => value.type_name(),
            None => "Option",
        }
    }

    fn kind(&self) -> Kind {
        self.as_ref().map_or(Kind::Null, Decomposable::kind)
    }

    fn object_id(&self) -> ObjectId {
        match self {
            Some(value) => value.object_id(),
            None => ObjectId::of(self),
        }
    }

    fn scalar(&self) -> Option<String> {
        self.as_ref().and_then(Decomposable::scalar)
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        match self {
            Some(value) => value.decompose(sink),
            None => Ok(()),
        }
    }
}

// Pointers share the identity of their pointee, so clones of one
// allocation are encoded once.
macro_rules! impl_pointer {
    ($($ptr:ident),*) => {$(
        impl<T: Decomposable + ?Sized> Decomposable for $ptr<T> {
            #[inline]
            fn type_name(&self) -> &'static str {
                (**self).type_name()
            }

            #[inline]
            fn kind(&self) -> Kind {
                (**self).kind()
            }

            #[inline]
            fn object_id(&self) -> ObjectId {
                (**self).object_id()
            }

            #[inline]
            fn scalar(&self) -> Option<String> {
                (**self).scalar()
            }

            #[inline]
            fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
                (**self).decompose(sink)
            }
        }
    )*};
}

impl_pointer!(Box, Rc, Arc);

/// Keeps its own identity and forwards everything else to the borrowed
/// value. A cell that is mutably borrowed cannot be encoded.
impl<T: Decomposable> Decomposable for RefCell<T> {
    fn type_name(&self) -> &'static str {
        self.try_borrow().map_or("RefCell", |value| value.type_name())
    }

    fn kind(&self) -> Kind {
        self.try_borrow().map_or(Kind::Object, |value| value.kind())
    }

    fn scalar(&self) -> Option<String> {
        self.try_borrow().ok().and_then(|value| value.scalar())
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        let value = self.try_borrow().map_err(|_| {
            EncodeError::unsupported("RefCell", "value", "the cell is mutably borrowed")
        })?;
        value.decompose(sink)
    }
}

// -----------------------------------------------------------------------------
// Sequences

macro_rules! impl_sequence {
    ($($name:literal => $ty:ty $(, const $n:ident)?);* $(;)?) => {$(
        impl<T: Decomposable $(, const $n: usize)?> Decomposable for $ty {
            #[inline]
            fn type_name(&self) -> &'static str {
                $name
            }

            #[inline]
            fn kind(&self) -> Kind {
                Kind::Sequence
            }

            fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
                self.iter().try_for_each(|element| sink.element(element))
            }
        }
    )*};
}

impl_sequence! {
    "Vec" => Vec<T>;
    "VecDeque" => VecDeque<T>;
    "Array" => [T; N], const N;
}

// -----------------------------------------------------------------------------
// Maps

impl<K: Decomposable, V: Decomposable> Decomposable for BTreeMap<K, V> {
    #[inline]
    fn type_name(&self) -> &'static str {
        "BTreeMap"
    }

    #[inline]
    fn kind(&self) -> Kind {
        Kind::Map
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        self.iter().try_for_each(|(key, value)| sink.entry(key, value))
    }
}

/// Entries are reported in the map's iteration order, which is not stable
/// across runs for randomly seeded hashers.
impl<K: Decomposable, V: Decomposable, S: 'static> Decomposable for HashMap<K, V, S> {
    #[inline]
    fn type_name(&self) -> &'static str {
        "HashMap"
    }

    #[inline]
    fn kind(&self) -> Kind {
        Kind::Map
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        self.iter().try_for_each(|(key, value)| sink.entry(key, value))
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::collections::BTreeMap;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    use vc_ident::ObjectId;

    use crate::{ChildSink, Decomposable, EncodeError, Field, Kind};

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl ChildSink for Recorder {
        fn field(&mut self, field: Field<'_>) -> Result<(), EncodeError> {
            self.0.push(format!("field {}", field.name()));
            Ok(())
        }

        fn element(&mut self, value: &dyn Decomposable) -> Result<(), EncodeError> {
            self.0.push(format!("element {}", value.scalar().unwrap_or_default()));
            Ok(())
        }

        fn entry(&mut self, key: &dyn Decomposable, value: &dyn Decomposable) -> Result<(), EncodeError> {
            self.0.push(format!(
                "entry {}={}",
                key.scalar().unwrap_or_default(),
                value.scalar().unwrap_or_default()
            ));
            Ok(())
        }
    }

    #[test]
    fn scalars_render_inline() {
        assert_eq!(42_u8.kind(), Kind::Scalar);
        assert_eq!(42_u8.scalar().as_deref(), Some("42"));
        assert_eq!("hi".type_name(), "str");
        assert_eq!(String::from("hi").type_name(), "String");
        assert_eq!(None::<u8>.kind(), Kind::Null);
        assert_eq!(Some(1.5_f64).scalar().as_deref(), Some("1.5"));
    }

    #[test]
    fn containers_report_children_in_order() {
        let mut sink = Recorder::default();
        vec![3_i32, 1, 2].decompose(&mut sink).unwrap();
        [7_i8; 2].decompose(&mut sink).unwrap();

        let map = BTreeMap::from([("b", 2_i32), ("a", 1)]);
        map.decompose(&mut sink).unwrap();

        assert_eq!(
            sink.0,
            [
                "element 3", "element 1", "element 2", "element 7", "element 7", "entry a=1",
                "entry b=2",
            ]
        );
        assert_eq!(map.kind(), Kind::Map);
    }

    #[test]
    fn pointers_share_their_pointee_identity() {
        let shared = Rc::new(vec![1, 2]);
        let clone = Rc::clone(&shared);
        assert_eq!(shared.object_id(), clone.object_id());
        assert_eq!(shared.object_id(), ObjectId::of(&*shared));

        let some = Some(Rc::clone(&shared));
        assert_eq!(some.object_id(), shared.object_id());
        assert_eq!(some.kind(), Kind::Sequence);
    }

    #[test]
    fn mutably_borrowed_cell_is_refused() {
        let cell = RefCell::new(vec![1]);
        let _guard = cell.borrow_mut();
        assert!(matches!(
            cell.decompose(&mut Recorder::default()),
            Err(EncodeError::UnsupportedField { .. })
        ));
    }
}
