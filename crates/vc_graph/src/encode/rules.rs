use alloc::borrow::ToOwned;
use alloc::string::{String, ToString};

use foldhash::fast::FixedState;
use hashbrown::HashSet;
use vc_transform::{Dispatcher, TransformPath, TransformRule};

use super::{DEFAULT_RULE_PRIORITY, EncodeContext, Encoded, Encoding, GRAPH_TO_TREE};
use crate::{ChildSink, ContainerHint, Decomposable, DocumentBuilder, EncodeError};
use crate::{Field, HintSlot, Kind, Storage};

const NAME_HASH_STATE: FixedState = FixedState::with_seed(0xBB67_AE85_84CA_A73B);

macro_rules! rule_struct {
    ($($(#[$meta:meta])* $rule:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $rule {
            priority: i32,
        }

        impl $rule {
            /// Creates the rule at [`DEFAULT_RULE_PRIORITY`].
            #[inline]
            pub const fn new() -> Self {
                Self::with_priority(DEFAULT_RULE_PRIORITY)
            }

            #[inline]
            pub const fn with_priority(priority: i32) -> Self {
                Self { priority }
            }
        }

        impl Default for $rule {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }
    )*};
}

rule_struct! {
    /// Writes `null="true"` for absent values.
    NullRule,
    /// Writes the textual form of a scalar into `value`.
    ScalarRule,
    /// Tokenises an object and writes one `field` node per field.
    ///
    /// Fails on immutable fields and on repeated field names.
    ObjectRule,
    /// Tokenises a sequence and writes one `item` node per element.
    ///
    /// Needs a [`ContainerHint::Sequence`] for the slot where the sequence
    /// is first met. Later occurrences are references and need none.
    SequenceRule,
    /// Tokenises a map and writes one `entry` node, holding a `key` and a
    /// `value` node, per entry.
    ///
    /// Needs a [`ContainerHint::Map`] for the slot where the map is first
    /// met. Later occurrences are references and need none.
    MapRule,
}

fn missing_hint<B: DocumentBuilder + 'static>(
    ctx: &EncodeContext<B>,
    hint: Option<ContainerHint>,
    expected: Kind,
) -> EncodeError {
    let slot = ctx.slot().clone();
    match hint {
        Some(_) => EncodeError::HintMismatch { slot, expected },
        None => EncodeError::MissingTypeHint { slot },
    }
}

// -----------------------------------------------------------------------------
// NullRule

impl<B: DocumentBuilder + 'static> TransformRule<Encoding<B>> for NullRule {
    fn name(&self) -> &str {
        "null"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Null
    }

    fn apply(
        &self,
        _: &dyn Decomposable,
        _: &Dispatcher<Encoding<B>>,
        ctx: &mut EncodeContext<B>,
    ) -> Result<Encoded, EncodeError> {
        ctx.set_attribute("null", "true");
        Ok(Encoded::Null)
    }
}

// -----------------------------------------------------------------------------
// ScalarRule

impl<B: DocumentBuilder + 'static> TransformRule<Encoding<B>> for ScalarRule {
    fn name(&self) -> &str {
        "scalar"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Scalar
    }

    fn apply(
        &self,
        value: &dyn Decomposable,
        _: &Dispatcher<Encoding<B>>,
        ctx: &mut EncodeContext<B>,
    ) -> Result<Encoded, EncodeError> {
        let Some(text) = value.scalar() else {
            return Err(EncodeError::unsupported(
                value.type_name(),
                ctx.slot().to_string(),
                "the scalar has no textual form",
            ));
        };
        ctx.set_attribute("value", &text);
        Ok(Encoded::Scalar)
    }
}

// -----------------------------------------------------------------------------
// ObjectRule

impl<B: DocumentBuilder + 'static> TransformRule<Encoding<B>> for ObjectRule {
    fn name(&self) -> &str {
        "object"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Object
    }

    fn apply(
        &self,
        value: &dyn Decomposable,
        dispatcher: &Dispatcher<Encoding<B>>,
        ctx: &mut EncodeContext<B>,
    ) -> Result<Encoded, EncodeError> {
        let token = match ctx.identify(value)? {
            Encoded::Defined(token) => token,
            seen => return Ok(seen),
        };

        let mut sink = FieldSink {
            dispatcher,
            parent: ctx.target(),
            owner: value.type_name(),
            names: HashSet::with_hasher(NAME_HASH_STATE),
            ctx,
        };
        value.decompose(&mut sink)?;

        Ok(Encoded::Defined(token))
    }
}

struct FieldSink<'a, B: DocumentBuilder + 'static> {
    dispatcher: &'a Dispatcher<Encoding<B>>,
    ctx: &'a mut EncodeContext<B>,
    parent: B::Node,
    owner: &'static str,
    names: HashSet<String, FixedState>,
}

impl<B: DocumentBuilder + 'static> ChildSink for FieldSink<'_, B> {
    fn field(&mut self, field: Field<'_>) -> Result<(), EncodeError> {
        if field.storage() == Storage::Immutable {
            return Err(EncodeError::unsupported(
                self.owner,
                field.name(),
                "immutable storage cannot be restored on decode",
            ));
        }
        if !self.names.insert(field.name().to_owned()) {
            return Err(EncodeError::unsupported(
                self.owner,
                field.name(),
                "another field has the same name",
            ));
        }

        let node = self.ctx.create_child(self.parent, "field");
        let document = self.ctx.document_mut();
        document.set_attribute(node, "name", field.name());
        document.set_attribute(node, "type", field.declared_type());

        let slot = HintSlot::new(self.owner, field.name());
        self.ctx.encode_child(self.dispatcher, field.value(), node, slot)?;
        Ok(())
    }

    fn element(&mut self, _: &dyn Decomposable) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            "element",
            "objects report named fields only",
        ))
    }

    fn entry(&mut self, _: &dyn Decomposable, _: &dyn Decomposable) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            "entry",
            "objects report named fields only",
        ))
    }
}

// -----------------------------------------------------------------------------
// SequenceRule

impl<B: DocumentBuilder + 'static> TransformRule<Encoding<B>> for SequenceRule {
    fn name(&self) -> &str {
        "sequence"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Sequence
    }

    fn apply(
        &self,
        value: &dyn Decomposable,
        dispatcher: &Dispatcher<Encoding<B>>,
        ctx: &mut EncodeContext<B>,
    ) -> Result<Encoded, EncodeError> {
        let token = match ctx.identify(value)? {
            Encoded::Defined(token) => token,
            seen => return Ok(seen),
        };
        let element = match ctx.hint() {
            Some(ContainerHint::Sequence { element }) => element,
            other => return Err(missing_hint(ctx, other, Kind::Sequence)),
        };
        ctx.set_attribute("element-type", &element);

        let mut sink = ItemSink {
            dispatcher,
            parent: ctx.target(),
            owner: value.type_name(),
            slot: ctx.slot().nested("element"),
            element,
            index: 0,
            ctx,
        };
        value.decompose(&mut sink)?;

        Ok(Encoded::Defined(token))
    }
}

struct ItemSink<'a, B: DocumentBuilder + 'static> {
    dispatcher: &'a Dispatcher<Encoding<B>>,
    ctx: &'a mut EncodeContext<B>,
    parent: B::Node,
    owner: &'static str,
    slot: HintSlot,
    element: String,
    index: usize,
}

impl<B: DocumentBuilder + 'static> ChildSink for ItemSink<'_, B> {
    fn field(&mut self, field: Field<'_>) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            field.name(),
            "sequences report elements only",
        ))
    }

    fn element(&mut self, value: &dyn Decomposable) -> Result<(), EncodeError> {
        let node = self.ctx.create_child(self.parent, "item");
        let document = self.ctx.document_mut();
        document.set_attribute(node, "index", &self.index.to_string());
        document.set_attribute(node, "type", &self.element);
        self.index += 1;

        self.ctx
            .encode_child(self.dispatcher, value, node, self.slot.clone())?;
        Ok(())
    }

    fn entry(&mut self, _: &dyn Decomposable, _: &dyn Decomposable) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            "entry",
            "sequences report elements only",
        ))
    }
}

// -----------------------------------------------------------------------------
// MapRule

impl<B: DocumentBuilder + 'static> TransformRule<Encoding<B>> for MapRule {
    fn name(&self) -> &str {
        "map"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Map
    }

    fn apply(
        &self,
        value: &dyn Decomposable,
        dispatcher: &Dispatcher<Encoding<B>>,
        ctx: &mut EncodeContext<B>,
    ) -> Result<Encoded, EncodeError> {
        let token = match ctx.identify(value)? {
            Encoded::Defined(token) => token,
            seen => return Ok(seen),
        };
        let (key_type, value_type) = match ctx.hint() {
            Some(ContainerHint::Map { key, value }) => (key, value),
            other => return Err(missing_hint(ctx, other, Kind::Map)),
        };
        ctx.set_attribute("key-type", &key_type);
        ctx.set_attribute("value-type", &value_type);

        let mut sink = EntrySink {
            dispatcher,
            parent: ctx.target(),
            owner: value.type_name(),
            key_slot: ctx.slot().nested("key"),
            value_slot: ctx.slot().nested("value"),
            key_type,
            value_type,
            index: 0,
            ctx,
        };
        value.decompose(&mut sink)?;

        Ok(Encoded::Defined(token))
    }
}

struct EntrySink<'a, B: DocumentBuilder + 'static> {
    dispatcher: &'a Dispatcher<Encoding<B>>,
    ctx: &'a mut EncodeContext<B>,
    parent: B::Node,
    owner: &'static str,
    key_slot: HintSlot,
    value_slot: HintSlot,
    key_type: String,
    value_type: String,
    index: usize,
}

impl<B: DocumentBuilder + 'static> ChildSink for EntrySink<'_, B> {
    fn field(&mut self, field: Field<'_>) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            field.name(),
            "maps report entries only",
        ))
    }

    fn element(&mut self, _: &dyn Decomposable) -> Result<(), EncodeError> {
        Err(EncodeError::unsupported(
            self.owner,
            "element",
            "maps report entries only",
        ))
    }

    fn entry(&mut self, key: &dyn Decomposable, value: &dyn Decomposable) -> Result<(), EncodeError> {
        let entry = self.ctx.create_child(self.parent, "entry");
        self.ctx
            .document_mut()
            .set_attribute(entry, "index", &self.index.to_string());
        self.index += 1;

        let key_node = self.ctx.create_child(entry, "key");
        self.ctx
            .document_mut()
            .set_attribute(key_node, "type", &self.key_type);
        self.ctx
            .encode_child(self.dispatcher, key, key_node, self.key_slot.clone())?;

        let value_node = self.ctx.create_child(entry, "value");
        self.ctx
            .document_mut()
            .set_attribute(value_node, "type", &self.value_type);
        self.ctx
            .encode_child(self.dispatcher, value, value_node, self.value_slot.clone())?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::sync::Arc;

    use vc_ident::IdentityCache;

    use crate::{ChildSink, Decomposable, EncodeError, Field, GraphEncoder, HintSlot, TypeHints};

    struct Twice;

    impl Decomposable for Twice {
        fn type_name(&self) -> &'static str {
            "Twice"
        }

        fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
            sink.field(Field::new("a", &1_u8))?;
            sink.field(Field::new("a", &2_u8))
        }
    }

    struct Frozen {
        id: u64,
        tags: Vec<String>,
    }

    impl Decomposable for Frozen {
        fn type_name(&self) -> &'static str {
            "Frozen"
        }

        fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
            sink.field(Field::new("tags", &self.tags))?;
            sink.field(Field::new("id", &self.id).immutable())
        }
    }

    #[test]
    fn duplicate_field_names_abort() {
        let encoder = GraphEncoder::builder().build();
        let err = encoder.encode(&Twice).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::UnsupportedField { ref owner, ref field, .. } if owner == "Twice" && field == "a"
        ));
    }

    #[test]
    fn immutable_fields_abort_and_release_tokens() {
        let cache = Arc::new(IdentityCache::default());
        let encoder = GraphEncoder::builder()
            .cache(Arc::clone(&cache))
            .hints(TypeHints::new().with_sequence("Frozen", "tags", "String"))
            .build();

        let value = Frozen {
            id: 3,
            tags: vec!["x".into()],
        };
        assert!(matches!(
            encoder.encode(&value),
            Err(EncodeError::UnsupportedField { .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.live_monitors(), 0);
    }

    #[test]
    fn containers_need_hints() {
        let encoder = GraphEncoder::builder().build();
        let err = encoder.encode(&vec![1_i32, 2]).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::MissingTypeHint { ref slot } if *slot == HintSlot::root()
        ));

        let encoder = GraphEncoder::builder()
            .hints(TypeHints::new().with_sequence("", HintSlot::ROOT, "u8"))
            .build();
        let map = BTreeMap::from([(1_u8, 2_u8)]);
        assert!(matches!(
            encoder.encode(&map),
            Err(EncodeError::HintMismatch { .. })
        ));
    }

    struct Aliased {
        hinted: Rc<Vec<i32>>,
        plain: Rc<Vec<i32>>,
        plain_first: bool,
    }

    impl Decomposable for Aliased {
        fn type_name(&self) -> &'static str {
            "Aliased"
        }

        fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
            if self.plain_first {
                sink.field(Field::new("plain", &self.plain))?;
                sink.field(Field::new("hinted", &self.hinted))
            } else {
                sink.field(Field::new("hinted", &self.hinted))?;
                sink.field(Field::new("plain", &self.plain))
            }
        }
    }

    #[test]
    fn hints_are_only_needed_where_a_container_is_defined() {
        let cache = Arc::new(IdentityCache::default());
        let encoder = GraphEncoder::builder()
            .cache(Arc::clone(&cache))
            .hints(TypeHints::new().with_sequence("Aliased", "hinted", "i32"))
            .build();

        let shared = Rc::new(vec![4_i32, 5]);
        let mut value = Aliased {
            hinted: Rc::clone(&shared),
            plain: Rc::clone(&shared),
            plain_first: false,
        };

        let doc = encoder.encode(&value).unwrap();
        let fields = doc.find_all("field");
        assert_eq!(doc.attribute(fields[0], "element-type"), Some("i32"));
        let token = doc.attribute(fields[0], "id").unwrap();
        assert_eq!(doc.attribute(fields[1], "ref"), Some(token));

        // Met first at the unhinted slot, the sequence cannot be defined.
        value.plain_first = true;
        let err = encoder.encode(&value).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::MissingTypeHint { ref slot } if *slot == HintSlot::new("Aliased", "plain")
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn nested_containers_use_nested_slots() {
        let hints = TypeHints::new()
            .with_map("", HintSlot::ROOT, "String", "Vec")
            .with_sequence("root", "value", "i32");
        let encoder = GraphEncoder::builder().hints(hints).build();

        let map = BTreeMap::from([(String::from("odd"), vec![1_i32, 3]), (String::from("even"), vec![2])]);
        let doc = encoder.encode(&map).unwrap();
        let root = doc.root().unwrap();

        assert_eq!(doc.name(root), Some("map"));
        assert_eq!(doc.attribute(root, "key-type"), Some("String"));
        assert_eq!(doc.find_all("entry").len(), 2);
        assert_eq!(doc.find_all("item").len(), 3);

        let first_key = doc.find_all("key")[0];
        assert_eq!(doc.attribute(first_key, "value"), Some("even"));
        let first_value = doc.find_all("value")[0];
        assert_eq!(doc.attribute(first_value, "element-type"), Some("i32"));
    }
}
