use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use vc_graph::{
    ChildSink, Decomposable, DecodedBody, DecodedValue, Document, DocumentBuilder, EncodeContext,
    EncodeError, Encoded, EncoderBuilder, Encoding, Field, GRAPH_TO_TREE, GraphDecoder,
    GraphEncoder, Kind, TypeHints,
};
use vc_ident::{CacheConfig, IdentityCache, MemorySeedStore, RewriteGenerator, RewriteRules};
use vc_transform::{DispatchError, Dispatcher, TransformPath, TransformRule};

// -----------------------------------------------------------------------------
// Fixtures

struct Node {
    name: String,
    children: Vec<Rc<Node>>,
}

impl Node {
    fn leaf(name: &str) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }
}

impl Decomposable for Node {
    fn type_name(&self) -> &'static str {
        "Node"
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        sink.field(Field::new("name", &self.name))?;
        sink.field(Field::new("children", &self.children).declared("Vec<Node>"))
    }
}

fn node_hints() -> TypeHints {
    TypeHints::new().with_sequence("Node", "children", "Node")
}

struct Link {
    name: &'static str,
    next: Option<Rc<RefCell<Link>>>,
}

impl Decomposable for Link {
    fn type_name(&self) -> &'static str {
        "Link"
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        sink.field(Field::new("name", &self.name))?;
        sink.field(Field::new("next", &self.next).declared("Link"))
    }
}

struct Pair {
    left: Rc<Node>,
    right: Rc<Node>,
}

impl Decomposable for Pair {
    fn type_name(&self) -> &'static str {
        "Pair"
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        sink.field(Field::new("left", &self.left))?;
        sink.field(Field::new("right", &self.right))
    }
}

fn attributes_of(doc: &Document, name: &str, attribute: &str) -> Vec<Option<String>> {
    doc.find_all(name)
        .into_iter()
        .map(|node| doc.attribute(node, attribute).map(str::to_owned))
        .collect()
}

// -----------------------------------------------------------------------------
// Identity

#[test]
fn shared_object_is_written_once() {
    let shared = Rc::new(Node::leaf("shared"));
    let pair = Pair {
        left: Rc::clone(&shared),
        right: Rc::clone(&shared),
    };

    let encoder = GraphEncoder::builder().hints(node_hints()).build();
    let doc = encoder.encode(&pair).unwrap();

    let fields = doc.find_all("field");
    let left = fields[0];
    let right = *fields.last().unwrap();
    assert_eq!(doc.attribute(left, "name"), Some("left"));
    assert_eq!(doc.attribute(right, "name"), Some("right"));

    let token = doc.attribute(left, "id").unwrap();
    assert_eq!(doc.attribute(right, "ref"), Some(token));
    assert_eq!(doc.attribute(right, "id"), None);
    assert!(doc.children(right).is_empty());

    let definitions = attributes_of(&doc, "field", "id")
        .into_iter()
        .flatten()
        .filter(|id| id == token)
        .count();
    assert_eq!(definitions, 1);
}

#[test]
fn self_reference_terminates() {
    let link = Rc::new(RefCell::new(Link {
        name: "a",
        next: None,
    }));
    link.borrow_mut().next = Some(Rc::clone(&link));

    let encoder = GraphEncoder::builder().build();
    let doc = encoder.encode(&link).unwrap();

    let root = doc.root().unwrap();
    assert_eq!(doc.name(root), Some("object"));
    assert_eq!(doc.attribute(root, "class"), Some("Link"));
    let token = doc.attribute(root, "id").unwrap().to_owned();

    let next = doc.children(root)[1];
    assert_eq!(doc.attribute(next, "name"), Some("next"));
    assert_eq!(doc.attribute(next, "ref"), Some(token.as_str()));

    assert_eq!(attributes_of(&doc, "field", "id").into_iter().flatten().count(), 0);

    link.borrow_mut().next = None;
}

#[test]
fn scenario_round_trips_sharing() {
    let b = Rc::new(Node::leaf("B"));
    let a = Node {
        name: "A".into(),
        children: vec![Rc::clone(&b), Rc::clone(&b)],
    };

    let encoder = GraphEncoder::builder().hints(node_hints()).build();
    let doc = encoder.encode(&a).unwrap();

    let items = doc.find_all("item");
    assert_eq!(items.len(), 2);
    assert_eq!(doc.attribute(items[0], "class"), Some("Node"));
    assert_eq!(doc.attribute(items[0], "type"), Some("Node"));
    let b_token = doc.attribute(items[0], "id").unwrap();
    assert_eq!(doc.attribute(items[1], "ref"), Some(b_token));
    assert!(doc.children(items[1]).is_empty());

    let rendered = doc.to_string();
    assert_eq!(rendered.matches("value=\"B\"").count(), 1);

    let graph = GraphDecoder::new().decode(doc).unwrap();
    let root = graph.resolve(graph.root()).unwrap();
    assert_eq!(root.class(), "Node");
    assert_eq!(root.field("name").and_then(DecodedValue::as_scalar), Some("A"));

    let children = graph.resolve(root.field("children").unwrap()).unwrap();
    let [first, second] = children.items() else {
        panic!("expected two children, got {:?}", children.body());
    };
    assert_eq!(first, second);

    let child = graph.resolve(first).unwrap();
    assert_eq!(child.field("name").and_then(DecodedValue::as_scalar), Some("B"));
    // Root node, its children list, B and B's (empty) children list.
    assert_eq!(graph.len(), 4);
}

#[test]
fn cycles_decode_to_one_object() {
    let link = Rc::new(RefCell::new(Link {
        name: "loop",
        next: None,
    }));
    link.borrow_mut().next = Some(Rc::clone(&link));

    let doc = GraphEncoder::builder().build().encode(&link).unwrap();
    link.borrow_mut().next = None;

    let graph = GraphDecoder::new().decode(doc).unwrap();
    let object = graph.resolve(graph.root()).unwrap();
    assert_eq!(object.field("next"), Some(graph.root()));
    assert_eq!(graph.len(), 1);
}

#[test]
fn maps_and_nulls_round_trip() {
    struct Registry {
        owner: Option<String>,
        entries: std::collections::BTreeMap<String, Rc<Node>>,
    }

    impl Decomposable for Registry {
        fn type_name(&self) -> &'static str {
            "Registry"
        }

        fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
            sink.field(Field::new("owner", &self.owner).declared("String"))?;
            sink.field(Field::new("entries", &self.entries))
        }
    }

    let node = Rc::new(Node::leaf("n"));
    let registry = Registry {
        owner: None,
        entries: [("x".to_owned(), Rc::clone(&node)), ("y".to_owned(), node)].into(),
    };

    let hints = node_hints().with_map("Registry", "entries", "String", "Node");
    let doc = GraphEncoder::builder().hints(hints).build().encode(&registry).unwrap();

    let owner = doc.find_all("field")[0];
    assert_eq!(doc.attribute(owner, "null"), Some("true"));
    assert_eq!(doc.find_all("entry").len(), 2);

    let graph = GraphDecoder::new().decode(doc).unwrap();
    let root = graph.resolve(graph.root()).unwrap();
    assert_eq!(root.field("owner"), Some(&DecodedValue::Null));

    let entries = graph.resolve(root.field("entries").unwrap()).unwrap();
    let DecodedBody::Map(entries) = entries.body() else {
        panic!("expected a map body");
    };
    assert_eq!(entries[0].0.as_scalar(), Some("x"));
    assert_eq!(entries[0].1, entries[1].1);
}

#[test]
fn encoded_documents_serialize_as_trees() {
    let doc = GraphEncoder::builder()
        .hints(node_hints())
        .build()
        .encode(&Node::leaf("json"))
        .unwrap();

    let json = serde_json::to_value(&doc).unwrap();
    assert_eq!(json["name"], "object");
    assert_eq!(json["attributes"]["class"], "Node");
    assert_eq!(json["children"][0]["attributes"]["value"], "json");
    assert_eq!(json["children"][1]["attributes"]["element-type"], "Node");
}

// -----------------------------------------------------------------------------
// Sessions

#[test]
fn session_spans_calls_until_dropped() {
    let node = Node::leaf("kept");
    let encoder = GraphEncoder::builder().hints(node_hints()).build();

    let mut session = encoder.session();
    let first = session.encode(&node).unwrap();
    let root = first.root().unwrap();
    let token = first.attribute(root, "id").unwrap().to_owned();

    let second = session.encode(&node).unwrap();
    let root = second.root().unwrap();
    assert_eq!(second.attribute(root, "ref"), Some(token.as_str()));
    assert_eq!(session.tokens().len(), 2);

    encoder.cache().clear();
    let third = session.encode(&node).unwrap();
    let root = third.root().unwrap();
    assert!(third.attribute(root, "id").is_some());
    assert_ne!(third.attribute(root, "id"), Some(token.as_str()));

    drop(session);
    assert!(encoder.cache().is_empty());
}

#[test]
fn single_calls_release_their_tokens() {
    let encoder = GraphEncoder::builder().hints(node_hints()).build();

    // Each leaf is likely to land where the previous one lived.
    for name in ["first", "second"] {
        let leaf = Node::leaf(name);
        let doc = encoder.encode(&leaf).unwrap();
        let root = doc.root().unwrap();

        assert!(doc.attribute(root, "id").is_some());
        assert_eq!(doc.attribute(root, "ref"), None);
        assert_eq!(attributes_of(&doc, "field", "value"), [Some(name.to_owned()), None]);
        assert!(encoder.cache().is_empty());
    }
}

#[test]
fn evicted_objects_are_encoded_again() {
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default().with_idle_timeout(Duration::from_millis(30)),
    ));
    let encoder = GraphEncoder::builder()
        .cache(Arc::clone(&cache))
        .hints(node_hints())
        .build();

    let node = Node::leaf("brief");
    let mut session = encoder.session();
    session.encode(&node).unwrap();
    assert_eq!(cache.len(), 2);

    std::thread::sleep(Duration::from_millis(200));
    assert!(cache.is_empty());

    let doc = session.encode(&node).unwrap();
    assert!(doc.attribute(doc.root().unwrap(), "id").is_some());
}

/// Takes its time between the two fields.
struct Slow {
    left: Rc<Node>,
    right: Rc<Node>,
    pause: Duration,
}

impl Decomposable for Slow {
    fn type_name(&self) -> &'static str {
        "Slow"
    }

    fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
        sink.field(Field::new("left", &self.left))?;
        std::thread::sleep(self.pause);
        sink.field(Field::new("right", &self.right))
    }
}

#[test]
fn entries_outlive_their_timeout_while_encoding() {
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default().with_idle_timeout(Duration::from_millis(20)),
    ));
    let encoder = GraphEncoder::builder()
        .cache(Arc::clone(&cache))
        .hints(node_hints())
        .build();

    let shared = Rc::new(Node::leaf("shared"));
    let slow = Slow {
        left: Rc::clone(&shared),
        right: shared,
        pause: Duration::from_millis(150),
    };

    let mut session = encoder.session();
    let doc = session.encode(&slow).unwrap();
    let fields: Vec<_> = doc
        .find_all("field")
        .into_iter()
        .filter(|&node| matches!(doc.attribute(node, "name"), Some("left" | "right")))
        .collect();
    let token = doc.attribute(fields[0], "id").unwrap();
    assert_eq!(doc.attribute(fields[1], "ref"), Some(token));
    assert_eq!(doc.to_string().matches("value=\"shared\"").count(), 1);

    // The deferred evictions ran once the traversal let go.
    assert!(cache.is_empty());
    assert_eq!(cache.live_monitors(), 0);
}

#[test]
fn rewrite_generator_supplies_tokens() {
    let rules = RewriteRules::increment("abcdefghijklmnopqrstuvwxyz").unwrap();
    let generator = RewriteGenerator::open(rules, MemorySeedStore::new(), "z").unwrap();
    let encoder = GraphEncoder::builder()
        .generator(generator)
        .hints(node_hints())
        .build();

    let doc = encoder.encode(&Node::leaf("x")).unwrap();
    let root = doc.root().unwrap();
    assert_eq!(doc.attribute(root, "id"), Some("z"));
    assert_eq!(attributes_of(&doc, "field", "id"), [None, Some("ba".to_owned())]);
}

// -----------------------------------------------------------------------------
// Rules

/// Writes strings that look like secrets as a redaction marker.
struct Redact;

impl TransformRule<Encoding> for Redact {
    fn name(&self) -> &str {
        "redact"
    }

    fn path(&self) -> &TransformPath {
        &GRAPH_TO_TREE
    }

    fn priority(&self) -> i32 {
        0
    }

    fn is_applicable(&self, value: &dyn Decomposable) -> bool {
        value.kind() == Kind::Scalar
            && value.scalar().is_some_and(|text| text.starts_with("secret:"))
    }

    fn apply(
        &self,
        _: &dyn Decomposable,
        _: &Dispatcher<Encoding>,
        ctx: &mut EncodeContext<Document>,
    ) -> Result<Encoded, EncodeError> {
        ctx.set_attribute("redacted", "true");
        Ok(Encoded::Scalar)
    }
}

#[test]
fn low_priority_number_overrides_builtin_rules() {
    let encoder = GraphEncoder::builder()
        .rule(Redact)
        .hints(node_hints())
        .build();

    let secret = Node::leaf("secret:hunter2");
    let public = Node::leaf("public");

    let doc = encoder.encode(&secret).unwrap();
    let name = doc.find_all("field")[0];
    assert_eq!(doc.attribute(name, "redacted"), Some("true"));
    assert_eq!(doc.attribute(name, "value"), None);

    let doc = encoder.encode(&public).unwrap();
    let name = doc.find_all("field")[0];
    assert_eq!(doc.attribute(name, "value"), Some("public"));
}

#[test]
fn competing_rules_fail_loudly() {
    struct AlsoScalar;

    impl TransformRule<Encoding> for AlsoScalar {
        fn name(&self) -> &str {
            "also-scalar"
        }

        fn path(&self) -> &TransformPath {
            &GRAPH_TO_TREE
        }

        fn priority(&self) -> i32 {
            vc_graph::DEFAULT_RULE_PRIORITY
        }

        fn is_applicable(&self, value: &dyn Decomposable) -> bool {
            value.kind() == Kind::Scalar
        }

        fn apply(
            &self,
            _: &dyn Decomposable,
            _: &Dispatcher<Encoding>,
            _: &mut EncodeContext<Document>,
        ) -> Result<Encoded, EncodeError> {
            Ok(Encoded::Scalar)
        }
    }

    let encoder = GraphEncoder::builder().rule(AlsoScalar).build();
    let err = encoder.encode(&7_u32).unwrap_err();
    let EncodeError::Dispatch(DispatchError::AmbiguousRule { rules, priority, .. }) = &err else {
        panic!("expected an ambiguity, got {err:?}");
    };
    assert_eq!(*priority, vc_graph::DEFAULT_RULE_PRIORITY);
    assert_eq!(*rules, ["also-scalar", "scalar"]);
}

#[test]
fn empty_registry_reports_unknown_path() {
    let encoder = GraphEncoder::builder().without_builtin_rules().build();
    assert!(matches!(
        encoder.encode(&1_u8),
        Err(EncodeError::Dispatch(DispatchError::UnknownPath { .. }))
    ));
}

// -----------------------------------------------------------------------------
// Document collaborator

/// Records builder calls as text, standing in for an external tree.
#[derive(Default)]
struct Trace {
    lines: Vec<String>,
    next: usize,
}

impl DocumentBuilder for Trace {
    type Node = usize;

    fn create_node(&mut self, name: &str) -> usize {
        self.next += 1;
        self.lines.push(format!("create {} {name}", self.next));
        self.next
    }

    fn set_attribute(&mut self, node: usize, name: &str, value: &str) {
        self.lines.push(format!("set {node} {name}={value}"));
    }

    fn append_child(&mut self, parent: usize, child: usize) {
        self.lines.push(format!("append {parent} {child}"));
    }
}

#[test]
fn any_document_builder_can_be_targeted() {
    let encoder = EncoderBuilder::<Trace>::new().hints(node_hints()).build();
    let (trace, root) = encoder
        .encode_into(&Node::leaf("t"), Trace::default())
        .unwrap();

    assert_eq!(root, 1);
    assert_eq!(
        trace.lines[..6],
        [
            "create 1 object",
            "set 1 class=Node",
            "set 1 kind=object",
            "set 1 id=1",
            "create 2 field",
            "append 1 2",
        ]
    );
    assert!(trace.lines.contains(&"set 2 value=t".to_owned()));
}
