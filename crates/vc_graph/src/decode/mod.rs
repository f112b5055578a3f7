//! Tree to graph decoding.

// -----------------------------------------------------------------------------
// Modules

mod rules;

// -----------------------------------------------------------------------------
// Exports

pub use rules::{CompositeRule, NullValueRule, ReferenceRule, ScalarValueRule};

use alloc::borrow::ToOwned;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Debug;

use slotmap::{SlotMap, new_key_type};
use vc_ident::IdentityToken;
use vc_transform::{Dispatcher, Domain, RuleRegistry, TransformPath};

use crate::{DecodeError, Document, NodeId};

/// The path every decoding rule is registered under.
pub static TREE_TO_GRAPH: TransformPath = TransformPath::new_static("tree", "graph");

// -----------------------------------------------------------------------------
// TreeNode

/// A node of a document being decoded.
#[derive(Clone)]
pub struct TreeNode {
    document: Arc<Document>,
    id: NodeId,
}

impl TreeNode {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn name(&self) -> &str {
        self.document.name(self.id).unwrap_or_default()
    }

    #[inline]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.document.attribute(self.id, name)
    }

    /// Returns the attribute, or [`DecodeError::MissingAttribute`].
    pub fn require(&self, attribute: &'static str) -> Result<&str, DecodeError> {
        self.attribute(attribute)
            .ok_or_else(|| DecodeError::MissingAttribute {
                node: self.name().to_owned(),
                attribute,
            })
    }

    pub fn children(&self) -> impl Iterator<Item = TreeNode> + '_ {
        self.document.children(self.id).iter().map(|&id| TreeNode {
            document: Arc::clone(&self.document),
            id,
        })
    }

    pub(crate) fn malformed(&self, reason: &'static str) -> DecodeError {
        DecodeError::MalformedEntry {
            node: self.name().to_owned(),
            reason,
        }
    }
}

impl Debug for TreeNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Decoded graph

new_key_type! {
    /// Handle of an object in a [`DecodedGraph`].
    pub struct ObjectKey;
}

/// A decoded slot: a reference to an object, or an inline value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    Null,
    Scalar(String),
    Ref(ObjectKey),
}

impl DecodedValue {
    #[inline]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(text) => Some(text),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<ObjectKey> {
        match self {
            Self::Ref(key) => Some(*key),
            _ => None,
        }
    }
}

/// The children of a decoded object, by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBody {
    Object(Vec<(String, DecodedValue)>),
    Sequence(Vec<DecodedValue>),
    Map(Vec<(DecodedValue, DecodedValue)>),
}

/// One object of a [`DecodedGraph`].
#[derive(Debug, Clone)]
pub struct DecodedObject {
    token: IdentityToken,
    class: String,
    body: DecodedBody,
}

impl DecodedObject {
    #[inline]
    pub fn token(&self) -> &IdentityToken {
        &self.token
    }

    #[inline]
    pub fn class(&self) -> &str {
        &self.class
    }

    #[inline]
    pub fn body(&self) -> &DecodedBody {
        &self.body
    }

    /// Returns the field called `name` of an object body.
    pub fn field(&self, name: &str) -> Option<&DecodedValue> {
        match &self.body {
            DecodedBody::Object(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Returns the elements of a sequence body.
    pub fn items(&self) -> &[DecodedValue] {
        match &self.body {
            DecodedBody::Sequence(items) => items,
            _ => &[],
        }
    }

    /// Returns the entries of a map body.
    pub fn entries(&self) -> &[(DecodedValue, DecodedValue)] {
        match &self.body {
            DecodedBody::Map(entries) => entries,
            _ => &[],
        }
    }
}

/// An object graph rebuilt from a document.
///
/// Every token of the document becomes exactly one object, however often
/// it is referenced, so shared and cyclic structure survives the round trip.
#[derive(Debug)]
pub struct DecodedGraph {
    objects: SlotMap<ObjectKey, DecodedObject>,
    tokens: BTreeMap<IdentityToken, ObjectKey>,
    root: DecodedValue,
}

impl DecodedGraph {
    #[inline]
    pub fn root(&self) -> &DecodedValue {
        &self.root
    }

    #[inline]
    pub fn get(&self, key: ObjectKey) -> Option<&DecodedObject> {
        self.objects.get(key)
    }

    /// Follows a [`DecodedValue::Ref`].
    #[inline]
    pub fn resolve(&self, value: &DecodedValue) -> Option<&DecodedObject> {
        self.get(value.as_object()?)
    }

    #[inline]
    pub fn key_of(&self, token: &IdentityToken) -> Option<ObjectKey> {
        self.tokens.get(token).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates over the objects in token order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectKey, &DecodedObject)> {
        self.tokens
            .values()
            .filter_map(|&key| Some((key, self.objects.get(key)?)))
    }
}

// -----------------------------------------------------------------------------
// Decoding

/// The rule [`Domain`] of document decoding.
pub struct Decoding;

impl Domain for Decoding {
    type Value = TreeNode;
    type Context = DecodeContext;
    type Output = DecodedValue;
    type Error = DecodeError;

    fn describe(value: &TreeNode) -> String {
        format!("`{}` node", value.name())
    }
}

/// State of one [`GraphDecoder::decode`] call.
#[derive(Default)]
pub struct DecodeContext {
    objects: SlotMap<ObjectKey, DecodedObject>,
    tokens: BTreeMap<IdentityToken, ObjectKey>,
    undefined: BTreeMap<IdentityToken, ObjectKey>,
}

impl DecodeContext {
    fn placeholder(token: IdentityToken) -> DecodedObject {
        DecodedObject {
            token,
            class: String::new(),
            body: DecodedBody::Object(Vec::new()),
        }
    }

    /// Returns the object of `token`, reserving a slot if it is not
    /// defined yet.
    pub fn reference(&mut self, token: IdentityToken) -> ObjectKey {
        if let Some(&key) = self.tokens.get(&token) {
            return key;
        }
        let key = self.objects.insert(Self::placeholder(token.clone()));
        self.tokens.insert(token.clone(), key);
        self.undefined.insert(token, key);
        key
    }

    /// Starts the definition of `token`. Its body is set by [`fill`](Self::fill)
    /// once the children are decoded, so they may refer back to it.
    pub fn define(&mut self, token: IdentityToken, class: String) -> Result<ObjectKey, DecodeError> {
        let key = match self.tokens.get(&token) {
            Some(&key) => {
                if self.undefined.remove(&token).is_none() {
                    return Err(DecodeError::DuplicateDefinition { token });
                }
                key
            }
            None => {
                let key = self.objects.insert(Self::placeholder(token.clone()));
                self.tokens.insert(token, key);
                key
            }
        };
        if let Some(object) = self.objects.get_mut(key) {
            object.class = class;
        }
        Ok(key)
    }

    pub fn fill(&mut self, key: ObjectKey, body: DecodedBody) {
        if let Some(object) = self.objects.get_mut(key) {
            object.body = body;
        }
    }

    fn finish(self, root: DecodedValue) -> Result<DecodedGraph, DecodeError> {
        if let Some(token) = self.undefined.into_keys().next() {
            return Err(DecodeError::DanglingReference { token });
        }
        Ok(DecodedGraph {
            objects: self.objects,
            tokens: self.tokens,
            root,
        })
    }
}

// -----------------------------------------------------------------------------
// GraphDecoder

/// Rebuilds a [`DecodedGraph`] from a document written by the encoder.
///
/// Dispatch runs on [`TREE_TO_GRAPH`]. The [`ReferenceRule`] sits at
/// priority `0`, so any node carrying `ref` is a reference no matter what
/// else it carries; the other built-in rules sit at the default priority.
#[derive(Debug, Clone)]
pub struct GraphDecoder {
    dispatcher: Dispatcher<Decoding>,
}

impl Default for GraphDecoder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl GraphDecoder {
    pub fn new() -> Self {
        Self::with_registry(Self::builtin_rules())
    }

    /// The registry used by [`GraphDecoder::new`], to extend before use.
    pub fn builtin_rules() -> RuleRegistry<Decoding> {
        RuleRegistry::new()
            .with_rule(ReferenceRule)
            .with_rule(NullValueRule)
            .with_rule(ScalarValueRule)
            .with_rule(CompositeRule)
    }

    #[inline]
    pub fn with_registry(registry: RuleRegistry<Decoding>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry),
        }
    }

    pub fn decode(&self, document: impl Into<Arc<Document>>) -> Result<DecodedGraph, DecodeError> {
        let document = document.into();
        let id = document.root().ok_or(DecodeError::MissingRoot)?;
        let root = TreeNode { document, id };

        let mut ctx = DecodeContext::default();
        let value = self.dispatcher.transform(&root, &TREE_TO_GRAPH, &mut ctx)?;
        let graph = ctx.finish(value)?;

        log::debug!("decoded graph with {} objects", graph.len());
        Ok(graph)
    }
}

// -----------------------------------------------------------------------------
// Tests
