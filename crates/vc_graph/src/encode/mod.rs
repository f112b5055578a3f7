//! Graph to tree encoding.

// -----------------------------------------------------------------------------
// Modules

mod rules;

// -----------------------------------------------------------------------------
// Exports

pub use rules::{MapRule, NullRule, ObjectRule, ScalarRule, SequenceRule};

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::marker::PhantomData;

use foldhash::fast::FixedState;
use hashbrown::HashSet;
use vc_ident::{CounterGenerator, IdentityCache, IdentityToken, Resolution, TokenGenerator};
use vc_transform::{Dispatcher, Domain, RuleRegistry, TransformPath, TransformRule};

use crate::{ContainerHint, Decomposable, Document, DocumentBuilder, EncodeError};
use crate::{HintProvider, HintSlot, TypeHints};

/// The path every encoding rule is registered under.
pub static GRAPH_TO_TREE: TransformPath = TransformPath::new_static("graph", "tree");

/// Priority of the built-in rules. Smaller values take precedence, so
/// custom rules registered below it replace the defaults for the values
/// they apply to.
pub const DEFAULT_RULE_PRIORITY: i32 = 100;

const TOKEN_HASH_STATE: FixedState = FixedState::with_seed(0x3C6E_F372_FE94_F82B);

// -----------------------------------------------------------------------------
// Encoding

/// The rule [`Domain`] of graph encoding into a `B`.
pub struct Encoding<B = Document>(PhantomData<fn() -> B>);

impl<B: DocumentBuilder + 'static> Domain for Encoding<B> {
    type Value = dyn Decomposable;
    type Context = EncodeContext<B>;
    type Output = Encoded;
    type Error = EncodeError;

    fn describe(value: &dyn Decomposable) -> String {
        format!("{} `{}`", value.kind(), value.type_name())
    }
}

/// What a rule wrote for one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Null,
    Scalar,
    /// First occurrence: the value was given this token and written out.
    Defined(IdentityToken),
    /// Later occurrence: only a reference to this token was written.
    Reference(IdentityToken),
}

impl Encoded {
    #[inline]
    pub fn token(&self) -> Option<&IdentityToken> {
        match self {
            Self::Defined(token) | Self::Reference(token) => Some(token),
            Self::Null | Self::Scalar => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Pins

/// The cache entries one traversal depends on. Each token is pinned once
/// and unpinned when the traversal ends, even by unwinding.
struct Pins {
    cache: Arc<IdentityCache>,
    tokens: HashSet<IdentityToken, FixedState>,
}

impl Pins {
    fn new(cache: Arc<IdentityCache>) -> Self {
        Self {
            cache,
            tokens: HashSet::with_hasher(TOKEN_HASH_STATE),
        }
    }

    /// Takes over a pin the cache has just granted for `token`.
    fn hold(&mut self, token: &IdentityToken) {
        if self.tokens.contains(token) {
            self.cache.unpin(token);
        } else {
            self.tokens.insert(token.clone());
        }
    }
}

impl Drop for Pins {
    fn drop(&mut self) {
        for token in self.tokens.drain() {
            self.cache.unpin(&token);
        }
    }
}

// -----------------------------------------------------------------------------
// EncodeContext

/// State of one encoding call.
///
/// Rules write into the [`target`](Self::target) node, which the parent
/// created for them, and descend with [`encode_child`](Self::encode_child).
///
/// Every cache entry the traversal resolves or assigns stays pinned until
/// the call returns, so an idle timeout cannot evict it half way.
pub struct EncodeContext<B: DocumentBuilder> {
    document: B,
    target: B::Node,
    slot: HintSlot,
    cache: Arc<IdentityCache>,
    generator: Arc<dyn TokenGenerator>,
    hints: Arc<dyn HintProvider>,
    assigned: Vec<IdentityToken>,
    pins: Pins,
}

impl<B: DocumentBuilder + 'static> EncodeContext<B> {
    #[inline]
    pub fn document(&self) -> &B {
        &self.document
    }

    #[inline]
    pub fn document_mut(&mut self) -> &mut B {
        &mut self.document
    }

    /// The node the current value is written into.
    #[inline]
    pub fn target(&self) -> B::Node {
        self.target
    }

    /// Where the current value sits, for hint lookups.
    #[inline]
    pub fn slot(&self) -> &HintSlot {
        &self.slot
    }

    #[inline]
    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Returns the container hint of the current slot.
    #[inline]
    pub fn hint(&self) -> Option<ContainerHint> {
        self.hints.hint(&self.slot)
    }

    /// Sets an attribute on the target node.
    #[inline]
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.document.set_attribute(self.target, name, value);
    }

    /// Creates a node named `name` and appends it to `parent`.
    pub fn create_child(&mut self, parent: B::Node, name: &str) -> B::Node {
        let node = self.document.create_node(name);
        self.document.append_child(parent, node);
        node
    }

    /// Tokenises `value` and writes its identity to the target node.
    ///
    /// The first time a value is met it is given a fresh token and the
    /// target receives `class`, `kind` and `id`; the caller then writes
    /// the children. Every later time the target receives only `ref` and
    /// the caller must stop.
    pub fn identify(&mut self, value: &dyn Decomposable) -> Result<Encoded, EncodeError> {
        let generator = &self.generator;
        let resolution = self
            .cache
            .resolve_and_pin(value.object_id(), || generator.next_token())?;
        self.pins.hold(resolution.token());

        match resolution {
            Resolution::Existing(token) => {
                self.set_attribute("ref", token.as_str());
                Ok(Encoded::Reference(token))
            }
            Resolution::Assigned(token) => {
                self.set_attribute("class", value.type_name());
                self.set_attribute("kind", value.kind().as_str());
                self.set_attribute("id", token.as_str());
                self.assigned.push(token.clone());
                Ok(Encoded::Defined(token))
            }
        }
    }

    /// Dispatches `value` into `node`, which sits at `slot`.
    pub fn encode_child(
        &mut self,
        dispatcher: &Dispatcher<Encoding<B>>,
        value: &dyn Decomposable,
        node: B::Node,
        slot: HintSlot,
    ) -> Result<Encoded, EncodeError> {
        let target = core::mem::replace(&mut self.target, node);
        let slot = core::mem::replace(&mut self.slot, slot);

        let encoded = dispatcher.transform(value, &GRAPH_TO_TREE, self);

        self.target = target;
        self.slot = slot;
        encoded
    }

    /// Ends the traversal, returning the document and the tokens it
    /// assigned. Pins are dropped first, so deferred evictions happen here.
    fn finish(self) -> (B, Vec<IdentityToken>) {
        let Self {
            document,
            assigned,
            pins,
            ..
        } = self;
        drop(pins);
        (document, assigned)
    }

    fn rollback(self) {
        let cache = Arc::clone(&self.cache);
        let (_, assigned) = self.finish();
        for token in &assigned {
            cache.release(token);
        }
        log::debug!("encoding failed, released {} tokens", assigned.len());
    }
}

// -----------------------------------------------------------------------------
// EncoderBuilder

/// Builder for a [`GraphEncoder`].
///
/// - [`cache`](Self::cache): shared identity cache. Default: a new cache
///   with [`CacheConfig::default`](vc_ident::CacheConfig::default).
/// - [`generator`](Self::generator): token source. Default: [`CounterGenerator`].
/// - [`hints`](Self::hints): container hints. Default: an empty [`TypeHints`].
/// - [`rule`](Self::rule): extra rules, registered next to the built-in ones.
/// - [`without_builtin_rules`](Self::without_builtin_rules): start from an empty registry.
pub struct EncoderBuilder<B: DocumentBuilder + 'static = Document> {
    registry: RuleRegistry<Encoding<B>>,
    cache: Option<Arc<IdentityCache>>,
    generator: Option<Arc<dyn TokenGenerator>>,
    hints: Option<Arc<dyn HintProvider>>,
    builtin: bool,
}

impl<B: DocumentBuilder + 'static> Default for EncoderBuilder<B> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: DocumentBuilder + 'static> EncoderBuilder<B> {
    pub fn new() -> Self {
        Self {
            registry: RuleRegistry::new(),
            cache: None,
            generator: None,
            hints: None,
            builtin: true,
        }
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<IdentityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    #[must_use]
    pub fn shared_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn hints(mut self, hints: impl HintProvider + 'static) -> Self {
        self.hints = Some(Arc::new(hints));
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: impl TransformRule<Encoding<B>> + 'static) -> Self {
        self.registry.register(rule);
        self
    }

    #[must_use]
    pub fn without_builtin_rules(mut self) -> Self {
        self.builtin = false;
        self
    }

    pub fn build(self) -> GraphEncoder<B> {
        let mut registry = self.registry;
        if self.builtin {
            registry.register(NullRule::new());
            registry.register(ScalarRule::new());
            registry.register(ObjectRule::new());
            registry.register(SequenceRule::new());
            registry.register(MapRule::new());
        }

        GraphEncoder {
            dispatcher: Dispatcher::new(registry),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(IdentityCache::default())),
            generator: self
                .generator
                .unwrap_or_else(|| Arc::new(CounterGenerator::new())),
            hints: self.hints.unwrap_or_else(|| Arc::new(TypeHints::new())),
        }
    }
}

// -----------------------------------------------------------------------------
// GraphEncoder

/// Encodes object graphs into node trees, preserving identity.
///
/// Values are tokenised through the [`IdentityCache`]. A single
/// [`encode`](Self::encode) call is a session of its own: the tokens it
/// assigns are released when it returns, so a later call never mistakes a
/// new value for one that used to live at the same address. To share
/// tokens across several documents, open a [`session`](Self::session),
/// which borrows every root for as long as the tokens live.
///
/// When an encoding fails, the tokens it assigned are released again and
/// the partial document is dropped.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use vc_graph::{ChildSink, Decomposable, EncodeError, Field, GraphEncoder};
///
/// struct Pair {
///     left: Rc<Vec<u8>>,
///     right: Rc<Vec<u8>>,
/// }
///
/// impl Decomposable for Pair {
///     fn type_name(&self) -> &'static str {
///         "Pair"
///     }
///
///     fn decompose(&self, sink: &mut dyn ChildSink) -> Result<(), EncodeError> {
///         sink.field(Field::new("left", &self.left))?;
///         sink.field(Field::new("right", &self.right))
///     }
/// }
///
/// let hints = vc_graph::TypeHints::new()
///     .with_sequence("Pair", "left", "u8")
///     .with_sequence("Pair", "right", "u8");
/// let encoder = GraphEncoder::builder().hints(hints).build();
///
/// let bytes = Rc::new(vec![1_u8, 2]);
/// let pair = Pair { left: Rc::clone(&bytes), right: bytes };
/// let doc = encoder.encode(&pair).unwrap();
///
/// let fields = doc.find_all("field");
/// assert_eq!(doc.attribute(fields[0], "id"), Some("2"));
/// assert_eq!(doc.attribute(fields[1], "ref"), Some("2"));
/// ```
pub struct GraphEncoder<B: DocumentBuilder + 'static = Document> {
    dispatcher: Dispatcher<Encoding<B>>,
    cache: Arc<IdentityCache>,
    generator: Arc<dyn TokenGenerator>,
    hints: Arc<dyn HintProvider>,
}

impl GraphEncoder {
    /// Returns a builder for an encoder writing [`Document`]s.
    #[inline]
    pub fn builder() -> EncoderBuilder {
        EncoderBuilder::new()
    }

    /// Encodes the graph reachable from `root` into a new [`Document`].
    pub fn encode(&self, root: &dyn Decomposable) -> Result<Document, EncodeError> {
        self.session().encode(root)
    }
}

impl<B: DocumentBuilder + 'static> GraphEncoder<B> {
    #[inline]
    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    #[inline]
    pub fn dispatcher(&self) -> &Dispatcher<Encoding<B>> {
        &self.dispatcher
    }

    /// Opens a session whose tokens live until it is dropped.
    #[inline]
    pub fn session(&self) -> EncodeSession<'_, B> {
        EncodeSession {
            encoder: self,
            assigned: Vec::new(),
        }
    }

    /// Encodes the graph reachable from `root` into `document`, in a
    /// session of its own.
    ///
    /// Returns the document and its new root node, named after the root
    /// value's [`Kind`](crate::Kind).
    pub fn encode_into(
        &self,
        root: &dyn Decomposable,
        document: B,
    ) -> Result<(B, B::Node), EncodeError> {
        self.session().encode_into(root, document)
    }

    fn traverse(
        &self,
        root: &dyn Decomposable,
        mut document: B,
    ) -> Result<(B, B::Node, Vec<IdentityToken>), EncodeError> {
        let node = document.create_node(root.kind().as_str());
        let mut ctx = EncodeContext {
            document,
            target: node,
            slot: HintSlot::root(),
            cache: Arc::clone(&self.cache),
            generator: Arc::clone(&self.generator),
            hints: Arc::clone(&self.hints),
            assigned: Vec::new(),
            pins: Pins::new(Arc::clone(&self.cache)),
        };

        log::debug!("encoding graph rooted at `{}`", root.type_name());

        match self.dispatcher.transform(root, &GRAPH_TO_TREE, &mut ctx) {
            Ok(_) => {
                let (document, assigned) = ctx.finish();
                log::debug!("encoded graph with {} new tokens", assigned.len());
                Ok((document, node, assigned))
            }
            Err(e) => {
                ctx.rollback();
                Err(e)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// EncodeSession

/// A run of encodings that share identity tokens.
///
/// A value met by an earlier call of the session is written as a
/// reference, until its cache entry expires or the cache is cleared.
/// Roots are borrowed for the whole session, so none of them can be
/// dropped, and its address reused, while its token is live. Dropping the
/// session releases every token it assigned.
///
/// Children must be borrowed from their parent. A composite value built on
/// the stack inside [`Decomposable::decompose`] dies before the session
/// ends, and a later value at its address would be taken for it.
///
/// # Examples
///
/// ```
/// use vc_graph::{GraphEncoder, HintSlot, TypeHints};
///
/// let hints = TypeHints::new().with_sequence("", HintSlot::ROOT, "u8");
/// let encoder = GraphEncoder::builder().hints(hints).build();
/// let bytes = vec![1_u8, 2];
///
/// let mut session = encoder.session();
/// session.encode(&bytes).unwrap();
/// let second = session.encode(&bytes).unwrap();
/// assert_eq!(second.attribute(second.root().unwrap(), "ref"), Some("1"));
/// assert_eq!(encoder.cache().len(), 1);
///
/// drop(session);
/// assert!(encoder.cache().is_empty());
/// ```
pub struct EncodeSession<'a, B: DocumentBuilder + 'static = Document> {
    encoder: &'a GraphEncoder<B>,
    assigned: Vec<IdentityToken>,
}

impl<'a> EncodeSession<'a> {
    /// Encodes the graph reachable from `root` into a new [`Document`].
    pub fn encode(&mut self, root: &'a dyn Decomposable) -> Result<Document, EncodeError> {
        let (mut document, node) = self.encode_into(root, Document::new())?;
        document.set_root(node);
        Ok(document)
    }
}

impl<'a, B: DocumentBuilder + 'static> EncodeSession<'a, B> {
    /// Encodes the graph reachable from `root` into `document`.
    pub fn encode_into(
        &mut self,
        root: &'a dyn Decomposable,
        document: B,
    ) -> Result<(B, B::Node), EncodeError> {
        let (document, node, assigned) = self.encoder.traverse(root, document)?;
        self.assigned.extend(assigned);
        Ok((document, node))
    }

    /// The tokens assigned so far, in assignment order.
    #[inline]
    pub fn tokens(&self) -> &[IdentityToken] {
        &self.assigned
    }
}

impl<B: DocumentBuilder + 'static> Drop for EncodeSession<'_, B> {
    fn drop(&mut self) {
        let cache = &self.encoder.cache;
        let released = self
            .assigned
            .drain(..)
            .filter(|token| cache.release(token))
            .count();
        log::debug!("encode session closed, released {released} tokens");
    }
}

impl<B: DocumentBuilder + 'static> Debug for EncodeSession<'_, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("tokens", &self.assigned.len())
            .finish_non_exhaustive()
    }
}

impl<B: DocumentBuilder + 'static> Debug for GraphEncoder<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphEncoder")
            .field("dispatcher", &self.dispatcher)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
