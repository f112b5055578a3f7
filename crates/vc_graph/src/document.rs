use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{Debug, Display, Write};

use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};
use slotmap::{SlotMap, new_key_type};

// -----------------------------------------------------------------------------
// DocumentBuilder

/// The tree operations the encoder writes through.
///
/// The encoder only ever creates nodes, sets attributes and appends
/// children, in document order. It never reads back.
pub trait DocumentBuilder {
    type Node: Copy;

    fn create_node(&mut self, name: &str) -> Self::Node;

    fn set_attribute(&mut self, node: Self::Node, name: &str, value: &str);

    fn append_child(&mut self, parent: Self::Node, child: Self::Node);
}

// -----------------------------------------------------------------------------
// Document

new_key_type! {
    /// Handle of a node in a [`Document`].
    pub struct NodeId;
}

struct NodeData {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// An in-memory node tree.
///
/// Attributes keep their insertion order; setting an attribute twice
/// replaces the value in place. `Display` renders XML-like text and
/// `Serialize` produces nested `{ name, attributes, children }` records.
///
/// # Examples
///
/// ```
/// use vc_graph::{Document, DocumentBuilder};
///
/// let mut doc = Document::new();
/// let root = doc.create_node("object");
/// let child = doc.create_node("field");
/// doc.set_attribute(child, "name", "label");
/// doc.set_attribute(child, "value", "a < b");
/// doc.append_child(root, child);
/// doc.set_root(root);
///
/// assert_eq!(
///     doc.to_string(),
///     "<object>\n  <field name=\"label\" value=\"a &lt; b\"/>\n</object>\n",
/// );
/// ```
#[derive(Default)]
pub struct Document {
    nodes: SlotMap<NodeId, NodeData>,
    root: Option<NodeId>,
}

impl Document {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[inline]
    pub fn set_root(&mut self, node: NodeId) {
        self.root = Some(node);
    }

    /// Returns the number of nodes, attached or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|data| data.name.as_str())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(node)?
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self, node: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.nodes
            .get(node)
            .into_iter()
            .flat_map(|data| data.attributes.iter())
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|data| data.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.parent
    }

    /// Returns `node` and everything below it, in document order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = Vec::from([node]);
        while let Some(next) = stack.pop() {
            if !self.contains(next) {
                continue;
            }
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Returns every node reachable from the root that is named `name`.
    pub fn find_all(&self, name: &str) -> Vec<NodeId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        self.descendants(root)
            .into_iter()
            .filter(|&node| self.name(node) == Some(name))
            .collect()
    }

    fn render(&self, out: &mut impl Write, node: NodeId, depth: usize) -> core::fmt::Result {
        let Some(data) = self.nodes.get(node) else {
            return Ok(());
        };

        for _ in 0..depth {
            out.write_str("  ")?;
        }
        write!(out, "<{}", data.name)?;
        for (key, value) in &data.attributes {
            write!(out, " {key}=\"")?;
            escape(out, value)?;
            out.write_char('"')?;
        }

        if data.children.is_empty() {
            return out.write_str("/>\n");
        }

        out.write_str(">\n")?;
        for &child in &data.children {
            self.render(out, child, depth + 1)?;
        }
        for _ in 0..depth {
            out.write_str("  ")?;
        }
        writeln!(out, "</{}>", data.name)
    }
}

impl DocumentBuilder for Document {
    type Node = NodeId;

    fn create_node(&mut self, name: &str) -> NodeId {
        self.nodes.insert(NodeData {
            name: name.to_owned(),
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
        })
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(data) = self.nodes.get_mut(node) else {
            log::warn!("attribute `{name}` set on a node that does not exist");
            return;
        };
        match data.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, old)) => value.clone_into(old),
            None => data.attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes.contains_key(child) {
            log::warn!("appended a node that does not exist");
            return;
        }
        let Some(data) = self.nodes.get_mut(parent) else {
            log::warn!("appended to a node that does not exist");
            return;
        };
        data.children.push(child);
        if let Some(child) = self.nodes.get_mut(child) {
            child.parent = Some(parent);
        }
    }
}

fn escape(out: &mut impl Write, text: &str) -> core::fmt::Result {
    for c in text.chars() {
        match c {
            '&' => out.write_str("&amp;")?,
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '"' => out.write_str("&quot;")?,
            '\'' => out.write_str("&apos;")?,
            '\n' => out.write_str("&#10;")?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

impl Display for Document {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.root {
            Some(root) => self.render(f, root, 0),
            None => Ok(()),
        }
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Serialize

#[derive(Clone, Copy)]
struct NodeView<'a> {
    document: &'a Document,
    node: NodeId,
}

struct AttributesView<'a>(NodeView<'a>);

struct ChildrenView<'a>(NodeView<'a>);

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Node", 3)?;
        state.serialize_field("name", self.document.name(self.node).unwrap_or_default())?;
        state.serialize_field("attributes", &AttributesView(*self))?;
        state.serialize_field("children", &ChildrenView(*self))?;
        state.end()
    }
}

impl Serialize for AttributesView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let NodeView { document, node } = self.0;
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in document.attributes(node) {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for ChildrenView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let NodeView { document, node } = self.0;
        let children = document.children(node);
        let mut seq = serializer.serialize_seq(Some(children.len()))?;
        for &child in children {
            seq.serialize_element(&NodeView {
                document,
                node: child,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.root {
            Some(node) => serializer.serialize_some(&NodeView {
                document: self,
                node,
            }),
            None => serializer.serialize_none(),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
