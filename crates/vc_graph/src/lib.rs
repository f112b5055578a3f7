//! Identity-preserving encoding of object graphs into node trees.
//!
//! A value takes part by implementing [`Decomposable`]: it reports its
//! [`Kind`] and hands its children to a [`ChildSink`]. The [`GraphEncoder`]
//! walks the graph through a rule [`Dispatcher`](vc_transform::Dispatcher)
//! and writes one node per value into a [`DocumentBuilder`]. Every composite
//! value is given an [`IdentityToken`](vc_ident::IdentityToken) the first
//! time it is met; meeting it again yields a reference node, so shared
//! sub-graphs stay shared and cycles terminate.
//!
//! ## Menu
//!
//! - [`Decomposable`], [`ChildSink`], [`Field`]: The decomposition capability.
//! - [`HintProvider`], [`TypeHints`]: Declared element, key and value types of containers.
//! - [`DocumentBuilder`]: The three operations the encoder needs from a tree.
//!     - [`Document`]: In-memory tree with XML-like rendering and `serde` support.
//! - [`GraphEncoder`]: Graph to tree, see [`EncoderBuilder`] and the built-in rules.
//!     - [`EncodeSession`]: Several documents sharing identity tokens.
//! - [`GraphDecoder`]: Tree back to a [`DecodedGraph`].
//!
//! ## Document layout
//!
//! ```text
//! <object class="Node" kind="object" id="1">
//!   <field name="name" type="String" value="A"/>
//!   <field name="children" type="Vec" class="Vec" kind="sequence" id="2" element-type="Node">
//!     <item index="0" type="Node" class="Node" kind="object" id="3">
//!       <field name="name" type="String" value="B"/>
//!       ...
//!     </item>
//!     <item index="1" type="Node" ref="3"/>
//!   </field>
//! </object>
//! ```
//!
//! Map entries are written as `entry` nodes holding one `key` and one
//! `value` node. Absent values carry `null="true"`.

#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

// -----------------------------------------------------------------------------
// Modules

mod decode;
mod decompose;
mod document;
mod encode;
mod error;
mod hint;

// -----------------------------------------------------------------------------
// Exports

pub use decode::{DecodedBody, DecodedGraph, DecodedObject, DecodedValue, ObjectKey};
pub use decode::{Decoding, DecodeContext, GraphDecoder, TREE_TO_GRAPH, TreeNode};
pub use decode::{CompositeRule, NullValueRule, ReferenceRule, ScalarValueRule};
pub use decompose::{ChildSink, Decomposable, Field, Kind, Storage};
pub use document::{Document, DocumentBuilder, NodeId};
pub use encode::{DEFAULT_RULE_PRIORITY, GRAPH_TO_TREE};
pub use encode::{EncodeContext, EncodeSession, Encoded, EncoderBuilder, Encoding, GraphEncoder};
pub use encode::{MapRule, NullRule, ObjectRule, ScalarRule, SequenceRule};
pub use error::{DecodeError, EncodeError};
pub use hint::{ContainerHint, HintProvider, HintSlot, TypeHints};
