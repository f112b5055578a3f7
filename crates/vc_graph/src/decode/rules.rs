use alloc::borrow::ToOwned;
use alloc::vec::Vec;

use vc_ident::IdentityToken;
use vc_transform::{Dispatcher, TransformPath, TransformRule};

use super::{DecodeContext, DecodedBody, DecodedValue, Decoding, TREE_TO_GRAPH, TreeNode};
use crate::encode::DEFAULT_RULE_PRIORITY;
use crate::{DecodeError, Kind};

// -----------------------------------------------------------------------------
// ReferenceRule

/// Resolves any node carrying `ref` to the referenced object.
///
/// Runs at priority `0`, ahead of every other built-in decoding rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceRule;

impl TransformRule<Decoding> for ReferenceRule {
    fn name(&self) -> &str {
        "reference"
    }

    fn path(&self) -> &TransformPath {
        &TREE_TO_GRAPH
    }

    fn priority(&self) -> i32 {
        0
    }

    fn is_applicable(&self, node: &TreeNode) -> bool {
        node.attribute("ref").is_some()
    }

    fn apply(
        &self,
        node: &TreeNode,
        _: &Dispatcher<Decoding>,
        ctx: &mut DecodeContext,
    ) -> Result<DecodedValue, DecodeError> {
        let token = IdentityToken::new(node.require("ref")?)?;
        Ok(DecodedValue::Ref(ctx.reference(token)))
    }
}

// -----------------------------------------------------------------------------
// NullValueRule

/// Decodes `null="true"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullValueRule;

impl TransformRule<Decoding> for NullValueRule {
    fn name(&self) -> &str {
        "null"
    }

    fn path(&self) -> &TransformPath {
        &TREE_TO_GRAPH
    }

    fn priority(&self) -> i32 {
        DEFAULT_RULE_PRIORITY
    }

    fn is_applicable(&self, node: &TreeNode) -> bool {
        node.attribute("null") == Some("true")
    }

    fn apply(
        &self,
        _: &TreeNode,
        _: &Dispatcher<Decoding>,
        _: &mut DecodeContext,
    ) -> Result<DecodedValue, DecodeError> {
        Ok(DecodedValue::Null)
    }
}

// -----------------------------------------------------------------------------
// ScalarValueRule

/// Decodes an inline `value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarValueRule;

impl TransformRule<Decoding> for ScalarValueRule {
    fn name(&self) -> &str {
        "scalar"
    }

    fn path(&self) -> &TransformPath {
        &TREE_TO_GRAPH
    }

    fn priority(&self) -> i32 {
        DEFAULT_RULE_PRIORITY
    }

    fn is_applicable(&self, node: &TreeNode) -> bool {
        node.attribute("value").is_some()
    }

    fn apply(
        &self,
        node: &TreeNode,
        _: &Dispatcher<Decoding>,
        _: &mut DecodeContext,
    ) -> Result<DecodedValue, DecodeError> {
        Ok(DecodedValue::Scalar(node.require("value")?.to_owned()))
    }
}

// -----------------------------------------------------------------------------
// CompositeRule

/// Decodes the definition of an object, sequence or map.
///
/// The object's slot exists before its children are decoded, so
/// references back to it resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeRule;

impl TransformRule<Decoding> for CompositeRule {
    fn name(&self) -> &str {
        "composite"
    }

    fn path(&self) -> &TransformPath {
        &TREE_TO_GRAPH
    }

    fn priority(&self) -> i32 {
        DEFAULT_RULE_PRIORITY
    }

    fn is_applicable(&self, node: &TreeNode) -> bool {
        node.attribute("id").is_some()
    }

    fn apply(
        &self,
        node: &TreeNode,
        dispatcher: &Dispatcher<Decoding>,
        ctx: &mut DecodeContext,
    ) -> Result<DecodedValue, DecodeError> {
        let token = IdentityToken::new(node.require("id")?)?;
        let class = node.require("class")?.to_owned();
        let kind = Kind::parse(node.require("kind")?)
            .filter(|kind| kind.is_composite())
            .ok_or_else(|| node.malformed("`kind` does not name a composite"))?;

        let key = ctx.define(token, class)?;

        let body = match kind {
            Kind::Sequence => DecodedBody::Sequence(
                children(node, "item")?
                    .iter()
                    .map(|item| dispatcher.transform(item, &TREE_TO_GRAPH, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Kind::Map => {
                let mut entries = Vec::new();
                for entry in children(node, "entry")? {
                    entries.push(decode_entry(&entry, dispatcher, ctx)?);
                }
                DecodedBody::Map(entries)
            }
            _ => {
                let mut fields = Vec::new();
                for field in children(node, "field")? {
                    let name = field.require("name")?.to_owned();
                    let value = dispatcher.transform(&field, &TREE_TO_GRAPH, ctx)?;
                    fields.push((name, value));
                }
                DecodedBody::Object(fields)
            }
        };

        ctx.fill(key, body);
        Ok(DecodedValue::Ref(key))
    }
}

fn children(node: &TreeNode, expected: &'static str) -> Result<Vec<TreeNode>, DecodeError> {
    node.children()
        .map(|child| {
            if child.name() == expected {
                Ok(child)
            } else {
                Err(child.malformed("unexpected child of a composite"))
            }
        })
        .collect()
}

fn decode_entry(
    entry: &TreeNode,
    dispatcher: &Dispatcher<Decoding>,
    ctx: &mut DecodeContext,
) -> Result<(DecodedValue, DecodedValue), DecodeError> {
    let mut key = None;
    let mut value = None;

    for part in entry.children() {
        let slot = match part.name() {
            "key" => &mut key,
            "value" => &mut value,
            _ => return Err(part.malformed("entries hold only `key` and `value`")),
        };
        if slot.is_some() {
            return Err(entry.malformed("entry holds a duplicate part"));
        }
        *slot = Some(dispatcher.transform(&part, &TREE_TO_GRAPH, ctx)?);
    }

    match (key, value) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(entry.malformed("entry needs both a `key` and a `value`")),
    }
}
