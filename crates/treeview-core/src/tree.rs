// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Materialized node forest handed to the presentation layer.
//! Pure data with deterministic serialization/hashing.

use crate::annotation::TextStyle;
use crate::row::RowKey;
use ciborium::ser::into_writer;
use serde::ser::SerializeStruct;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// BLAKE3 digest of a forest's canonical encoding.
pub type Hash32 = [u8; 32];

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Icon decoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    /// Icon name.
    pub name: String,
    /// Icon color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Text tag shown beside the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag text.
    pub text: String,
    /// Tag color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Navigation target of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink {
    /// Target URL.
    pub url: String,
    /// Open in a new tab.
    #[serde(default, skip_serializing_if = "is_false")]
    pub new_tab: bool,
}

/// Computed display attributes of a node. None of these alter structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decorations {
    /// Depth; roots are level 0.
    pub level: u32,
    /// Start collapsed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub collapsed: bool,
    /// The node named by the key filter.
    #[serde(default, skip_serializing_if = "is_false")]
    pub selected: bool,
    /// Injected by an annotation; not a row of the tree table.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
    /// External row adopting all top-level nodes.
    #[serde(default, skip_serializing_if = "is_false")]
    pub virtual_root: bool,
    /// Icons in rule order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<Icon>,
    /// Tags in rule order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Label styles, each at most once.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<TextStyle>,
    /// Navigation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<NodeLink>,
}

/// One node of the materialized tree.
///
/// Dropping, cloning and comparing walk the subtree with an explicit stack.
#[derive(Debug)]
pub struct Node {
    /// Row key, or the foreign value of a synthetic leaf.
    pub id: RowKey,
    /// Display label.
    pub label: String,
    /// Ordered children.
    pub children: Vec<Node>,
    /// Display attributes.
    pub decorations: Decorations,
}

impl Node {
    /// Childless node at `level`.
    pub fn leaf(id: RowKey, label: impl Into<String>, level: u32) -> Self {
        Self {
            id,
            label: label.into(),
            children: Vec::new(),
            decorations: Decorations {
                level,
                ..Decorations::default()
            },
        }
    }

    /// This node plus all descendants.
    pub fn node_count(&self) -> usize {
        Iter {
            stack: vec![self],
        }
        .count()
    }

    fn shallow_clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            children: Vec::new(),
            decorations: self.decorations.clone(),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        let entries = Flat::new(std::slice::from_ref(self));
        let mut roots = nest(entries.map(|e| (e.parent, e.node.shallow_clone())));
        roots.pop().unwrap_or_else(|| self.shallow_clone())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        same_trees(
            Flat::new(std::slice::from_ref(self)),
            Flat::new(std::slice::from_ref(other)),
        )
    }
}

impl Eq for Node {}

/// Ordered roots of the materialized tree. May be empty.
///
/// Serialized as `{"nodes": [...]}`: every node in pre-order with the index
/// of its parent entry (`null` for roots) in place of nested children.
#[derive(Debug, Default)]
pub struct Forest {
    /// Top-level nodes.
    pub roots: Vec<Node>,
}

impl Forest {
    /// Wrap a list of roots.
    pub fn new(roots: Vec<Node>) -> Self {
        Self { roots }
    }

    /// True when there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total node count, synthetic leaves included.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Depth-first pre-order traversal.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: self.roots.iter().rev().collect(),
        }
    }

    /// First node (pre-order) with `id` that is not a synthetic leaf.
    pub fn find(&self, id: &RowKey) -> Option<&Node> {
        self.iter()
            .find(|n| &n.id == id && !n.decorations.synthetic)
    }

    /// Canonical CBOR encoding for hashing/comparison.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut bytes = Vec::new();
        into_writer(self, &mut bytes)?;
        Ok(bytes)
    }

    /// BLAKE3 hash of the canonical form.
    pub fn compute_hash(&self) -> Result<Hash32, ciborium::ser::Error<std::io::Error>> {
        Ok(blake3::hash(&self.to_canonical_bytes()?).into())
    }
}

impl Clone for Forest {
    fn clone(&self) -> Self {
        Self::new(nest(
            Flat::new(&self.roots).map(|e| (e.parent, e.node.shallow_clone())),
        ))
    }
}

impl PartialEq for Forest {
    fn eq(&self, other: &Self) -> bool {
        same_trees(Flat::new(&self.roots), Flat::new(&other.roots))
    }
}

impl Eq for Forest {}

/// One pre-order entry of the flat encoding.
#[derive(Serialize)]
struct FlatRef<'a> {
    parent: Option<usize>,
    id: &'a RowKey,
    label: &'a str,
    decorations: &'a Decorations,
}

#[derive(Deserialize)]
struct FlatOwned {
    parent: Option<usize>,
    id: RowKey,
    label: String,
    #[serde(default)]
    decorations: Decorations,
}

struct FlatEntry<'a> {
    parent: Option<usize>,
    node: &'a Node,
}

impl FlatEntry<'_> {
    /// Same position and own fields; children are compared as later entries.
    fn matches(&self, other: &Self) -> bool {
        self.parent == other.parent
            && self.node.id == other.node.id
            && self.node.label == other.node.label
            && self.node.decorations == other.node.decorations
    }
}

/// Pre-order walk yielding each node with its parent's position.
struct Flat<'a> {
    stack: Vec<(Option<usize>, &'a Node)>,
    next: usize,
}

impl<'a> Flat<'a> {
    fn new(roots: &'a [Node]) -> Self {
        Self {
            stack: roots.iter().rev().map(|n| (None, n)).collect(),
            next: 0,
        }
    }
}

impl<'a> Iterator for Flat<'a> {
    type Item = FlatEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (parent, node) = self.stack.pop()?;
        let index = self.next;
        self.next += 1;
        self.stack
            .extend(node.children.iter().rev().map(|c| (Some(index), c)));
        Some(FlatEntry { parent, node })
    }
}

fn same_trees(mut a: Flat<'_>, mut b: Flat<'_>) -> bool {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x.matches(&y) => {}
            _ => return false,
        }
    }
}

/// Rebuild nesting from pre-order entries whose parent precedes them.
fn nest(entries: impl Iterator<Item = (Option<usize>, Node)>) -> Vec<Node> {
    let mut slots: Vec<(Option<usize>, Option<Node>)> =
        entries.map(|(parent, node)| (parent, Some(node))).collect();
    let mut roots = Vec::new();
    for i in (0..slots.len()).rev() {
        let parent = slots[i].0;
        let Some(mut node) = slots[i].1.take() else {
            continue;
        };
        node.children.reverse();
        match parent.filter(|&p| p < i).and_then(|p| slots[p].1.as_mut()) {
            Some(owner) => owner.children.push(node),
            None => roots.push(node),
        }
    }
    roots.reverse();
    roots
}

impl Serialize for Forest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Nodes<'a>(&'a [Node]);

        impl Serialize for Nodes<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(Flat::new(self.0).map(|e| FlatRef {
                    parent: e.parent,
                    id: &e.node.id,
                    label: &e.node.label,
                    decorations: &e.node.decorations,
                }))
            }
        }

        let mut state = serializer.serialize_struct("Forest", 1)?;
        state.serialize_field("nodes", &Nodes(&self.roots))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Forest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            nodes: Vec<FlatOwned>,
        }

        let wire = Wire::deserialize(deserializer)?;
        if let Some((i, p)) = wire
            .nodes
            .iter()
            .enumerate()
            .find_map(|(i, n)| n.parent.filter(|&p| p >= i).map(|p| (i, p)))
        {
            return Err(de::Error::custom(format_args!(
                "node {i} names parent {p}, which does not precede it"
            )));
        }
        Ok(Self::new(nest(wire.nodes.into_iter().map(|n| {
            let node = Node {
                id: n.id,
                label: n.label,
                children: Vec::new(),
                decorations: n.decorations,
            };
            (n.parent, node)
        }))))
    }
}

/// Pre-order iterator over a [`Forest`].
pub struct Iter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl<'a> IntoIterator for &'a Forest {
    type Item = &'a Node;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Forest {
        let mut a = Node::leaf(RowKey::Int(1), "A", 0);
        let mut b = Node::leaf(RowKey::Int(2), "B", 1);
        b.children.push(Node::leaf(RowKey::Int(3), "C", 2));
        a.children.push(b);
        Forest::new(vec![a, Node::leaf(RowKey::Int(4), "D", 0)])
    }

    #[test]
    fn iter_is_preorder() {
        let ids: Vec<_> = sample().iter().map(|n| n.id.clone()).collect();
        assert_eq!(
            ids,
            vec![RowKey::Int(1), RowKey::Int(2), RowKey::Int(3), RowKey::Int(4)]
        );
    }

    #[test]
    fn counts_and_finds_nodes() {
        let forest = sample();
        assert_eq!(forest.node_count(), 4);
        assert_eq!(forest.find(&RowKey::Int(3)).map(|n| n.label.as_str()), Some("C"));
        assert!(forest.find(&RowKey::Int(9)).is_none());
    }

    #[test]
    fn hash_tracks_structure() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
        b.roots.swap(0, 1);
        assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    }

    #[test]
    fn serializes_as_flat_preorder_with_parent_positions() {
        let json = serde_json::to_value(sample()).unwrap();
        let parents: Vec<_> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["parent"].clone())
            .collect();
        assert_eq!(parents, vec![json!(null), json!(0), json!(1), json!(null)]);
        assert_eq!(
            json["nodes"][0],
            json!({"parent": null, "id": 1, "label": "A", "decorations": {"level": 0}})
        );
    }

    #[test]
    fn flat_encoding_rebuilds_the_same_forest() {
        let forest = sample();
        let back: Forest = serde_json::from_value(serde_json::to_value(&forest).unwrap()).unwrap();
        assert_eq!(back, forest);
        assert_eq!(back.roots[0].children[0].children[0].label, "C");
        assert_eq!(forest.clone(), forest);
        assert_eq!(forest.roots[0].clone(), forest.roots[0]);
        assert_ne!(forest.roots[0], forest.roots[1]);
    }

    #[test]
    fn forward_parent_references_are_rejected() {
        let wire = json!({"nodes": [
            {"parent": 1, "id": 1, "label": "A"},
            {"parent": null, "id": 2, "label": "B"},
        ]});
        let err = serde_json::from_value::<Forest>(wire).unwrap_err();
        assert!(err.to_string().contains("does not precede"));
    }
}
