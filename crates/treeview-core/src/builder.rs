// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tree builder: flat self-referencing rows → decorated node forest.
//!
//! # Algorithm
//!
//! 1. Index rows by key and group them by parent key, once per call.
//! 2. Roots are rows whose parent is null, absent, or not among the fetched
//!    keys (dangling references degrade to roots).
//! 3. Assemble depth-first, ordering siblings by the order field (stable, so
//!    ties keep fetch order) and applying annotation rules per node.
//! 4. Rows left unvisited sit on a parent cycle; the first of them in fetch
//!    order is promoted to a root and assembly resumes, until every keyed row
//!    is placed exactly once.
//!
//! The builder is pure: no I/O, no clock, no randomness. Identical inputs give
//! structurally identical forests.

use crate::annotation::{AnnotationKind, AnnotationRule};
use crate::config::Linkage;
use crate::ports::{is_truthy, FormulaEvaluator, Scope};
use crate::row::{compare_values, display_value, Row, RowKey};
use crate::schema::Actor;
use crate::tree::{Decorations, Forest, Icon, Node, NodeLink, Tag};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Per-request rendering switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderFlags {
    /// Expand `Array_Agg` aggregations flagged `to_leaves` into synthetic leaves.
    pub expand_leaves: bool,
    /// Never mark nodes collapsed.
    pub expand_all: bool,
    /// Node to mark selected; it and its ancestors stay expanded.
    pub selected: Option<RowKey>,
}

/// External row adopting every top-level node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualRoot {
    /// Key in the external table.
    pub key: RowKey,
    /// Display label.
    pub label: String,
}

/// Labels for child-link leaves, per computed column and label field,
/// gathered before assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildLabels(BTreeMap<(String, String), BTreeMap<RowKey, String>>);

impl ChildLabels {
    /// Empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `label_field` values resolved for the keys in `column`.
    pub fn insert(
        &mut self,
        column: impl Into<String>,
        label_field: impl Into<String>,
        labels: BTreeMap<RowKey, String>,
    ) {
        self.0.insert((column.into(), label_field.into()), labels);
    }

    /// Label of `key` under `column`, read from `label_field`.
    pub fn label(&self, column: &str, label_field: &str, key: &RowKey) -> Option<&str> {
        self.0
            .get(&(column.to_owned(), label_field.to_owned()))?
            .get(key)
            .map(String::as_str)
    }
}

/// Read-only evaluation context threaded through one build.
pub struct BuildContext<'a> {
    evaluator: &'a dyn FormulaEvaluator,
    actor: &'a Actor,
    flags: RenderFlags,
    virtual_root: Option<VirtualRoot>,
    child_labels: ChildLabels,
}

impl<'a> BuildContext<'a> {
    /// Context with default flags, no virtual root and no child labels.
    pub fn new(evaluator: &'a dyn FormulaEvaluator, actor: &'a Actor) -> Self {
        Self {
            evaluator,
            actor,
            flags: RenderFlags::default(),
            virtual_root: None,
            child_labels: ChildLabels::new(),
        }
    }

    /// Replace the render flags.
    pub fn with_flags(mut self, flags: RenderFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the virtual root.
    pub fn with_virtual_root(mut self, root: Option<VirtualRoot>) -> Self {
        self.virtual_root = root;
        self
    }

    /// Provide pre-fetched child-link labels.
    pub fn with_child_labels(mut self, labels: ChildLabels) -> Self {
        self.child_labels = labels;
        self
    }
}

struct RowIndex {
    keys: Vec<Option<RowKey>>,
    children: FxHashMap<RowKey, Vec<usize>>,
    roots: Vec<usize>,
}

impl RowIndex {
    fn new(rows: &[Row], linkage: &Linkage) -> Self {
        let keys: Vec<Option<RowKey>> = rows
            .iter()
            .map(|r| r.key(&linkage.key_field, linkage.key_kind))
            .collect();
        let mut present: FxHashMap<&RowKey, usize> = FxHashMap::default();
        for (i, key) in keys.iter().enumerate() {
            if let Some(key) = key {
                present.entry(key).or_insert(i);
            }
        }

        let mut children: FxHashMap<RowKey, Vec<usize>> = FxHashMap::default();
        let mut roots = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if keys[i].is_none() {
                warn!(
                    table = %linkage.table,
                    field = %linkage.key_field,
                    "row without a key skipped"
                );
                continue;
            }
            match row.key(&linkage.parent_field, linkage.key_kind) {
                Some(parent) if present.contains_key(&parent) => {
                    children.entry(parent).or_default().push(i);
                }
                _ => roots.push(i),
            }
        }

        if let Some(order) = &linkage.order {
            let nocase = order.nocase();
            let by_order = |a: &usize, b: &usize| {
                compare_values(rows[*a].get(&order.field), rows[*b].get(&order.field), nocase)
            };
            roots.sort_by(by_order);
            for siblings in children.values_mut() {
                siblings.sort_by(by_order);
            }
        }

        Self {
            keys,
            children,
            roots,
        }
    }
}

struct Assembler<'a, 'c> {
    rows: &'a [Row],
    linkage: &'a Linkage,
    rules: &'a [AnnotationRule],
    columns: Vec<Option<String>>,
    ctx: &'a BuildContext<'c>,
    index: &'a RowIndex,
    visited: Vec<bool>,
}

/// A row being assembled: its finished children so far and the next child
/// index to visit.
struct Frame {
    row: usize,
    id: RowKey,
    level: u32,
    next: usize,
    children: Vec<Node>,
    holds_selection: bool,
}

impl Frame {
    fn new(row: usize, id: RowKey, level: u32) -> Self {
        Self {
            row,
            id,
            level,
            next: 0,
            children: Vec::new(),
            holds_selection: false,
        }
    }
}

impl Assembler<'_, '_> {
    /// Build the subtree rooted at row `i`; also reports whether it holds the
    /// selected node.
    ///
    /// Depth-first over an explicit stack of open frames.
    fn assemble(&mut self, i: usize, id: RowKey, level: u32) -> (Node, bool) {
        self.visited[i] = true;
        let mut ancestors: Vec<Frame> = Vec::new();
        let mut current = Frame::new(i, id, level);
        loop {
            if let Some((c, child_id)) = self.next_child(&mut current) {
                self.visited[c] = true;
                let child = Frame::new(c, child_id, current.level + 1);
                ancestors.push(std::mem::replace(&mut current, child));
                continue;
            }
            let (node, selected) = self.finish(current);
            let Some(parent) = ancestors.pop() else {
                return (node, selected);
            };
            current = parent;
            current.holds_selection |= selected;
            current.children.push(node);
        }
    }

    /// Next unvisited keyed child of `frame`, advancing its cursor.
    fn next_child(&self, frame: &mut Frame) -> Option<(usize, RowKey)> {
        let kids = self.index.children.get(&frame.id)?;
        while let Some(&c) = kids.get(frame.next) {
            frame.next += 1;
            if self.visited[c] {
                continue;
            }
            if let Some(child_id) = self.index.keys[c].clone() {
                return Some((c, child_id));
            }
        }
        None
    }

    /// Close `frame` once all of its children are placed.
    fn finish(&self, frame: Frame) -> (Node, bool) {
        let Frame {
            row,
            id,
            level,
            children,
            holds_selection,
            ..
        } = frame;
        let row = &self.rows[row];
        let selected = self.ctx.flags.selected.as_ref() == Some(&id);
        let mut node = Node {
            id,
            label: row.text(&self.linkage.title_field),
            children,
            decorations: Decorations {
                level,
                selected,
                collapsed: self.collapses(level) && !selected && !holds_selection,
                ..Decorations::default()
            },
        };
        self.decorate(row, &mut node, level);
        (node, selected || holds_selection)
    }

    fn collapses(&self, level: u32) -> bool {
        !self.ctx.flags.expand_all
            && self
                .linkage
                .expand_to_level
                .is_some_and(|max| level >= max)
    }

    fn evaluate(&self, expr: &str, row: &Row) -> Option<Value> {
        match self
            .ctx
            .evaluator
            .evaluate(expr, &Scope::Row(row), self.ctx.actor)
        {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%err, "formula skipped");
                None
            }
        }
    }

    fn visible(&self, rule: &AnnotationRule, row: &Row) -> bool {
        rule.predicate()
            .is_none_or(|expr| self.evaluate(expr, row).is_some_and(|v| is_truthy(&v)))
    }

    fn decorate(&self, row: &Row, node: &mut Node, level: u32) {
        for (rule, column) in self.rules.iter().zip(&self.columns) {
            if !self.visible(rule, row) {
                continue;
            }
            let column = column.as_deref().unwrap_or_default();
            let decorations = &mut node.decorations;
            match &rule.kind {
                AnnotationKind::Icon { icon, color } => decorations.icons.push(Icon {
                    name: icon.clone(),
                    color: color.clone(),
                }),
                AnnotationKind::TextBadge { text, color } => decorations.tags.push(Tag {
                    text: text.clone(),
                    color: color.clone(),
                }),
                AnnotationKind::FormulaBadge { formula, color } => {
                    if let Some(value) = self.evaluate(formula, row) {
                        decorations.tags.push(Tag {
                            text: display_value(&value),
                            color: color.clone(),
                        });
                    }
                }
                AnnotationKind::LabelStyle { style } => {
                    if !decorations.styles.contains(style) {
                        decorations.styles.push(*style);
                    }
                }
                AnnotationKind::Link { formula, new_tab } => {
                    if let Some(value) = self.evaluate(formula, row) {
                        decorations.link = Some(NodeLink {
                            url: display_value(&value),
                            new_tab: *new_tab,
                        });
                    }
                }
                AnnotationKind::Aggregation(agg) => {
                    let value = row.get(column).unwrap_or(&Value::Null);
                    if agg.expands_leaves() && self.ctx.flags.expand_leaves {
                        if let Value::Array(items) = value {
                            for item in items {
                                if let Some(id) = RowKey::from_value(item) {
                                    node.children
                                        .push(synthetic_leaf(id, display_value(item), level + 1));
                                }
                            }
                        }
                    } else {
                        decorations.tags.push(Tag {
                            text: display_value(value),
                            color: agg.color.clone(),
                        });
                    }
                }
                AnnotationKind::ChildLinks(links) => {
                    if let Some(Value::Array(items)) = row.get(column) {
                        for key in items.iter().filter_map(RowKey::from_value) {
                            let label = self
                                .ctx
                                .child_labels
                                .label(column, &links.label_field, &key)
                                .map_or_else(|| key.to_string(), str::to_owned);
                            node.children.push(synthetic_leaf(key, label, level + 1));
                        }
                    }
                }
            }
        }
    }
}

fn synthetic_leaf(id: RowKey, label: String, level: u32) -> Node {
    let mut leaf = Node::leaf(id, label, level);
    leaf.decorations.synthetic = true;
    leaf
}

/// Materialize `rows` into a forest.
///
/// Never fails: configuration problems are caught by
/// [`ViewConfig::resolve`](crate::ViewConfig::resolve); formula failures during
/// decoration are logged and the affected decoration is skipped.
pub fn build(
    rows: &[Row],
    linkage: &Linkage,
    rules: &[AnnotationRule],
    ctx: &BuildContext<'_>,
) -> Forest {
    let index = RowIndex::new(rows, linkage);
    let base_level = u32::from(ctx.virtual_root.is_some());
    let mut assembler = Assembler {
        rows,
        linkage,
        rules,
        columns: rules.iter().map(AnnotationRule::column).collect(),
        ctx,
        index: &index,
        visited: vec![false; rows.len()],
    };

    let mut top = Vec::new();
    let mut holds_selection = false;
    for &i in &index.roots {
        if let Some(id) = index.keys[i].clone() {
            let (node, selected) = assembler.assemble(i, id, base_level);
            holds_selection |= selected;
            top.push(node);
        }
    }
    for i in 0..rows.len() {
        if assembler.visited[i] {
            continue;
        }
        let Some(id) = index.keys[i].clone() else {
            continue;
        };
        warn!(table = %linkage.table, key = %id, "parent cycle broken at row");
        let (node, selected) = assembler.assemble(i, id, base_level);
        holds_selection |= selected;
        top.push(node);
    }

    match &ctx.virtual_root {
        None => Forest::new(top),
        Some(root) => {
            let collapsed = assembler.collapses(0) && !holds_selection;
            Forest::new(vec![Node {
                id: root.key.clone(),
                label: root.label.clone(),
                children: top,
                decorations: Decorations {
                    level: 0,
                    collapsed,
                    virtual_root: true,
                    ..Decorations::default()
                },
            }])
        }
    }
}
