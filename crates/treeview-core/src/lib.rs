// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! treeview-core: materializes self-referencing tables into decorated trees
//! and turns tree gestures back into authorized row mutations.
//!
//! The builder is pure; every read and write goes through the [`RowStore`]
//! and [`FormulaEvaluator`] ports so hosts can plug in their own storage and
//! expression language. [`MemoryRowStore`] is the in-process store.
#![forbid(unsafe_code)]

pub mod annotation;
pub mod builder;
pub mod config;
pub mod memory;
pub mod ports;
pub mod reconcile;
pub mod render;
pub mod row;
pub mod schema;
pub mod tree;

pub use annotation::{
    aggregate_column, aggregate_specs, AggregateSpec, AggregateStat, AggregationRule,
    AnnotationKind, AnnotationRule, ChildLinksRule, TextStyle,
};
pub use builder::{build, BuildContext, ChildLabels, RenderFlags, VirtualRoot};
pub use config::{Linkage, LinkageError, OrderSpec, RootRelation, ViewConfig};
pub use memory::{MemoryRowStore, TableSeed};
pub use ports::{
    is_truthy, FieldMatch, Filter, FormulaError, FormulaEvaluator, OrderBy, RowQuery, RowStore,
    Scope, StoreError,
};
pub use reconcile::{
    Effect, Envelope, Mutation, MutationCommand, ParentRef, ReconcileError, Reconciler,
    ROOT_SENTINEL,
};
pub use render::{
    render_view, FilterState, RenderError, RenderedTree, ViewDefinition, EXPAND_LEAVES_KEY,
};
pub use row::{compare_values, display_value, values_equal, Delta, KeyKind, Row, RowKey};
pub use schema::{Actor, FieldInfo, FieldType, Role, TableSchema};
pub use tree::{Decorations, Forest, Hash32, Icon, Node, NodeLink, Tag};
