// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Annotation rules: per-node decorations computed at build time.
//!
//! Rules are configuration, never data. They are applied to every row in list
//! order; a rule whose `display_if` predicate is falsy for a row is skipped for
//! that row only.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Label style token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    /// Bold label.
    Bold,
    /// Italic label.
    Italic,
    /// Struck-through label.
    Strikethrough,
}

/// Aggregate statistic computed upstream by the row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateStat {
    /// Number of non-null values.
    Count,
    /// Number of distinct non-null values.
    CountUnique,
    /// Sum.
    Sum,
    /// Mean.
    Avg,
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// All values as an array.
    #[serde(rename = "Array_Agg")]
    ArrayAgg,
}

impl AggregateStat {
    /// Lowercase token used in computed column names.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountUnique => "countunique",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::ArrayAgg => "array_agg",
        }
    }
}

/// Name of the computed column carrying an aggregate.
///
/// `"{table}_{via}_{field}_{stat}_{hash8}"`, lowercased, where `hash8` is the
/// first four bytes (hex) of `BLAKE3("aggfilter:" || filter)`. The row store
/// must emit aggregates under exactly this name.
pub fn aggregate_column(
    table: &str,
    via: &str,
    field: &str,
    stat: AggregateStat,
    filter: Option<&str>,
) -> String {
    let mut hasher = Hasher::new();
    hasher.update(b"aggfilter:");
    hasher.update(filter.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    let short = hex::encode(&digest.as_bytes()[..4]);
    format!("{table}_{via}_{field}_{}_{short}", stat.slug()).to_lowercase()
}

/// Request for the row store to join and aggregate a related table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Computed column name (see [`aggregate_column`]).
    pub column: String,
    /// Related table.
    pub table: String,
    /// Column on the related table referencing the tree table's key.
    pub via: String,
    /// Column aggregated.
    pub field: String,
    /// Statistic.
    pub stat: AggregateStat,
    /// Optional filter formula over related rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Aggregation over a related table, shown as a tag or expanded into leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRule {
    /// Related table.
    pub table: String,
    /// Column on the related table referencing the tree table's key.
    pub via: String,
    /// Column aggregated.
    pub field: String,
    /// Statistic.
    pub stat: AggregateStat,
    /// Optional filter formula over related rows.
    #[serde(default)]
    pub filter: Option<String>,
    /// With [`AggregateStat::ArrayAgg`], expand elements into synthetic leaves
    /// when the request asks for it.
    #[serde(default)]
    pub to_leaves: bool,
    /// Tag color.
    #[serde(default)]
    pub color: Option<String>,
}

impl AggregationRule {
    /// Computed column this rule reads.
    pub fn column(&self) -> String {
        aggregate_column(
            &self.table,
            &self.via,
            &self.field,
            self.stat,
            self.filter.as_deref(),
        )
    }

    /// Store request for this rule's column.
    pub fn spec(&self) -> AggregateSpec {
        AggregateSpec {
            column: self.column(),
            table: self.table.clone(),
            via: self.via.clone(),
            field: self.field.clone(),
            stat: self.stat,
            filter: self.filter.clone(),
        }
    }

    /// True when this rule may produce synthetic leaves.
    pub fn expands_leaves(&self) -> bool {
        self.to_leaves && self.stat == AggregateStat::ArrayAgg
    }
}

fn default_key_field() -> String {
    "id".to_owned()
}

/// Related rows shown as synthetic child leaves, labelled by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLinksRule {
    /// Related table.
    pub table: String,
    /// Column on the related table referencing the tree table's key.
    pub via: String,
    /// Key column of the related table.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    /// Column of the related table used as the leaf label.
    pub label_field: String,
}

impl ChildLinksRule {
    /// Computed column carrying the related keys.
    pub fn column(&self) -> String {
        aggregate_column(
            &self.table,
            &self.via,
            &self.key_field,
            AggregateStat::ArrayAgg,
            None,
        )
    }

    /// Store request collecting related keys per row.
    pub fn spec(&self) -> AggregateSpec {
        AggregateSpec {
            column: self.column(),
            table: self.table.clone(),
            via: self.via.clone(),
            field: self.key_field.clone(),
            stat: AggregateStat::ArrayAgg,
            filter: None,
        }
    }
}

/// Closed set of decoration kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnnotationKind {
    /// Icon token.
    Icon {
        /// Icon name (e.g. `fas fa-star`).
        icon: String,
        /// Icon color.
        #[serde(default)]
        color: Option<String>,
    },
    /// Literal text tag.
    TextBadge {
        /// Tag text.
        text: String,
        /// Tag color.
        #[serde(default)]
        color: Option<String>,
    },
    /// Tag whose text is a formula over the row.
    FormulaBadge {
        /// Formula evaluated per row.
        formula: String,
        /// Tag color.
        #[serde(default)]
        color: Option<String>,
    },
    /// Aggregate over a related table.
    Aggregation(AggregationRule),
    /// Related rows as synthetic leaves.
    ChildLinks(ChildLinksRule),
    /// Navigation target computed by formula.
    Link {
        /// Formula producing the URL.
        formula: String,
        /// Open in a new tab.
        #[serde(default)]
        new_tab: bool,
    },
    /// Label style token.
    LabelStyle {
        /// Style applied.
        style: TextStyle,
    },
}

/// One configured decoration with its optional predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRule {
    /// Formula; the rule applies only to rows where it is truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_if: Option<String>,
    /// Decoration kind and parameters.
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

impl AnnotationRule {
    /// Unconditional rule.
    pub fn new(kind: AnnotationKind) -> Self {
        Self {
            display_if: None,
            kind,
        }
    }

    /// Attach a `display_if` predicate.
    pub fn when(mut self, formula: impl Into<String>) -> Self {
        self.display_if = Some(formula.into());
        self
    }

    /// Predicate, treating a blank formula as absent.
    pub fn predicate(&self) -> Option<&str> {
        self.display_if.as_deref().filter(|f| !f.trim().is_empty())
    }

    /// Computed column read by this rule, if any.
    pub fn column(&self) -> Option<String> {
        match &self.kind {
            AnnotationKind::Aggregation(agg) => Some(agg.column()),
            AnnotationKind::ChildLinks(links) => Some(links.column()),
            _ => None,
        }
    }
}

/// Deduplicated aggregate requests needed by `rules`, in rule order.
pub fn aggregate_specs(rules: &[AnnotationRule]) -> Vec<AggregateSpec> {
    let mut specs: Vec<AggregateSpec> = Vec::new();
    for rule in rules {
        let spec = match &rule.kind {
            AnnotationKind::Aggregation(agg) => agg.spec(),
            AnnotationKind::ChildLinks(links) => links.spec(),
            _ => continue,
        };
        if !specs.iter().any(|s| s.column == spec.column) {
            specs.push(spec);
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_name_is_stable_and_filter_sensitive() {
        let a = aggregate_column("Comments", "task", "id", AggregateStat::Count, None);
        let b = aggregate_column("Comments", "task", "id", AggregateStat::Count, None);
        let c = aggregate_column(
            "Comments",
            "task",
            "id",
            AggregateStat::Count,
            Some("approved"),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("comments_task_id_count_"));
        assert_eq!(a.len(), "comments_task_id_count_".len() + 8);
    }

    #[test]
    fn rules_deserialize_from_tagged_json() {
        let rules: Vec<AnnotationRule> = serde_json::from_value(json!([
            {"type": "Icon", "icon": "fas fa-star", "display_if": "starred"},
            {"type": "LabelStyle", "style": "bold"},
            {"type": "Aggregation", "table": "tags", "via": "task", "field": "name",
             "stat": "Array_Agg", "to_leaves": true},
            {"type": "Link", "formula": "url", "new_tab": true}
        ]))
        .unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].predicate(), Some("starred"));
        assert!(matches!(
            rules[1].kind,
            AnnotationKind::LabelStyle {
                style: TextStyle::Bold
            }
        ));
        match &rules[2].kind {
            AnnotationKind::Aggregation(agg) => assert!(agg.expands_leaves()),
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn blank_predicate_is_absent() {
        let rule = AnnotationRule::new(AnnotationKind::TextBadge {
            text: "x".into(),
            color: None,
        })
        .when("  ");
        assert_eq!(rule.predicate(), None);
    }

    #[test]
    fn specs_are_deduplicated() {
        let agg = AggregationRule {
            table: "tags".into(),
            via: "task".into(),
            field: "name".into(),
            stat: AggregateStat::Count,
            filter: None,
            to_leaves: false,
            color: None,
        };
        let rules = vec![
            AnnotationRule::new(AnnotationKind::Aggregation(agg.clone())),
            AnnotationRule::new(AnnotationKind::Aggregation(agg)).when("flag"),
        ];
        assert_eq!(aggregate_specs(&rules).len(), 1);
    }
}
