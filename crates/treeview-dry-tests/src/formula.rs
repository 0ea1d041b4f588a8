// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted formula evaluator.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use treeview_core::{Actor, FormulaError, FormulaEvaluator, Scope};

#[derive(Debug, Clone)]
enum Script {
    Value(Value),
    Fail,
}

/// Evaluator with canned answers.
///
/// Scripted expressions return their value (or fail); any other expression
/// is read as a field name of the row in scope, or of the parent for
/// `Scope::NewRow`. Missing fields are `null`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEvaluator {
    scripts: BTreeMap<String, Script>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEvaluator {
    /// Evaluator answering only field lookups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `expr` with `value`.
    pub fn with(mut self, expr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scripts.insert(expr.into(), Script::Value(value.into()));
        self
    }

    /// Make `expr` fail.
    pub fn failing(mut self, expr: impl Into<String>) -> Self {
        self.scripts.insert(expr.into(), Script::Fail);
        self
    }

    /// Number of evaluations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FormulaEvaluator for ScriptedEvaluator {
    fn evaluate(&self, expr: &str, scope: &Scope<'_>, _actor: &Actor) -> Result<Value, FormulaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(expr) {
            Some(Script::Value(value)) => Ok(value.clone()),
            Some(Script::Fail) => Err(FormulaError::Eval {
                expr: expr.to_owned(),
                reason: "scripted failure".into(),
            }),
            None => {
                let row = match scope {
                    Scope::Row(row) => Some(*row),
                    Scope::NewRow { parent } => *parent,
                };
                Ok(row
                    .and_then(|r| r.get(expr))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
        }
    }
}
