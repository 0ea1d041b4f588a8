// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Small expression evaluator for annotation predicates, badges, links and
//! new-row field values.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    := sum (("==" | "!=") sum)?
//! sum     := unary ("+" unary)*
//! unary   := "!" unary | atom
//! atom    := json-literal | "(" expr ")" | path
//! path    := ident ("." ident)*
//! ```
//!
//! Paths resolve against the row (`title`), the prospective parent of a new
//! row (`parent.title`) and the actor (`user.id`, `user.role`). Missing fields
//! are `null`. `+` adds two numbers and otherwise concatenates display
//! strings. A JSON object literal is evaluated member-wise: string members
//! starting with `=` are expressions (`{"project": "=parent.project"}`).

use serde_json::{Map, Value};
use treeview_core::{
    display_value, is_truthy, values_equal, Actor, FormulaError, FormulaEvaluator, Row, RowKey,
    Scope,
};

/// Stateless evaluator over row fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

impl PathEvaluator {
    /// New evaluator.
    pub fn new() -> Self {
        Self
    }
}

struct Env<'a> {
    row: Option<&'a Row>,
    parent: Option<&'a Row>,
    actor: &'a Actor,
}

fn fail(expr: &str, reason: impl Into<String>) -> FormulaError {
    FormulaError::Eval {
        expr: expr.to_owned(),
        reason: reason.into(),
    }
}

/// Byte offset of the first top-level occurrence of `op` (outside strings and
/// brackets).
fn find_top(expr: &str, op: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut depth = 0_i32;
    let mut in_str = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_str {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_str = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_str = true,
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            _ if depth == 0 && bytes[i..].starts_with(op.as_bytes()) => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_top<'e>(expr: &'e str, op: &str) -> Vec<&'e str> {
    let mut parts = Vec::new();
    let mut rest = expr;
    while let Some(i) = find_top(rest, op) {
        parts.push(&rest[..i]);
        rest = &rest[i + op.len()..];
    }
    parts.push(rest);
    parts
}

impl Env<'_> {
    fn eval(&self, expr: &str) -> Result<Value, FormulaError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(fail(expr, "empty expression"));
        }
        if let Some(i) = find_top(expr, "!=") {
            let (lhs, rhs) = (self.eval(&expr[..i])?, self.eval(&expr[i + 2..])?);
            return Ok(Value::Bool(!values_equal(&lhs, &rhs)));
        }
        if let Some(i) = find_top(expr, "==") {
            let (lhs, rhs) = (self.eval(&expr[..i])?, self.eval(&expr[i + 2..])?);
            return Ok(Value::Bool(values_equal(&lhs, &rhs)));
        }
        let terms = split_top(expr, "+");
        if terms.len() > 1 {
            let mut total = None;
            for term in terms {
                total = Some(add(total, self.eval(term)?));
            }
            return Ok(total.unwrap_or_default());
        }
        if let Some(inner) = expr.strip_prefix('!') {
            return Ok(Value::Bool(!is_truthy(&self.eval(inner)?)));
        }
        if let Some(inner) = expr.strip_prefix('(').and_then(|e| e.strip_suffix(')')) {
            return self.eval(inner);
        }
        if let Ok(literal) = serde_json::from_str::<Value>(expr) {
            return match literal {
                Value::Object(members) => self.object(members),
                other => Ok(other),
            };
        }
        self.path(expr)
    }

    fn object(&self, members: Map<String, Value>) -> Result<Value, FormulaError> {
        members
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) if s.starts_with('=') => Ok((k, self.eval(&s[1..])?)),
                other => Ok((k, other)),
            })
            .collect::<Result<Map<String, Value>, FormulaError>>()
            .map(Value::Object)
    }

    fn path(&self, expr: &str) -> Result<Value, FormulaError> {
        let valid = expr
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !valid {
            return Err(FormulaError::Unsupported(expr.to_owned()));
        }
        let (head, field) = expr.split_once('.').unwrap_or(("", expr));
        let field_of = |row: Option<&Row>, field: &str| {
            row.and_then(|r| r.get(field)).cloned().unwrap_or(Value::Null)
        };
        Ok(match head {
            "parent" => field_of(self.parent, field),
            "user" => match field {
                "id" => self
                    .actor
                    .user_id
                    .as_ref()
                    .map_or(Value::Null, RowKey::to_value),
                "role" => Value::from(self.actor.role.0),
                _ => Value::Null,
            },
            "" => field_of(self.row, field),
            _ => field_of(self.row, expr),
        })
    }
}

fn add(acc: Option<Value>, term: Value) -> Value {
    let Some(acc) = acc else {
        return term;
    };
    match (acc.as_i64(), term.as_i64()) {
        (Some(a), Some(b)) if acc.is_number() && term.is_number() => {
            a.checked_add(b).map_or_else(|| float_sum(&acc, &term), Value::from)
        }
        _ if acc.is_number() && term.is_number() => float_sum(&acc, &term),
        _ => Value::String(display_value(&acc) + &display_value(&term)),
    }
}

fn float_sum(a: &Value, b: &Value) -> Value {
    Value::from(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())
}

impl FormulaEvaluator for PathEvaluator {
    fn evaluate(&self, expr: &str, scope: &Scope<'_>, actor: &Actor) -> Result<Value, FormulaError> {
        let env = match *scope {
            Scope::Row(row) => Env {
                row: Some(row),
                parent: None,
                actor,
            },
            Scope::NewRow { parent } => Env {
                row: None,
                parent,
                actor,
            },
        };
        env.eval(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treeview_core::Role;

    fn eval(expr: &str, row: &Row) -> Result<Value, FormulaError> {
        PathEvaluator.evaluate(expr, &Scope::Row(row), &Actor::user(7, Role::USER))
    }

    #[test]
    fn resolves_fields_and_literals() {
        let row = Row::new().with("title", "A").with("done", true);
        assert_eq!(eval("title", &row).unwrap(), json!("A"));
        assert_eq!(eval("missing", &row).unwrap(), Value::Null);
        assert_eq!(eval("42", &row).unwrap(), json!(42));
        assert_eq!(eval("\"x+y\"", &row).unwrap(), json!("x+y"));
        assert_eq!(eval("user.id", &row).unwrap(), json!(7));
    }

    #[test]
    fn comparisons_and_negation() {
        let row = Row::new().with("status", "open").with("n", 2);
        assert_eq!(eval("status == \"open\"", &row).unwrap(), json!(true));
        assert_eq!(eval("status != \"open\"", &row).unwrap(), json!(false));
        assert_eq!(eval("!n", &row).unwrap(), json!(false));
        assert_eq!(eval("n == 2.0", &row).unwrap(), json!(true));
    }

    #[test]
    fn plus_adds_numbers_and_joins_text() {
        let row = Row::new().with("id", 5).with("n", 2);
        assert_eq!(eval("n + 3", &row).unwrap(), json!(5));
        assert_eq!(eval("\"/task?id=\" + id", &row).unwrap(), json!("/task?id=5"));
        assert_eq!(eval("(n + 1) == 3", &row).unwrap(), json!(true));
    }

    #[test]
    fn object_literal_reads_parent_scope() {
        let parent = Row::new().with("project", 3);
        let value = PathEvaluator
            .evaluate(
                "{\"project\": \"=parent.project\", \"status\": \"new\"}",
                &Scope::NewRow {
                    parent: Some(&parent),
                },
                &Actor::default(),
            )
            .unwrap();
        assert_eq!(value, json!({"project": 3, "status": "new"}));
    }

    #[test]
    fn rejects_unknown_syntax() {
        let row = Row::new();
        assert!(matches!(
            eval("title.len()", &row),
            Err(FormulaError::Unsupported(_))
        ));
        assert!(eval("  ", &row).is_err());
    }
}
