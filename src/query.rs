//! Pure query evaluation: filters, projections, and projected diffs.
//!
//! Everything here is deterministic and side-effect-free so the
//! subscription layer can safely evaluate a filter against both the old
//! and new version of a document during update processing.

use crate::types::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A single constraint on one field's value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConstraint {
    /// Value equality. Numbers compare numerically across integer and
    /// float representations, so `1` matches `1.0`.
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Value is one of the given alternatives.
    In(Vec<Value>),
}

impl FieldConstraint {
    /// Evaluate against a field value. A missing field never satisfies
    /// a constraint except `Ne`, which it satisfies vacuously.
    fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return matches!(self, FieldConstraint::Ne(_));
        };

        match self {
            FieldConstraint::Eq(expected) => values_equal(value, expected),
            FieldConstraint::Ne(expected) => !values_equal(value, expected),
            FieldConstraint::Gt(bound) => {
                compare_values(value, bound) == Some(Ordering::Greater)
            }
            FieldConstraint::Gte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FieldConstraint::Lt(bound) => compare_values(value, bound) == Some(Ordering::Less),
            FieldConstraint::Lte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FieldConstraint::In(alternatives) => {
                alternatives.iter().any(|alt| values_equal(value, alt))
            }
        }
    }
}

/// A predicate over documents: an optional identifier constraint plus
/// per-field constraints, all of which must hold.
///
/// The empty filter matches every document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Match only the document with this identifier.
    pub id: Option<DocumentId>,

    /// Field constraints, conjunctive. A field may appear more than
    /// once (e.g. a range expressed as `Gte` plus `Lt`).
    pub clauses: Vec<(String, FieldConstraint)>,
}

impl Filter {
    /// The filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match a single document by identifier.
    pub fn by_id(id: impl Into<DocumentId>) -> Self {
        Self {
            id: Some(id.into()),
            clauses: Vec::new(),
        }
    }

    /// Match documents where `field` equals `value`.
    pub fn where_eq(field: impl Into<String>, value: Value) -> Self {
        Filter::all().and(field, FieldConstraint::Eq(value))
    }

    /// Add a field constraint.
    pub fn and(mut self, field: impl Into<String>, constraint: FieldConstraint) -> Self {
        self.clauses.push((field.into(), constraint));
        self
    }

    /// Whether the document satisfies every constraint.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ref id) = self.id {
            if *id != doc.id {
                return false;
            }
        }
        self.clauses
            .iter()
            .all(|(field, constraint)| constraint.matches(doc.get(field)))
    }
}

/// Restriction of a document to a subset of its fields.
///
/// The identifier is always retained.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Keep every field.
    #[default]
    All,

    /// Keep only the named fields.
    Fields(BTreeSet<String>),
}

impl Projection {
    /// Build a field-limited projection.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Fields(names.into_iter().map(Into::into).collect())
    }

    /// Compute the projected view of a document.
    pub fn project(&self, doc: &Document) -> Document {
        match self {
            Projection::All => doc.clone(),
            Projection::Fields(names) => {
                let fields = doc
                    .fields
                    .iter()
                    .filter(|(name, _)| names.contains(name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                Document {
                    id: doc.id.clone(),
                    fields,
                }
            }
        }
    }
}

/// Field-level difference between two versions of a projected document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldDiff {
    /// Fields whose value changed or appeared, with their new value.
    pub changed: Map<String, Value>,

    /// Fields present before but absent now.
    pub cleared: Vec<String>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.cleared.is_empty()
    }
}

/// Compute the fields that differ between two projected documents.
pub fn diff(old: &Document, new: &Document) -> FieldDiff {
    let mut out = FieldDiff::default();

    for (name, value) in &new.fields {
        if old.get(name) != Some(value) {
            out.changed.insert(name.clone(), value.clone());
        }
    }
    for name in old.fields.keys() {
        if !new.fields.contains_key(name) {
            out.cleared.push(name.clone());
        }
    }

    out
}

/// Structural equality with cross-representation numeric comparison.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Partial order over JSON values: numbers and strings are ordered,
/// everything else is only comparable for equality.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(xi.cmp(&yi));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => {
            if a == b {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        Document::from_json(id, value).unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let d = doc("t1", json!({"text": "a"}));
        assert!(Filter::all().matches(&d));
        assert!(Filter::all().matches(&Document::new("empty")));
    }

    #[test]
    fn test_field_equality() {
        let d = doc("r1", json!({"a": "a", "n": 1}));
        assert!(Filter::where_eq("a", json!("a")).matches(&d));
        assert!(!Filter::where_eq("a", json!("b")).matches(&d));
        assert!(!Filter::where_eq("missing", json!("a")).matches(&d));

        // Cross-representation numeric equality.
        assert!(Filter::where_eq("n", json!(1.0)).matches(&d));
    }

    #[test]
    fn test_id_filter_distinguishes_id_kinds() {
        let oid = ObjectId::from_hex("5ae7d0042b2acc1f1796c0b6").unwrap();
        let by_object = Document::from_json(oid, json!({"value": 0})).unwrap();
        let by_string = doc("5ae7d0042b2acc1f1796c0b6", json!({"value": 2000}));

        let filter = Filter::by_id(oid);
        assert!(filter.matches(&by_object));
        assert!(!filter.matches(&by_string));
    }

    #[test]
    fn test_range_constraints() {
        let d = doc("r1", json!({"value": 10}));

        let range = Filter::all()
            .and("value", FieldConstraint::Gte(json!(10)))
            .and("value", FieldConstraint::Lt(json!(20)));
        assert!(range.matches(&d));

        let above = Filter::all().and("value", FieldConstraint::Gt(json!(10)));
        assert!(!above.matches(&d));

        // Mixed integer/float bounds.
        let float_bound = Filter::all().and("value", FieldConstraint::Lte(json!(10.5)));
        assert!(float_bound.matches(&d));
    }

    #[test]
    fn test_in_and_ne() {
        let d = doc("r1", json!({"color": "red"}));

        let any_of = Filter::all().and(
            "color",
            FieldConstraint::In(vec![json!("blue"), json!("red")]),
        );
        assert!(any_of.matches(&d));

        assert!(Filter::all()
            .and("color", FieldConstraint::Ne(json!("blue")))
            .matches(&d));
        // Ne holds vacuously on a missing field.
        assert!(Filter::all()
            .and("missing", FieldConstraint::Ne(json!("x")))
            .matches(&d));
    }

    #[test]
    fn test_incomparable_types_never_match_ranges() {
        let d = doc("r1", json!({"value": "ten"}));
        assert!(!Filter::all()
            .and("value", FieldConstraint::Gt(json!(5)))
            .matches(&d));
        assert!(!Filter::all()
            .and("value", FieldConstraint::Lte(json!(5)))
            .matches(&d));
    }

    #[test]
    fn test_projection_keeps_id_and_named_fields() {
        let d = doc("t1", json!({"a": "a", "b": "b"}));

        let projected = Projection::fields(["a"]).project(&d);
        assert_eq!(projected.id, DocumentId::from("t1"));
        assert_eq!(projected.get("a"), Some(&json!("a")));
        assert_eq!(projected.get("b"), None);

        assert_eq!(Projection::All.project(&d), d);
    }

    #[test]
    fn test_diff_changed_and_cleared() {
        let before = doc("t1", json!({"text": "a", "checked": false, "gone": 1}));
        let after = doc("t1", json!({"text": "a", "checked": true}));

        let d = diff(&before, &after);
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed.get("checked"), Some(&json!(true)));
        assert_eq!(d.cleared, vec!["gone".to_string()]);

        assert!(diff(&after, &after).is_empty());
    }
}
