//! Merge analysis between two entity snapshots
//!
//! Gateway and Konnect keep no comparable version history, so there is no
//! common ancestor to run a three-way merge against. Fields are classified
//! two-way instead:
//! - defined only in the source: `source_only_fields`
//! - defined only in the target: `target_only_fields`
//! - defined on both sides with different values: `conflicting_fields`
//!
//! Only non-overlapping changes merge automatically; anything conflicting goes
//! to an operator.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::validation::ValidationResult;
use konsync_api::{is_server_field, strip_server_fields, EntityKind, FieldMap};

/// Key marking the source side of an unresolved field in a merge template.
pub const CONFLICT_SOURCE_MARKER: &str = "<<<<<<< source";
/// Key marking the target side of an unresolved field in a merge template.
pub const CONFLICT_TARGET_MARKER: &str = ">>>>>>> target";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeAnalysis {
    pub source_only_fields: Vec<String>,
    pub target_only_fields: Vec<String>,
    pub conflicting_fields: Vec<String>,
    pub can_auto_merge: bool,
}

fn defined<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

/// Classify every differing field of `source` against `target`.
pub fn analyze_merge_potential(source: &FieldMap, target: &FieldMap) -> MergeAnalysis {
    let keys: BTreeSet<&String> = source
        .keys()
        .chain(target.keys())
        .filter(|k| !is_server_field(k))
        .collect();

    let mut analysis = MergeAnalysis::default();
    for key in keys {
        match (defined(source, key), defined(target, key)) {
            (Some(s), Some(t)) if s == t => {}
            (Some(_), Some(_)) => analysis.conflicting_fields.push(key.clone()),
            (Some(_), None) => analysis.source_only_fields.push(key.clone()),
            (None, Some(_)) => analysis.target_only_fields.push(key.clone()),
            (None, None) => {}
        }
    }
    analysis.can_auto_merge = analysis.conflicting_fields.is_empty();
    analysis
}

/// Source state with every target-only field taken from the target.
///
/// Must only be called when `analysis.can_auto_merge` holds.
pub fn compute_auto_merge(source: &FieldMap, target: &FieldMap, analysis: &MergeAnalysis) -> FieldMap {
    debug_assert!(
        analysis.can_auto_merge,
        "compute_auto_merge called with conflicting fields {:?}",
        analysis.conflicting_fields
    );

    let mut merged = source.clone();
    for field in &analysis.target_only_fields {
        if let Some(value) = target.get(field) {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}

/// Editable starting point for a manual merge.
///
/// Non-conflicting changes are pre-merged; each conflicting field holds both
/// candidate values under the conflict marker keys and must be replaced by
/// the operator before the state validates.
pub fn build_merge_template(source: &FieldMap, target: &FieldMap, analysis: &MergeAnalysis) -> FieldMap {
    let mut template = source.clone();
    for field in &analysis.target_only_fields {
        if let Some(value) = target.get(field) {
            template.insert(field.clone(), value.clone());
        }
    }
    for field in &analysis.conflicting_fields {
        let marker = json!({
            CONFLICT_SOURCE_MARKER: source.get(field).cloned().unwrap_or(Value::Null),
            CONFLICT_TARGET_MARKER: target.get(field).cloned().unwrap_or(Value::Null),
        });
        template.insert(field.clone(), marker);
    }
    strip_server_fields(template)
}

fn has_conflict_marker(value: &Value) -> bool {
    match value {
        Value::Object(obj) => {
            obj.contains_key(CONFLICT_SOURCE_MARKER)
                || obj.contains_key(CONFLICT_TARGET_MARKER)
                || obj.values().any(has_conflict_marker)
        }
        Value::Array(items) => items.iter().any(has_conflict_marker),
        _ => false,
    }
}

/// Check an operator-edited merge before it may become a resolution.
pub fn validate_merged_state(
    merged: &FieldMap,
    entity_type: EntityKind,
    source: &FieldMap,
    target: &FieldMap,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for field in entity_type.identity_fields() {
        let Some(expected) = defined(source, field).or_else(|| defined(target, field)) else {
            continue;
        };
        match defined(merged, field) {
            None => errors.push(format!("Required identity field '{}' is missing", field)),
            Some(actual) if actual != expected => errors.push(format!(
                "Identity field '{}' must not change (expected {}, found {})",
                field, expected, actual
            )),
            Some(_) => {}
        }
    }

    for (field, value) in merged {
        if has_conflict_marker(value) {
            errors.push(format!(
                "Field '{}' still contains an unresolved conflict marker",
                field
            ));
        }
        if !is_server_field(field) && !source.contains_key(field) && !target.contains_key(field) {
            warnings.push(format!(
                "Field '{}' exists in neither source nor target (possible typo)",
                field
            ));
        }
    }

    ValidationResult::new(errors, warnings)
}
