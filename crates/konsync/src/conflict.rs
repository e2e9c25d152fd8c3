//! Per-conflict resolution state for one interactive sync session
//!
//! Each drifted entity becomes a [`Conflict`]. The [`ConflictResolutionService`]
//! records one [`Resolution`] per conflict key. A conflict moves from pending
//! to resolved exactly once per decision; there is no way back to pending.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::analysis::{
    analyze_merge_potential, build_merge_template, compute_auto_merge, validate_merged_state,
};
use crate::error::{Result, SyncError};
use crate::merge::UnifiedEntityList;
use konsync_api::{EntityKind, FieldMap, KongEntity};

/// Which control plane is authoritative for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Gateway is the source, Konnect the target.
    Push,
    /// Konnect is the source, Gateway the target.
    Pull,
}

impl SyncDirection {
    pub fn labels(&self) -> (&'static str, &'static str) {
        match self {
            SyncDirection::Push => ("Gateway", "Konnect"),
            SyncDirection::Pull => ("Konnect", "Gateway"),
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Push => write!(f, "push"),
            SyncDirection::Pull => write!(f, "pull"),
        }
    }
}

/// A drifted entity with both candidate states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub entity_type: EntityKind,
    pub entity_name: String,
    pub source_state: FieldMap,
    pub target_state: FieldMap,
    pub source_label: String,
    pub target_label: String,
    pub drift_fields: Vec<String>,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
}

impl Conflict {
    pub fn key(&self) -> ConflictKey {
        ConflictKey {
            entity_type: self.entity_type,
            entity_name: self.entity_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictKey {
    pub entity_type: EntityKind,
    pub entity_name: String,
}

/// A merged entity state that passed validation against its conflict.
///
/// Only [`ConflictResolutionService::resolve_merge`] produces one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MergedState(FieldMap);

impl MergedState {
    pub fn fields(&self) -> &FieldMap {
        &self.0
    }
}

/// The decision taken for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "merged_state", rename_all = "snake_case")]
pub enum ResolutionAction {
    KeepSource,
    KeepTarget,
    Merge(MergedState),
    Skip,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::KeepSource => "keep_source",
            ResolutionAction::KeepTarget => "keep_target",
            ResolutionAction::Merge(_) => "merge",
            ResolutionAction::Skip => "skip",
        }
    }
}

/// Actions that can be applied to many conflicts at once. Merging always
/// needs a per-conflict state and has no batch form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    KeepSource,
    KeepTarget,
    Skip,
}

impl From<BatchAction> for ResolutionAction {
    fn from(action: BatchAction) -> Self {
        match action {
            BatchAction::KeepSource => ResolutionAction::KeepSource,
            BatchAction::KeepTarget => ResolutionAction::KeepTarget,
            BatchAction::Skip => ResolutionAction::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub entity_type: EntityKind,
    pub entity_name: String,
    pub action: ResolutionAction,
}

impl Resolution {
    pub fn new(conflict: &Conflict, action: ResolutionAction) -> Self {
        Self {
            entity_type: conflict.entity_type,
            entity_name: conflict.entity_name.clone(),
            action,
        }
    }

    pub fn key(&self) -> ConflictKey {
        ConflictKey {
            entity_type: self.entity_type,
            entity_name: self.entity_name.clone(),
        }
    }
}

/// One conflict per drifted entry of `list`, oriented by `direction`.
pub fn build_conflicts<T: KongEntity>(
    list: &UnifiedEntityList<T>,
    direction: SyncDirection,
) -> Vec<Conflict> {
    let (source_label, target_label) = direction.labels();

    list.drifted()
        .filter_map(|entry| {
            let gateway = entry.gateway_entity.as_ref()?;
            let konnect = entry.konnect_entity.as_ref()?;
            let (source, source_id, target, target_id) = match direction {
                SyncDirection::Push => (gateway, &entry.gateway_id, konnect, &entry.konnect_id),
                SyncDirection::Pull => (konnect, &entry.konnect_id, gateway, &entry.gateway_id),
            };
            Some(Conflict {
                entity_type: T::KIND,
                entity_name: entry.key.clone(),
                source_state: source.field_map(),
                target_state: target.field_map(),
                source_label: source_label.to_string(),
                target_label: target_label.to_string(),
                drift_fields: entry.drift_fields.clone().unwrap_or_default(),
                source_id: source_id.clone(),
                target_id: target_id.clone(),
            })
        })
        .collect()
}

/// Session-scoped store of conflict decisions.
#[derive(Debug, Default)]
pub struct ConflictResolutionService {
    resolutions: BTreeMap<ConflictKey, Resolution>,
}

impl ConflictResolutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_resolution(&self, conflict: &Conflict) -> Option<&Resolution> {
        self.resolutions.get(&conflict.key())
    }

    /// Insert or overwrite the resolution for its conflict.
    pub fn set_resolution(&mut self, resolution: Resolution) {
        debug!(
            "[ConflictResolutionService] {} '{}' -> {}",
            resolution.entity_type,
            resolution.entity_name,
            resolution.action.as_str()
        );
        self.resolutions.insert(resolution.key(), resolution);
    }

    /// Resolve every still-pending conflict with `action`; returns how many
    /// were newly resolved. Existing decisions are never overwritten.
    pub fn apply_batch_resolution(&mut self, conflicts: &[Conflict], action: BatchAction) -> usize {
        let mut applied = 0;
        for conflict in conflicts {
            let key = conflict.key();
            if self.resolutions.contains_key(&key) {
                continue;
            }
            self.resolutions
                .insert(key, Resolution::new(conflict, action.into()));
            applied += 1;
        }
        info!(
            "[ConflictResolutionService] Batch {:?} resolved {} of {} conflicts",
            action,
            applied,
            conflicts.len()
        );
        applied
    }

    /// Resolve `conflict` by merging both states.
    ///
    /// Non-overlapping changes merge automatically. Otherwise `manual` must
    /// carry an operator-edited state that validates; nothing is recorded
    /// when it is missing or invalid.
    pub fn resolve_merge(&mut self, conflict: &Conflict, manual: Option<FieldMap>) -> Result<Resolution> {
        let analysis = analyze_merge_potential(&conflict.source_state, &conflict.target_state);

        let merged = if analysis.can_auto_merge {
            compute_auto_merge(&conflict.source_state, &conflict.target_state, &analysis)
        } else {
            let Some(manual) = manual else {
                return Err(SyncError::ManualMergeRequired {
                    entity_type: conflict.entity_type,
                    entity_name: conflict.entity_name.clone(),
                    fields: analysis.conflicting_fields,
                });
            };
            let validation = validate_merged_state(
                &manual,
                conflict.entity_type,
                &conflict.source_state,
                &conflict.target_state,
            );
            if !validation.is_valid {
                return Err(SyncError::InvalidMerge {
                    entity_type: conflict.entity_type,
                    entity_name: conflict.entity_name.clone(),
                    errors: validation.errors,
                });
            }
            manual
        };

        let resolution = Resolution::new(conflict, ResolutionAction::Merge(MergedState(merged)));
        self.set_resolution(resolution.clone());
        Ok(resolution)
    }

    /// Editable template for a conflict that cannot merge automatically.
    pub fn merge_template(&self, conflict: &Conflict) -> FieldMap {
        let analysis = analyze_merge_potential(&conflict.source_state, &conflict.target_state);
        build_merge_template(&conflict.source_state, &conflict.target_state, &analysis)
    }

    pub fn is_resolved(&self, conflict: &Conflict) -> bool {
        self.resolutions.contains_key(&conflict.key())
    }

    /// Conflicts from `conflicts` that still have no decision, in input order.
    pub fn pending<'a>(&self, conflicts: &'a [Conflict]) -> Vec<&'a Conflict> {
        conflicts.iter().filter(|c| !self.is_resolved(c)).collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolutions.len()
    }

    /// All decisions ordered by conflict key.
    pub fn resolutions(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.values()
    }

    /// Lookup by entity kind and identity key.
    pub fn resolution_for(&self, entity_type: EntityKind, entity_name: &str) -> Option<&Resolution> {
        self.resolutions.get(&ConflictKey {
            entity_type,
            entity_name: entity_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CONFLICT_SOURCE_MARKER;
    use crate::merge::merge_entities;
    use konsync_api::{to_field_map, Service};
    use serde_json::json;

    fn conflict(name: &str, source: serde_json::Value, target: serde_json::Value) -> Conflict {
        Conflict {
            entity_type: EntityKind::Service,
            entity_name: name.to_string(),
            source_state: to_field_map(&source),
            target_state: to_field_map(&target),
            source_label: "Gateway".into(),
            target_label: "Konnect".into(),
            drift_fields: vec!["host".into()],
            source_id: Some("g1".into()),
            target_id: Some("k1".into()),
        }
    }

    #[test]
    fn test_build_conflicts_orients_by_direction() {
        let mut gw = Service::new("api", "old.local");
        gw.id = Some("g1".into());
        let mut kn = Service::new("api", "new.local");
        kn.id = Some("k1".into());
        let list = merge_entities(vec![gw, Service::new("solo", "s")], vec![kn]).unwrap();

        let push = build_conflicts(&list, SyncDirection::Push);
        assert_eq!(push.len(), 1);
        assert_eq!(push[0].source_state["host"], json!("old.local"));
        assert_eq!(push[0].source_id.as_deref(), Some("g1"));
        assert_eq!(push[0].target_label, "Konnect");

        let pull = build_conflicts(&list, SyncDirection::Pull);
        assert_eq!(pull[0].source_state["host"], json!("new.local"));
        assert_eq!(pull[0].target_id.as_deref(), Some("g1"));
        assert_eq!(pull[0].drift_fields, vec!["host"]);
    }

    #[test]
    fn test_set_resolution_overwrites() {
        let c = conflict("api", json!({"name": "api"}), json!({"name": "api"}));
        let mut service = ConflictResolutionService::new();
        service.set_resolution(Resolution::new(&c, ResolutionAction::Skip));
        service.set_resolution(Resolution::new(&c, ResolutionAction::KeepTarget));

        assert_eq!(service.resolved_count(), 1);
        assert_eq!(
            service.get_resolution(&c).unwrap().action,
            ResolutionAction::KeepTarget
        );
    }

    #[test]
    fn test_batch_is_additive() {
        let conflicts: Vec<Conflict> = ["a", "b", "c"]
            .iter()
            .map(|n| conflict(n, json!({"name": n}), json!({"name": n})))
            .collect();
        let mut service = ConflictResolutionService::new();
        service.set_resolution(Resolution::new(&conflicts[1], ResolutionAction::KeepTarget));

        let applied = service.apply_batch_resolution(&conflicts, BatchAction::KeepSource);
        assert_eq!(applied, 2);
        assert_eq!(
            service.get_resolution(&conflicts[1]).unwrap().action,
            ResolutionAction::KeepTarget
        );
        assert_eq!(service.apply_batch_resolution(&conflicts, BatchAction::Skip), 0);
        assert!(service.pending(&conflicts).is_empty());
    }

    #[test]
    fn test_resolve_merge_auto_merges_disjoint_changes() {
        let c = conflict(
            "api",
            json!({"name": "api", "host": "h", "path": "/v1"}),
            json!({"name": "api", "host": "h", "retries": 3}),
        );
        let mut service = ConflictResolutionService::new();
        let resolution = service.resolve_merge(&c, None).unwrap();

        let ResolutionAction::Merge(merged) = resolution.action else {
            panic!("expected merge");
        };
        assert_eq!(merged.fields()["path"], json!("/v1"));
        assert_eq!(merged.fields()["retries"], json!(3));
        assert!(service.is_resolved(&c));
    }

    #[test]
    fn test_resolve_merge_requires_valid_manual_state() {
        let c = conflict(
            "api",
            json!({"name": "api", "host": "old.local"}),
            json!({"name": "api", "host": "new.local"}),
        );
        let mut service = ConflictResolutionService::new();

        let err = service.resolve_merge(&c, None).unwrap_err();
        assert!(matches!(err, SyncError::ManualMergeRequired { ref fields, .. } if fields == &vec!["host".to_string()]));

        let template = service.merge_template(&c);
        assert!(template["host"].get(CONFLICT_SOURCE_MARKER).is_some());
        let err = service.resolve_merge(&c, Some(template)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidMerge { .. }));
        assert!(!service.is_resolved(&c));

        let manual = to_field_map(&json!({"name": "api", "host": "new.local"}));
        service.resolve_merge(&c, Some(manual)).unwrap();
        assert_eq!(service.pending(std::slice::from_ref(&c)).len(), 0);
    }

    #[test]
    fn test_marker_template_never_becomes_a_merge_resolution() {
        let c = conflict(
            "api",
            json!({"name": "api", "retries": 5}),
            json!({"name": "api", "retries": 3}),
        );
        let mut service = ConflictResolutionService::new();
        let template = service.merge_template(&c);

        assert!(service.resolve_merge(&c, Some(template)).is_err());
        assert!(!service.is_resolved(&c));
        assert!(service.resolutions().all(|r| !matches!(r.action, ResolutionAction::Merge(_))));

        let manual = to_field_map(&json!({"name": "api", "retries": 4}));
        let resolution = service.resolve_merge(&c, Some(manual.clone())).unwrap();
        let ResolutionAction::Merge(merged) = &resolution.action else {
            panic!("expected merge");
        };
        assert_eq!(merged.fields(), &manual);
        assert_eq!(
            serde_json::to_value(&resolution.action).unwrap(),
            json!({"action": "merge", "merged_state": {"name": "api", "retries": 4}})
        );
    }
}
