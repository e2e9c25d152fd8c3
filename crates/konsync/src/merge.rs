//! Two-source set reconciliation
//!
//! Pairs records observed on a Gateway and on Konnect by identity key and
//! annotates each pair with field-level drift.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::error::{Result, SyncError};
use konsync_api::{is_server_field, FieldMap, KongEntity};

/// Where a logical entity currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitySource {
    Gateway,
    Konnect,
    Both,
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntitySource::Gateway => "gateway",
            EntitySource::Konnect => "konnect",
            EntitySource::Both => "both",
        };
        write!(f, "{}", s)
    }
}

/// One logical entity observed from one or both sources.
#[derive(Debug, Clone)]
pub struct UnifiedEntity<T> {
    /// Identity key shared by both sides.
    pub key: String,
    /// Representative record: the Gateway copy when present.
    pub entity: T,
    pub source: EntitySource,
    pub gateway_id: Option<String>,
    pub konnect_id: Option<String>,
    pub has_drift: bool,
    pub drift_fields: Option<Vec<String>>,
    pub gateway_entity: Option<T>,
    pub konnect_entity: Option<T>,
}

impl<T: KongEntity> UnifiedEntity<T> {
    fn gateway_only(key: String, gw: T) -> Self {
        Self {
            key,
            gateway_id: gw.id().map(str::to_string),
            konnect_id: None,
            source: EntitySource::Gateway,
            has_drift: false,
            drift_fields: None,
            entity: gw.clone(),
            gateway_entity: Some(gw),
            konnect_entity: None,
        }
    }

    fn konnect_only(key: String, kn: T) -> Self {
        Self {
            key,
            gateway_id: None,
            konnect_id: kn.id().map(str::to_string),
            source: EntitySource::Konnect,
            has_drift: false,
            drift_fields: None,
            entity: kn.clone(),
            gateway_entity: None,
            konnect_entity: Some(kn),
        }
    }

    fn in_both(key: String, gw: T, kn: T) -> Self {
        let (has_drift, fields) = detect_drift(&gw, &kn);
        Self {
            key,
            gateway_id: gw.id().map(str::to_string),
            konnect_id: kn.id().map(str::to_string),
            source: EntitySource::Both,
            has_drift,
            drift_fields: has_drift.then_some(fields),
            entity: gw.clone(),
            gateway_entity: Some(gw),
            konnect_entity: Some(kn),
        }
    }

    /// Present on both sides with identical comparable fields.
    pub fn is_synced(&self) -> bool {
        self.source == EntitySource::Both && !self.has_drift
    }
}

/// Merged, drift-annotated entities ordered by identity key.
#[derive(Debug, Clone)]
pub struct UnifiedEntityList<T> {
    entities: Vec<UnifiedEntity<T>>,
}

impl<T> Default for UnifiedEntityList<T> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
        }
    }
}

impl<T: KongEntity> UnifiedEntityList<T> {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UnifiedEntity<T>> {
        self.entities.iter()
    }

    pub fn get(&self, key: &str) -> Option<&UnifiedEntity<T>> {
        self.entities
            .binary_search_by(|e| e.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.entities[i])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.key.as_str())
    }

    pub fn gateway_only_count(&self) -> usize {
        self.count(|e| e.source == EntitySource::Gateway)
    }

    pub fn konnect_only_count(&self) -> usize {
        self.count(|e| e.source == EntitySource::Konnect)
    }

    pub fn in_both_count(&self) -> usize {
        self.count(|e| e.source == EntitySource::Both)
    }

    pub fn synced_count(&self) -> usize {
        self.count(|e| e.is_synced())
    }

    pub fn drift_count(&self) -> usize {
        self.count(|e| e.has_drift)
    }

    /// New list with only entities whose source is exactly `source`.
    pub fn filter_by_source(&self, source: EntitySource) -> Self {
        Self {
            entities: self
                .entities
                .iter()
                .filter(|e| e.source == source)
                .cloned()
                .collect(),
        }
    }

    /// Entities present on both sides whose fields differ.
    pub fn drifted(&self) -> impl Iterator<Item = &UnifiedEntity<T>> {
        self.entities.iter().filter(|e| e.has_drift)
    }

    fn count(&self, pred: impl Fn(&UnifiedEntity<T>) -> bool) -> usize {
        self.entities.iter().filter(|e| pred(e)).count()
    }
}

impl<'a, T> IntoIterator for &'a UnifiedEntityList<T> {
    type Item = &'a UnifiedEntity<T>;
    type IntoIter = std::slice::Iter<'a, UnifiedEntity<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

fn index_by_identity<T: KongEntity>(items: Vec<T>, origin: &str) -> Result<BTreeMap<String, T>> {
    let mut index = BTreeMap::new();
    for item in items {
        let key = item.identity_key()?;
        if index.contains_key(&key) {
            return Err(SyncError::DuplicateIdentity {
                kind: T::KIND,
                key,
                origin: origin.to_string(),
            });
        }
        index.insert(key, item);
    }
    Ok(index)
}

/// Merge the Gateway and Konnect views of one entity kind.
///
/// Output holds one entry per key in the union of both sides, ordered by key
/// (byte-wise ascending). A duplicate identity within one side is an error.
pub fn merge_entities<T: KongEntity>(gateway: Vec<T>, konnect: Vec<T>) -> Result<UnifiedEntityList<T>> {
    let mut gw = index_by_identity(gateway, "Gateway")?;
    let mut kn = index_by_identity(konnect, "Konnect")?;
    let keys: BTreeSet<String> = gw.keys().chain(kn.keys()).cloned().collect();

    let mut entities = Vec::with_capacity(keys.len());
    for key in keys {
        let unified = match (gw.remove(&key), kn.remove(&key)) {
            (Some(g), Some(k)) => UnifiedEntity::in_both(key, g, k),
            (Some(g), None) => UnifiedEntity::gateway_only(key, g),
            (None, Some(k)) => UnifiedEntity::konnect_only(key, k),
            (None, None) => continue,
        };
        entities.push(unified);
    }

    debug!(
        "[merge_entities] {}: {} unified entities",
        T::KIND,
        entities.len()
    );
    Ok(UnifiedEntityList { entities })
}

/// Field-level drift between two records of the same kind.
pub fn detect_drift<T: KongEntity>(a: &T, b: &T) -> (bool, Vec<String>) {
    detect_field_drift(&a.field_map(), &b.field_map())
}

/// Names of fields (sorted) whose values differ, server fields excluded.
pub fn detect_field_drift(a: &FieldMap, b: &FieldMap) -> (bool, Vec<String>) {
    let fields: Vec<String> = a
        .keys()
        .chain(b.keys())
        .filter(|k| !is_server_field(k))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|k| a.get(*k) != b.get(*k))
        .cloned()
        .collect();
    (!fields.is_empty(), fields)
}
