//! Export, validation, diff and apply of declarative config against one
//! control plane.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};

use super::config::{ConsumerEntry, DeclarativeConfig, UpstreamEntry};
use crate::error::{Result, SyncError};
use crate::validation::ValidationResult;
use konsync_api::{
    strip_server_fields, Consumer, CredentialKind, EntityKind, EntityRef, IdentityError,
    KongEntity, Plugin, Route, Service, Target, Upstream,
};
use konsync_core::{ControlPlane, ManagedEntity, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyAction::Create => write!(f, "create"),
            ApplyAction::Update => write!(f, "update"),
            ApplyAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    /// Dry run: the operation would be executed.
    Planned,
    Success,
    Failed,
}

/// Outcome of one entity write during `apply_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOperation {
    pub kind: EntityKind,
    pub action: ApplyAction,
    pub key: String,
    pub status: ApplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityUpdate {
    pub key: String,
    pub current_id: Option<String>,
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDiff {
    pub kind: EntityKind,
    pub creates: Vec<String>,
    pub updates: Vec<EntityUpdate>,
    pub deletes: Vec<String>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiffSummary {
    pub diffs: Vec<EntityDiff>,
}

impl ConfigDiffSummary {
    pub fn has_changes(&self) -> bool {
        self.diffs.iter().any(|d| !d.is_empty())
    }

    pub fn get(&self, kind: EntityKind) -> Option<&EntityDiff> {
        self.diffs.iter().find(|d| d.kind == kind)
    }

    pub fn total_changes(&self) -> usize {
        self.diffs
            .iter()
            .map(|d| d.creates.len() + d.updates.len() + d.deletes.len())
            .sum()
    }
}

/// Id to name lookup used to compare references regardless of how they
/// were written.
#[derive(Debug, Default)]
struct RefIndex {
    names: HashMap<(EntityKind, String), String>,
}

impl RefIndex {
    fn of(configs: &[&DeclarativeConfig]) -> Self {
        let mut index = Self::default();
        for config in configs {
            config.services.iter().for_each(|e| index.add(e));
            config.routes.iter().for_each(|e| index.add(e));
            config.consumers.iter().for_each(|e| index.add(&e.consumer));
            config.upstreams.iter().for_each(|e| index.add(&e.upstream));
        }
        index
    }

    fn add<T: KongEntity>(&mut self, entity: &T) {
        if let (Some(id), Ok(name)) = (entity.id(), entity.identity_key()) {
            self.names.insert((T::KIND, id.to_string()), name);
        }
    }

    fn canonical(&self, kind: EntityKind, reference: &mut EntityRef) {
        if let Some(name) = reference.name.clone() {
            *reference = EntityRef::by_name(name);
        } else if let Some(name) = reference
            .id
            .as_ref()
            .and_then(|id| self.names.get(&(kind, id.clone())))
        {
            *reference = EntityRef::by_name(name.clone());
        }
    }
}

/// Name to id lookup for the live control plane, grown as creates succeed.
#[derive(Debug, Default)]
struct LiveIds {
    ids: HashMap<(EntityKind, String), String>,
}

impl LiveIds {
    fn record<T: KongEntity>(&mut self, entity: &T) {
        if let (Some(id), Ok(name)) = (entity.id(), entity.identity_key()) {
            self.ids.insert((T::KIND, name), id.to_string());
        }
    }

    fn resolve(&self, kind: EntityKind, reference: &mut EntityRef) {
        if let Some(id) = reference
            .name
            .as_ref()
            .and_then(|name| self.ids.get(&(kind, name.clone())))
        {
            *reference = EntityRef::by_id(id.clone());
        }
    }
}

/// Entity kinds that can be planned and applied from a declarative config.
trait DeclarativeEntity: ManagedEntity {
    /// Key the entity is matched by within its kind.
    fn plan_key(&self) -> std::result::Result<String, IdentityError> {
        self.identity_key()
    }
}

impl DeclarativeEntity for Service {}
impl DeclarativeEntity for Consumer {}
impl DeclarativeEntity for Upstream {}
impl DeclarativeEntity for Route {}
impl DeclarativeEntity for Plugin {}

impl DeclarativeEntity for Target {
    /// Targets are unique per upstream, not globally.
    fn plan_key(&self) -> std::result::Result<String, IdentityError> {
        let upstream = self.upstream.as_ref().and_then(|u| u.key()).unwrap_or("");
        Ok(format!("{}/{}", upstream, self.identity_key()?))
    }
}

fn canonicalize<T: DeclarativeEntity>(entity: &T, index: &RefIndex) -> T {
    let mut entity = entity.clone();
    entity.visit_refs(&mut |kind, reference| index.canonical(kind, reference));
    entity
}

struct PlannedUpdate<T> {
    key: String,
    current: T,
    desired: T,
    changes: BTreeMap<String, FieldChange>,
}

/// Creates, updates and deletes needed to move one kind to its desired state.
struct KindPlan<T> {
    creates: Vec<(String, T)>,
    updates: Vec<PlannedUpdate<T>>,
    deletes: Vec<(String, T)>,
}

impl<T: DeclarativeEntity> KindPlan<T> {
    fn build(current: &[T], desired: &[T], index: &RefIndex) -> Result<Self> {
        let current = keyed(current, index, "current state")?;
        let mut desired = keyed(desired, index, "desired config")?;

        let mut plan = KindPlan {
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        };
        for (key, current) in current {
            match desired.remove(&key) {
                Some(desired) => {
                    let changes = field_changes(&current, &desired);
                    if !changes.is_empty() {
                        plan.updates.push(PlannedUpdate {
                            key,
                            current,
                            desired,
                            changes,
                        });
                    }
                }
                None => plan.deletes.push((key, current)),
            }
        }
        plan.creates.extend(desired);
        Ok(plan)
    }

    fn diff(&self) -> EntityDiff {
        EntityDiff {
            kind: T::KIND,
            creates: self.creates.iter().map(|(k, _)| k.clone()).collect(),
            updates: self
                .updates
                .iter()
                .map(|u| EntityUpdate {
                    key: u.key.clone(),
                    current_id: u.current.id().map(str::to_string),
                    changes: u.changes.clone(),
                })
                .collect(),
            deletes: self.deletes.iter().map(|(k, _)| k.clone()).collect(),
        }
    }
}

fn keyed<T: DeclarativeEntity>(
    entities: &[T],
    index: &RefIndex,
    origin: &str,
) -> Result<BTreeMap<String, T>> {
    let mut map = BTreeMap::new();
    for entity in entities {
        let canonical = canonicalize(entity, index);
        let key = canonical.plan_key()?;
        if map.insert(key.clone(), canonical).is_some() {
            return Err(SyncError::DuplicateIdentity {
                kind: T::KIND,
                key,
                origin: origin.to_string(),
            });
        }
    }
    Ok(map)
}

fn field_changes<T: KongEntity>(current: &T, desired: &T) -> BTreeMap<String, FieldChange> {
    let old = strip_server_fields(current.field_map());
    let new = strip_server_fields(desired.field_map());
    old.keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .map(|k| {
            (
                k.clone(),
                FieldChange {
                    old: old.get(k).cloned(),
                    new: new.get(k).cloned(),
                },
            )
        })
        .collect()
}

struct ConfigPlan {
    services: KindPlan<Service>,
    upstreams: KindPlan<Upstream>,
    targets: KindPlan<Target>,
    routes: KindPlan<Route>,
    consumers: KindPlan<Consumer>,
    plugins: KindPlan<Plugin>,
}

impl ConfigPlan {
    fn build(current: &DeclarativeConfig, desired: &DeclarativeConfig) -> Result<Self> {
        let index = RefIndex::of(&[current, desired]);
        Ok(Self {
            services: KindPlan::build(&current.services, &desired.services, &index)?,
            upstreams: KindPlan::build(
                &upstreams_of(current),
                &upstreams_of(desired),
                &index,
            )?,
            targets: KindPlan::build(&current.targets(), &desired.targets(), &index)?,
            routes: KindPlan::build(&current.routes, &desired.routes, &index)?,
            consumers: KindPlan::build(
                &consumers_of(current),
                &consumers_of(desired),
                &index,
            )?,
            plugins: KindPlan::build(&current.plugins, &desired.plugins, &index)?,
        })
    }

    fn summary(&self) -> ConfigDiffSummary {
        ConfigDiffSummary {
            diffs: vec![
                self.services.diff(),
                self.routes.diff(),
                self.consumers.diff(),
                self.plugins.diff(),
                self.upstreams.diff(),
                self.targets.diff(),
            ],
        }
    }
}

fn upstreams_of(config: &DeclarativeConfig) -> Vec<Upstream> {
    config.upstreams.iter().map(|e| e.upstream.clone()).collect()
}

fn consumers_of(config: &DeclarativeConfig) -> Vec<Consumer> {
    config.consumers.iter().map(|e| e.consumer.clone()).collect()
}

fn reference_label(entity: &impl KongEntity) -> String {
    entity
        .identity_key()
        .unwrap_or_else(|_| "<unnamed>".to_string())
}

/// Declarative configuration management for a single control plane.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    plane: ControlPlane,
}

impl ConfigManager {
    pub fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    /// Snapshot the control plane, optionally restricted to `only` and with
    /// consumer credentials. Timestamps and null fields are dropped.
    #[instrument(skip(self), fields(plane = %self.plane.label))]
    pub async fn export_state(
        &self,
        only: Option<&[EntityKind]>,
        include_credentials: bool,
    ) -> Result<DeclarativeConfig> {
        let wanted = |kind: EntityKind| only.map_or(true, |kinds| kinds.contains(&kind));
        let mut config = DeclarativeConfig::default();

        if wanted(EntityKind::Service) {
            config.services = self.export_kind::<Service>().await?;
        }
        if wanted(EntityKind::Route) {
            config.routes = self.export_kind::<Route>().await?;
        }
        if wanted(EntityKind::Consumer) {
            for consumer in self.export_kind::<Consumer>().await? {
                let mut entry = ConsumerEntry::new(consumer);
                if include_credentials {
                    self.export_credentials(&mut entry).await?;
                }
                config.consumers.push(entry);
            }
        }
        if wanted(EntityKind::Plugin) {
            config.plugins = self.export_kind::<Plugin>().await?;
        }
        if wanted(EntityKind::Upstream) || wanted(EntityKind::Target) {
            for upstream in self.export_kind::<Upstream>().await? {
                let mut entry = UpstreamEntry::new(upstream);
                if wanted(EntityKind::Target) {
                    entry.targets = self.export_targets(&entry.upstream).await?;
                }
                config.upstreams.push(entry);
            }
        }

        info!(
            "[ConfigManager] Exported {} entities from {}",
            config.entity_count(),
            self.plane.label
        );
        Ok(config)
    }

    async fn export_kind<T: ManagedEntity>(&self) -> Result<Vec<T>> {
        let items = self.plane.manager::<T>().list_all(None).await?;
        let mut exported = Vec::with_capacity(items.len());
        for item in items {
            exported.push(item.without_timestamps()?);
        }
        Ok(exported)
    }

    async fn export_targets(&self, upstream: &Upstream) -> Result<Vec<Target>> {
        let Some(parent) = upstream.id.clone().or_else(|| upstream.name.clone()) else {
            return Ok(Vec::new());
        };
        let targets = self
            .plane
            .targets
            .list_all(Some(&Scope::Upstream(parent)))
            .await?;

        let mut exported = Vec::with_capacity(targets.len());
        for target in targets {
            let mut target = target.without_timestamps()?;
            target.upstream = None;
            exported.push(target);
        }
        Ok(exported)
    }

    async fn export_credentials(&self, entry: &mut ConsumerEntry) -> Result<()> {
        let Some(credentials) = &self.plane.credentials else {
            warn!(
                "[ConfigManager] {} exposes no credential endpoints, skipping credentials",
                self.plane.label
            );
            return Ok(());
        };
        let Some(consumer) = entry.consumer.id.clone().or_else(|| entry.consumer.username.clone())
        else {
            return Ok(());
        };

        for kind in CredentialKind::ALL {
            let mut items = credentials.list_all_credentials(&consumer, kind).await?;
            for credential in &mut items {
                credential.created_at = None;
                credential.consumer = None;
            }
            *entry.credentials_mut(kind) = items;
        }
        Ok(())
    }

    /// Check referential integrity within `config`, reporting every problem.
    pub fn validate_config(&self, config: &DeclarativeConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let known = |ids: Vec<(Option<String>, Option<String>)>| -> HashSet<String> {
            ids.into_iter()
                .flat_map(|(id, name)| id.into_iter().chain(name))
                .collect()
        };
        let services = known(config.services.iter().map(|s| (s.id.clone(), s.name.clone())).collect());
        let routes = known(config.routes.iter().map(|r| (r.id.clone(), r.name.clone())).collect());
        let consumers = known(
            config
                .consumers
                .iter()
                .map(|c| (c.consumer.id.clone(), c.consumer.username.clone()))
                .collect(),
        );

        let mut check = |owner: String, scope: &str, reference: Option<&EntityRef>, known: &HashSet<String>| {
            let Some(reference) = reference else { return };
            let resolves = reference.id.iter().chain(reference.name.iter()).any(|k| known.contains(k));
            if !resolves {
                errors.push(format!("{} references unknown {} '{}'", owner, scope, reference));
            }
        };

        for route in &config.routes {
            check(
                format!("Route '{}'", reference_label(route)),
                "service",
                route.service.as_ref(),
                &services,
            );
        }
        for plugin in &config.plugins {
            let owner = format!("Plugin '{}'", reference_label(plugin));
            check(owner.clone(), "service", plugin.service.as_ref(), &services);
            check(owner.clone(), "route", plugin.route.as_ref(), &routes);
            check(owner, "consumer", plugin.consumer.as_ref(), &consumers);
        }

        for plugin in config.plugins.iter().filter(|p| p.is_global()) {
            warnings.push(format!(
                "Plugin '{}' has no service, route or consumer and applies globally",
                reference_label(plugin)
            ));
        }

        self.check_identities(config, &mut errors);
        ValidationResult::new(errors, warnings)
    }

    fn check_identities(&self, config: &DeclarativeConfig, errors: &mut Vec<String>) {
        let mut record = |result: std::result::Result<String, IdentityError>| {
            if let Err(err) = result {
                errors.push(err.to_string());
            }
        };
        config.services.iter().for_each(|e| record(e.identity_key()));
        config.routes.iter().for_each(|e| record(e.identity_key()));
        config.consumers.iter().for_each(|e| record(e.consumer.identity_key()));
        config.plugins.iter().for_each(|e| record(e.identity_key()));
        config.upstreams.iter().for_each(|e| record(e.upstream.identity_key()));
        config.targets().iter().for_each(|e| record(e.identity_key()));
    }

    /// Per-kind create/update/delete sets moving the live state to `desired`.
    #[instrument(skip(self, desired), fields(plane = %self.plane.label))]
    pub async fn diff_config(&self, desired: &DeclarativeConfig) -> Result<ConfigDiffSummary> {
        let current = self.export_state(None, false).await?;
        let summary = ConfigPlan::build(&current, desired)?.summary();
        debug!("[ConfigManager] Diff has {} changes", summary.total_changes());
        Ok(summary)
    }

    /// Apply `config` entity by entity. Creates and updates run parents
    /// first, deletes run children first; a failure is recorded and the batch
    /// continues.
    #[instrument(skip(self, config), fields(plane = %self.plane.label))]
    pub async fn apply_config(&self, config: &DeclarativeConfig, dry_run: bool) -> Result<Vec<ApplyOperation>> {
        let current = self.export_state(None, false).await?;
        let plan = ConfigPlan::build(&current, config)?;

        let mut live = LiveIds::default();
        current.services.iter().for_each(|e| live.record(e));
        current.routes.iter().for_each(|e| live.record(e));
        current.consumers.iter().for_each(|e| live.record(&e.consumer));
        current.upstreams.iter().for_each(|e| live.record(&e.upstream));

        let mut ops = Vec::new();
        self.write_kind(&plan.services, &mut live, dry_run, &mut ops).await;
        self.write_kind(&plan.upstreams, &mut live, dry_run, &mut ops).await;
        self.write_kind(&plan.targets, &mut live, dry_run, &mut ops).await;
        self.write_kind(&plan.routes, &mut live, dry_run, &mut ops).await;
        self.write_kind(&plan.consumers, &mut live, dry_run, &mut ops).await;
        self.write_kind(&plan.plugins, &mut live, dry_run, &mut ops).await;

        self.delete_kind(&plan.plugins, dry_run, &mut ops).await;
        self.delete_kind(&plan.consumers, dry_run, &mut ops).await;
        self.delete_kind(&plan.routes, dry_run, &mut ops).await;
        self.delete_kind(&plan.targets, dry_run, &mut ops).await;
        self.delete_kind(&plan.upstreams, dry_run, &mut ops).await;
        self.delete_kind(&plan.services, dry_run, &mut ops).await;

        let failed = ops.iter().filter(|op| op.status == ApplyStatus::Failed).count();
        info!(
            "[ConfigManager] Applied {} operations to {} ({} failed, dry_run={})",
            ops.len(),
            self.plane.label,
            failed,
            dry_run
        );
        Ok(ops)
    }

    async fn write_kind<T: DeclarativeEntity>(
        &self,
        plan: &KindPlan<T>,
        live: &mut LiveIds,
        dry_run: bool,
        ops: &mut Vec<ApplyOperation>,
    ) {
        if dry_run {
            ops.extend(plan.creates.iter().map(|(key, _)| planned::<T>(ApplyAction::Create, key)));
            ops.extend(plan.updates.iter().map(|u| planned::<T>(ApplyAction::Update, &u.key)));
            return;
        }
        let manager = self.plane.manager::<T>();

        for (key, desired) in &plan.creates {
            let mut payload = desired.clone();
            payload.visit_refs(&mut |kind, reference| live.resolve(kind, reference));
            let result = manager.create(&payload).await.map(|created| live.record(&created));
            ops.push(executed::<T>(ApplyAction::Create, key, result.map_err(Into::into)));
        }

        for update in &plan.updates {
            let mut payload = update.desired.clone();
            payload.visit_refs(&mut |kind, reference| live.resolve(kind, reference));
            let target = update.current.id().unwrap_or(update.key.as_str());
            let result = manager.update(target, &payload).await.map(|_| ());
            ops.push(executed::<T>(ApplyAction::Update, &update.key, result.map_err(Into::into)));
        }
    }

    async fn delete_kind<T: DeclarativeEntity>(
        &self,
        plan: &KindPlan<T>,
        dry_run: bool,
        ops: &mut Vec<ApplyOperation>,
    ) {
        if dry_run {
            ops.extend(plan.deletes.iter().map(|(key, _)| planned::<T>(ApplyAction::Delete, key)));
            return;
        }
        let manager = self.plane.manager::<T>();
        for (key, current) in &plan.deletes {
            let result = manager.delete(current).await;
            ops.push(executed::<T>(ApplyAction::Delete, key, result.map_err(Into::into)));
        }
    }

    /// Replace the whole configuration of a DB-less Gateway in one call.
    #[instrument(skip(self, config), fields(plane = %self.plane.label))]
    pub async fn sync_config(&self, config: &DeclarativeConfig) -> Result<()> {
        let Some(endpoint) = &self.plane.declarative else {
            return Err(SyncError::NotSupported(format!(
                "Declarative config sync on {}",
                self.plane.label
            )));
        };
        let payload = serde_json::to_value(config)?;
        endpoint.replace_config(&payload).await?;
        info!(
            "[ConfigManager] Pushed {} entities to {} via declarative config",
            config.entity_count(),
            self.plane.label
        );
        Ok(())
    }
}

fn planned<T: KongEntity>(action: ApplyAction, key: &str) -> ApplyOperation {
    ApplyOperation {
        kind: T::KIND,
        action,
        key: key.to_string(),
        status: ApplyStatus::Planned,
        error: None,
    }
}

fn executed<T: KongEntity>(action: ApplyAction, key: &str, result: Result<()>) -> ApplyOperation {
    let (status, error) = match result {
        Ok(()) => (ApplyStatus::Success, None),
        Err(err) => {
            warn!("[ConfigManager] {} {} '{}' failed: {}", action, T::KIND, key, err);
            (ApplyStatus::Failed, Some(err.to_string()))
        }
    };
    ApplyOperation {
        kind: T::KIND,
        action,
        key: key.to_string(),
        status,
        error,
    }
}
