//! Applying sync decisions to the target control plane
//!
//! For a push the Gateway is the source and Konnect the target; a pull is the
//! mirror image. Per entity:
//! - present only on the source: created on the target
//! - drifted: handled according to its resolution (unresolved means skipped)
//! - synced, or present only on the target: left alone
//!
//! Parent references in each payload are rewritten to the target plane's ids
//! before writing; an entity whose parent is missing on the target fails
//! instead of being written with a dangling reference.
//!
//! Every attempted write and every skip lands in the audit log. Writes are
//! best-effort: one failure never stops the rest of the batch.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::audit::{AuditAction, SyncAuditEntry, SyncAuditService, SyncOperation, SyncRun};
use crate::conflict::{ConflictResolutionService, ResolutionAction, SyncDirection};
use crate::error::Result;
use crate::merge::{EntitySource, UnifiedEntity, UnifiedEntityList};
use crate::refs::RefTranslator;
use konsync_api::{strip_server_fields, FieldMap, KongEntity};
use konsync_core::{ControlPlane, ManagedEntity};

impl From<SyncOperation> for SyncDirection {
    fn from(operation: SyncOperation) -> Self {
        match operation {
            SyncOperation::Push => SyncDirection::Push,
            SyncOperation::Pull => SyncDirection::Pull,
        }
    }
}

/// Counts for one `sync_kind` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// What to do with one unified entity.
enum Step<T> {
    Create(T),
    Update { target_id: String, payload: T },
    Skip,
}

impl<T: ManagedEntity> Step<T> {
    /// Point the payload's parent references at the target plane.
    async fn translate(self, refs: &mut RefTranslator<'_>) -> Result<Self> {
        Ok(match self {
            Step::Create(payload) => Step::Create(refs.translate(payload).await?),
            Step::Update { target_id, payload } => Step::Update {
                target_id,
                payload: refs.translate(payload).await?,
            },
            Step::Skip => Step::Skip,
        })
    }
}

pub struct SyncExecutor {
    gateway: ControlPlane,
    konnect: ControlPlane,
    audit: SyncAuditService,
}

impl SyncExecutor {
    pub fn new(gateway: ControlPlane, konnect: ControlPlane, audit: SyncAuditService) -> Self {
        Self {
            gateway,
            konnect,
            audit,
        }
    }

    /// Apply `list` towards the target of `run`'s direction.
    #[instrument(skip(self, list, resolutions), fields(sync_id = %run.sync_id))]
    pub async fn sync_kind<T: ManagedEntity>(
        &self,
        list: &UnifiedEntityList<T>,
        resolutions: &ConflictResolutionService,
        run: &SyncRun,
    ) -> Result<SyncReport> {
        let direction = SyncDirection::from(run.operation);
        let (source_side, source, target) = match direction {
            SyncDirection::Push => (EntitySource::Gateway, &self.gateway, &self.konnect),
            SyncDirection::Pull => (EntitySource::Konnect, &self.konnect, &self.gateway),
        };
        let mut refs = RefTranslator::new(source, target).lenient(run.dry_run);
        let mut report = SyncReport::default();

        for entry in list {
            let planned = match plan_step(entry, source_side, direction, resolutions) {
                Ok(Some(step)) => step.translate(&mut refs).await,
                Ok(None) => continue,
                Err(err) => Err(err),
            };
            let step = match planned {
                Ok(step) => step,
                Err(err) => {
                    let action = if entry.source == source_side {
                        AuditAction::Create
                    } else {
                        AuditAction::Update
                    };
                    warn!(
                        "[SyncExecutor] {} {} '{}' not written: {}",
                        run.operation, T::KIND, entry.key, err
                    );
                    let audit = run
                        .entry(T::KIND, &entry.key, action)
                        .with_drift_fields(entry.drift_fields.clone())
                        .failed(err.to_string());
                    self.audit.record(&audit)?;
                    report.failed += 1;
                    report.errors.push(format!("{} '{}': {}", T::KIND, entry.key, err));
                    continue;
                }
            };

            let audit = self.execute(entry, step, direction, target, run, &mut report).await;
            self.audit.record(&audit)?;
        }

        info!(
            "[SyncExecutor] {} {}: {} created, {} updated, {} skipped, {} failed (dry_run={})",
            run.operation,
            T::KIND,
            report.created,
            report.updated,
            report.skipped,
            report.failed,
            run.dry_run
        );
        Ok(report)
    }

    async fn execute<T: ManagedEntity>(
        &self,
        entry: &UnifiedEntity<T>,
        step: Step<T>,
        direction: SyncDirection,
        target: &ControlPlane,
        run: &SyncRun,
        report: &mut SyncReport,
    ) -> SyncAuditEntry {
        let (target_entity, target_id) = match direction {
            SyncDirection::Push => (entry.konnect_entity.as_ref(), entry.konnect_id.clone()),
            SyncDirection::Pull => (entry.gateway_entity.as_ref(), entry.gateway_id.clone()),
        };
        let before = target_entity.map(|e| e.field_map());
        let manager = target.manager::<T>();

        let (action, payload, result) = match step {
            Step::Skip => {
                report.skipped += 1;
                let skipped = run
                    .entry(T::KIND, &entry.key, AuditAction::Skip)
                    .with_entity_id(target_id)
                    .with_drift_fields(entry.drift_fields.clone())
                    .with_states(before, None);
                return skipped;
            }
            Step::Create(payload) => {
                let result = if run.dry_run {
                    Ok(None)
                } else {
                    manager.create(&payload).await.map(|created| created.id().map(str::to_string))
                };
                (AuditAction::Create, payload, result)
            }
            Step::Update { target_id: id, payload } => {
                let result = if run.dry_run {
                    Ok(Some(id))
                } else {
                    manager.update(&id, &payload).await.map(|_| Some(id))
                };
                (AuditAction::Update, payload, result)
            }
        };

        let audit = run
            .entry(T::KIND, &entry.key, action)
            .with_drift_fields(entry.drift_fields.clone())
            .with_states(before, Some(payload.field_map()));

        match result {
            Ok(id) => {
                match action {
                    AuditAction::Create => report.created += 1,
                    _ => report.updated += 1,
                }
                audit.with_entity_id(id.or(target_id))
            }
            Err(err) => {
                warn!(
                    "[SyncExecutor] {} {} '{}' on {} failed: {}",
                    run.operation, T::KIND, entry.key, target.label, err
                );
                report.failed += 1;
                report
                    .errors
                    .push(format!("{} '{}': {}", T::KIND, entry.key, err));
                audit.with_entity_id(target_id).failed(err.to_string())
            }
        }
    }
}

/// Decide the step for one entry; `None` means nothing to do.
fn plan_step<T: KongEntity>(
    entry: &UnifiedEntity<T>,
    source_side: EntitySource,
    direction: SyncDirection,
    resolutions: &ConflictResolutionService,
) -> Result<Option<Step<T>>> {
    let (source_entity, target_id) = match direction {
        SyncDirection::Push => (entry.gateway_entity.as_ref(), entry.konnect_id.as_ref()),
        SyncDirection::Pull => (entry.konnect_entity.as_ref(), entry.gateway_id.as_ref()),
    };

    if entry.source == source_side {
        let Some(source) = source_entity else {
            return Ok(None);
        };
        return Ok(Some(Step::Create(writable(source.field_map())?)));
    }
    if !entry.has_drift {
        return Ok(None);
    }

    let Some(resolution) = resolutions.resolution_for(T::KIND, &entry.key) else {
        return Ok(Some(Step::Skip));
    };
    let state: FieldMap = match &resolution.action {
        ResolutionAction::KeepSource => match source_entity {
            Some(source) => source.field_map(),
            None => return Ok(Some(Step::Skip)),
        },
        ResolutionAction::Merge(merged) => merged.fields().clone(),
        ResolutionAction::KeepTarget | ResolutionAction::Skip => return Ok(Some(Step::Skip)),
    };

    let target_id = target_id.cloned().unwrap_or_else(|| entry.key.clone());
    Ok(Some(Step::Update {
        target_id,
        payload: writable(state)?,
    }))
}

/// Typed payload without server-assigned fields.
fn writable<T: KongEntity>(state: FieldMap) -> Result<T> {
    Ok(T::from_field_map(strip_server_fields(state))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStatus;
    use crate::conflict::{build_conflicts, Resolution};
    use crate::merge::merge_entities;
    use konsync_api::{EntityRef, Route, Service, Target, Upstream};
    use konsync_core::InMemoryControlPlane;
    use tempfile::tempdir;

    fn service(id: &str, name: &str, host: &str) -> Service {
        Service {
            id: Some(id.into()),
            ..Service::new(name, host)
        }
    }

    struct Fixture {
        gateway: InMemoryControlPlane,
        konnect: InMemoryControlPlane,
        list: UnifiedEntityList<Service>,
        executor: SyncExecutor,
        audit: SyncAuditService,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let gateway = InMemoryControlPlane::new("Gateway").with_services(vec![
            service("g1", "api", "old.local"),
            service("g2", "billing", "billing.local"),
            service("g3", "same", "same.local"),
        ]);
        let konnect = InMemoryControlPlane::new("Konnect").with_services(vec![
            service("k1", "api", "new.local"),
            service("k3", "same", "same.local"),
            service("k4", "search", "search.local"),
        ]);
        let list = merge_entities(
            gateway.services.snapshot().await,
            konnect.services.snapshot().await,
        )
        .unwrap();

        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("sync.jsonl"));
        let executor = SyncExecutor::new(gateway.plane(), konnect.plane(), audit.clone());
        Fixture {
            gateway,
            konnect,
            list,
            executor,
            audit,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_push_creates_missing_and_applies_keep_source() {
        let f = fixture().await;
        let mut resolutions = ConflictResolutionService::new();
        let conflicts = build_conflicts(&f.list, SyncDirection::Push);
        resolutions.set_resolution(Resolution::new(&conflicts[0], ResolutionAction::KeepSource));

        let run = f.audit.start_sync(SyncOperation::Push, false);
        let report = f.executor.sync_kind(&f.list, &resolutions, &run).await.unwrap();
        assert_eq!((report.created, report.updated, report.skipped, report.failed), (1, 1, 0, 0));

        let konnect = f.konnect.services.snapshot().await;
        let api = konnect.iter().find(|s| s.name.as_deref() == Some("api")).unwrap();
        assert_eq!(api.host.as_deref(), Some("old.local"));
        assert_eq!(api.id.as_deref(), Some("k1"));
        assert!(konnect.iter().any(|s| s.name.as_deref() == Some("billing")));
        assert_eq!(f.gateway.services.write_count(), 0);

        let entries = f.audit.get_sync_details(&run.sync_id).unwrap();
        assert_eq!(entries.len(), 2);
        let update = entries.iter().find(|e| e.action == AuditAction::Update).unwrap();
        assert_eq!(update.entity_id.as_deref(), Some("k1"));
        assert_eq!(update.drift_fields, Some(vec!["host".to_string()]));
        assert_eq!(update.before_state.as_ref().unwrap()["host"], "new.local");
        assert_eq!(update.after_state.as_ref().unwrap()["host"], "old.local");
    }

    #[tokio::test]
    async fn test_unresolved_drift_is_skipped_and_audited() {
        let f = fixture().await;
        let run = f.audit.start_sync(SyncOperation::Pull, false);
        let report = f
            .executor
            .sync_kind(&f.list, &ConflictResolutionService::new(), &run)
            .await
            .unwrap();

        assert_eq!((report.created, report.skipped), (1, 1));
        let gateway = f.gateway.services.snapshot().await;
        assert!(gateway.iter().any(|s| s.name.as_deref() == Some("search")));
        let api = gateway.iter().find(|s| s.name.as_deref() == Some("api")).unwrap();
        assert_eq!(api.host.as_deref(), Some("old.local"));

        let summary = &f.audit.list_syncs(None, None, None).unwrap()[0];
        assert_eq!((summary.created, summary.skipped), (1, 1));
    }

    #[tokio::test]
    async fn test_dry_run_records_without_writing() {
        let f = fixture().await;
        let mut resolutions = ConflictResolutionService::new();
        for conflict in build_conflicts(&f.list, SyncDirection::Push) {
            resolutions.set_resolution(Resolution::new(&conflict, ResolutionAction::KeepSource));
        }

        let run = f.audit.start_sync(SyncOperation::Push, true);
        let report = f.executor.sync_kind(&f.list, &resolutions, &run).await.unwrap();
        assert_eq!((report.created, report.updated), (1, 1));
        assert_eq!(f.konnect.services.write_count(), 0);

        let entries = f.audit.get_sync_details(&run.sync_id).unwrap();
        assert!(entries.iter().all(|e| e.dry_run && e.status == AuditStatus::Success));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_batch() {
        let f = fixture().await;
        f.konnect.services.fail_writes_for("billing");
        let mut resolutions = ConflictResolutionService::new();
        let conflicts = build_conflicts(&f.list, SyncDirection::Push);
        resolutions.set_resolution(Resolution::new(&conflicts[0], ResolutionAction::KeepSource));

        let run = f.audit.start_sync(SyncOperation::Push, false);
        let report = f.executor.sync_kind(&f.list, &resolutions, &run).await.unwrap();
        assert_eq!((report.updated, report.failed), (1, 1));
        assert!(report.errors[0].contains("billing"));

        let summary = &f.audit.list_syncs(None, None, None).unwrap()[0];
        assert_eq!((summary.updated, summary.errors), (1, 1));
    }

    #[tokio::test]
    async fn test_merge_resolution_writes_merged_state() {
        let f = fixture().await;
        let mut resolutions = ConflictResolutionService::new();
        let conflict = &build_conflicts(&f.list, SyncDirection::Push)[0];
        let mut merged = conflict.target_state.clone();
        merged.insert("host".into(), serde_json::json!("merged.local"));
        resolutions.resolve_merge(conflict, Some(merged)).unwrap();

        let run = f.audit.start_sync(SyncOperation::Push, false);
        f.executor.sync_kind(&f.list, &resolutions, &run).await.unwrap();

        let konnect = f.konnect.services.snapshot().await;
        let api = konnect.iter().find(|s| s.name.as_deref() == Some("api")).unwrap();
        assert_eq!(api.host.as_deref(), Some("merged.local"));
    }

    #[tokio::test]
    async fn test_push_rewrites_parent_references_to_target_ids() {
        let upstream = |id: &str| Upstream {
            id: Some(id.into()),
            ..Upstream::new("backend")
        };
        let gateway = InMemoryControlPlane::new("Gateway")
            .with_services(vec![
                service("g-svc", "api", "api.local"),
                service("g-bill", "billing", "billing.local"),
            ])
            .with_routes(vec![
                Route::new("orders", EntityRef::by_id("g-svc")),
                Route::new("invoices", EntityRef::by_id("g-bill")),
            ])
            .with_upstreams(vec![upstream("g-up")])
            .with_targets(vec![Target::new("10.0.0.1:80", EntityRef::by_id("g-up"))]);
        let konnect = InMemoryControlPlane::new("Konnect")
            .with_services(vec![service("k-svc", "api", "api.local")])
            .with_upstreams(vec![upstream("k-up")]);

        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("sync.jsonl"));
        let executor = SyncExecutor::new(gateway.plane(), konnect.plane(), audit.clone());
        let resolutions = ConflictResolutionService::new();
        let run = audit.start_sync(SyncOperation::Push, false);

        let routes = merge_entities(
            gateway.routes.snapshot().await,
            konnect.routes.snapshot().await,
        )
        .unwrap();
        let report = executor.sync_kind(&routes, &resolutions, &run).await.unwrap();
        assert_eq!((report.created, report.failed), (1, 1));
        assert!(report.errors[0].contains("invoices"));
        assert!(report.errors[0].contains("billing"));

        // "billing" has no counterpart on Konnect, so "invoices" is never written.
        let pushed = konnect.routes.snapshot().await;
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].name.as_deref(), Some("orders"));
        assert_eq!(pushed[0].service, Some(EntityRef::by_id("k-svc")));

        let targets = merge_entities(
            gateway.targets.snapshot().await,
            konnect.targets.snapshot().await,
        )
        .unwrap();
        let report = executor.sync_kind(&targets, &resolutions, &run).await.unwrap();
        assert_eq!((report.created, report.failed), (1, 0));
        let pushed = konnect.targets.snapshot().await;
        assert_eq!(pushed[0].upstream, Some(EntityRef::by_id("k-up")));

        let details = audit.get_sync_details(&run.sync_id).unwrap();
        let failed = details
            .iter()
            .find(|e| e.entity_name == "invoices")
            .unwrap();
        assert_eq!(failed.status, AuditStatus::Failed);
        assert_eq!(failed.action, AuditAction::Create);
        assert!(failed.after_state.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_tolerates_parents_not_yet_on_target() {
        let gateway = InMemoryControlPlane::new("Gateway")
            .with_services(vec![service("g-bill", "billing", "billing.local")])
            .with_routes(vec![Route::new("invoices", EntityRef::by_id("g-bill"))]);
        let konnect = InMemoryControlPlane::new("Konnect");

        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("sync.jsonl"));
        let executor = SyncExecutor::new(gateway.plane(), konnect.plane(), audit.clone());
        let run = audit.start_sync(SyncOperation::Push, true);

        let routes = merge_entities(gateway.routes.snapshot().await, Vec::new()).unwrap();
        let report = executor
            .sync_kind(&routes, &ConflictResolutionService::new(), &run)
            .await
            .unwrap();
        assert_eq!((report.created, report.failed), (1, 0));
        assert_eq!(konnect.routes.write_count(), 0);

        let details = audit.get_sync_details(&run.sync_id).unwrap();
        let planned = details[0].after_state.as_ref().unwrap();
        assert_eq!(planned["service"], serde_json::json!({"name": "billing"}));
    }
}
