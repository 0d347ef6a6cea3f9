//! The state store: authoritative, durable, concurrency-safe access to
//! world state and per-player views.
//!
//! The store is the sole owner of on-disk JSON. Handlers mutate through
//! `update_world_state` / `update_player_view`, which serialize writers
//! with an advisory file lock, apply structured deltas to a scratch copy,
//! commit atomically (temp + rename), bump the affected view's
//! `snapshot_version` by exactly one, and publish a v0.4 world-update
//! event on the user's subject. A publish failure is logged and swallowed:
//! the state write must still succeed.

mod delta;
mod layout;
mod lock;
mod templates;

pub use delta::{apply_update, AppliedChange, DeltaError};
pub use layout::{read_json, write_json_atomic, StoreLayout};
pub use lock::{acquire_exclusive, FileLockGuard};
pub use templates::TemplateRegistry;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};

use waymark_domain::{
    AreaId, ExperienceConfig, ExperienceId, Instance, InstanceId, PlayerView, StateModel, UserId,
    World,
};
use waymark_shared::{user_subject, ChangeOperation, WorldUpdateEvent};

use crate::infrastructure::clock::{unix_ms, ClockPort};
use crate::infrastructure::ports::EventBusPort;

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("experience not found: {0}")]
    ExperienceNotFound(ExperienceId),
    #[error("timed out waiting for lock on {path}")]
    LockTimeout { path: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state document {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Precondition(String),
    #[error("operation requires the shared state model")]
    WrongStateModel,
    #[error(transparent)]
    Delta(DeltaError),
}

impl From<DeltaError> for StoreError {
    fn from(e: DeltaError) -> Self {
        match e {
            // A zero-match removal means the caller's precondition no
            // longer holds (e.g. someone else collected the item first).
            DeltaError::RemoveMatchedNothing { path } => {
                StoreError::Precondition(format!("nothing to remove at {path}"))
            }
            other => StoreError::Delta(other),
        }
    }
}

impl StoreError {
    /// Transient failures are retryable by the player; everything else is
    /// a hard error or a precondition message.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

/// Result of a committed (or no-op) write.
#[derive(Debug)]
pub struct WriteOutcome {
    /// View version before the write.
    pub base_version: u64,
    /// View version after the write; equals `base_version` when the delta
    /// produced no observable change.
    pub snapshot_version: u64,
    /// Wire operations describing the change, template-merged.
    pub changes: Vec<ChangeOperation>,
    /// The post-write player view.
    pub view: PlayerView,
}

pub struct StateStore {
    layout: StoreLayout,
    templates: Arc<TemplateRegistry>,
    bus: Arc<dyn EventBusPort>,
    clock: Arc<dyn ClockPort>,
    configs: DashMap<ExperienceId, Arc<ExperienceConfig>>,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(
        layout: StoreLayout,
        templates: Arc<TemplateRegistry>,
        bus: Arc<dyn EventBusPort>,
        clock: Arc<dyn ClockPort>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            layout,
            templates,
            bus,
            clock,
            configs: DashMap::new(),
            lock_timeout,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    // =========================================================================
    // Experience configuration
    // =========================================================================

    /// Load (and cache) an experience configuration.
    pub async fn load_experience_config(
        &self,
        experience: &ExperienceId,
    ) -> Result<Arc<ExperienceConfig>, StoreError> {
        if let Some(cached) = self.configs.get(experience) {
            return Ok(cached.clone());
        }

        let path = self.layout.config_path(experience);
        let config: ExperienceConfig = read_json(&path)
            .await?
            .ok_or_else(|| StoreError::ExperienceNotFound(experience.clone()))?;

        let config = Arc::new(config);
        self.configs.insert(experience.clone(), config.clone());
        Ok(config)
    }

    /// Drop the cached configuration and templates so the next access
    /// re-reads content (admin refresh hook).
    pub fn refresh_experience_config(&self, experience: &ExperienceId) {
        self.configs.remove(experience);
        self.templates.invalidate(experience);
    }

    /// Number of experience configurations currently cached.
    pub fn cached_experience_count(&self) -> usize {
        self.configs.len()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current shared-world snapshot. Reads are unlocked and may trail a
    /// concurrent writer by one version.
    pub async fn get_world_state(&self, experience: &ExperienceId) -> Result<World, StoreError> {
        let config = self.load_experience_config(experience).await?;
        if config.state_model != StateModel::Shared {
            return Err(StoreError::WrongStateModel);
        }
        let value = self.load_world_value(experience).await?;
        typed::<World>(value, &self.layout.world_path(experience))
    }

    /// The player's view, created from the experience bootstrap on first
    /// access.
    pub async fn get_player_view(
        &self,
        experience: &ExperienceId,
        user: &UserId,
    ) -> Result<PlayerView, StoreError> {
        let path = self.layout.view_path(user, experience);
        if let Some(view) = read_json::<PlayerView>(&path).await? {
            return Ok(view);
        }

        let config = self.load_experience_config(experience).await?;
        let mut view = PlayerView::bootstrap(user.clone(), &config);
        if config.state_model == StateModel::Isolated {
            // Seed the private world copy from the initial-state template.
            let world = typed::<World>(
                self.load_world_template_value(experience).await?,
                &self.layout.world_template_path(experience),
            )?;
            view.locations = Some(world.locations);
        }

        write_json_atomic(&path, &view).await?;
        tracing::info!(user_id = %user, experience = %experience, "player view bootstrapped");
        Ok(view)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a structured delta under the experience's locking regime.
    ///
    /// The update tree may address world state and, under the `player`
    /// key, the acting user's view. Both land in one committed write and
    /// one published world-update event.
    pub async fn update_world_state(
        &self,
        experience: &ExperienceId,
        user: &UserId,
        updates: &Value,
    ) -> Result<WriteOutcome, StoreError> {
        let (world_updates, player_updates) = split_updates(updates)?;
        self.commit(experience, user, world_updates, player_updates)
            .await
    }

    /// Apply a view-scoped delta (no `player.` wrapper on the tree).
    pub async fn update_player_view(
        &self,
        experience: &ExperienceId,
        user: &UserId,
        updates: &Value,
    ) -> Result<WriteOutcome, StoreError> {
        self.commit(experience, user, None, Some(updates.clone()))
            .await
    }

    async fn commit(
        &self,
        experience: &ExperienceId,
        user: &UserId,
        world_updates: Option<Value>,
        player_updates: Option<Value>,
    ) -> Result<WriteOutcome, StoreError> {
        let config = self.load_experience_config(experience).await?;
        match config.state_model {
            StateModel::Shared => {
                self.commit_shared(&config, experience, user, world_updates, player_updates)
                    .await
            }
            StateModel::Isolated => {
                self.commit_isolated(&config, experience, user, world_updates, player_updates)
                    .await
            }
        }
    }

    async fn commit_shared(
        &self,
        config: &ExperienceConfig,
        experience: &ExperienceId,
        user: &UserId,
        world_updates: Option<Value>,
        player_updates: Option<Value>,
    ) -> Result<WriteOutcome, StoreError> {
        let world_path = self.layout.world_path(experience);
        let view_path = self.layout.view_path(user, experience);

        // Lock ordering is world then view, always, so two writers cannot
        // deadlock against each other.
        let _world_guard = if world_updates.is_some() {
            Some(acquire_exclusive(&StoreLayout::lock_path(&world_path), self.lock_timeout).await?)
        } else {
            None
        };
        let _view_guard =
            acquire_exclusive(&StoreLayout::lock_path(&view_path), self.lock_timeout).await?;

        let mut world_doc = self.load_world_value(experience).await?;
        let mut view_doc = self.load_view_value(experience, user).await?;

        let mut applied = Vec::new();
        if let Some(updates) = &world_updates {
            applied.extend(apply_update(&mut world_doc, updates, "")?);
        }
        if let Some(updates) = &player_updates {
            applied.extend(apply_update(&mut view_doc, updates, "player")?);
        }

        if applied.is_empty() {
            let view = typed::<PlayerView>(view_doc, &view_path)?;
            let version = view.snapshot_version;
            return Ok(WriteOutcome {
                base_version: version,
                snapshot_version: version,
                changes: Vec::new(),
                view,
            });
        }

        let base_version = bump_version(&mut view_doc);

        // Validate both documents before anything touches disk: a delta
        // that breaks the schema must not half-commit.
        typed::<World>(world_doc.clone(), &world_path)?;
        let view = typed::<PlayerView>(view_doc.clone(), &view_path)?;

        if world_updates.is_some() {
            write_json_atomic(&world_path, &world_doc).await?;
        }
        write_json_atomic(&view_path, &view_doc).await?;

        let changes = self.to_wire(experience, applied).await;
        self.publish(config, experience, user, base_version, &changes)
            .await;

        Ok(WriteOutcome {
            base_version,
            snapshot_version: base_version + 1,
            changes,
            view,
        })
    }

    async fn commit_isolated(
        &self,
        config: &ExperienceConfig,
        experience: &ExperienceId,
        user: &UserId,
        world_updates: Option<Value>,
        player_updates: Option<Value>,
    ) -> Result<WriteOutcome, StoreError> {
        let view_path = self.layout.view_path(user, experience);
        let _view_guard =
            acquire_exclusive(&StoreLayout::lock_path(&view_path), self.lock_timeout).await?;

        // The private world copy lives inside the view document, so both
        // halves of the tree apply to one file.
        let mut view_doc = self.load_view_value(experience, user).await?;

        let mut applied = Vec::new();
        if let Some(updates) = &world_updates {
            applied.extend(apply_update(&mut view_doc, updates, "")?);
        }
        if let Some(updates) = &player_updates {
            applied.extend(apply_update(&mut view_doc, updates, "player")?);
        }

        if applied.is_empty() {
            let view = typed::<PlayerView>(view_doc, &view_path)?;
            let version = view.snapshot_version;
            return Ok(WriteOutcome {
                base_version: version,
                snapshot_version: version,
                changes: Vec::new(),
                view,
            });
        }

        let base_version = bump_version(&mut view_doc);
        let view = typed::<PlayerView>(view_doc.clone(), &view_path)?;
        write_json_atomic(&view_path, &view_doc).await?;

        let changes = self.to_wire(experience, applied).await;
        self.publish(config, experience, user, base_version, &changes)
            .await;

        Ok(WriteOutcome {
            base_version,
            snapshot_version: base_version + 1,
            changes,
            view,
        })
    }

    // =========================================================================
    // Resets
    // =========================================================================

    /// Restore one instance to its template-authored location and state.
    /// Running it twice leaves the same on-disk state as running it once.
    pub async fn reset_instance(
        &self,
        experience: &ExperienceId,
        instance_id: &InstanceId,
    ) -> Result<(), StoreError> {
        let config = self.load_experience_config(experience).await?;
        if config.state_model != StateModel::Shared {
            return Err(StoreError::WrongStateModel);
        }

        let template_world = typed::<World>(
            self.load_world_template_value(experience).await?,
            &self.layout.world_template_path(experience),
        )?;
        let Some((zone_id, area_id, authored)) = template_world.find_instance(instance_id) else {
            return Err(StoreError::Precondition(format!(
                "instance {instance_id} is not in the world template"
            )));
        };
        let (zone_id, area_id, authored) = (zone_id.clone(), area_id.clone(), authored.clone());

        let world_path = self.layout.world_path(experience);
        {
            let _guard =
                acquire_exclusive(&StoreLayout::lock_path(&world_path), self.lock_timeout).await?;
            let mut world = typed::<World>(
                self.load_world_value(experience).await?,
                &world_path,
            )?;

            for zone in world.locations.values_mut() {
                for area in zone.areas.values_mut() {
                    area.items.retain(|i| &i.instance_id != instance_id);
                }
            }
            if let Some(area) = world
                .locations
                .get_mut(&zone_id)
                .and_then(|z| z.areas.get_mut(&area_id))
            {
                area.items.push(authored.clone());
            } else {
                tracing::warn!(
                    instance_id = %instance_id,
                    zone_id = %zone_id,
                    "template location no longer exists; instance not respawned"
                );
            }

            write_json_atomic(&world_path, &world).await?;
        }

        // Pull the instance out of any inventory still holding it; each
        // affected player gets a normal world-update event.
        for user in self.users_with_view(experience).await? {
            let view = self.get_player_view(experience, &user).await?;
            if view.inventory_item(instance_id).is_none() {
                continue;
            }
            let updates = serde_json::json!({
                "inventory": {"$remove": {"instance_id": instance_id.as_str()}}
            });
            self.update_player_view(experience, &user, &updates).await?;
        }

        tracing::info!(experience = %experience, instance_id = %instance_id, "instance reset");
        Ok(())
    }

    /// Delete the player's view; the next connect re-bootstraps it.
    pub async fn reset_player(
        &self,
        user: &UserId,
        experience: &ExperienceId,
    ) -> Result<(), StoreError> {
        let path = self.layout.view_path(user, experience);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(user_id = %user, experience = %experience, "player view reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Re-initialize the shared world from its template.
    pub async fn reset_experience(&self, experience: &ExperienceId) -> Result<(), StoreError> {
        let world_path = self.layout.world_path(experience);
        let _guard =
            acquire_exclusive(&StoreLayout::lock_path(&world_path), self.lock_timeout).await?;

        let template = self.load_world_template_value(experience).await?;
        write_json_atomic(&world_path, &template).await?;
        self.refresh_experience_config(experience);

        tracing::info!(experience = %experience, "experience state reset from template");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_world_value(&self, experience: &ExperienceId) -> Result<Value, StoreError> {
        if let Some(value) = read_json::<Value>(&self.layout.world_path(experience)).await? {
            return Ok(value);
        }
        self.load_world_template_value(experience).await
    }

    async fn load_world_template_value(
        &self,
        experience: &ExperienceId,
    ) -> Result<Value, StoreError> {
        if let Some(value) =
            read_json::<Value>(&self.layout.world_template_path(experience)).await?
        {
            return Ok(value);
        }
        serde_json::to_value(World::default()).map_err(|e| StoreError::Corrupt {
            path: self
                .layout
                .world_template_path(experience)
                .display()
                .to_string(),
            source: e,
        })
    }

    async fn load_view_value(
        &self,
        experience: &ExperienceId,
        user: &UserId,
    ) -> Result<Value, StoreError> {
        let view = self.get_player_view(experience, user).await?;
        serde_json::to_value(&view).map_err(|e| StoreError::Corrupt {
            path: self
                .layout
                .view_path(user, experience)
                .display()
                .to_string(),
            source: e,
        })
    }

    /// Users with a persisted view for this experience.
    pub async fn users_with_view(
        &self,
        experience: &ExperienceId,
    ) -> Result<Vec<UserId>, StoreError> {
        let players = self.layout.players_dir();
        let mut users = Vec::new();
        let mut entries = match tokio::fs::read_dir(&players).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
            Err(e) => {
                return Err(StoreError::Io {
                    path: players.display().to_string(),
                    source: e,
                })
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let user = UserId::new(entry.file_name().to_string_lossy().to_string());
            if tokio::fs::try_exists(self.layout.view_path(&user, experience))
                .await
                .unwrap_or(false)
            {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Translate applied deltas into wire operations, denormalizing
    /// templates into any instance records that moved.
    async fn to_wire(
        &self,
        experience: &ExperienceId,
        applied: Vec<AppliedChange>,
    ) -> Vec<ChangeOperation> {
        let mut changes = Vec::with_capacity(applied.len());
        for change in applied {
            match change {
                AppliedChange::Appended { path, value } => {
                    let item = self.merge_if_instance(experience, value).await;
                    changes.push(ChangeOperation::Add {
                        area_id: area_from_items_path(&path),
                        path: match area_from_items_path(&path) {
                            Some(_) => None,
                            None => Some(path),
                        },
                        item,
                    });
                }
                AppliedChange::Removed { path, value } => {
                    match instance_identity(&value) {
                        Some((instance_id, template_id)) => {
                            let area_id = area_from_items_path(&path);
                            changes.push(ChangeOperation::Remove {
                                path: match area_id {
                                    Some(_) => None,
                                    None => Some(path),
                                },
                                area_id,
                                instance_id,
                                template_id,
                            });
                        }
                        None => changes.push(ChangeOperation::Update {
                            path,
                            value: Value::Null,
                        }),
                    }
                }
                AppliedChange::Patched { path, patch } => changes.push(ChangeOperation::Update {
                    path,
                    value: Value::Object(patch),
                }),
                AppliedChange::Set { path, value } | AppliedChange::Truncated { path, value } => {
                    changes.push(ChangeOperation::Update { path, value })
                }
            }
        }
        changes
    }

    async fn merge_if_instance(&self, experience: &ExperienceId, value: Value) -> Value {
        let Ok(instance) = serde_json::from_value::<Instance>(value.clone()) else {
            return value;
        };
        match self.templates.merge(experience, &instance).await {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(error = %e, instance_id = %instance.instance_id, "template merge failed");
                value
            }
        }
    }

    /// Publish the post-commit world update. Failures are logged and
    /// swallowed; a bus outage never fails a state write.
    async fn publish(
        &self,
        config: &ExperienceConfig,
        experience: &ExperienceId,
        user: &UserId,
        base_version: u64,
        changes: &[ChangeOperation],
    ) {
        let event = WorldUpdateEvent::new(
            experience.clone(),
            user.clone(),
            base_version,
            changes.to_vec(),
            unix_ms(self.clock.now()),
            config.state_model,
        );

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "world update event failed to serialize");
                return;
            }
        };

        if let Err(e) = self.bus.publish(&user_subject(user), payload).await {
            tracing::warn!(
                error = %e,
                user_id = %user,
                experience = %experience,
                "world update publish failed; state write already committed"
            );
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(
    value: Value,
    path: &std::path::Path,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        source: e,
    })
}

/// Split an update tree into its world and `player.` halves.
fn split_updates(updates: &Value) -> Result<(Option<Value>, Option<Value>), StoreError> {
    let map = updates
        .as_object()
        .ok_or(StoreError::Delta(DeltaError::NotAnObject {
            path: String::new(),
        }))?;

    let mut world = Map::new();
    let mut player = None;
    for (key, value) in map {
        if key == "player" {
            player = Some(value.clone());
        } else {
            world.insert(key.clone(), value.clone());
        }
    }

    Ok((
        (!world.is_empty()).then_some(Value::Object(world)),
        player,
    ))
}

/// Read-increment the `snapshot_version` field, returning the pre-write
/// version.
fn bump_version(view_doc: &mut Value) -> u64 {
    let base = view_doc
        .get("snapshot_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if let Some(map) = view_doc.as_object_mut() {
        map.insert("snapshot_version".to_string(), Value::from(base + 1));
    }
    base
}

/// `locations.<zone>.areas.<area>.items` → the area id.
fn area_from_items_path(path: &str) -> Option<AreaId> {
    let segments: Vec<&str> = path.split('.').collect();
    match segments.as_slice() {
        ["locations", _zone, "areas", area, "items"] => Some(AreaId::new(*area)),
        _ => None,
    }
}

fn instance_identity(value: &Value) -> Option<(InstanceId, Option<waymark_domain::TemplateId>)> {
    let instance_id = value.get("instance_id")?.as_str()?;
    let template_id = value
        .get("template_id")
        .and_then(Value::as_str)
        .map(waymark_domain::TemplateId::new);
    Some((InstanceId::new(instance_id), template_id))
}
