//! Command dispatch.
//!
//! The dispatcher resolves natural-language aliases to canonical verbs,
//! validates required fields, routes to the verb's handler, and commits
//! any returned state delta through the state store. The store owns
//! locking, versioning, and publishing; the dispatcher never publishes.
//!
//! Handler errors never escape: they are logged with a correlation id and
//! converted to a player-facing failure. The one exception is an admin
//! verb on a non-admin session, which the session endpoint turns into a
//! policy-violation close.

mod admin;
mod collect;
mod drop_item;
mod give;
mod go;
mod observe;
mod talk;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::Admin;
pub use collect::Collect;
pub use drop_item::DropItem;
pub use give::Give;
pub use go::Go;
pub use observe::Observe;
pub use talk::Talk;

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use waymark_domain::{ExperienceConfig, ExperienceId, PlayerView, StateModel, World};

use crate::infrastructure::auth::AuthenticatedUser;
use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::ports::{ChatPort, EventBusPort, SessionRegistryPort};
use crate::infrastructure::store::{StateStore, StoreError, TemplateRegistry};

/// Errors a handler can raise. Everything except `AdminRequired` is
/// absorbed by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("admin privileges required")]
    AdminRequired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Standardized handler outcome.
#[derive(Debug, Default)]
pub struct CommandResult {
    pub success: bool,
    pub message_to_player: Option<String>,
    pub actions: Option<Vec<Value>>,
    pub state_changes: Option<Value>,
    pub metadata: Option<Map<String, Value>>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message_to_player: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message_to_player: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_changes(mut self, changes: Value) -> Self {
        self.state_changes = Some(changes);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }
}

/// Routes typed client actions to deterministic handlers.
pub struct Dispatcher {
    store: Arc<StateStore>,
    collect: Collect,
    drop: DropItem,
    give: Give,
    go: Go,
    observe: Observe,
    talk: Talk,
    admin: Admin,
}

impl Dispatcher {
    pub fn new(
        store: Arc<StateStore>,
        templates: Arc<TemplateRegistry>,
        chat: Arc<dyn ChatPort>,
        clock: Arc<dyn ClockPort>,
        bus: Arc<dyn EventBusPort>,
        sessions: Arc<dyn SessionRegistryPort>,
    ) -> Self {
        Self {
            collect: Collect::new(store.clone(), templates.clone(), clock.clone()),
            drop: DropItem::new(store.clone(), templates.clone(), clock.clone()),
            give: Give::new(store.clone(), templates.clone(), clock.clone()),
            go: Go::new(store.clone(), clock.clone()),
            observe: Observe::new(store.clone(), templates.clone()),
            talk: Talk::new(store.clone(), templates.clone(), chat, clock.clone()),
            admin: Admin::new(store.clone(), templates, clock, bus, sessions),
            store,
        }
    }

    /// Dispatch one action. Returns `Err` only for `AdminRequired`; every
    /// other failure mode is a structured `CommandResult`.
    pub async fn dispatch(
        &self,
        user: &AuthenticatedUser,
        experience: &ExperienceId,
        action: &str,
        args: &Map<String, Value>,
    ) -> Result<CommandResult, CommandError> {
        let verb = resolve_alias(action);

        if verb.starts_with('@') && !user.is_admin {
            tracing::warn!(
                user_id = %user.user_id,
                verb = %verb,
                "admin verb rejected for non-admin session"
            );
            return Err(CommandError::AdminRequired);
        }

        if let Some(missing) = missing_field(&verb, args) {
            return Ok(CommandResult::fail(format!(
                "The '{verb}' action needs a '{missing}' field."
            )));
        }

        let handled = self.route(user, experience, &verb, args).await;

        let mut result = match handled {
            Ok(result) => result,
            Err(CommandError::AdminRequired) => return Err(CommandError::AdminRequired),
            Err(CommandError::UnknownAction(action)) => CommandResult::fail(format!(
                "I don't know how to '{action}'."
            )),
            Err(CommandError::Store(e)) => self.store_failure(&verb, e),
        };

        if result.success {
            if let Some(changes) = result.state_changes.take() {
                match self
                    .store
                    .update_world_state(experience, &user.user_id, &changes)
                    .await
                {
                    Ok(outcome) => {
                        result = result
                            .with_meta("base_version", outcome.base_version)
                            .with_meta("snapshot_version", outcome.snapshot_version);
                    }
                    Err(StoreError::Precondition(reason)) => {
                        tracing::debug!(verb = %verb, %reason, "command lost a state race");
                        result = CommandResult::fail("Someone beat you to it. Take another look around.");
                    }
                    Err(e) => {
                        result = self.store_failure(&verb, e);
                    }
                }
            }
        }

        Ok(result)
    }

    async fn route(
        &self,
        user: &AuthenticatedUser,
        experience: &ExperienceId,
        verb: &str,
        args: &Map<String, Value>,
    ) -> Result<CommandResult, CommandError> {
        let user_id = &user.user_id;
        match verb {
            "collect" => {
                self.collect
                    .execute(
                        user_id,
                        experience,
                        &str_arg(args, "item_id").unwrap_or_default().into(),
                        str_arg(args, "area_id").map(Into::into),
                    )
                    .await
            }
            "drop" => {
                self.drop
                    .execute(
                        user_id,
                        experience,
                        &str_arg(args, "item_id").unwrap_or_default().into(),
                    )
                    .await
            }
            "give" => {
                self.give
                    .execute(
                        user_id,
                        experience,
                        &str_arg(args, "item_id").unwrap_or_default().into(),
                        &str_arg(args, "npc_id").unwrap_or_default().into(),
                    )
                    .await
            }
            "go" => {
                self.go
                    .execute(user_id, experience, str_arg(args, "target").unwrap_or_default())
                    .await
            }
            "inventory" => self.observe.inventory(user_id, experience).await,
            "look" => self.observe.look(user_id, experience).await,
            "examine" => {
                self.observe
                    .examine(user_id, experience, str_arg(args, "target"))
                    .await
            }
            "talk" => {
                self.talk
                    .execute(
                        user_id,
                        experience,
                        &str_arg(args, "npc_id").unwrap_or_default().into(),
                        str_arg(args, "message").map(str::to_string),
                    )
                    .await
            }
            verb if verb.starts_with('@') => {
                self.admin
                    .execute(user, experience, verb, &list_args(args))
                    .await
            }
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }

    /// Map a store failure onto a player-safe response: transient
    /// failures suggest a retry, everything else gets a correlation id
    /// and a generic message.
    fn store_failure(&self, verb: &str, error: StoreError) -> CommandResult {
        match error {
            StoreError::Precondition(reason) => {
                tracing::debug!(verb = %verb, %reason, "precondition failure");
                CommandResult::fail("Someone beat you to it. Take another look around.")
            }
            e if e.is_transient() => {
                tracing::warn!(verb = %verb, error = %e, "transient store failure");
                CommandResult::fail("The world is busy right now. Try that again in a moment.")
            }
            e => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(
                    verb = %verb,
                    %correlation_id,
                    error = %e,
                    "command failed"
                );
                CommandResult::fail("Something went wrong on our side. Please try again.")
            }
        }
    }
}

/// Read the world a player acts in: the shared snapshot, or the private
/// copy carried on the view.
pub(crate) async fn world_for(
    store: &StateStore,
    config: &ExperienceConfig,
    experience: &ExperienceId,
    view: &PlayerView,
) -> Result<World, StoreError> {
    match config.state_model {
        StateModel::Shared => store.get_world_state(experience).await,
        StateModel::Isolated => Ok(World {
            locations: view.locations.clone().unwrap_or_default(),
        }),
    }
}

/// Canonicalize player phrasing to a registered verb.
fn resolve_alias(action: &str) -> String {
    let normalized = action.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "take" | "grab" | "get" | "pickup" | "pick up" | "pick_up" => "collect",
        "move" | "walk" | "head" | "travel" => "go",
        "speak" | "say" => "talk",
        "look at" | "inspect" => "examine",
        "i" | "inv" | "bag" => "inventory",
        "l" => "look",
        other => other,
    }
    .to_string()
}

fn missing_field(verb: &str, args: &Map<String, Value>) -> Option<&'static str> {
    let required: &[&'static str] = match verb {
        "collect" | "drop" => &["item_id"],
        "give" => &["item_id", "npc_id"],
        "go" => &["target"],
        "talk" => &["npc_id"],
        _ => &[],
    };
    required
        .iter()
        .find(|field| {
            !args
                .get(**field)
                .map(|v| v.is_string() && !v.as_str().unwrap_or("").is_empty())
                .unwrap_or(false)
        })
        .copied()
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Positional arguments for admin console verbs
/// (`{action: "@connect", args: ["store", "counter", "back_room", "n"]}`).
fn list_args(args: &Map<String, Value>) -> Vec<String> {
    args.get("args")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn aliases_resolve_to_canonical_verbs() {
        assert_eq!(resolve_alias("take"), "collect");
        assert_eq!(resolve_alias("Pick Up"), "collect");
        assert_eq!(resolve_alias("walk"), "go");
        assert_eq!(resolve_alias("say"), "talk");
        assert_eq!(resolve_alias("inv"), "inventory");
        assert_eq!(resolve_alias("@stats"), "@stats");
        assert_eq!(resolve_alias("collect"), "collect");
    }

    #[tokio::test]
    async fn missing_required_field_fails_validation_without_state_change() {
        let fixture = Fixture::shared().await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(&fixture.player(), &fixture.experience(), "collect", &args(json!({})))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message_to_player.unwrap().contains("item_id"));
        let view = fixture.view("u1").await;
        assert_eq!(view.snapshot_version, 0);
    }

    #[tokio::test]
    async fn unknown_action_is_a_structured_failure() {
        let fixture = Fixture::shared().await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(&fixture.player(), &fixture.experience(), "levitate", &args(json!({})))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message_to_player.unwrap().contains("levitate"));
    }

    #[tokio::test]
    async fn collect_via_alias_commits_and_reports_versions() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "take",
                &args(json!({"item_id": "dream_bottle_1"})),
            )
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.message_to_player);
        let metadata = result.metadata.unwrap();
        let base = metadata["base_version"].as_u64().unwrap();
        assert_eq!(metadata["snapshot_version"].as_u64().unwrap(), base + 1);
        assert!(result.state_changes.is_none());

        let view = fixture.view("u1").await;
        assert_eq!(view.inventory.len(), 1);
    }

    #[tokio::test]
    async fn double_collect_yields_one_success_one_precondition_failure() {
        let fixture = Fixture::shared().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        fixture.move_player_to("u2", "woander_store", "counter").await;
        let dispatcher = fixture.dispatcher();

        let first = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "collect",
                &args(json!({"item_id": "dream_bottle_1"})),
            )
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(
                &fixture.player_named("u2"),
                &fixture.experience(),
                "collect",
                &args(json!({"item_id": "dream_bottle_1"})),
            )
            .await
            .unwrap();

        assert!(first.success);
        assert!(!second.success);

        let held: usize = [fixture.view("u1").await, fixture.view("u2").await]
            .iter()
            .map(|v| v.inventory.len())
            .sum();
        assert_eq!(held, 1);
    }

    #[tokio::test]
    async fn admin_verb_from_non_admin_escapes_as_policy_violation() {
        let fixture = Fixture::shared().await;
        let dispatcher = fixture.dispatcher();

        let err = dispatcher
            .dispatch(&fixture.player(), &fixture.experience(), "@stats", &args(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::AdminRequired));
    }

    #[tokio::test]
    async fn publish_outage_does_not_fail_commands() {
        let fixture = Fixture::shared_with_failing_bus().await;
        fixture.move_player_to("u1", "woander_store", "counter").await;
        let dispatcher = fixture.dispatcher();

        let result = dispatcher
            .dispatch(
                &fixture.player(),
                &fixture.experience(),
                "collect",
                &args(json!({"item_id": "dream_bottle_1"})),
            )
            .await
            .unwrap();

        assert!(result.success);
    }
}
