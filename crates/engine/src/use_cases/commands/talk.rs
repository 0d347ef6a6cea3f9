//! Talk handler.
//!
//! The only verb that consults the external chat service. The exchange
//! narrows to one HTTP call plus a relationship-state delta: history ring
//! buffer, conversation counter, and a keyword-scored trust adjustment
//! bounded to [0, 100]. A chat outage degrades to a canned reply with no
//! state change.

use std::sync::Arc;

use serde_json::{json, Value};

use waymark_domain::{
    ExperienceId, Instance, InstanceId, NpcId, TemplateId, TemplateKind, UserId,
    CONVERSATION_HISTORY_LIMIT,
};

use crate::infrastructure::clock::ClockPort;
use crate::infrastructure::ports::{ChatPort, ChatRequest};
use crate::infrastructure::store::{StateStore, TemplateRegistry};

use super::{world_for, CommandError, CommandResult};

const POSITIVE_KEYWORDS: &[&str] = &[
    "thank", "please", "friend", "help", "love", "wonderful", "beautiful", "sorry", "gift",
];
const NEGATIVE_KEYWORDS: &[&str] = &[
    "hate", "stupid", "ugly", "liar", "steal", "kill", "idiot", "shut up",
];

const TRUST_STEP: i64 = 2;
const TRUST_SWING_LIMIT: i64 = 6;
const INITIAL_TRUST: i64 = 50;

pub struct Talk {
    store: Arc<StateStore>,
    templates: Arc<TemplateRegistry>,
    chat: Arc<dyn ChatPort>,
    clock: Arc<dyn ClockPort>,
}

impl Talk {
    pub fn new(
        store: Arc<StateStore>,
        templates: Arc<TemplateRegistry>,
        chat: Arc<dyn ChatPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            store,
            templates,
            chat,
            clock,
        }
    }

    pub async fn execute(
        &self,
        user: &UserId,
        experience: &ExperienceId,
        npc_id: &NpcId,
        message: Option<String>,
    ) -> Result<CommandResult, CommandError> {
        let config = self.store.load_experience_config(experience).await?;
        let view = self.store.get_player_view(experience, user).await?;

        let Some(zone_id) = view.current_location.clone() else {
            return Ok(CommandResult::fail(
                "You aren't anywhere yet. Send your location first.",
            ));
        };
        let world = world_for(&self.store, &config, experience, &view).await?;
        let Some(zone) = world.zone(&zone_id) else {
            return Ok(CommandResult::fail("That place doesn't seem to exist."));
        };

        let nearby = view
            .current_area
            .as_ref()
            .and_then(|a| zone.areas.get(a))
            .map(|area| area.npc.as_ref() == Some(npc_id))
            .unwrap_or(false)
            || zone.npc.as_ref() == Some(npc_id);

        let template = self
            .templates
            .get(experience, TemplateKind::Npc, &TemplateId::new(npc_id.as_str()))
            .await?;
        let npc_name = template
            .as_ref()
            .map(|t| t.name.clone())
            .unwrap_or_else(|| npc_id.to_string());

        if !nearby {
            return Ok(CommandResult::fail(format!("{npc_name} isn't here.")));
        }

        let relationship = view.npcs.get(npc_id);
        let now = self.clock.now();

        let npc_record = match &template {
            Some(template) => waymark_domain::merged_record(
                &Instance::from_template(InstanceId::new(npc_id.as_str()), template),
                template,
            ),
            None => json!({"npc_id": npc_id.as_str(), "name": npc_name}),
        };
        let relationship_record = relationship
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
            .unwrap_or_else(|| json!({"trust_level": INITIAL_TRUST, "total_conversations": 0}));
        let player_record = json!({
            "user_id": user.as_str(),
            "current_location": view.current_location,
            "current_area": view.current_area,
            "inventory_count": view.inventory.len(),
        });

        let reply = match self
            .chat
            .narrate(ChatRequest {
                npc: npc_record,
                relationship: relationship_record,
                player: player_record,
                message: message.clone(),
            })
            .await
        {
            Ok(reply) => reply.reply,
            Err(e) => {
                tracing::warn!(error = %e, npc_id = %npc_id, "chat service unavailable, degrading");
                return Ok(CommandResult::ok(format!(
                    "{npc_name} tilts their head, somewhere far away. Perhaps try again in a moment."
                ))
                .with_meta("npc_id", npc_id.as_str())
                .with_meta("degraded", true));
            }
        };

        let trust_delta = score_message(message.as_deref());
        let turn = json!({
            "player_message": message,
            "npc_reply": reply,
            "timestamp": now.to_rfc3339(),
        });

        let relationship_changes = match relationship {
            Some(_) => {
                let mut tree = json!({
                    "total_conversations": {"$increment": 1},
                    "conversation_history": {
                        "$append": turn,
                        "$limit": CONVERSATION_HISTORY_LIMIT
                    }
                });
                if trust_delta != 0 {
                    tree["trust_level"] =
                        json!({"$increment": {"amount": trust_delta, "min": 0, "max": 100}});
                }
                tree
            }
            None => json!({
                "$set": {
                    "trust_level": (INITIAL_TRUST + trust_delta).clamp(0, 100),
                    "total_conversations": 1,
                    "first_met": now.to_rfc3339(),
                    "conversation_history": [turn]
                }
            }),
        };

        let changes = json!({
            "player": {
                "npcs": {npc_id.as_str(): relationship_changes},
                "last_action": {"$set": now.to_rfc3339()}
            }
        });

        Ok(CommandResult::ok(reply)
            .with_changes(changes)
            .with_meta("npc_id", npc_id.as_str())
            .with_meta("trust_delta", trust_delta))
    }
}

/// Positive/negative keyword scoring, bounded so no single message swings
/// trust by more than a few points.
fn score_message(message: Option<&str>) -> i64 {
    let Some(message) = message else {
        return 0;
    };
    let lowered = message.to_ascii_lowercase();
    let positives = POSITIVE_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(**k))
        .count() as i64;
    let negatives = NEGATIVE_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(**k))
        .count() as i64;
    ((positives - negatives) * TRUST_STEP).clamp(-TRUST_SWING_LIMIT, TRUST_SWING_LIMIT)
}
