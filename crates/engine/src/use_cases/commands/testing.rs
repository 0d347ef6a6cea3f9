//! Shared fixtures for command handler tests: a temp content tree seeded
//! with the wylding-woods experience, plus mock ports.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use serde_json::json;

use waymark_domain::{ExperienceId, PlayerView, UserId, World};

use crate::infrastructure::auth::AuthenticatedUser;
use crate::infrastructure::clock::{ClockPort, MockClockPort};
use crate::infrastructure::ports::{
    BusError, ChatPort, ChatReply, EventBusPort, MockChatPort, MockEventBusPort,
    MockSessionRegistryPort, SessionRegistryPort,
};
use crate::infrastructure::store::{
    write_json_atomic, StateStore, StoreLayout, TemplateRegistry,
};

use super::Dispatcher;

pub const EXP: &str = "wylding-woods";

pub struct Fixture {
    _dir: tempfile::TempDir,
    pub store: Arc<StateStore>,
    pub templates: Arc<TemplateRegistry>,
    pub clock: Arc<dyn ClockPort>,
    pub bus: Arc<dyn EventBusPort>,
}

impl Fixture {
    pub async fn shared() -> Self {
        let mut bus = MockEventBusPort::new();
        bus.expect_publish().returning(|_, _| Ok(()));
        bus.expect_is_connected().returning(|| true);
        Self::build("shared", bus).await
    }

    pub async fn isolated() -> Self {
        let mut bus = MockEventBusPort::new();
        bus.expect_publish().returning(|_, _| Ok(()));
        bus.expect_is_connected().returning(|| true);
        Self::build("isolated", bus).await
    }

    pub async fn shared_with_failing_bus() -> Self {
        let mut bus = MockEventBusPort::new();
        bus.expect_publish().returning(|subject, _| {
            Err(BusError::Publish {
                subject: subject.to_string(),
                message: "broker offline".to_string(),
            })
        });
        bus.expect_is_connected().returning(|| false);
        Self::build("shared", bus).await
    }

    async fn build(state_model: &str, bus: MockEventBusPort) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_wylding_woods(dir.path(), state_model).await;

        let layout = StoreLayout::new(dir.path());
        let templates = Arc::new(TemplateRegistry::new(layout.clone()));
        let mut clock = MockClockPort::new();
        clock
            .expect_now()
            .returning(|| chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        let clock: Arc<dyn ClockPort> = Arc::new(clock);
        let bus: Arc<dyn EventBusPort> = Arc::new(bus);

        let store = Arc::new(StateStore::new(
            layout,
            templates.clone(),
            bus.clone(),
            clock.clone(),
            Duration::from_millis(200),
        ));

        Self {
            _dir: dir,
            store,
            templates,
            clock,
            bus,
        }
    }

    pub fn experience(&self) -> ExperienceId {
        ExperienceId::new(EXP)
    }

    pub fn player(&self) -> AuthenticatedUser {
        self.player_named("u1")
    }

    pub fn player_named(&self, user_id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new(user_id),
            email: None,
            is_admin: false,
        }
    }

    pub fn admin(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new("overseer"),
            email: Some("overseer@example.com".to_string()),
            is_admin: true,
        }
    }

    pub async fn view(&self, user_id: &str) -> PlayerView {
        self.store
            .get_player_view(&self.experience(), &UserId::new(user_id))
            .await
            .expect("player view")
    }

    pub async fn world(&self) -> World {
        self.store
            .get_world_state(&self.experience())
            .await
            .expect("world state")
    }

    pub async fn move_player_to(&self, user_id: &str, zone: &str, area: &str) {
        self.store
            .update_player_view(
                &self.experience(),
                &UserId::new(user_id),
                &json!({
                    "current_location": {"$set": zone},
                    "current_area": {"$set": area}
                }),
            )
            .await
            .expect("move player");
    }

    pub fn dispatcher(&self) -> Dispatcher {
        let mut chat = MockChatPort::new();
        chat.expect_narrate().returning(|_| {
            Ok(ChatReply {
                reply: "The fox inclines its head.".to_string(),
            })
        });
        self.dispatcher_with_chat(Arc::new(chat))
    }

    pub fn dispatcher_with_chat(&self, chat: Arc<dyn ChatPort>) -> Dispatcher {
        let mut sessions = MockSessionRegistryPort::new();
        sessions.expect_session_count().returning(|| 0);
        sessions.expect_sessions().returning(Vec::new);
        let sessions: Arc<dyn SessionRegistryPort> = Arc::new(sessions);

        Dispatcher::new(
            self.store.clone(),
            self.templates.clone(),
            chat,
            self.clock.clone(),
            self.bus.clone(),
            sessions,
        )
    }
}

async fn seed_wylding_woods(root: &std::path::Path, state_model: &str) {
    let layout = StoreLayout::new(root);
    let exp = ExperienceId::new(EXP);

    write_json_atomic(
        &layout.config_path(&exp),
        &json!({
            "experience_id": EXP,
            "state_model": state_model,
            "bootstrap": {"starting_location": "woander_store"},
            "capabilities": {"gps_based": true, "ar_enabled": true, "multiplayer": state_model == "shared"},
            "geographies": [
                {"id": "store_door", "lat": 37.906233, "lng": -122.547721, "zone_id": "woander_store"},
                {"id": "grove_gate", "lat": 37.910000, "lng": -122.550000, "zone_id": "moon_grove"}
            ]
        }),
    )
    .await
    .expect("seed config");

    write_json_atomic(
        &layout.world_template_path(&exp),
        &json!({
            "locations": {
                "woander_store": {
                    "id": "woander_store",
                    "name": "Woander Store",
                    "description": "A curious shop at the trailhead.",
                    "gps": {"lat": 37.906233, "lng": -122.547721},
                    "areas": {
                        "counter": {
                            "id": "counter",
                            "name": "Counter",
                            "description": "A worn wooden counter.",
                            "items": [
                                {"instance_id": "dream_bottle_1", "template_id": "dream_bottle", "type": "item"},
                                {"instance_id": "anvil_1", "template_id": "anvil", "type": "item"},
                                {"instance_id": "hidden_key_1", "template_id": "hidden_key", "type": "item", "visible": false}
                            ],
                            "exits": ["back_room"],
                            "cardinal_exits": {"n": "back_room"}
                        },
                        "back_room": {
                            "id": "back_room",
                            "name": "Back Room",
                            "description": "Dusty shelves and quiet.",
                            "items": [],
                            "npc": "shadow_fox",
                            "exits": ["counter"],
                            "cardinal_exits": {"s": "counter"}
                        },
                        "garden": {
                            "id": "garden",
                            "name": "Garden",
                            "description": "An overgrown herb garden.",
                            "items": []
                        }
                    }
                },
                "moon_grove": {
                    "id": "moon_grove",
                    "name": "Moon Grove",
                    "description": "Silver trees in a ring.",
                    "gps": {"lat": 37.91, "lng": -122.55},
                    "areas": {
                        "ring": {"id": "ring", "name": "Ring", "items": []}
                    }
                }
            }
        }),
    )
    .await
    .expect("seed world template");

    for (kind, body) in [
        (
            "items",
            json!({
                "template_id": "dream_bottle",
                "type": "item",
                "name": "Dream Bottle",
                "description": "A softly glowing bottle.",
                "collectible": true,
                "properties": {"dream_type": "flight", "glowing": true}
            }),
        ),
        (
            "items",
            json!({
                "template_id": "anvil",
                "type": "item",
                "name": "Anvil",
                "description": "Far too heavy to carry.",
                "collectible": false
            }),
        ),
        (
            "items",
            json!({
                "template_id": "hidden_key",
                "type": "item",
                "name": "Hidden Key",
                "description": "A small brass key.",
                "collectible": true
            }),
        ),
        (
            "npcs",
            json!({
                "template_id": "shadow_fox",
                "type": "npc",
                "name": "Shadow Fox",
                "description": "A sly, patient guide."
            }),
        ),
    ] {
        let template_id = body["template_id"].as_str().expect("template id");
        let path = layout
            .experience_dir(&exp)
            .join("templates")
            .join(kind)
            .join(template_id);
        write_json_atomic(&path, &body).await.expect("seed template");
    }
}
