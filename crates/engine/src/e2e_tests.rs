//! End-to-end scenarios over the session frame path.
//!
//! These drive `handle_client_frame` against a fully wired `App` (temp
//! content tree, mock bus/chat/clock), covering the connect → locate →
//! act → reconcile loop a real client performs.

use std::sync::Arc;

use chrono::TimeZone;
use serde_json::{json, Value};

use waymark_domain::{ExperienceId, UserId};
use waymark_shared::ServerMessage;

use crate::api::websocket::{handle_client_frame, FrameOutcome};
use crate::app::App;
use crate::infrastructure::auth::AuthenticatedUser;
use crate::infrastructure::clock::MockClockPort;
use crate::infrastructure::config::{
    AppConfig, AuthConfig, ChatConfig, NatsConfig, SessionConfig, StoreConfig,
};
use crate::infrastructure::ports::{ChatReply, MockChatPort, MockEventBusPort};
use crate::infrastructure::store::{write_json_atomic, StoreLayout};

const EXP: &str = "wylding-woods";
const STORE_LAT: f64 = 37.906233;
const STORE_LNG: f64 = -122.547721;

struct Harness {
    _dir: tempfile::TempDir,
    app: App,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path()).await;

        let config = AppConfig {
            server_port: 0,
            data_root: dir.path().to_path_buf(),
            cors_allowed_origins: vec!["*".to_string()],
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                name: None,
                max_reconnects: 1,
                max_retries: 0,
                retry_delay_secs: 1,
            },
            auth: AuthConfig {
                jwt_secret: "test-secret".to_string(),
            },
            chat: ChatConfig {
                base_url: "http://localhost:8300".to_string(),
                timeout_secs: 1,
            },
            store: StoreConfig {
                lock_timeout_ms: 200,
            },
            session: SessionConfig {
                heartbeat_interval_secs: 30,
                channel_buffer: 16,
            },
        };

        let mut bus = MockEventBusPort::new();
        bus.expect_publish().returning(|_, _| Ok(()));
        bus.expect_is_connected().returning(|| true);

        let mut chat = MockChatPort::new();
        chat.expect_narrate().returning(|_| {
            Ok(ChatReply {
                reply: "The fox listens.".to_string(),
            })
        });

        let mut clock = MockClockPort::new();
        clock
            .expect_now()
            .returning(|| chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());

        let app = App::new(config, Arc::new(bus), Arc::new(chat), Arc::new(clock));
        Self { _dir: dir, app }
    }

    fn player(&self, user_id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new(user_id),
            email: None,
            is_admin: false,
        }
    }

    fn admin(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new("overseer"),
            email: None,
            is_admin: true,
        }
    }

    async fn frame(&self, user: &AuthenticatedUser, frame: Value) -> ServerMessage {
        match handle_client_frame(&self.app, user, &ExperienceId::new(EXP), &frame.to_string())
            .await
        {
            FrameOutcome::Reply(message) => message,
            other => panic!("expected a reply frame, got {}", describe(&other)),
        }
    }
}

fn describe(outcome: &FrameOutcome) -> String {
    match outcome {
        FrameOutcome::Reply(_) => "reply".to_string(),
        FrameOutcome::Close { code, .. } => format!("close({code})"),
    }
}

async fn seed(root: &std::path::Path) {
    let layout = StoreLayout::new(root);
    let exp = ExperienceId::new(EXP);

    write_json_atomic(
        &layout.config_path(&exp),
        &json!({
            "experience_id": EXP,
            "state_model": "shared",
            "bootstrap": {"starting_location": "woander_store"},
            "capabilities": {"gps_based": true, "ar_enabled": true, "multiplayer": true},
            "geographies": [
                {"id": "store_door", "lat": STORE_LAT, "lng": STORE_LNG, "zone_id": "woander_store"}
            ]
        }),
    )
    .await
    .expect("config");

    write_json_atomic(
        &layout.world_template_path(&exp),
        &json!({
            "locations": {
                "woander_store": {
                    "id": "woander_store",
                    "name": "Woander Store",
                    "description": "A curious shop at the trailhead.",
                    "gps": {"lat": STORE_LAT, "lng": STORE_LNG},
                    "areas": {
                        "counter": {
                            "id": "counter",
                            "name": "Counter",
                            "description": "A worn wooden counter.",
                            "items": [
                                {"instance_id": "dream_bottle_1", "template_id": "dream_bottle", "type": "item"},
                                {"instance_id": "hidden_key_1", "template_id": "dream_bottle", "type": "item", "visible": false}
                            ],
                            "exits": ["back_room"],
                            "cardinal_exits": {"n": "back_room"}
                        },
                        "back_room": {
                            "id": "back_room",
                            "name": "Back Room",
                            "items": [],
                            "npc": "shadow_fox",
                            "exits": ["counter"],
                            "cardinal_exits": {"s": "counter"}
                        }
                    }
                }
            }
        }),
    )
    .await
    .expect("world template");

    write_json_atomic(
        &layout.template_path(
            &exp,
            waymark_domain::TemplateKind::Item,
            &waymark_domain::TemplateId::new("dream_bottle"),
        ),
        &json!({
            "template_id": "dream_bottle",
            "type": "item",
            "name": "Dream Bottle",
            "description": "A softly glowing bottle.",
            "collectible": true,
            "properties": {"dream_type": "flight"}
        }),
    )
    .await
    .expect("item template");

    write_json_atomic(
        &layout.template_path(
            &exp,
            waymark_domain::TemplateKind::Npc,
            &waymark_domain::TemplateId::new("shadow_fox"),
        ),
        &json!({
            "template_id": "shadow_fox",
            "type": "npc",
            "name": "Shadow Fox",
            "description": "A sly, patient guide."
        }),
    )
    .await
    .expect("npc template");
}

#[tokio::test]
async fn fresh_connect_far_away_gets_an_empty_aoi_not_an_error() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let reply = harness
        .frame(&player, json!({"type": "update_location", "lat": 0.0, "lng": 0.0}))
        .await;

    let ServerMessage::AreaOfInterest {
        zone,
        areas,
        player: summary,
        ..
    } = reply
    else {
        panic!("expected an AOI frame");
    };
    assert!(zone.is_none());
    assert!(areas.is_empty());
    assert_eq!(
        summary.current_location.unwrap().as_str(),
        "woander_store"
    );
    assert!(summary.current_area.is_none());
    assert!(summary.inventory.is_empty());
}

#[tokio::test]
async fn aoi_at_the_start_location_shows_visible_items_only() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let reply = harness
        .frame(
            &player,
            json!({"type": "update_location", "lat": STORE_LAT, "lng": STORE_LNG}),
        )
        .await;

    let ServerMessage::AreaOfInterest { zone, areas, .. } = reply else {
        panic!("expected an AOI frame");
    };
    assert_eq!(zone.unwrap().id.as_str(), "woander_store");
    let counter = &areas[&waymark_domain::AreaId::new("counter")];
    assert_eq!(counter.items.len(), 1);
    assert_eq!(counter.items[0]["instance_id"], "dream_bottle_1");
}

#[tokio::test]
async fn collect_flow_reports_success_and_increments_the_version_by_one() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    // Walk into the counter area first.
    let go = harness
        .frame(&player, json!({"type": "action", "action": "go", "target": "counter"}))
        .await;
    let ServerMessage::ActionResponse { success: true, metadata, .. } = go else {
        panic!("go failed");
    };
    let version_after_go = metadata.unwrap()["snapshot_version"].as_u64().unwrap();

    let collect = harness
        .frame(
            &player,
            json!({"type": "action", "action": "collect", "item_id": "dream_bottle_1"}),
        )
        .await;
    let ServerMessage::ActionResponse {
        success,
        message,
        metadata,
        ..
    } = collect
    else {
        panic!("expected an action response");
    };
    assert!(success, "{message}");
    assert!(message.contains("Dream Bottle"));
    let metadata = metadata.unwrap();
    assert_eq!(
        metadata["snapshot_version"].as_u64().unwrap(),
        version_after_go + 1
    );
    assert_eq!(
        metadata["base_version"].as_u64().unwrap(),
        version_after_go
    );

    // The follow-up AOI reflects the move.
    let aoi = harness
        .frame(
            &player,
            json!({"type": "update_location", "lat": STORE_LAT, "lng": STORE_LNG}),
        )
        .await;
    let ServerMessage::AreaOfInterest { areas, player: summary, snapshot_version, .. } = aoi else {
        panic!("expected an AOI frame");
    };
    assert!(areas[&waymark_domain::AreaId::new("counter")].items.is_empty());
    assert_eq!(summary.inventory.len(), 1);
    assert_eq!(summary.inventory[0]["instance_id"], "dream_bottle_1");
    assert_eq!(snapshot_version, version_after_go + 1);
}

#[tokio::test]
async fn reconnect_gets_a_fresh_aoi_at_the_current_version() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    harness
        .frame(&player, json!({"type": "action", "action": "go", "target": "counter"}))
        .await;
    harness
        .frame(
            &player,
            json!({"type": "action", "action": "collect", "item_id": "dream_bottle_1"}),
        )
        .await;

    // A "reconnect" is just a fresh update_location; no resume protocol.
    let aoi = harness
        .frame(
            &player,
            json!({"type": "update_location", "lat": STORE_LAT, "lng": STORE_LNG}),
        )
        .await;
    let ServerMessage::AreaOfInterest { snapshot_version, .. } = aoi else {
        panic!("expected an AOI frame");
    };
    assert_eq!(snapshot_version, 2);
}

#[tokio::test]
async fn talk_reaches_the_chat_service_and_tracks_the_relationship() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    harness
        .frame(&player, json!({"type": "action", "action": "go", "target": "back_room"}))
        .await;
    let reply = harness
        .frame(
            &player,
            json!({"type": "action", "action": "talk", "npc_id": "shadow_fox", "message": "thank you"}),
        )
        .await;

    let ServerMessage::ActionResponse { success, message, metadata, .. } = reply else {
        panic!("expected an action response");
    };
    assert!(success);
    assert_eq!(message, "The fox listens.");
    assert_eq!(metadata.unwrap()["trust_delta"], 2);
}

#[tokio::test]
async fn admin_delete_without_confirm_previews_and_with_confirm_applies() {
    let harness = Harness::new().await;
    let admin = harness.admin();

    let preview = harness
        .frame(
            &admin,
            json!({"type": "action", "action": "@delete",
                   "args": ["sublocation", "woander_store", "back_room"]}),
        )
        .await;
    let ServerMessage::ActionResponse { success: true, message, .. } = preview else {
        panic!("expected a preview response");
    };
    assert!(message.contains("CONFIRM"));

    let applied = harness
        .frame(
            &admin,
            json!({"type": "action", "action": "@delete",
                   "args": ["sublocation", "woander_store", "back_room", "CONFIRM"]}),
        )
        .await;
    let ServerMessage::ActionResponse { success: true, .. } = applied else {
        panic!("expected the delete to apply");
    };

    let inspect = harness
        .frame(
            &admin,
            json!({"type": "action", "action": "@inspect", "args": ["area", "woander_store", "counter"]}),
        )
        .await;
    let ServerMessage::ActionResponse { message, .. } = inspect else {
        panic!("expected an inspect response");
    };
    assert!(!message.contains("back_room"));
}

#[tokio::test]
async fn admin_verbs_close_non_admin_sessions_with_policy_violation() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let outcome = handle_client_frame(
        &harness.app,
        &player,
        &ExperienceId::new(EXP),
        &json!({"type": "action", "action": "@stats", "args": []}).to_string(),
    )
    .await;

    let FrameOutcome::Close { code, .. } = outcome else {
        panic!("expected a close");
    };
    assert_eq!(code, 1008);
}

#[tokio::test]
async fn protocol_violations_answer_with_an_error_frame() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let garbled = handle_client_frame(
        &harness.app,
        &player,
        &ExperienceId::new(EXP),
        "{not json",
    )
    .await;
    let FrameOutcome::Reply(ServerMessage::Error { code, .. }) = garbled else {
        panic!("expected an error frame");
    };
    assert_eq!(code, "invalid_message");

    let unknown = harness
        .frame(&player, json!({"type": "warp_drive"}))
        .await;
    assert!(matches!(unknown, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn ping_echoes_the_client_timestamp() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let reply = harness
        .frame(&player, json!({"type": "ping", "timestamp": 42}))
        .await;
    assert!(matches!(reply, ServerMessage::Pong { timestamp: 42 }));
}

#[tokio::test]
async fn chat_frames_get_the_canned_placeholder() {
    let harness = Harness::new().await;
    let player = harness.player("u1");

    let reply = harness
        .frame(&player, json!({"type": "chat", "text": "hello woods"}))
        .await;
    let ServerMessage::ActionResponse { action, success, .. } = reply else {
        panic!("expected an action response");
    };
    assert_eq!(action, "chat");
    assert!(success);
}
