//! Content templates and runtime instances.
//!
//! A `Template` is an immutable blueprint authored offline; an `Instance`
//! is a runtime entity spawned from one. An instance lives in exactly one
//! container at any moment (an area's item list or a player inventory);
//! its location is the containing path, never a back-pointer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{InstanceId, TemplateId};

/// Kind of content a template (and its instances) represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Item,
    Npc,
    Quest,
}

impl TemplateKind {
    /// Directory name under `templates/` for this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TemplateKind::Item => "items",
            TemplateKind::Npc => "npcs",
            TemplateKind::Quest => "quests",
        }
    }
}

/// Immutable content blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub collectible: bool,
    /// Descriptive and behavioral properties (visual assets, dream_type, ...).
    #[serde(default)]
    pub properties: Map<String, Value>,
}

fn default_visible() -> bool {
    true
}

/// A runtime entity spawned from a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub template_id: TemplateId,
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Overrides the template's collectible default when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectible: Option<bool>,
    /// Opaque per-instance state; unknown keys round-trip untouched.
    #[serde(default)]
    pub state: Map<String, Value>,
}

impl Instance {
    pub fn from_template(instance_id: InstanceId, template: &Template) -> Self {
        Self {
            instance_id,
            template_id: template.template_id.clone(),
            kind: template.kind,
            visible: true,
            collectible: None,
            state: Map::new(),
        }
    }

    /// Effective collectible flag: instance override, else template default.
    pub fn is_collectible(&self, template: &Template) -> bool {
        self.collectible.unwrap_or(template.collectible)
    }
}

/// Denormalize a template into an instance for the wire.
///
/// Template fields form the base record; instance identity, visibility,
/// and state override. Clients key on `instance_id` and treat unknown
/// fields as passthrough.
pub fn merged_record(instance: &Instance, template: &Template) -> Value {
    let mut record = Map::new();
    record.insert("instance_id".into(), Value::String(instance.instance_id.to_string()));
    record.insert("template_id".into(), Value::String(template.template_id.to_string()));
    record.insert(
        "type".into(),
        serde_json::to_value(template.kind).unwrap_or(Value::Null),
    );
    record.insert("name".into(), Value::String(template.name.clone()));
    record.insert("description".into(), Value::String(template.description.clone()));
    record.insert(
        "collectible".into(),
        Value::Bool(instance.is_collectible(template)),
    );
    for (key, value) in &template.properties {
        record.insert(key.clone(), value.clone());
    }
    record.insert("visible".into(), Value::Bool(instance.visible));
    record.insert("state".into(), Value::Object(instance.state.clone()));
    Value::Object(record)
}
