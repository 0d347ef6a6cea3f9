//! Template registry.
//!
//! Templates are authored offline and read-only at runtime. The registry
//! loads them on demand from the experience content tree and caches per
//! (experience, template id).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use waymark_domain::{merged_record, ExperienceId, Instance, Template, TemplateId, TemplateKind};

use super::layout::{read_json, StoreLayout};
use super::StoreError;

pub struct TemplateRegistry {
    layout: StoreLayout,
    cache: DashMap<(ExperienceId, TemplateId), Arc<Template>>,
}

impl TemplateRegistry {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            cache: DashMap::new(),
        }
    }

    /// Resolve a template, or `None` when the content file is missing.
    pub async fn get(
        &self,
        experience: &ExperienceId,
        kind: TemplateKind,
        template_id: &TemplateId,
    ) -> Result<Option<Arc<Template>>, StoreError> {
        let key = (experience.clone(), template_id.clone());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let path = self.layout.template_path(experience, kind, template_id);
        let Some(template) = read_json::<Template>(&path).await? else {
            return Ok(None);
        };

        let template = Arc::new(template);
        self.cache.insert(key, template.clone());
        Ok(Some(template))
    }

    /// Resolve the template behind an instance.
    pub async fn resolve(
        &self,
        experience: &ExperienceId,
        instance: &Instance,
    ) -> Result<Option<Arc<Template>>, StoreError> {
        self.get(experience, instance.kind, &instance.template_id)
            .await
    }

    /// Template-merged wire record for an instance. Falls back to the bare
    /// instance when its template is missing (stale content references
    /// must not break a payload).
    pub async fn merge(
        &self,
        experience: &ExperienceId,
        instance: &Instance,
    ) -> Result<Value, StoreError> {
        match self.resolve(experience, instance).await? {
            Some(template) => Ok(merged_record(instance, &template)),
            None => serde_json::to_value(instance).map_err(|e| StoreError::Corrupt {
                path: format!("instance {}", instance.instance_id),
                source: e,
            }),
        }
    }

    /// Drop cached templates for an experience (admin config refresh).
    pub fn invalidate(&self, experience: &ExperienceId) {
        self.cache.retain(|(exp, _), _| exp != experience);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::layout::write_json_atomic;

    async fn registry_with_template(dir: &std::path::Path) -> TemplateRegistry {
        let layout = StoreLayout::new(dir);
        let exp = ExperienceId::new("wylding-woods");
        let path = layout.template_path(&exp, TemplateKind::Item, &TemplateId::new("dream_bottle"));
        write_json_atomic(
            &path,
            &serde_json::json!({
                "template_id": "dream_bottle",
                "type": "item",
                "name": "Dream Bottle",
                "description": "A softly glowing bottle.",
                "collectible": true,
                "properties": {"dream_type": "flight"}
            }),
        )
        .await
        .unwrap();
        TemplateRegistry::new(layout)
    }

    #[tokio::test]
    async fn loads_and_caches_template() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_template(dir.path()).await;
        let exp = ExperienceId::new("wylding-woods");

        let template = registry
            .get(&exp, TemplateKind::Item, &TemplateId::new("dream_bottle"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(template.name, "Dream Bottle");

        // Second hit comes from cache even if the file disappears.
        tokio::fs::remove_file(
            StoreLayout::new(dir.path()).template_path(
                &exp,
                TemplateKind::Item,
                &TemplateId::new("dream_bottle"),
            ),
        )
        .await
        .unwrap();
        assert!(registry
            .get(&exp, TemplateKind::Item, &TemplateId::new("dream_bottle"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn missing_template_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::new(StoreLayout::new(dir.path()));
        let found = registry
            .get(
                &ExperienceId::new("wylding-woods"),
                TemplateKind::Item,
                &TemplateId::new("absent"),
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn merge_falls_back_to_bare_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::new(StoreLayout::new(dir.path()));
        let instance: Instance = serde_json::from_str(
            r#"{"instance_id": "x1", "template_id": "absent", "type": "item"}"#,
        )
        .unwrap();

        let record = registry
            .merge(&ExperienceId::new("wylding-woods"), &instance)
            .await
            .unwrap();
        assert_eq!(record["instance_id"], "x1");
        assert!(record.get("name").is_none());
    }
}
