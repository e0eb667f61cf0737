pub mod dispatch;

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::config::ModelsConfig;

/// Maps client model names onto backend models.
///
/// Aliases resolve to their target. A name that already is a backend model
/// (an alias target or the default) passes through. Anything else falls back
/// to the default model.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    default_model: Arc<str>,
    aliases: FxHashMap<String, Arc<str>>,
    backend_models: FxHashSet<Arc<str>>,
    /// Client-visible ids for `/v1/models`, sorted and deduplicated.
    listed: Vec<Arc<str>>,
}

impl ModelResolver {
    #[must_use]
    pub fn new(models: &ModelsConfig) -> Self {
        let default_model: Arc<str> = Arc::from(models.default_model.trim());
        let mut interned: FxHashMap<&str, Arc<str>> = FxHashMap::default();
        interned.insert(models.default_model.trim(), Arc::clone(&default_model));

        let mut aliases = FxHashMap::default();
        for (alias, target) in &models.aliases {
            let target = interned
                .entry(target.trim())
                .or_insert_with(|| Arc::from(target.trim()));
            aliases.insert(alias.trim().to_string(), Arc::clone(target));
        }
        let backend_models: FxHashSet<Arc<str>> = interned.into_values().collect();

        let mut listed: Vec<Arc<str>> = models
            .aliases
            .keys()
            .map(|alias| Arc::from(alias.trim()))
            .collect();
        listed.push(Arc::clone(&default_model));
        listed.sort_unstable();
        listed.dedup();

        Self {
            default_model,
            aliases,
            backend_models,
            listed,
        }
    }

    /// Backend model for `client_model`. Never fails; unknown names are
    /// logged and mapped to the default.
    #[must_use]
    pub fn resolve(&self, client_model: &str) -> Arc<str> {
        if let Some(target) = self.aliases.get(client_model) {
            return Arc::clone(target);
        }
        if let Some(model) = self.backend_models.get(client_model) {
            return Arc::clone(model);
        }
        warn!(
            requested = client_model,
            fallback = %self.default_model,
            "unknown model, using default"
        );
        Arc::clone(&self.default_model)
    }

    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    #[must_use]
    pub fn listed_models(&self) -> &[Arc<str>] {
        &self.listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ModelResolver {
        ModelResolver::new(&ModelsConfig {
            default_model: "grok-3".to_string(),
            aliases: [
                ("claude-sonnet-4".to_string(), "grok-3".to_string()),
                ("claude-haiku".to_string(), "grok-3-mini".to_string()),
            ]
            .into_iter()
            .collect(),
        })
    }

    #[test]
    fn alias_resolves_to_target() {
        assert_eq!(&*resolver().resolve("claude-haiku"), "grok-3-mini");
    }

    #[test]
    fn backend_model_passes_through() {
        let r = resolver();
        assert_eq!(&*r.resolve("grok-3-mini"), "grok-3-mini");
        assert_eq!(&*r.resolve("grok-3"), "grok-3");
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(&*resolver().resolve("gpt-9"), "grok-3");
    }

    #[test]
    fn listing_is_sorted_and_deduplicated() {
        let r = resolver();
        let ids: Vec<&str> = r.listed_models().iter().map(|m| &**m).collect();
        assert_eq!(ids, vec!["claude-haiku", "claude-sonnet-4", "grok-3"]);
    }
}
