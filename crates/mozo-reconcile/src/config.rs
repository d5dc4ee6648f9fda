//! Engine configuration.

use mozo_core::{
  entity::{EntityId, SubjectId},
  kind::EntityKind,
};
use serde::{Deserialize, Serialize};

/// Where entity, roster and feed nodes live in the realtime database, and how
/// subject nodes are shaped.
///
/// Defaults come from the entity kind; see [`EngineConfig::for_kind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Path template of one entity node; `{id}` is substituted. Without it,
  /// ids of interest are tracked but never subscribed.
  #[serde(default)]
  pub entity_path:      Option<String>,
  /// Path template of a subject's roster node; `{subject}` is substituted.
  pub roster_path:      String,
  /// Roster field listing the ids of interest.
  #[serde(default)]
  pub roster_ids_field: Option<String>,
  /// Path template of a subject's feed node; `{subject}` is substituted.
  #[serde(default)]
  pub feed_path:        Option<String>,
  /// Field of roster and feed nodes holding statistics.
  pub stats_field:      String,
  /// Capacity of the store change broadcast channel.
  pub change_buffer:    usize,
}

impl EngineConfig {
  pub fn for_kind<K: EntityKind>() -> Self {
    Self {
      entity_path:      K::ENTITY_PATH.map(str::to_owned),
      roster_path:      K::ROSTER_PATH.to_owned(),
      roster_ids_field: K::ROSTER_IDS_FIELD.map(str::to_owned),
      feed_path:        K::FEED_PATH.map(str::to_owned),
      stats_field:      "stats".to_owned(),
      change_buffer:    256,
    }
  }

  pub fn entity_path_of(&self, id: &EntityId) -> Option<String> {
    let template = self.entity_path.as_ref()?;
    Some(template.replace("{id}", id.as_str()))
  }

  pub fn roster_path_of(&self, subject: &SubjectId) -> String {
    self.roster_path.replace("{subject}", subject.as_str())
  }

  pub fn feed_path_of(&self, subject: &SubjectId) -> Option<String> {
    let template = self.feed_path.as_ref()?;
    Some(template.replace("{subject}", subject.as_str()))
  }
}
