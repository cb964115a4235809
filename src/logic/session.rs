use std::time::Duration;

use crate::config::AppConfig;
use crate::error::SessionError;
use crate::logic::apply::{ApplyCoordinator, ApplyReport, CancelToken};
use crate::logic::engine::ChangeSetEngine;
use crate::model::ValidationReport;
use crate::store::reference_cache::ReferenceCache;
use crate::store::traits::{Model, ModelReader};

/// One editing session against one connected model: the engine holding local
/// state, the coordinator pushing it to the model, and the reference cache
/// feeding validation.
#[derive(Debug)]
pub struct EditorSession {
    engine: ChangeSetEngine,
    coordinator: ApplyCoordinator,
    references: ReferenceCache,
}

impl EditorSession {
    pub fn new(history_limit: usize, reference_ttl: Duration) -> Self {
        Self {
            engine: ChangeSetEngine::new(history_limit),
            coordinator: ApplyCoordinator::new(),
            references: ReferenceCache::new(reference_ttl),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.editor.history_limit, config.reference_ttl())
    }

    pub fn engine(&self) -> &ChangeSetEngine {
        &self.engine
    }

    /// Local edits go straight to the engine
    pub fn engine_mut(&mut self) -> &mut ChangeSetEngine {
        &mut self.engine
    }

    pub fn coordinator(&self) -> &ApplyCoordinator {
        &self.coordinator
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// Re-import the grouping table from the model, dropping every local edit.
    /// Also clears a fatal inconsistency: the reloaded state is the model's actual state.
    pub async fn reload<R: ModelReader + ?Sized>(
        &mut self,
        reader: &R,
    ) -> Result<usize, SessionError> {
        let records = reader.fetch_current_groupings().await?;
        let count = records.len();
        self.engine.load(records)?;
        self.references.invalidate().await;

        if self.coordinator.acknowledge_inconsistency() {
            log::warn!("Inconsistent apply state cleared by reload");
        }
        log::info!("Loaded {} grouping rows from model", count);
        Ok(count)
    }

    /// Validate the pending change-set against the model's current instrument list
    pub async fn validate<R: ModelReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<ValidationReport, SessionError> {
        let context = self.references.context(reader).await?;
        Ok(self.engine.validate(&context))
    }

    /// Push the pending change-set to the model
    pub async fn apply<M: Model + ?Sized>(
        &mut self,
        model: &M,
        cancel: &CancelToken,
    ) -> Result<ApplyReport, SessionError> {
        let context = self.references.context(model).await?;
        let change_set = self.engine.current_change_set();
        let report = self
            .coordinator
            .apply(&mut self.engine, &change_set, &context, model, cancel)
            .await?;
        Ok(report)
    }
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
