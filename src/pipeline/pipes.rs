//! Stage pipes
//!
//! One pipe per stage, each reading its input slot from the passable and
//! writing its typed result back. Pipes hold shared registries/engines and
//! no per-run state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::passable::{Passable, SaveOutcome};
use crate::downloader::{DownloadRequest, DownloaderFactory};
use crate::errors::{EngineError, EngineResult, PipelineError};
use crate::filter::FilterEngine;
use crate::mapper::MapperEngine;
use crate::models::{ImportResult, OptionBag, Stage};
use crate::prepare::images::ImagePreparer;
use crate::prepare::PrepareEngine;
use crate::reader::ReaderFactory;
use crate::storage::ResultStore;

/// One ordered step of a run
#[async_trait]
pub trait StagePipe: Send + Sync {
    fn stage(&self) -> Stage;
    async fn handle(&self, passable: &mut Passable) -> EngineResult<()>;
}

fn missing_input(stage: Stage, missing: Stage) -> EngineError {
    PipelineError::MissingStageInput { stage, missing }.into()
}

pub struct DownloadPipe {
    pub factory: Arc<DownloaderFactory>,
}

#[async_trait]
impl StagePipe for DownloadPipe {
    fn stage(&self) -> Stage {
        Stage::Download
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let scheme = passable.pipeline.source.scheme().ok_or_else(|| {
            EngineError::configuration(format!(
                "source url '{}' has no scheme",
                passable.pipeline.source.url
            ))
        })?;
        let downloader = self.factory.for_scheme(&scheme)?;

        let mut request = DownloadRequest::from_source(&passable.pipeline.source);
        request.options = passable.shared_options();

        let result = downloader.download(&request).await?;
        debug!(
            url = %request.url,
            bytes = result.content.len(),
            filename = result.filename.as_deref().unwrap_or("-"),
            "download complete"
        );
        passable.download = Some(result);
        Ok(())
    }
}

pub struct ReadPipe {
    pub factory: Arc<ReaderFactory>,
}

#[async_trait]
impl StagePipe for ReadPipe {
    fn stage(&self) -> Stage {
        Stage::Read
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let download = passable
            .download
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Read, Stage::Download))?;
        let reader = self.factory.for_type(&passable.pipeline.reader.reader_type)?;
        let result = reader.read(&download.content, &passable.shared_options())?;
        debug!(
            reader = reader.reader_type(),
            rows = result.rows.len(),
            "read complete"
        );
        passable.read = Some(result);
        Ok(())
    }
}

pub struct FilterPipe {
    pub engine: Arc<FilterEngine>,
}

#[async_trait]
impl StagePipe for FilterPipe {
    fn stage(&self) -> Stage {
        Stage::Filter
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let rows = passable
            .read
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Filter, Stage::Read))?
            .rows
            .clone();

        let outcome = self.engine.filter(rows, &passable.pipeline.filters)?;
        passable.filter = Some(outcome);
        Ok(())
    }
}

pub struct MapPipe {
    pub engine: Arc<MapperEngine>,
}

#[async_trait]
impl StagePipe for MapPipe {
    fn stage(&self) -> Stage {
        Stage::Map
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let filtered = passable
            .filter
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Map, Stage::Filter))?;

        let mut result = self
            .engine
            .map(&filtered.rows, &passable.pipeline.mappings);
        result.filter_stats = Some(filtered.stats.clone());
        passable.map = Some(result);
        Ok(())
    }
}

pub struct ImagesPipe {
    pub preparer: Arc<ImagePreparer>,
}

#[async_trait]
impl StagePipe for ImagesPipe {
    fn stage(&self) -> Stage {
        Stage::ImagesPrepare
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let mapped = passable
            .map
            .as_ref()
            .ok_or_else(|| missing_input(Stage::ImagesPrepare, Stage::Map))?;

        let outcome = self
            .preparer
            .prepare(mapped.rows.clone(), &passable.pipeline.images)
            .await;
        passable.images = Some(outcome);
        Ok(())
    }
}

pub struct PreparePipe {
    pub engine: Arc<PrepareEngine>,
}

#[async_trait]
impl StagePipe for PreparePipe {
    fn stage(&self) -> Stage {
        Stage::Prepare
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let images = passable
            .images
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Prepare, Stage::ImagesPrepare))?;

        let config: OptionBag = passable
            .pipeline
            .settings
            .as_object()
            .cloned()
            .unwrap_or_default();
        let outcome = self.engine.prepare(
            images.rows.clone(),
            passable.pipeline.resolver.as_deref(),
            &config,
        )?;
        passable.prepare = Some(outcome);
        Ok(())
    }
}

pub struct SavePipe {
    pub results: Arc<dyn ResultStore>,
}

#[async_trait]
impl StagePipe for SavePipe {
    fn stage(&self) -> Stage {
        Stage::Save
    }

    async fn handle(&self, passable: &mut Passable) -> EngineResult<()> {
        let prepared = passable
            .prepare
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Save, Stage::Prepare))?;

        let execution_id = passable.execution_id.unwrap_or_else(Uuid::new_v4);
        passable.execution_id = Some(execution_id);

        let result = ImportResult {
            organization_id: passable.pipeline.organization_id,
            pipeline_id: passable.pipeline.id,
            execution_id,
            rows: prepared.rows.clone(),
            saved_at: Utc::now(),
        };
        let saved = result.rows.len();
        self.results.save(result).await?;

        debug!(execution_id = %execution_id, rows = saved, "save complete");
        passable.save = Some(SaveOutcome { execution_id, saved });
        Ok(())
    }
}
