//! Run context threaded through the stage chain
//!
//! One owned value per run, passed by mutable reference from pipe to pipe.
//! Each stage writes its typed result into its own slot; downstream stages
//! read the latest populated row set. Nothing here is shared across runs.

use uuid::Uuid;

use crate::downloader::DownloadResult;
use crate::filter::FilterOutcome;
use crate::mapper::MapResult;
use crate::models::{OptionBag, Pipeline, Row, Stage};
use crate::prepare::images::ImagesOutcome;
use crate::prepare::PrepareOutcome;
use crate::reader::ReadResult;

/// Marker stored by the save stage
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub execution_id: Uuid,
    pub saved: usize,
}

#[derive(Debug)]
pub struct Passable {
    pub pipeline: Pipeline,
    pub execution_id: Option<Uuid>,
    pub download: Option<DownloadResult>,
    pub read: Option<ReadResult>,
    pub filter: Option<FilterOutcome>,
    pub map: Option<MapResult>,
    pub images: Option<ImagesOutcome>,
    pub prepare: Option<PrepareOutcome>,
    pub save: Option<SaveOutcome>,
}

impl Passable {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            execution_id: None,
            download: None,
            read: None,
            filter: None,
            map: None,
            images: None,
            prepare: None,
            save: None,
        }
    }

    pub fn with_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// One options bag shared by every plugin in the run; unrecognized
    /// keys are each plugin's to ignore
    pub fn shared_options(&self) -> OptionBag {
        let mut bag = self.pipeline.source.options.clone();
        for (key, value) in &self.pipeline.reader.options {
            bag.insert(key.clone(), value.clone());
        }
        bag
    }

    /// The most recently produced row set
    pub fn current_rows(&self) -> Option<&[Row]> {
        if let Some(prepare) = &self.prepare {
            return Some(&prepare.rows);
        }
        if let Some(images) = &self.images {
            return Some(&images.rows);
        }
        if let Some(map) = &self.map {
            return Some(&map.rows);
        }
        if let Some(filter) = &self.filter {
            return Some(&filter.rows);
        }
        self.read.as_ref().map(|r| r.rows.as_slice())
    }

    pub fn has_result(&self, stage: Stage) -> bool {
        match stage {
            Stage::Download => self.download.is_some(),
            Stage::Read => self.read.is_some(),
            Stage::Filter => self.filter.is_some(),
            Stage::Map => self.map.is_some(),
            Stage::ImagesPrepare => self.images.is_some(),
            Stage::Prepare => self.prepare.is_some(),
            Stage::Save => self.save.is_some(),
        }
    }
}
