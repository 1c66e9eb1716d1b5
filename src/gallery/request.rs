use super::generation::Generation;
use crate::assets::{LoadError, LoaderRegistry};
use crate::scene::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    Preview,
    Thumbnail { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub id: u64,
    pub target: LoadTarget,
    pub generation: Generation,
    pub format: String,
    pub model: String,
}

impl LoadRequest {
    /// Runs the load on the calling thread.
    pub fn execute(self, registry: &LoaderRegistry) -> LoadCompletion {
        let result = registry.load(&self.format, &self.model);
        LoadCompletion {
            request: self,
            result,
        }
    }
}

#[derive(Debug)]
pub struct LoadCompletion {
    pub request: LoadRequest,
    pub result: Result<Model, LoadError>,
}

/// Requests issued during a frame, waiting to be handed to the load workers.
#[derive(Debug, Default)]
pub struct RequestQueue {
    next_id: u64,
    pending: Vec<LoadRequest>,
}

impl RequestQueue {
    pub fn issue(
        &mut self,
        target: LoadTarget,
        generation: Generation,
        format: &str,
        model: &str,
    ) -> u64 {
        self.next_id += 1;
        log::debug!(
            "Load request {} for {}/{} ({:?}, generation {})",
            self.next_id,
            format,
            model,
            target,
            generation
        );
        self.pending.push(LoadRequest {
            id: self.next_id,
            target,
            generation,
            format: format.to_string(),
            model: model.to_string(),
        });
        self.next_id
    }

    pub fn drain(&mut self) -> Vec<LoadRequest> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
