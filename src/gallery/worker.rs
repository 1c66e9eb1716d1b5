use super::request::{LoadCompletion, LoadRequest};
use crate::assets::LoaderRegistry;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Background threads running format loads.
///
/// Workers only produce CPU-side models; completions are drained by the owner of the
/// session. Threads exit once the worker is dropped and the job queue runs dry.
pub struct LoadWorker {
    jobs: Sender<LoadRequest>,
    completions: Receiver<LoadCompletion>,
}

impl LoadWorker {
    pub fn spawn(registry: Arc<LoaderRegistry>, threads: usize) -> std::io::Result<Self> {
        let (jobs, job_rx) = unbounded::<LoadRequest>();
        let (done_tx, completions) = unbounded::<LoadCompletion>();

        for n in 0..threads.max(1) {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let registry = Arc::clone(&registry);
            thread::Builder::new()
                .name(format!("model-loader-{n}"))
                .spawn(move || {
                    for request in job_rx.iter() {
                        let completion = request.execute(&registry);
                        if done_tx.send(completion).is_err() {
                            break;
                        }
                    }
                    log::debug!("Load worker {} stopped", n);
                })?;
        }

        Ok(Self { jobs, completions })
    }

    pub fn submit(&self, request: LoadRequest) -> bool {
        self.jobs.send(request).is_ok()
    }

    /// Every completion that has arrived, in arrival order.
    pub fn drain(&self) -> Vec<LoadCompletion> {
        self.completions.try_iter().collect()
    }

    pub fn wait(&self, timeout: Duration) -> Option<LoadCompletion> {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LoadWorker;
    use crate::assets::{AssetIndex, LoadError, LoaderRegistry, MemorySource};
    use crate::gallery::generation::GenerationCounter;
    use crate::gallery::request::{LoadTarget, RequestQueue};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn completions_carry_request_identity() {
        let source = Arc::new(MemorySource::new(AssetIndex::new()));
        let registry = Arc::new(LoaderRegistry::with_default_loaders(source, 0.25));
        let worker = LoadWorker::spawn(registry, 2).unwrap();

        let mut generations = GenerationCounter::default();
        let mut queue = RequestQueue::default();
        let generation = generations.advance();
        queue.issue(LoadTarget::Preview, generation, "FBX", "chair");
        for request in queue.drain() {
            assert!(worker.submit(request));
        }

        let completion = worker.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.request.model, "chair");
        assert_eq!(completion.request.generation, generation);
        assert!(matches!(
            completion.result,
            Err(LoadError::UnsupportedFormat(_))
        ));
        assert!(worker.drain().is_empty());
    }
}
