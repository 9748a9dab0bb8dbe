use geoface_core::gallery::Gallery;
use geoface_core::{EmbeddingSearch, Identification, Identifier, SpoofAnalysis};
use thiserror::Error;
use tokio::sync::{oneshot, OwnedRwLockReadGuard};

/// Pending requests allowed per worker before senders wait.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine workers exited")]
    ChannelClosed,
    #[error("engine needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from HTTP handlers to the worker threads.
enum EngineRequest {
    Identify {
        image: Vec<u8>,
        /// Held until the worker finishes, so the gallery cannot be swapped mid-search.
        gallery: OwnedRwLockReadGuard<Gallery>,
        reply: oneshot::Sender<Identification>,
    },
    Analyze {
        image: Vec<u8>,
        reply: oneshot::Sender<SpoofAnalysis>,
    },
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: async_channel::Sender<EngineRequest>,
    workers: usize,
    search_available: bool,
}

impl EngineHandle {
    /// Run the full pipeline on one uploaded image.
    pub async fn identify(
        &self,
        image: Vec<u8>,
        gallery: OwnedRwLockReadGuard<Gallery>,
    ) -> Result<Identification, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify { image, gallery, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Spoof analysis only.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<SpoofAnalysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn search_available(&self) -> bool {
        self.search_available
    }
}

/// Spawn one OS thread per identifier, all fed from a shared bounded queue.
///
/// Each identifier owns its own search (and ONNX sessions); the embedding
/// cache inside is shared.
pub fn spawn_engine<S>(identifiers: Vec<Identifier<S>>) -> Result<EngineHandle, EngineError>
where
    S: EmbeddingSearch + Send + 'static,
{
    if identifiers.is_empty() {
        return Err(EngineError::NoWorkers);
    }

    let workers = identifiers.len();
    let search_available = identifiers.iter().all(Identifier::search_available);
    let (tx, rx) = async_channel::bounded::<EngineRequest>(workers * QUEUE_DEPTH_PER_WORKER);

    for (id, identifier) in identifiers.into_iter().enumerate() {
        let rx = rx.clone();
        std::thread::Builder::new()
            .name(format!("geoface-worker-{id}"))
            .spawn(move || run_worker(id, identifier, rx))?;
    }

    tracing::info!(workers, search_available, "engine started");
    Ok(EngineHandle { tx, workers, search_available })
}

fn run_worker<S: EmbeddingSearch>(id: usize, mut identifier: Identifier<S>, rx: async_channel::Receiver<EngineRequest>) {
    tracing::debug!(worker = id, "worker thread started");
    while let Ok(req) = rx.recv_blocking() {
        match req {
            EngineRequest::Identify { image, gallery, reply } => {
                if reply.is_closed() {
                    tracing::debug!(worker = id, "caller gone before identification started; dropped");
                    continue;
                }
                let started = std::time::Instant::now();
                let result = identifier.identify(&image, &gallery);
                drop(gallery);
                tracing::info!(
                    worker = id,
                    outcome = result.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "identification finished"
                );
                let _ = reply.send(result);
            }
            EngineRequest::Analyze { image, reply } => {
                let analysis = identifier.spoof_detector().analyze_bytes(&image);
                let _ = reply.send(analysis);
            }
        }
    }
    tracing::debug!(worker = id, "worker thread exiting");
}
