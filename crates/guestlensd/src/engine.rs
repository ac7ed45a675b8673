use guestlens_core::imaging::{self, ImageLoadError};
use guestlens_core::{BoundingBox, Embedding, FacePipeline, PipelineError};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image error: {0}")]
    Image(#[from] ImageLoadError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Faces found in one image.
#[derive(Debug, Clone)]
pub struct FaceScan {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<BoundingBox>,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Encode {
        path: PathBuf,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
    Locate {
        path: PathBuf,
        reply: oneshot::Sender<Result<FaceScan, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    model_version: String,
}

impl EngineHandle {
    /// Encode every face in the image at `path`. No faces yields an empty list.
    pub async fn encode(&self, path: PathBuf) -> Result<Vec<Embedding>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Encode { path, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Locate faces in the image at `path` without encoding them.
    pub async fn locate(&self, path: PathBuf) -> Result<FaceScan, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Locate { path, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Version tag of the embeddings this engine produces.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(request).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the pipeline and serves requests one at a time until
/// every [`EngineHandle`] is dropped.
pub fn spawn_engine<P>(mut pipeline: P, max_image_side: u32) -> std::io::Result<EngineHandle>
where
    P: FacePipeline + Send + 'static,
{
    let model_version = pipeline.model_version().to_string();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("guestlens-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { path, reply } => {
                        let _ = reply.send(run_encode(&mut pipeline, &path, max_image_side));
                    }
                    EngineRequest::Locate { path, reply } => {
                        let _ = reply.send(run_locate(&mut pipeline, &path, max_image_side));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, model_version })
}

fn run_encode<P: FacePipeline>(
    pipeline: &mut P,
    path: &std::path::Path,
    max_image_side: u32,
) -> Result<Vec<Embedding>, EngineError> {
    let image = imaging::load_image(path, max_image_side)?;
    let faces = pipeline.locate(&image)?;
    if faces.is_empty() {
        tracing::info!(path = %path.display(), "no faces found");
        return Ok(Vec::new());
    }
    let encodings = pipeline.encode(&image, &faces)?;
    tracing::info!(path = %path.display(), faces = encodings.len(), "encoded faces");
    Ok(encodings)
}

fn run_locate<P: FacePipeline>(
    pipeline: &mut P,
    path: &std::path::Path,
    max_image_side: u32,
) -> Result<FaceScan, EngineError> {
    let image = imaging::load_image(path, max_image_side)?;
    let faces = pipeline.locate(&image)?;
    tracing::debug!(path = %path.display(), faces = faces.len(), "located faces");
    Ok(FaceScan {
        width: image.width(),
        height: image.height(),
        faces,
    })
}
