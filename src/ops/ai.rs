// ============================================================================
// AI TRANSFORM BOUNDARY: adapter trait, cancellation, async job queue
// ============================================================================

use image::{GrayImage, RgbaImage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use crate::canvas::LayerId;
use crate::geometry::Rect;

/// Shared cancel flag threaded into every adapter call.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AiError {
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::Cancelled => write!(f, "cancelled"),
            AiError::Failed(e) => write!(f, "AI transform failed: {}", e),
        }
    }
}

impl std::error::Error for AiError {}

/// Input handed to the backend.
#[derive(Clone, Debug)]
pub struct AiRequest {
    pub prompt: String,
    pub images: Vec<Arc<RgbaImage>>,
    pub mask: Option<GrayImage>,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>, image: Arc<RgbaImage>) -> Self {
        Self { prompt: prompt.into(), images: vec![image], mask: None }
    }
}

/// External generative backend.  Implementations should check `cancel`
/// between expensive steps and return `AiError::Cancelled` when set.
pub trait AiTransform: Send + Sync {
    fn transform(&self, request: AiRequest, cancel: &CancelToken) -> Result<Vec<RgbaImage>, AiError>;
}

impl<F> AiTransform for F
where
    F: Fn(AiRequest, &CancelToken) -> Result<Vec<RgbaImage>, AiError> + Send + Sync,
{
    fn transform(&self, request: AiRequest, cancel: &CancelToken) -> Result<Vec<RgbaImage>, AiError> {
        self(request, cancel)
    }
}

/// Where a finished result lands.
#[derive(Clone, Debug, PartialEq)]
pub enum AiTarget {
    /// Swap the image content of an existing image layer.
    ReplaceLayer(LayerId),
    /// One new image layer per result, fitted into `frame`.
    NewLayers { frame: Rect },
    Gallery,
}

struct PendingJob {
    token: u64,
    target: AiTarget,
    cancel: CancelToken,
}

struct JobMessage {
    token: u64,
    result: Result<Vec<RgbaImage>, AiError>,
}

/// A job that finished and was neither cancelled nor superseded.
#[derive(Debug)]
pub struct AiCompletion {
    pub token: u64,
    pub target: AiTarget,
    pub result: Result<Vec<RgbaImage>, String>,
}

/// What happened to a finished job once the session handled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiOutcome {
    Applied(u64),
    Failed(u64, String),
}

impl AiOutcome {
    pub fn token(&self) -> u64 {
        match self {
            AiOutcome::Applied(t) | AiOutcome::Failed(t, _) => *t,
        }
    }
}

/// Runs adapter calls on the rayon pool.  Results arrive through a channel
/// and are only surfaced by `poll`; cancelled or superseded jobs are
/// dropped on arrival.
pub struct AiJobQueue {
    tx: mpsc::Sender<JobMessage>,
    rx: mpsc::Receiver<JobMessage>,
    next_token: u64,
    pending: Vec<PendingJob>,
}

impl Default for AiJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AiJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, next_token: 0, pending: Vec::new() }
    }

    /// Start a job.  A pending job with the same target is superseded.
    pub fn submit(&mut self, adapter: Arc<dyn AiTransform>, request: AiRequest, target: AiTarget) -> u64 {
        let superseded: Vec<u64> = self.pending.iter().filter(|j| j.target == target).map(|j| j.token).collect();
        for token in superseded {
            self.cancel(token);
        }

        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        let cancel = CancelToken::new();
        self.pending.push(PendingJob { token, target, cancel: cancel.clone() });

        let tx = self.tx.clone();
        rayon::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                adapter.transform(request, &cancel)
            }))
            .unwrap_or_else(|panic_info| {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                Err(AiError::Failed(format!("adapter panicked: {}", msg)))
            });
            let _ = tx.send(JobMessage { token, result });
        });
        crate::log_info!("AI job {} submitted", token);
        token
    }

    /// Cancel one job; its eventual result is discarded.
    pub fn cancel(&mut self, token: u64) -> bool {
        let Some(pos) = self.pending.iter().position(|j| j.token == token) else {
            return false;
        };
        let job = self.pending.remove(pos);
        job.cancel.cancel();
        crate::log_info!("AI job {} cancelled", token);
        true
    }

    pub fn cancel_all(&mut self) {
        for job in self.pending.drain(..) {
            job.cancel.cancel();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain finished jobs without blocking.
    pub fn poll(&mut self) -> Vec<AiCompletion> {
        let mut done = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            let Some(pos) = self.pending.iter().position(|j| j.token == msg.token) else {
                crate::log_debug!("AI job {} result dropped (cancelled or superseded)", msg.token);
                continue;
            };
            let job = self.pending.remove(pos);
            let result = match msg.result {
                Ok(images) => Ok(images),
                Err(AiError::Cancelled) => {
                    crate::log_info!("AI job {} reported cancellation", msg.token);
                    continue;
                }
                Err(AiError::Failed(e)) => {
                    crate::log_err!("AI job {} failed: {}", msg.token, e);
                    Err(e)
                }
            };
            done.push(AiCompletion { token: job.token, target: job.target, result });
        }
        done
    }
}
