use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use super::process::ProcessRegistry;

/// Job-wide cancellation signal, raised on the first worker error or a
/// user interrupt. Workers poll it at their loop boundaries and abandon
/// work promptly once it is set.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one worker needs: its identity, the shared job-scoped
/// scratch directory, the cancellation signal, and the process registry
/// used to spawn and reap its child command.
pub struct WorkerContext {
    pub worker_id: usize,
    pub mappers: usize,
    pub reducers: usize,
    pub scratch: PathBuf,
    pub cancel: CancelToken,
    pub registry: Arc<ProcessRegistry>,
}

impl WorkerContext {
    /// Log a message decorated with this worker's id.
    pub fn log(&self, msg: &str) {
        info!("  [worker.{}] {}", self.worker_id, msg);
    }
}
