//! Shared judging state
//!
//! Every session shares one engine. Requests are serialized through its
//! lock, since the result region and the elapsed-time counter are
//! process-wide.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::engine::JudgingEngine;

/// Shared judging state (cheap to clone)
pub struct JudgeState<C: Sync> {
    inner: Arc<Mutex<JudgingEngine<C>>>,
}

impl<C: Sync> Clone for JudgeState<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Sync> JudgeState<C> {
    pub fn new(engine: JudgingEngine<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Wait for exclusive use of the engine
    pub async fn engine(&self) -> MutexGuard<'_, JudgingEngine<C>> {
        self.inner.lock().await
    }
}
