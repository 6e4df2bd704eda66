use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Progress of a walk-forward run, shared with whoever started it.
#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_segments: usize,
    completed_segments: usize,
    failed_segments: usize,
    best_test_score: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_segments: usize,
    pub completed_segments: usize,
    pub failed_segments: usize,
    pub best_test_score: Option<f64>,
    pub cancelled: bool,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_segments: usize,
        completed_segments: usize,
        failed_segments: usize,
        best_test_score: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_segments = total_segments;
            data.completed_segments = completed_segments;
            data.failed_segments = failed_segments;
            data.best_test_score = best_test_score;
        }
    }

    /// Ask the optimizer to stop at the next segment boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        let cancelled = self.is_cancelled();
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_segments: data.total_segments,
                completed_segments: data.completed_segments,
                failed_segments: data.failed_segments,
                best_test_score: data.best_test_score,
                cancelled,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_segments: 0,
                completed_segments: 0,
                failed_segments: 0,
                best_test_score: None,
                cancelled,
            }
        }
    }
}
