//! Engine doubles for scheduler tests

use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use witt_pipeline::engine::{DataEngine, EngineError, EngineResult, Interrupt, LazyPlan, MemoryEngine};
use witt_pipeline::frame::Frame;

mock! {
    pub Engine {}

    impl DataEngine for Engine {
        fn name(&self) -> &'static str;
        fn collect(&self, plan: &LazyPlan, limit: Option<usize>, interrupt: &Interrupt) -> EngineResult<Frame>;
        fn estimate_size(&self, frame: &Frame) -> usize;
    }
}

/// In-memory engine that counts `collect` calls and can be slowed down.
///
/// A delayed collect sleeps in short steps and gives up with
/// `EngineError::Interrupted` as soon as the interrupt is triggered.
pub struct CountingEngine {
    inner: MemoryEngine,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingEngine {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryEngine::new(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl DataEngine for CountingEngine {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn collect(
        &self,
        plan: &LazyPlan,
        limit: Option<usize>,
        interrupt: &Interrupt,
    ) -> EngineResult<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline {
            if interrupt.is_triggered() {
                return Err(EngineError::Interrupted);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.inner.collect(plan, limit, interrupt)
    }

    fn estimate_size(&self, frame: &Frame) -> usize {
        self.inner.estimate_size(frame)
    }
}
