use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    dispatch_total: AtomicU64,
    fast_path_total: AtomicU64,
    provider_attempts_total: AtomicU64,
    provider_failures_total: AtomicU64,
    exhausted_total: AtomicU64,
    superseded_total: AtomicU64,
    in_flight: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a dispatch and holds it in the in-flight gauge until the
    /// returned guard is dropped, even if the dispatch future is abandoned.
    pub fn dispatch_started(&self) -> InFlightDispatch<'_> {
        self.dispatch_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightDispatch { metrics: self }
    }

    pub fn fast_path(&self) {
        self.fast_path_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_attempt(&self) {
        self.provider_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_failure(&self) {
        self.provider_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exhausted(&self) {
        self.exhausted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn superseded(&self) {
        self.superseded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE dispatch_total counter\n",
                "dispatch_total {}\n",
                "# TYPE dispatch_fast_path_total counter\n",
                "dispatch_fast_path_total {}\n",
                "# TYPE provider_attempts_total counter\n",
                "provider_attempts_total {}\n",
                "# TYPE provider_failures_total counter\n",
                "provider_failures_total {}\n",
                "# TYPE dispatch_exhausted_total counter\n",
                "dispatch_exhausted_total {}\n",
                "# TYPE runs_superseded_total counter\n",
                "runs_superseded_total {}\n",
                "# TYPE dispatch_in_flight gauge\n",
                "dispatch_in_flight {}\n"
            ),
            self.dispatch_total.load(Ordering::Relaxed),
            self.fast_path_total.load(Ordering::Relaxed),
            self.provider_attempts_total.load(Ordering::Relaxed),
            self.provider_failures_total.load(Ordering::Relaxed),
            self.exhausted_total.load(Ordering::Relaxed),
            self.superseded_total.load(Ordering::Relaxed),
            self.in_flight.load(Ordering::Relaxed),
        )
    }

    fn decrement_in_flight(&self) {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

pub struct InFlightDispatch<'a> {
    metrics: &'a MetricsRegistry,
}

impl Drop for InFlightDispatch<'_> {
    fn drop(&mut self) {
        self.metrics.decrement_in_flight();
    }
}
