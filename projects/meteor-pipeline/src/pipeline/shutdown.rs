use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by every pipeline runner.
///
/// Runners only look at it between batches, so a batch in flight always
/// completes.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_is_shared_across_clones() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_shutdown());

        thread::spawn(move || signal.trigger()).join().unwrap();

        assert!(observer.is_shutdown());
    }
}
