use tokio::sync::watch;

/// Counting join barrier: completes once a fixed number of named signals
/// have each fired, in any order.
///
/// Used for shutdown, where the process-exit notification and the two pipe
/// EOFs arrive independently and none of them alone means the logs are
/// fully flushed.
#[derive(Clone)]
pub struct ShutdownJoin {
    remaining: watch::Sender<usize>,
}

impl ShutdownJoin {
    pub fn new(signals: usize) -> Self {
        let (remaining, _) = watch::channel(signals);
        Self { remaining }
    }

    /// Record one signal. Extra signals after completion are ignored.
    pub fn signal(&self, name: &str) {
        self.remaining.send_modify(|remaining| {
            if *remaining == 0 {
                tracing::warn!(signal = name, "signal fired after join completed");
                return;
            }
            *remaining -= 1;
            tracing::debug!(signal = name, remaining = *remaining, "shutdown signal");
        });
    }

    /// Wait until every signal has fired. Returns immediately if they
    /// already have.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // wait_for inspects the current value first, so completion before
        // the first wait() is observed
        let _ = rx.wait_for(|remaining| *remaining == 0).await;
    }
}
