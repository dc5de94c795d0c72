//! Progress relay between the compiler worker and the main thread
//!
//! The native compiler reports `(current, total)` from an arbitrary thread
//! at arbitrary intervals. Samples travel over a bounded channel and are
//! applied to the single process-wide indicator only on the main scheduling
//! thread, by [`ProgressRelay::pump`].

use crossbeam::channel::Receiver;

/// One progress sample from a compilation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Finished jobs in the batch
    pub current: u32,
    /// Submitted jobs in the batch
    pub total: u32,
}

/// UI seam for the progress indicator. At most one indicator is live at a
/// time; a second batch reuses or replaces it, never duplicates.
pub trait ProgressSink {
    /// Create (or replace) the indicator.
    fn begin(&mut self, label: &str);
    /// Update the live indicator with a fraction and a human-readable count.
    fn update(&mut self, fraction: f32, label: &str);
    /// Remove the indicator. Tolerates being called with none live.
    fn clear(&mut self);
}

/// Main-thread consumer applying the indicator lifecycle to drained samples.
pub struct ProgressRelay {
    rx: Receiver<ProgressUpdate>,
    indicator_live: bool,
}

impl ProgressRelay {
    /// Wrap the receiver half of the bridge's progress channel.
    pub fn new(rx: Receiver<ProgressUpdate>) -> Self {
        ProgressRelay {
            rx,
            indicator_live: false,
        }
    }

    /// Drain pending samples. Must be called on the main scheduling thread.
    pub fn pump(&mut self, sink: &mut dyn ProgressSink) {
        while let Ok(update) = self.rx.try_recv() {
            self.apply(update, sink);
        }
    }

    /// Apply one sample: completion clears, anything else lazily creates
    /// and updates the single indicator.
    fn apply(&mut self, update: ProgressUpdate, sink: &mut dyn ProgressSink) {
        if update.current >= update.total {
            // Completion, including the nothing-to-do 0/0 batch. Stale
            // samples after cancellation land here with no indicator live.
            self.force_clear(sink);
            return;
        }
        if !self.indicator_live {
            sink.begin("Compiling functions");
            self.indicator_live = true;
        }
        let fraction = update.current as f32 / update.total as f32;
        sink.update(fraction, &format!("{} / {}", update.current, update.total));
    }

    /// Remove the indicator if one is live. No-op otherwise.
    pub fn force_clear(&mut self, sink: &mut dyn ProgressSink) {
        if self.indicator_live {
            sink.clear();
            self.indicator_live = false;
        }
    }

    /// Whether an indicator is currently live.
    pub fn indicator_live(&self) -> bool {
        self.indicator_live
    }
}
