use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of one processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs this run set out to process.
    pub total: usize,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completed jobs whose unit was edited meanwhile; the vector was discarded.
    pub superseded: usize,
    /// Jobs recovered by stuck recovery while this run was still embedding
    /// them; they stay queued and this run's outcome for them is dropped.
    pub released: usize,
    /// Stuck jobs returned to pending before the run started.
    pub recovered: usize,
    pub elapsed_ms: u64,
}

/// Events streamed while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    Progress {
        processed: usize,
        total: usize,
        completed: usize,
        failed: usize,
    },
    Finished(RunSummary),
    /// The run stopped early; jobs it had claimed are left to stuck recovery.
    Failed {
        message: String,
    },
}

/// Sending side of the progress stream. Emitting never blocks or fails: a
/// consumer that has gone away or stopped reading loses events, and the run
/// carries on. `Progress` events never take the last free slot, so the
/// closing `Finished` or `Failed` event always fits.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else { return };
        if matches!(event, ProgressEvent::Progress { .. }) && tx.capacity() <= 1 {
            tracing::trace!("progress consumer lagging, update dropped");
            return;
        }
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("progress channel full, event dropped"),
            Err(TrySendError::Closed(_)) => tracing::debug!("progress receiver dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(processed: usize) -> ProgressEvent {
        ProgressEvent::Progress {
            processed,
            total: 10,
            completed: processed,
            failed: 0,
        }
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ProgressSink::new(tx);
        sink.emit(ProgressEvent::Started { total: 3 });
        ProgressSink::none().emit(ProgressEvent::Started { total: 3 });
    }

    #[test]
    fn stalled_reader_never_blocks_and_still_gets_the_end() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ProgressSink::new(tx);
        sink.emit(ProgressEvent::Started { total: 10 });
        for n in 1..=10 {
            sink.emit(progress(n));
        }
        sink.emit(ProgressEvent::Finished(RunSummary::default()));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ProgressEvent::Started { total: 10 },
                progress(1),
                progress(2),
                ProgressEvent::Finished(RunSummary::default()),
            ]
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(ProgressEvent::Progress {
            processed: 2,
            total: 4,
            completed: 1,
            failed: 1,
        })
        .unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["processed"], 2);

        let done = serde_json::to_value(ProgressEvent::Finished(RunSummary::default())).unwrap();
        assert_eq!(done["event"], "finished");
        assert_eq!(done["failed"], 0);
    }
}
