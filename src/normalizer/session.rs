//! Session boundary detection
//!
//! Exchange sequence numbers restart when a feed reconnects. A regression is
//! therefore a new logical session, not lost data.

use super::{BookEvent, BookEventKind};

/// Why a new session started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReason {
    /// A full snapshot batch began
    Snapshot,
    /// An incremental update carried a lower sequence number than the watermark
    SequenceRegression { last: u64, received: u64 },
}

/// Outcome of observing a book event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Continue,
    NewSession(SessionReason),
}

/// Per-instrument sequence watermark and session counter
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    session_id: u64,
    last_sequence_num: Option<u64>,
    snapshot_batch: Option<u64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn last_sequence_num(&self) -> Option<u64> {
        self.last_sequence_num
    }

    /// Classify `event` against the watermark and advance it
    pub fn observe(&mut self, event: &BookEvent) -> SessionSignal {
        let seq = event.sequence_num;

        match event.kind {
            BookEventKind::FullSnapshot => {
                if self.snapshot_batch == Some(seq) {
                    self.last_sequence_num = Some(seq);
                    return SessionSignal::Continue;
                }
                self.session_id += 1;
                self.snapshot_batch = Some(seq);
                self.last_sequence_num = Some(seq);
                SessionSignal::NewSession(SessionReason::Snapshot)
            }
            BookEventKind::IncrementalUpdate => {
                self.snapshot_batch = None;
                let previous = self.last_sequence_num.replace(seq);
                match previous {
                    Some(last) if seq < last => {
                        self.session_id += 1;
                        SessionSignal::NewSession(SessionReason::SequenceRegression {
                            last,
                            received: seq,
                        })
                    }
                    _ => SessionSignal::Continue,
                }
            }
        }
    }
}
