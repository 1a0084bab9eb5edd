use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{FlexError, FlexResult};

/// A radio reply to one command. Immutable once parsed off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub seq: u32,
    /// 0 is success; anything else is a radio-defined error kind.
    pub code: u32,
    pub message: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Converts a non-zero status code into the typed command error.
    pub fn into_result(self) -> FlexResult<Reply> {
        if self.code == 0 {
            Ok(self)
        } else {
            Err(FlexError::Command {
                code: self.code,
                message: self.message,
            })
        }
    }
}

pub(crate) type ReplySink = oneshot::Sender<FlexResult<Reply>>;

#[derive(Debug)]
struct PendingReply {
    sink: ReplySink,
    registered_at: Instant,
}

/// Pending-reply bookkeeping shared by the writer (inserts) and reader
/// (completions) tasks. The critical sections are a map operation long.
#[derive(Debug)]
pub(crate) struct ReplyRegistry {
    pending: Mutex<HashMap<u32, PendingReply>>,
    timeout: Duration,
    unroutable: AtomicU64,
}

impl ReplyRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            unroutable: AtomicU64::new(0),
        }
    }

    /// Registers a sink for `seq`. Registration precedes send completion,
    /// so a reply can never race its own registration.
    pub fn register(&self, seq: u32, sink: ReplySink) {
        let previous = self.pending.lock().unwrap().insert(
            seq,
            PendingReply {
                sink,
                registered_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "sequence number reused: {}", seq);
    }

    /// Removes the entry and signals the sink exactly once. Replies with no
    /// registered sink are dropped with a counter increment.
    pub fn complete(&self, reply: Reply) {
        let entry = self.pending.lock().unwrap().remove(&reply.seq);
        match entry {
            Some(pending) => {
                // the caller may have dropped its future; that's fine
                let _ = pending.sink.send(reply.into_result());
            }
            None => {
                self.unroutable.fetch_add(1, Ordering::Relaxed);
                debug!(seq = reply.seq, "dropping reply with no registered sink");
            }
        }
    }

    /// Evicts entries older than the reply timeout, signalling `Timeout`.
    pub fn sweep(&self, now: Instant) {
        let mut timed_out = Vec::new();
        {
            let mut pending = self.pending.lock().unwrap();
            let expired: Vec<u32> = pending
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.registered_at) >= self.timeout)
                .map(|(&seq, _)| seq)
                .collect();
            for seq in expired {
                if let Some(entry) = pending.remove(&seq) {
                    timed_out.push((seq, entry.sink));
                }
            }
        }
        for (seq, sink) in timed_out {
            warn!(seq, "command reply timed out");
            let _ = sink.send(Err(FlexError::Timeout));
        }
    }

    /// Drops the entry for `seq` without signalling it. Used when a send
    /// fails after registration.
    pub fn cancel(&self, seq: u32) {
        self.pending.lock().unwrap().remove(&seq);
    }

    /// Fails every outstanding reply with `Disconnected`. Called once on
    /// session teardown.
    pub fn fail_all(&self) {
        let drained: Vec<PendingReply> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.sink.send(Err(FlexError::Disconnected));
        }
    }

    pub fn unroutable_replies(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
