use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// How long a partially assembled frame may wait for its next fragment.
const STALE_FRAME_TTL: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct Pending<T> {
    total: usize,
    samples: Vec<T>,
    created: Instant,
}

/// Reassembles multi-packet FFT/waterfall frames.
///
/// Fragments belonging to one logical frame share a `(stream_id,
/// frame_timestamp)` key and must arrive with ascending, contiguous start
/// bins. A frame is complete when `start + count == total`; fragments that
/// break contiguity discard the pending frame.
#[derive(Debug)]
pub(crate) struct FrameAssembler<T> {
    pending: HashMap<(u32, u32), Pending<T>>,
    ttl: Duration,
}

impl<T> Default for FrameAssembler<T> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            ttl: STALE_FRAME_TTL,
        }
    }
}

impl<T> FrameAssembler<T> {
    pub fn push(
        &mut self,
        stream_id: u32,
        frame_timestamp: u32,
        start: usize,
        total: usize,
        samples: Vec<T>,
        now: Instant,
    ) -> Option<Vec<T>> {
        self.sweep(now);

        if total == 0 || start + samples.len() > total {
            debug!(
                stream_id,
                start,
                total,
                count = samples.len(),
                "dropping fragment with inconsistent bin accounting"
            );
            return None;
        }

        let key = (stream_id, frame_timestamp);

        if start == 0 {
            if samples.len() == total {
                self.pending.remove(&key);
                return Some(samples);
            }
            self.pending.insert(
                key,
                Pending {
                    total,
                    samples,
                    created: now,
                },
            );
            return None;
        }

        let Some(pending) = self.pending.get_mut(&key) else {
            debug!(stream_id, start, "dropping fragment without a frame head");
            return None;
        };
        if pending.total != total || pending.samples.len() != start {
            debug!(
                stream_id,
                start,
                expected = pending.samples.len(),
                "dropping non-contiguous fragment"
            );
            self.pending.remove(&key);
            return None;
        }

        pending.samples.extend(samples);
        if pending.samples.len() == total {
            return self.pending.remove(&key).map(|p| p.samples);
        }
        None
    }

    /// Evicts partial frames older than the stale TTL.
    pub fn sweep(&mut self, now: Instant) {
        self.pending
            .retain(|_, pending| now.duration_since(pending.created) < self.ttl);
    }

    #[cfg(test)]
    fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn two_fragment_frame_completes() {
        let mut asm = FrameAssembler::default();
        let now = Instant::now();
        assert_eq!(asm.push(1, 42, 0, 1024, vec![0i16; 512], now), None);
        let frame = asm.push(1, 42, 512, 1024, vec![1i16; 512], now).unwrap();
        assert_eq!(frame.len(), 1024);
        assert_eq!(frame[0], 0);
        assert_eq!(frame[1023], 1);
        assert_eq!(asm.pending_frames(), 0);
    }

    #[test]
    fn single_fragment_frame_completes_immediately() {
        let mut asm = FrameAssembler::default();
        let frame = asm
            .push(1, 7, 0, 16, vec![3u16; 16], Instant::now())
            .unwrap();
        assert_eq!(frame, vec![3u16; 16]);
    }

    #[test]
    fn interleaved_streams_do_not_mix() {
        let mut asm = FrameAssembler::default();
        let now = Instant::now();
        assert_eq!(asm.push(1, 9, 0, 4, vec![1i16; 2], now), None);
        assert_eq!(asm.push(2, 9, 0, 4, vec![2i16; 2], now), None);
        assert_eq!(asm.push(1, 9, 2, 4, vec![1i16; 2], now), Some(vec![1i16; 4]));
        assert_eq!(asm.push(2, 9, 2, 4, vec![2i16; 2], now), Some(vec![2i16; 4]));
    }

    #[test]
    fn gap_discards_pending_frame() {
        let mut asm = FrameAssembler::default();
        let now = Instant::now();
        assert_eq!(asm.push(1, 5, 0, 12, vec![0i16; 4], now), None);
        // start 8 skips the fragment at 4
        assert_eq!(asm.push(1, 5, 8, 12, vec![0i16; 4], now), None);
        assert_eq!(asm.pending_frames(), 0);
    }

    #[test]
    fn fragment_without_head_is_dropped() {
        let mut asm = FrameAssembler::<i16>::default();
        assert_eq!(asm.push(1, 5, 4, 8, vec![0; 4], Instant::now()), None);
        assert_eq!(asm.pending_frames(), 0);
    }

    #[test]
    fn stale_partials_are_evicted() {
        let mut asm = FrameAssembler::default();
        let start = Instant::now();
        assert_eq!(asm.push(1, 5, 0, 8, vec![0i16; 4], start), None);
        assert_eq!(asm.pending_frames(), 1);
        asm.sweep(start + Duration::from_millis(600));
        assert_eq!(asm.pending_frames(), 0);
        // the tail that eventually arrives has nothing to attach to
        assert_eq!(
            asm.push(1, 5, 4, 8, vec![0i16; 4], start + Duration::from_millis(600)),
            None
        );
    }

    #[test]
    fn over_long_fragment_is_rejected() {
        let mut asm = FrameAssembler::<i16>::default();
        assert_eq!(asm.push(1, 1, 0, 4, vec![0; 8], Instant::now()), None);
    }
}
