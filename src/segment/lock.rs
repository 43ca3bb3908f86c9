//! # Process-Shared Segment Lock
//!
//! Each segment's first 8 bytes are its lock word, so the lock state is
//! visible to every process mapping the file. Acquisition is a CAS from 0 to
//! the caller's token; the token encodes the process id in the high half and
//! a per-thread sequence in the low half, which keeps holders distinguishable
//! across processes for timeout reporting.
//!
//! ## Timeout and Reclaim
//!
//! A holder that dies (process crash, SIGKILL) leaves its token behind and
//! would block the segment forever. A waiter that exhausts its timeout
//! budget therefore reports the stuck holder to the [`ErrorSink`] and
//! forcibly resets the word to 0, presuming the holder dead, then retries
//! with a fresh budget. A live-but-slow holder can lose the lock this way;
//! the unlock CAS detects that and reports through `on_unlock_error` instead
//! of clobbering the new holder.
//!
//! ## Guard
//!
//! [`SegmentGuard`] releases on drop, which covers every exit path of the
//! segment state machines, early error returns included. The lock is NOT
//! reentrant: acquiring a segment lock while holding it (for example from a
//! listener callback) spins until the timeout reclaims it from the caller
//! itself, corrupting the critical section.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::codec::ErrorSink;

/// Spins between deadline checks; `Instant::now` is far more expensive than
/// a CAS miss.
const SPINS_PER_TIME_CHECK: u32 = 64;

/// Exclusive hold of one segment; released on drop.
pub(crate) struct SegmentGuard<'a> {
    word: &'a AtomicU64,
    token: u64,
    sink: &'a dyn ErrorSink,
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        if self
            .word
            .compare_exchange(self.token, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // A timed-out waiter presumed us dead and took the word.
            self.sink
                .on_unlock_error("segment lock word changed while held (reclaimed by a waiter)");
        }
    }
}

/// Acquires the segment lock, spinning up to `timeout` per attempt and
/// reclaiming the word from a presumed-dead holder between attempts. Always
/// returns; liveness is bounded by the timeout, not by cooperation of the
/// holder.
pub(crate) fn lock_segment<'a>(
    word: &'a AtomicU64,
    timeout: Duration,
    sink: &'a dyn ErrorSink,
) -> SegmentGuard<'a> {
    let token = thread_token();
    loop {
        let deadline = Instant::now() + timeout;
        loop {
            if word
                .compare_exchange_weak(0, token, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SegmentGuard { word, token, sink };
            }
            for _ in 0..SPINS_PER_TIME_CHECK {
                std::hint::spin_loop();
                if word.load(Ordering::Relaxed) == 0 {
                    break;
                }
            }
            if word.load(Ordering::Relaxed) != 0 && Instant::now() >= deadline {
                break;
            }
        }
        let holder = word.load(Ordering::Relaxed);
        if holder != 0 {
            sink.on_lock_timeout(holder);
            // Reset only the observed holder; if the word moved on in the
            // meantime, someone made progress and a plain retry suffices.
            let _ = word.compare_exchange(holder, 0, Ordering::Release, Ordering::Relaxed);
        }
    }
}

/// Nonzero token identifying this thread across processes:
/// `(pid << 32) | thread_sequence`.
fn thread_token() -> u64 {
    static NEXT_THREAD: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static TOKEN: u64 = {
            let sequence = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
            ((std::process::id() as u64) << 32) | sequence as u64
        };
    }
    TOKEN.with(|token| *token)
}
