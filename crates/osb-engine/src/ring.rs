//! Fixed-capacity ring buffer for captured command output.
//!
//! A single writer appends bytes; any number of followers read independently.
//! The buffer tracks a monotonic bytes-ever-written counter while physical
//! storage wraps, so a follower that falls behind by more than the capacity
//! loses the oldest bytes and resumes at `written - capacity`. Readers block
//! (asynchronously) until new data arrives or the buffer is closed; after
//! close every waiting reader observes EOF once the remaining bytes drain.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default capture capacity per stream.
pub const DEFAULT_RING_CAPACITY: usize = 1024 * 1024;

struct RingState {
    buf: Vec<u8>,
    written: u64,
    closed: bool,
}

struct RingShared {
    capacity: usize,
    state: Mutex<RingState>,
    wakeup: Notify,
}

/// Writer handle; cheap to clone, shared with all followers.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingShared>,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            inner: Arc::new(RingShared {
                capacity,
                state: Mutex::new(RingState {
                    buf: vec![0; capacity],
                    written: 0,
                    closed: false,
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Appends bytes, overwriting the oldest data on wrap. The monotonic
    /// counter advances by the full input length even when the input exceeds
    /// the capacity and only its tail is retained.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            let cap = self.inner.capacity;
            let keep = if data.len() > cap {
                &data[data.len() - cap..]
            } else {
                data
            };
            let skipped = (data.len() - keep.len()) as u64;
            let offset = ((state.written + skipped) % cap as u64) as usize;
            let first = keep.len().min(cap - offset);
            let buf = &mut state.buf;
            buf[offset..offset + first].copy_from_slice(&keep[..first]);
            if first < keep.len() {
                buf[..keep.len() - first].copy_from_slice(&keep[first..]);
            }
            state.written += data.len() as u64;
        }
        self.inner.wakeup.notify_waiters();
    }

    /// Marks the buffer terminal and wakes every waiting follower. Followers
    /// drain the remaining window and then observe EOF.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.wakeup.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Total bytes ever written (monotonic, not capped by capacity).
    pub fn written(&self) -> u64 {
        self.inner.state.lock().written
    }

    /// Linearised copy of the current window (the last `min(written,
    /// capacity)` bytes). Used for snapshot log reads; never blocks.
    pub fn contents(&self) -> Vec<u8> {
        let state = self.inner.state.lock();
        let cap = self.inner.capacity;
        let len = state.written.min(cap as u64) as usize;
        let start = ((state.written - len as u64) % cap as u64) as usize;
        let mut out = Vec::with_capacity(len);
        let first = len.min(cap - start);
        out.extend_from_slice(&state.buf[start..start + first]);
        out.extend_from_slice(&state.buf[..len - first]);
        out
    }

    /// New follower positioned at offset zero.
    pub fn reader(&self) -> RingReader {
        RingReader {
            inner: self.inner.clone(),
            pos: 0,
        }
    }
}

/// Independent follower over a [`RingBuffer`].
pub struct RingReader {
    inner: Arc<RingShared>,
    pos: u64,
}

impl RingReader {
    /// Reads available bytes into `buf`, blocking until data arrives or the
    /// buffer closes. Returns 0 on EOF. A follower that lags past the window
    /// is snapped forward to `written - capacity` first.
    pub async fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        loop {
            // The notified future must exist before the state check so a
            // write landing between unlock and await still wakes us.
            let notified = self.inner.wakeup.notified();
            {
                let state = self.inner.state.lock();
                let cap = self.inner.capacity as u64;
                if state.written.saturating_sub(self.pos) > cap {
                    self.pos = state.written - cap;
                }
                let available = (state.written - self.pos) as usize;
                if available > 0 {
                    let n = available.min(buf.len());
                    let capacity = self.inner.capacity;
                    let start = (self.pos % cap) as usize;
                    let first = n.min(capacity - start);
                    buf[..first].copy_from_slice(&state.buf[start..start + first]);
                    if first < n {
                        buf[first..n].copy_from_slice(&state.buf[..n - first]);
                    }
                    self.pos += n as u64;
                    return n;
                }
                if state.closed {
                    return 0;
                }
            }
            notified.await;
        }
    }

    /// Convenience wrapper returning an owned chunk, `None` on EOF.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 8 * 1024];
        let n = self.read(&mut buf).await;
        if n == 0 {
            return None;
        }
        buf.truncate(n);
        Some(buf)
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_returns_written_bytes_in_order() {
        let ring = RingBuffer::with_capacity(64);
        let mut reader = ring.reader();
        ring.write(b"hello ");
        ring.write(b"world");
        ring.close();

        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).await;
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(reader.read(&mut buf).await, 0);
    }

    #[tokio::test]
    async fn oversized_write_keeps_last_capacity_bytes() {
        let ring = RingBuffer::with_capacity(8);
        let mut reader = ring.reader();
        ring.write(b"0123456789abcdef");
        ring.close();

        assert_eq!(ring.written(), 16);
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await;
        assert_eq!(&buf[..n], b"89abcdef");
    }

    #[tokio::test]
    async fn lagging_reader_snaps_to_window_start() {
        let ring = RingBuffer::with_capacity(8);
        let mut reader = ring.reader();
        ring.write(b"aaaa");
        ring.write(b"bbbb");
        ring.write(b"cccc");
        ring.close();

        // written = 12, capacity = 8: reader resumes at offset 4.
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await;
        assert_eq!(&buf[..n], b"bbbbcccc");
        assert_eq!(reader.position(), 12);
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_write() {
        let ring = RingBuffer::with_capacity(32);
        let mut reader = ring.reader();

        let writer = ring.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write(b"late");
            writer.close();
        });

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await;
        assert_eq!(&buf[..n], b"late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn every_waiting_reader_observes_close() {
        let ring = RingBuffer::with_capacity(16);
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let mut reader = ring.reader();
            tasks.push(tokio::spawn(async move {
                let mut buf = [0u8; 16];
                reader.read(&mut buf).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        ring.close();
        for task in tasks {
            assert_eq!(task.await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn followers_are_independent() {
        let ring = RingBuffer::with_capacity(32);
        let mut a = ring.reader();
        let mut b = ring.reader();
        ring.write(b"shared");
        ring.close();

        let mut buf = [0u8; 32];
        let n = a.read(&mut buf).await;
        assert_eq!(&buf[..n], b"shared");
        let n = b.read(&mut buf).await;
        assert_eq!(&buf[..n], b"shared");
    }

    #[test]
    fn contents_returns_current_window() {
        let ring = RingBuffer::with_capacity(8);
        ring.write(b"0123456789");
        assert_eq!(ring.contents(), b"23456789");

        let small = RingBuffer::with_capacity(8);
        small.write(b"abc");
        assert_eq!(small.contents(), b"abc");
    }
}
