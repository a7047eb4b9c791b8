use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap for a ring buffer whose caller passes zero or a negative value.
pub const DEFAULT_CAP_BYTES: usize = 2 * 1024 * 1024;

/// One chunk of captured process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct Inner {
    chunks: Vec<OutputChunk>,
    total_bytes: usize,
    cap: usize,
}

/// Bounded FIFO of output chunks. Appending beyond `cap` total bytes evicts
/// the oldest whole chunks until the total fits again.
///
/// Thread-safe: internally guarded by a single mutex, matching the rest of
/// this crate's per-resource locking style rather than requiring callers to
/// coordinate access themselves.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl RingBuffer {
    pub fn new(cap_bytes: usize) -> Self {
        let cap = if cap_bytes == 0 { DEFAULT_CAP_BYTES } else { cap_bytes };
        Self {
            inner: Mutex::new(Inner {
                chunks: Vec::new(),
                total_bytes: 0,
                cap,
            }),
        }
    }

    /// Appends a chunk, stamping it with the current time, and evicts oldest
    /// chunks until the buffer is back within its byte cap.
    pub fn append(&self, stream: OutputStream, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_bytes += data.len();
        inner.chunks.push(OutputChunk {
            stream,
            data,
            timestamp_ms: now_ms(),
        });

        while inner.total_bytes > inner.cap && !inner.chunks.is_empty() {
            let evicted = inner.chunks.remove(0);
            inner.total_bytes -= evicted.data.len();
        }
    }

    /// Returns a defensive copy of the buffer's current contents.
    pub fn snapshot(&self) -> Vec<OutputChunk> {
        self.inner.lock().unwrap().chunks.clone()
    }

    /// Returns the concatenated tail of the buffer up to `max_bytes`, used for
    /// logging a failure summary without dumping the full history.
    pub fn tail(&self, max_bytes: usize) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for chunk in inner.chunks.iter().rev() {
            out.splice(0..0, chunk.data.iter().copied());
            if out.len() >= max_bytes {
                break;
            }
        }
        if out.len() > max_bytes {
            let start = out.len() - max_bytes;
            out.drain(0..start);
        }
        out
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_cap() {
        let rb = RingBuffer::new(10);
        for _ in 0..5 {
            rb.append(OutputStream::Stdout, vec![0u8; 4]);
        }
        assert!(rb.total_bytes() <= 10);
    }

    #[test]
    fn evicts_oldest_whole_chunks() {
        let rb = RingBuffer::new(6);
        rb.append(OutputStream::Stdout, b"aaa".to_vec());
        rb.append(OutputStream::Stdout, b"bbb".to_vec());
        rb.append(OutputStream::Stdout, b"ccc".to_vec());
        let snap = rb.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].data, b"bbb");
        assert_eq!(snap[1].data, b"ccc");
    }

    #[test]
    fn zero_cap_uses_default() {
        let rb = RingBuffer::new(0);
        rb.append(OutputStream::Stdout, b"x".to_vec());
        assert_eq!(rb.total_bytes(), 1);
    }
}
