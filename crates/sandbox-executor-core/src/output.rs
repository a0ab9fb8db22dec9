//! Thread-safe output capture buffer used while draining a container exec's
//! stdout/stderr streams.
//!
//! [`OutputBuffer`] accumulates demuxed bytes as they arrive from the
//! engine, enforcing a combined byte limit. The buffer is shared between
//! the task draining the exec stream and the task awaiting the overall
//! deadline via `Arc<Mutex<_>>` interior mutability — no `unsafe` required.
//!
//! # Timeout path
//!
//! When a deadline fires, the draining task is abandoned rather than
//! cancelled mid-write (killing it while it holds the lock would either
//! deadlock or lose the last partial write). [`into_strings`](OutputBuffer::into_strings)
//! handles this: it tries `Arc::try_unwrap` first (fast path, no other
//! clone left) and falls back to locking and cloning when the drain task
//! is still alive.

use std::sync::{Arc, Mutex};

use crate::error::SandboxError;

struct OutputBufferInner {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    max_bytes: usize,
    limit_exceeded: bool,
}

impl OutputBufferInner {
    fn new(max_bytes: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            max_bytes,
            limit_exceeded: false,
        }
    }

    fn total_len(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }
}

/// A thread-safe buffer that captures a container exec's stdout and
/// stderr output.
///
/// Cheap to clone — all clones share the same underlying data via
/// `Arc<Mutex<OutputBufferInner>>`.
#[derive(Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<OutputBufferInner>>,
}

impl OutputBuffer {
    /// Creates a new `OutputBuffer` that will accept up to `max_bytes`
    /// combined across stdout and stderr.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutputBufferInner::new(max_bytes))),
        }
    }

    pub fn write_stdout(&self, data: &[u8]) -> Result<(), SandboxError> {
        let mut inner = self.inner.lock().expect("OutputBuffer mutex poisoned");
        if inner.total_len() + data.len() > inner.max_bytes {
            inner.limit_exceeded = true;
            return Err(SandboxError::ResourceLimit {
                resource: "output_bytes".to_string(),
                limit: inner.max_bytes as f64,
                actual: (inner.total_len() + data.len()) as f64,
            });
        }
        inner.stdout.extend_from_slice(data);
        Ok(())
    }

    pub fn write_stderr(&self, data: &[u8]) -> Result<(), SandboxError> {
        let mut inner = self.inner.lock().expect("OutputBuffer mutex poisoned");
        if inner.total_len() + data.len() > inner.max_bytes {
            inner.limit_exceeded = true;
            return Err(SandboxError::ResourceLimit {
                resource: "output_bytes".to_string(),
                limit: inner.max_bytes as f64,
                actual: (inner.total_len() + data.len()) as f64,
            });
        }
        inner.stderr.extend_from_slice(data);
        Ok(())
    }

    pub fn is_limit_exceeded(&self) -> bool {
        let inner = self.inner.lock().expect("OutputBuffer mutex poisoned");
        inner.limit_exceeded
    }

    /// Consumes this handle and returns `(stdout, stderr)` as UTF-8
    /// strings, replacing invalid sequences with `\u{FFFD}`.
    pub fn into_strings(self) -> (String, String) {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => {
                let inner = mutex.into_inner().expect("OutputBuffer mutex poisoned");
                (
                    String::from_utf8_lossy(&inner.stdout).into_owned(),
                    String::from_utf8_lossy(&inner.stderr).into_owned(),
                )
            }
            Err(arc) => {
                let inner = arc.lock().expect("OutputBuffer mutex poisoned");
                (
                    String::from_utf8_lossy(&inner.stdout).into_owned(),
                    String::from_utf8_lossy(&inner.stderr).into_owned(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_stdout_under_limit() {
        let buf = OutputBuffer::new(64);
        assert!(buf.write_stdout(b"hello").is_ok());
        let (stdout, stderr) = buf.into_strings();
        assert_eq!(stdout, "hello");
        assert_eq!(stderr, "");
    }

    #[test]
    fn test_write_stderr_under_limit() {
        let buf = OutputBuffer::new(64);
        assert!(buf.write_stderr(b"error output").is_ok());
        let (stdout, stderr) = buf.into_strings();
        assert_eq!(stdout, "");
        assert_eq!(stderr, "error output");
    }

    #[test]
    fn test_write_stdout_exactly_at_limit() {
        let buf = OutputBuffer::new(5);
        assert!(buf.write_stdout(b"hello").is_ok());
        let (stdout, _) = buf.into_strings();
        assert_eq!(stdout, "hello");
    }

    #[test]
    fn test_write_stdout_exceeds_limit() {
        let buf = OutputBuffer::new(5);
        assert!(buf.write_stdout(b"hello").is_ok());
        let result = buf.write_stdout(b"!");
        match result {
            Err(SandboxError::ResourceLimit { limit, .. }) => assert_eq!(limit, 5.0),
            other => panic!("expected ResourceLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_is_limit_exceeded_after_overflow() {
        let buf = OutputBuffer::new(3);
        let _ = buf.write_stdout(b"toolong");
        assert!(buf.is_limit_exceeded());
    }

    #[test]
    fn test_clone_shares_state() {
        let buf = OutputBuffer::new(64);
        let clone = buf.clone();
        clone.write_stdout(b"from clone").expect("write via clone failed");
        assert!(!buf.is_limit_exceeded());
        let (stdout, _) = buf.into_strings();
        assert_eq!(stdout, "from clone");
    }

    #[test]
    fn test_into_strings_with_live_clone() {
        let buf = OutputBuffer::new(64);
        buf.write_stdout(b"data").expect("write failed");
        let _live_clone = buf.clone();
        let (stdout, stderr) = buf.into_strings();
        assert_eq!(stdout, "data");
        assert_eq!(stderr, "");
    }

    #[test]
    fn test_invalid_utf8_replaced_not_panic() {
        let buf = OutputBuffer::new(64);
        buf.write_stdout(&[0xFF]).expect("write failed");
        buf.write_stderr(&[0xFE, 0x80]).expect("write failed");
        let (stdout, stderr) = buf.into_strings();
        assert!(stdout.contains('\u{FFFD}'));
        assert!(stderr.contains('\u{FFFD}'));
    }

    #[test]
    fn test_combined_limit_across_streams() {
        let buf = OutputBuffer::new(10);
        assert!(buf.write_stdout(b"123456").is_ok());
        let result = buf.write_stderr(b"abcde");
        match result {
            Err(SandboxError::ResourceLimit { limit, .. }) => assert_eq!(limit, 10.0),
            other => panic!("expected ResourceLimit, got {:?}", other),
        }
        assert!(buf.is_limit_exceeded());
    }
}
