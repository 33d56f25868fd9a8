use std::io::{ErrorKind, Read, Write};

use tracing::debug;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Outcome of [`copy_detachable`] other than reaching end of input.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// The detach-key sequence was matched. `written` bytes preceding it
    /// were delivered.
    #[error("detach keys matched after {written} bytes")]
    Detached { written: u64 },

    #[error("read: {0}")]
    Read(#[source] std::io::Error),

    #[error("write: {0}")]
    Write(#[source] std::io::Error),
}

/// Incremental matcher for a detach-key sequence.
///
/// Bytes that could still be the start of the sequence are held back; once
/// a byte rules them out they are released in order. Matching carries over
/// between calls to [`DetachMatcher::feed`], so a sequence split across
/// reads is still found.
#[derive(Debug, Clone)]
pub struct DetachMatcher {
    keys: Vec<u8>,
    // fallback[i]: length of the longest proper prefix of keys[..=i] that is also its suffix.
    fallback: Vec<usize>,
    matched: usize,
}

impl DetachMatcher {
    pub fn new(keys: &[u8]) -> Self {
        let mut fallback = vec![0; keys.len()];
        let mut k = 0;
        for i in 1..keys.len() {
            while k > 0 && keys[i] != keys[k] {
                k = fallback[k - 1];
            }
            if keys[i] == keys[k] {
                k += 1;
            }
            fallback[i] = k;
        }
        Self {
            keys: keys.to_vec(),
            fallback,
            matched: 0,
        }
    }

    /// Whether detach detection is active (non-empty sequence).
    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Bytes currently held back as a partial match.
    pub fn pending(&self) -> &[u8] {
        &self.keys[..self.matched]
    }

    /// Scan `chunk`, appending bytes that are safe to forward to `out`.
    ///
    /// Returns `true` when the full sequence has been matched; bytes of
    /// `chunk` after the match are discarded.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> bool {
        if !self.is_enabled() {
            out.extend_from_slice(chunk);
            return false;
        }

        for &byte in chunk {
            let mut k = self.matched;
            while k > 0 && self.keys[k] != byte {
                k = self.fallback[k - 1];
            }
            // The held-back prefix shrank from `matched` to `k` bytes; its head is plain input.
            out.extend_from_slice(&self.keys[..self.matched - k]);

            if self.keys[k] == byte {
                k += 1;
            } else {
                out.push(byte);
            }
            self.matched = k;

            if self.matched == self.keys.len() {
                self.matched = 0;
                return true;
            }
        }
        false
    }

    /// Release the held-back partial match, e.g. at end of input.
    pub fn take_pending(&mut self) -> Vec<u8> {
        let pending = self.pending().to_vec();
        self.matched = 0;
        pending
    }
}

/// Copy `src` to `dst` until end of input, an I/O error, or a detach-key match.
///
/// Returns the number of bytes written on end of input, or
/// [`CopyError::Detached`] when `keys` was typed. The keys themselves are
/// never written. An empty `keys` disables detection.
pub fn copy_detachable<W, R>(dst: &mut W, src: &mut R, keys: &[u8]) -> Result<u64, CopyError>
where
    W: Write + ?Sized,
    R: Read + ?Sized,
{
    let mut matcher = DetachMatcher::new(keys);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut out = Vec::with_capacity(COPY_BUF_SIZE);
    let mut written = 0u64;

    loop {
        let read = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };

        out.clear();
        let detached = matcher.feed(&buf[..read], &mut out);
        if !out.is_empty() {
            dst.write_all(&out).map_err(CopyError::Write)?;
            written += out.len() as u64;
        }
        if detached {
            debug!(written, "detach keys matched");
            return Err(CopyError::Detached { written });
        }
    }

    let pending = matcher.take_pending();
    if !pending.is_empty() {
        dst.write_all(&pending).map_err(CopyError::Write)?;
        written += pending.len() as u64;
    }
    Ok(written)
}
