//! Reassembly of newline-terminated lines from raw pty reads.

/// Upper bound for a partial line kept between reads. A tool that never
/// emits a newline would otherwise grow the buffer without limit.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Splits a byte stream into complete lines.
///
/// Bytes after the last `\n` are kept until the next [`feed`](Self::feed).
/// A trailing `\r` is dropped from every line, since the pty line
/// discipline turns `\n` into `\r\n`. Invalid UTF-8 is replaced rather
/// than rejected.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);

        if self.pending.len() > MAX_PENDING_BYTES {
            lines.push(self.take_line());
        }

        lines
    }

    /// Bytes of the current incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Discards any incomplete line.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn take_line(&mut self) -> String {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
