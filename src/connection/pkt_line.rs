use crate::errors::{GitError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// The flush packet, terminating a pkt-line section.
pub const FLUSH: &[u8] = b"0000";
/// Bytes taken by the hex length prefix.
pub const PREFIX_LEN: usize = 4;
/// Largest payload a single pkt-line may carry (side-band-64k framing).
pub const MAX_PAYLOAD: usize = 65516;

/// One parsed frame.
#[derive(Debug, PartialEq, Eq)]
pub enum PktLine<'a> {
    Data(&'a [u8]),
    Flush,
}

/// Reads pkt-line frames out of a byte buffer.
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PktLineReader { data, pos: 0 }
    }

    /// Returns the next frame, or `None` at the end of the buffer.
    pub fn next_line(&mut self) -> Result<Option<PktLine<'a>>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.pos + PREFIX_LEN > self.data.len() {
            return Err(GitError::protocol("truncated pkt-line length prefix"));
        }

        let prefix = &self.data[self.pos..self.pos + PREFIX_LEN];
        let prefix = std::str::from_utf8(prefix)
            .map_err(|_| GitError::protocol("pkt-line length prefix is not hex"))?;
        let length = usize::from_str_radix(prefix, 16)
            .map_err(|_| GitError::protocol(format!("pkt-line length prefix is not hex: {prefix:?}")))?;

        if length == 0 {
            self.pos += PREFIX_LEN;
            return Ok(Some(PktLine::Flush));
        }
        if length < PREFIX_LEN {
            return Err(GitError::protocol(format!("pkt-line length {length} is reserved")));
        }
        if self.pos + length > self.data.len() {
            return Err(GitError::protocol(format!(
                "pkt-line declares {length} bytes but only {} remain",
                self.data.len() - self.pos
            )));
        }

        let payload = &self.data[self.pos + PREFIX_LEN..self.pos + length];
        self.pos += length;
        Ok(Some(PktLine::Data(payload)))
    }

    /// Everything not yet consumed, without touching the position.
    ///
    /// Used to switch to raw capture when a reply carries an unframed
    /// packfile.
    pub fn remainder(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Accumulates pkt-line frames for a request body.
#[derive(Default)]
pub struct PktLineWriter {
    buf: BytesMut,
}

impl PktLineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one data frame with its length prefix.
    pub fn write(&mut self, payload: &[u8]) {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        let prefix = format!("{:04X}", payload.len() + PREFIX_LEN);
        self.buf.put_slice(prefix.as_bytes());
        self.buf.put_slice(payload);
    }

    /// Appends a textual frame, e.g. `want <id>\n`.
    pub fn write_text(&mut self, line: &str) {
        self.write(line.as_bytes());
    }

    /// Appends a flush packet.
    pub fn flush(&mut self) {
        self.buf.put_slice(FLUSH);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
