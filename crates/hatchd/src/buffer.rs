//! Growable byte buffer used to collect helper output.
//!
//! The logical content is always followed by a NUL byte in the backing
//! storage so it can be handed to code that expects C-style strings.

/// Byte buffer with cheap front consumption.
///
/// Consumed bytes are tracked by an offset rather than shifted out, so
/// repeated `consume` calls stay linear in the amount of data read.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    storage: Vec<u8>,
    start: usize,
    len: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: vec![0],
            start: 0,
            len: 0,
        }
    }

    /// Appends `bytes` after the current content.
    pub fn append(&mut self, bytes: &[u8]) {
        self.storage.truncate(self.start + self.len);
        self.storage.extend_from_slice(bytes);
        self.len += bytes.len();
        self.storage.push(0);
    }

    /// Inserts `bytes` before the current content.
    pub fn prepend(&mut self, bytes: &[u8]) {
        if bytes.len() <= self.start {
            let start = self.start - bytes.len();
            if let Some(head) = self.storage.get_mut(start..self.start) {
                head.copy_from_slice(bytes);
                self.start = start;
                self.len += bytes.len();
                return;
            }
        }
        let mut storage = Vec::with_capacity(bytes.len() + self.len + 1);
        storage.extend_from_slice(bytes);
        storage.extend_from_slice(self.data());
        storage.push(0);
        self.len += bytes.len();
        self.start = 0;
        self.storage = storage;
    }

    /// Drops up to `count` bytes from the front. Consuming the whole content
    /// (or more) empties the buffer.
    pub fn consume(&mut self, count: usize) {
        if count >= self.len {
            self.clear();
            return;
        }
        self.start += count;
        self.len -= count;
    }

    /// Empties the buffer.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.storage.push(0);
        self.start = 0;
        self.len = 0;
    }

    /// Number of content bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical content, without the trailing NUL.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.storage
            .get(self.start..self.start + self.len)
            .unwrap_or_default()
    }

    /// Whether the byte immediately past the content is NUL.
    #[must_use]
    pub fn is_nul_terminated(&self) -> bool {
        self.storage.get(self.start + self.len) == Some(&0)
    }

    /// Content as text, cut at the first embedded NUL.
    #[must_use]
    pub fn to_text(&self) -> String {
        let text = self.data().split(|byte| *byte == 0).next().unwrap_or_default();
        String::from_utf8_lossy(text).into_owned()
    }
}
