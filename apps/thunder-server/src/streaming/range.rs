//! HTTP byte ranges and chunk arithmetic
//!
//! Upstream reads are aligned to a fixed chunk size. A requested byte range
//! `[from, until]` is widened to whole chunks and the surplus is trimmed
//! from the first and last chunk while streaming:
//!
//! ```text
//! offset        from                              until
//!   |-- first_cut --|==============================|
//!   |<-------- chunk 1 -------->|<-- ... -->|<- last_cut ->|
//! ```

use thiserror::Error;

/// Upstream read size
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced while interpreting a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Malformed range header")]
    Malformed,

    #[error("Range not satisfiable for object of {size} bytes")]
    Unsatisfiable { size: u64 },
}

/// Inclusive byte interval within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub until: u64,
}

impl ByteRange {
    /// The whole object, or `None` for an empty one
    pub fn full(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|until| Self { from: 0, until })
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.until - self.from + 1
    }

    /// Parse a `bytes=start-end` header against an object of `size` bytes
    ///
    /// A missing end selects through the last byte; a missing start
    /// (`bytes=-N`) selects the last `N` bytes. Ranges that are inverted or
    /// reach past the end of the object are unsatisfiable.
    pub fn parse(header: &str, size: u64) -> Result<Self, RangeError> {
        let spec = header.strip_prefix("bytes=").ok_or(RangeError::Malformed)?;
        let (start, end) = spec.split_once('-').ok_or(RangeError::Malformed)?;

        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if (!start.is_empty() && !is_number(start)) || (!end.is_empty() && !is_number(end)) {
            return Err(RangeError::Malformed);
        }
        // Digits too large for u64 are syntactically fine but can never fit
        let number = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Unsatisfiable { size });

        let (from, until) = match (start.is_empty(), end.is_empty()) {
            (true, true) => return Err(RangeError::Malformed),
            (true, false) => {
                let suffix = number(end)?;
                if suffix == 0 || size == 0 {
                    return Err(RangeError::Unsatisfiable { size });
                }
                (size.saturating_sub(suffix), size - 1)
            }
            (false, true) => {
                let from = number(start)?;
                (from, size.saturating_sub(1))
            }
            (false, false) => (number(start)?, number(end)?),
        };

        if from >= size || until >= size || from > until {
            return Err(RangeError::Unsatisfiable { size });
        }
        Ok(Self { from, until })
    }
}

/// Chunk-aligned read plan for one byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    pub from: u64,
    pub until: u64,
    pub chunk_size: u64,
    /// Chunk-aligned offset of the first read
    pub offset: u64,
    /// Leading bytes dropped from the first chunk
    pub first_cut: u64,
    /// Bytes kept from the last chunk
    pub last_cut: u64,
    pub part_count: u64,
}

impl StreamRange {
    pub fn new(range: ByteRange, chunk_size: u64) -> Self {
        let ByteRange { from, until } = range;
        let offset = from - (from % chunk_size);
        Self {
            from,
            until,
            chunk_size,
            offset,
            first_cut: from - offset,
            last_cut: (until % chunk_size) + 1,
            part_count: ((until - offset) / chunk_size) + 1,
        }
    }

    pub fn content_length(&self) -> u64 {
        self.until - self.from + 1
    }
}
