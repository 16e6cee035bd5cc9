//! Byte ranges of secret material.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Byte which replaces redacted bytes.
pub const REDACTION_FILLER: u8 = b'*';

/// A byte range `[from, to)` inside plaintext holding secret material which
/// must never leave the client unredacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "UncheckedSlice")]
pub struct RedactedSlice {
    #[serde(rename = "fromIndex")]
    from: usize,
    #[serde(rename = "toIndex")]
    to: usize,
}

#[derive(Deserialize)]
struct UncheckedSlice {
    #[serde(rename = "fromIndex")]
    from: usize,
    #[serde(rename = "toIndex")]
    to: usize,
}

impl TryFrom<UncheckedSlice> for RedactedSlice {
    type Error = SliceError;

    fn try_from(slice: UncheckedSlice) -> Result<Self, Self::Error> {
        Self::new(slice.from, slice.to)
    }
}

impl RedactedSlice {
    /// Creates a new slice.
    ///
    /// # Arguments
    ///
    /// * `from` - Start of the range, inclusive.
    /// * `to` - End of the range, exclusive.
    pub fn new(from: usize, to: usize) -> Result<Self, SliceError> {
        if from > to {
            return Err(SliceError::new(format!(
                "slice start {from} is greater than its end {to}"
            )));
        }

        Ok(Self { from, to })
    }

    /// Returns a slice covering the first occurrence of `needle` in
    /// `haystack`.
    pub fn covering(haystack: &[u8], needle: &[u8]) -> Option<Self> {
        if needle.is_empty() || needle.len() > haystack.len() {
            return None;
        }

        haystack
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|from| Self {
                from,
                to: from + needle.len(),
            })
    }

    /// Returns the start of the slice.
    pub fn from(&self) -> usize {
        self.from
    }

    /// Returns the end of the slice.
    pub fn to(&self) -> usize {
        self.to
    }

    /// Returns the length of the slice.
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    /// Returns `true` if the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Returns the slice as a range.
    pub fn range(&self) -> Range<usize> {
        self.from..self.to
    }
}

impl TryFrom<Range<usize>> for RedactedSlice {
    type Error = SliceError;

    fn try_from(range: Range<usize>) -> Result<Self, Self::Error> {
        Self::new(range.start, range.end)
    }
}

/// Normalizes a set of slices.
///
/// The result is sorted, contains no empty slices, and no two slices overlap
/// or touch. Normalizing an already normalized set returns it unchanged.
pub fn normalize(slices: &[RedactedSlice]) -> Vec<RedactedSlice> {
    let mut sorted: Vec<_> = slices.iter().filter(|s| !s.is_empty()).copied().collect();
    sorted.sort();

    let mut normalized: Vec<RedactedSlice> = Vec::with_capacity(sorted.len());
    for slice in sorted {
        match normalized.last_mut() {
            Some(last) if slice.from <= last.to => last.to = last.to.max(slice.to),
            _ => normalized.push(slice),
        }
    }

    normalized
}

/// Returns `true` if the slices are already normalized.
pub fn is_normalized(slices: &[RedactedSlice]) -> bool {
    slices.iter().all(|s| !s.is_empty()) && slices.windows(2).all(|w| w[0].to < w[1].from)
}

/// Returns a copy of `data` with every slice replaced by [`REDACTION_FILLER`].
pub fn redact(data: &[u8], slices: &[RedactedSlice]) -> Result<Vec<u8>, SliceError> {
    check_bounds(data.len(), slices)?;

    let mut redacted = data.to_vec();
    for slice in slices {
        redacted[slice.range()].fill(REDACTION_FILLER);
    }

    Ok(redacted)
}

/// Returns a copy of `data` where every byte outside `reveal` is replaced by
/// [`REDACTION_FILLER`].
pub fn reveal_only(data: &[u8], reveal: &[Range<usize>]) -> Result<Vec<u8>, SliceError> {
    let mut redacted = vec![REDACTION_FILLER; data.len()];
    for range in reveal {
        if range.start > range.end || range.end > data.len() {
            return Err(SliceError::new(format!(
                "reveal range {range:?} is out of bounds for {} bytes",
                data.len()
            )));
        }
        redacted[range.clone()].copy_from_slice(&data[range.clone()]);
    }

    Ok(redacted)
}

/// A contiguous part of a buffer split at secret slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span<'a> {
    /// Bytes which may be disclosed.
    Disclosed(&'a [u8]),
    /// Bytes covered by a secret slice.
    Secret(&'a [u8]),
}

/// Splits `data` into alternating disclosed and secret spans.
///
/// The slices are normalized first. Empty spans are omitted.
pub fn split<'a>(data: &'a [u8], slices: &[RedactedSlice]) -> Result<Vec<Span<'a>>, SliceError> {
    let slices = normalize(slices);
    check_bounds(data.len(), &slices)?;

    let mut spans = Vec::with_capacity(slices.len() * 2 + 1);
    let mut pos = 0;
    for slice in &slices {
        if slice.from > pos {
            spans.push(Span::Disclosed(&data[pos..slice.from]));
        }
        spans.push(Span::Secret(&data[slice.range()]));
        pos = slice.to;
    }

    if pos < data.len() {
        spans.push(Span::Disclosed(&data[pos..]));
    }

    Ok(spans)
}

fn check_bounds(len: usize, slices: &[RedactedSlice]) -> Result<(), SliceError> {
    if let Some(slice) = slices
        .iter()
        .find(|slice| slice.from > slice.to || slice.to > len)
    {
        return Err(SliceError::new(format!(
            "slice {:?} is out of bounds for {len} bytes",
            slice.range()
        )));
    }

    Ok(())
}

/// Error for [`RedactedSlice`] operations.
#[derive(Debug, thiserror::Error)]
#[error("invalid redacted slice: {0}")]
pub struct SliceError(String);

impl SliceError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
