//! Byte-offset span primitives shared by every crate in the workspace.
//!
//! Mirrors the role `ruff_text_size` plays for ruff: a tiny, dependency-free
//! crate so that "where in the file is this" has one agreed-upon
//! representation, instead of each crate rolling its own `(usize, usize)`.

use std::fmt;
use std::ops::{Add, Sub};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TextSize(u32);

impl TextSize {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TextSize {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl TryFrom<usize> for TextSize {
    type Error = std::num::TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(Self(u32::try_from(value)?))
    }
}

impl Add for TextSize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TextSize {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for TextSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A half-open `[start, end)` byte range into a single source file's bytes.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    start: TextSize,
    end: TextSize,
}

impl TextRange {
    /// # Panics
    /// Panics if `start > end`; every constructor in this crate is expected
    /// to hand out ranges that already satisfy this, so this is an invariant
    /// check rather than input validation.
    #[must_use]
    pub fn new(start: TextSize, end: TextSize) -> Self {
        assert!(start <= end, "range start {start} must not exceed end {end}");
        Self { start, end }
    }

    #[must_use]
    pub fn at(offset: TextSize, len: TextSize) -> Self {
        Self::new(offset, offset + len)
    }

    #[must_use]
    pub const fn start(self) -> TextSize {
        self.start
    }

    #[must_use]
    pub const fn end(self) -> TextSize {
        self.end
    }

    #[must_use]
    pub fn len(self) -> TextSize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub fn contains(self, offset: TextSize) -> bool {
        self.start <= offset && offset < self.end
    }

    #[must_use]
    pub fn contains_range(self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[must_use]
    pub fn slice(self, text: &str) -> &str {
        &text[self.start.to_usize()..self.end.to_usize()]
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Anything with a known position in the source; every CST/usage/edit type in
/// the workspace implements this so range-based logic (overlap checks,
/// non-interference validation) is written once.
pub trait Ranged {
    fn range(&self) -> TextRange;
}

impl Ranged for TextRange {
    fn range(&self) -> TextRange {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_contains_is_half_open() {
        let range = TextRange::new(TextSize::new(2), TextSize::new(5));
        assert!(!range.contains(TextSize::new(1)));
        assert!(range.contains(TextSize::new(2)));
        assert!(range.contains(TextSize::new(4)));
        assert!(!range.contains(TextSize::new(5)));
    }

    #[test]
    fn disjoint_ranges_do_not_intersect() {
        let a = TextRange::new(TextSize::new(0), TextSize::new(3));
        let b = TextRange::new(TextSize::new(3), TextSize::new(6));
        assert!(!a.intersects(b));
        assert!(a.contains_range(TextRange::new(TextSize::new(1), TextSize::new(2))));
    }

    #[test]
    fn slice_extracts_substring() {
        let text = "hello world";
        let range = TextRange::new(TextSize::new(6), TextSize::new(11));
        assert_eq!(range.slice(text), "world");
    }
}
