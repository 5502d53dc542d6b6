//! Chapter identifiers on the chapter axis.

use std::cmp::Ordering;
use std::fmt;

/// A chapter number: whole (`12`) or a fractional sub-chapter (`12.3`).
///
/// Renders as a 4-digit zero-padded integer, with the decimal suffix appended
/// for sub-chapters: `0012`, `0012.3`. This is both the address fragment
/// used by mirror hosts and the chapter directory suffix.
///
/// Ordering is by integer part, then decimal suffix, so `12 < 12.1 < 12.2 < 13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChapterKey {
    /// Integer chapter.
    Whole(u32),
    /// Fractional sub-chapter `(integer, decimal)`, decimal ≥ 1.
    Fractional(u32, u32),
}

impl ChapterKey {
    /// Returns the integer part.
    #[must_use]
    pub fn integer(self) -> u32 {
        match self {
            Self::Whole(n) | Self::Fractional(n, _) => n,
        }
    }

    /// Returns the decimal suffix, `0` for whole chapters.
    #[must_use]
    pub fn decimal(self) -> u32 {
        match self {
            Self::Whole(_) => 0,
            Self::Fractional(_, d) => d,
        }
    }

    /// Returns the directory name pages of this chapter are stored under.
    #[must_use]
    pub fn dir_name(self) -> String {
        format!("chapter_{self}")
    }

    /// Parses a chapter number as catalogs and page file names write it.
    ///
    /// Accepts `"12"`, `"0012"`, `"12.5"` and `"12.0"` (a whole chapter).
    /// Returns `None` for anything else, including decimals with a leading
    /// zero such as `"12.05"`, which have no faithful rendering.
    ///
    /// # Examples
    ///
    /// ```
    /// use manga_core::ChapterKey;
    ///
    /// assert_eq!(ChapterKey::parse("12"), Some(ChapterKey::Whole(12)));
    /// assert_eq!(ChapterKey::parse("12.5"), Some(ChapterKey::Fractional(12, 5)));
    /// assert_eq!(ChapterKey::parse("extra"), None);
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (integer, decimal) = match raw.split_once('.') {
            Some((integer, decimal)) => (integer, Some(decimal)),
            None => (raw, None),
        };

        if integer.is_empty() || !integer.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let integer: u32 = integer.parse().ok()?;

        let Some(decimal) = decimal else {
            return Some(Self::Whole(integer));
        };
        if decimal.is_empty() || !decimal.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if decimal.bytes().all(|b| b == b'0') {
            return Some(Self::Whole(integer));
        }
        if decimal.starts_with('0') {
            return None;
        }
        decimal.parse().ok().map(|d| Self::Fractional(integer, d))
    }

    fn sort_key(self) -> (u32, u32, bool) {
        (
            self.integer(),
            self.decimal(),
            matches!(self, Self::Fractional(..)),
        )
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(n) => write!(f, "{n:04}"),
            Self::Fractional(n, d) => write!(f, "{n:04}.{d}"),
        }
    }
}

impl Ord for ChapterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ChapterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
