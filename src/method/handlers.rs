//! Exception handler regions of a method body.

use std::fmt;

use crate::assembly::Label;

/// A protected region `[start, end)` and the handler that receives its exceptions.
///
/// Regions are kept in exception-table order: the JVM picks the *first* matching entry,
/// so earlier regions take precedence over later ones covering the same code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRegion {
    /// First covered instruction
    pub start: Label,
    /// End of the covered range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// `Class` index of the caught type, `None` for any throwable
    pub catch_type: Option<u16>,
}

impl HandlerRegion {
    /// Creates a region that catches everything.
    #[must_use]
    pub fn catch_all(start: Label, end: Label, handler: Label) -> Self {
        HandlerRegion {
            start,
            end,
            handler,
            catch_type: None,
        }
    }

    /// Returns `true` if this region catches every throwable.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.catch_type.is_none()
    }
}

impl fmt::Display for HandlerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) -> {}", self.start, self.end, self.handler)?;
        match self.catch_type {
            Some(class) => write!(f, " catch #{}", class),
            None => f.write_str(" any"),
        }
    }
}

/// Returns every pair of ranges (by index) that overlap without one containing the other.
///
/// Ranges are given as `(start, end)` offsets with `start < end`. Such overlaps are legal
/// in class files but unusual; callers only report them.
#[must_use]
pub fn partial_overlaps(ranges: &[(u16, u16)]) -> Vec<(usize, usize)> {
    let mut overlaps = Vec::new();
    for (i, a) in ranges.iter().enumerate() {
        for (j, b) in ranges.iter().enumerate().skip(i + 1) {
            let crosses = (a.0 < b.0 && b.0 < a.1 && a.1 < b.1) || (b.0 < a.0 && a.0 < b.1 && b.1 < a.1);
            if crosses {
                overlaps.push((i, j));
            }
        }
    }
    overlaps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_disjoint_are_not_partial() {
        assert!(partial_overlaps(&[(0, 10), (2, 5), (10, 12), (0, 10)]).is_empty());
    }

    #[test]
    fn crossing_ranges_are_reported() {
        assert_eq!(partial_overlaps(&[(0, 6), (4, 10), (20, 30)]), vec![(0, 1)]);
        assert_eq!(partial_overlaps(&[(4, 10), (0, 6)]), vec![(0, 1)]);
    }

    #[test]
    fn display() {
        let region = HandlerRegion::catch_all(Label(0), Label(1), Label(2));
        assert!(region.is_catch_all());
        assert_eq!(region.to_string(), "[L0, L1) -> L2 any");
    }
}
