use std::ops::Range;

/// An ordered list of ranges where contiguous insertions are merged into the previous range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeCollection<T>(Vec<Range<T>>);

impl<T> RangeCollection<T>
where
    T: Copy + Eq + PartialOrd,
{
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts the given range, either extending the last entry if it's contiguous with it, or adding a new entry
    /// otherwise. Empty ranges are ignored.
    pub fn insert(&mut self, item: Range<T>) {
        if item.start == item.end {
            return;
        }
        match self.0.last_mut() {
            Some(range) if range.end == item.start => range.end = item.end,
            _ => {
                debug_assert!(
                    self.0.last().map_or(true, |range| !range.contains(&item.start)),
                    "invariant: item overlaps with an existing range"
                );
                self.0.push(item);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<T>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> IntoIterator for RangeCollection<T> {
    type Item = Range<T>;
    type IntoIter = std::vec::IntoIter<Range<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_merges_contiguous() {
        let mut ranges = RangeCollection::new();
        ranges.insert(0u64..10);
        ranges.insert(10..20);
        ranges.insert(25..30);
        ranges.insert(30..30);
        assert_eq!(ranges.into_iter().collect::<Vec<_>>(), vec![0..20, 25..30]);
    }
}
