use std::fmt;

pub struct DebugEllipsis(pub Option<usize>);

impl fmt::Debug for DebugEllipsis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("...")?;
        if let Some(size) = self.0 {
            write!(f, "({size})")?;
        }
        Ok(())
    }
}

/// Debug-formats at most `limit` items of a list, followed by an ellipsis with the remaining count.
pub struct DebugList<'a, T>(pub &'a [T], pub usize);

impl<T: fmt::Debug> fmt::Debug for DebugList<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let DebugList(items, limit) = self;
        if items.len() <= *limit {
            return f.debug_list().entries(items.iter()).finish();
        }
        f.debug_list()
            .entries(items.iter().take(*limit))
            .entry(&DebugEllipsis(Some(items.len() - limit)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_list_truncates() {
        let items: Vec<u32> = (1..=12).collect();
        assert_eq!(
            format!("{:?}", DebugList(&items, 3)),
            "[1, 2, 3, ...(9)]"
        );
        assert_eq!(format!("{:?}", DebugList(&items[..2], 3)), "[1, 2]");
    }
}
