/// Median of `values`, averaging the middle pair for even counts. `None` when there are no values.
///
/// Callers filter out placeholder values (such as zero durations) before calling.
pub fn median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = u64>,
{
    let mut values: Vec<u64> = values.into_iter().collect();
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid] as f64)
    } else {
        Some((values[mid - 1] as f64 + values[mid] as f64) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(Vec::new()), None);
        assert_eq!(median([0, 0]), Some(0.0));
        assert_eq!(median([5, 1, 3]), Some(3.0));
        assert_eq!(median([4, 1, 3, 2]), Some(2.5));
        assert_eq!(median([u64::MAX, u64::MAX]), Some(u64::MAX as f64));
    }
}
