//! Human-friendly string ordering for `describe` output
//!
//! Runs of digits compare by numeric value and letters compare without
//! case, so `host2 < host10` and `apple < Banana`. Strings that differ only
//! in case fall back to byte order, putting `Apple` before `apple`.

use std::cmp::Ordering;

/// Compare two strings in natural order
pub fn compare(a: &str, b: &str) -> Ordering {
    compare_folded(a, b).then_with(|| a.cmp(b))
}

fn compare_folded(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let (x, y) = (a[i], b[j]);
        match (x.is_ascii_digit(), y.is_ascii_digit()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (true, true) => {
                let end_a = digit_run_end(&a, i);
                let end_b = digit_run_end(&b, j);
                let order = compare_digits(&a[i..end_a], &b[j..end_b]);
                if order != Ordering::Equal {
                    return order;
                }
                i = end_a;
                j = end_b;
            },
            (false, false) => {
                let order = x.to_lowercase().cmp(y.to_lowercase());
                if order != Ordering::Equal {
                    return order;
                }
                i += 1;
                j += 1;
            },
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(chars.len(), |offset| start + offset)
}

fn compare_digits(a: &[char], b: &[char]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(digits: &[char]) -> &[char] {
    let first = digits.iter().position(|c| *c != '0').unwrap_or(digits.len());
    &digits[first..]
}

/// Sort in place in natural order
pub fn sort(values: &mut [String]) {
    values.sort_by(|a, b| compare(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> Vec<String> {
        ["Apple", "apple", "file2", "file22", "file90", "file99", "file100", "Zoo", "zoo"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_natural_order() {
        let inputs = [
            vec!["Apple", "apple", "file2", "file90", "file99", "file100", "Zoo", "zoo", "file22"],
            vec!["Zoo", "Apple", "apple", "file100", "file2", "file90", "file99", "zoo", "file22"],
            vec!["file2", "file90", "apple", "Zoo", "file100", "file22", "file99", "zoo", "Apple"],
        ];
        for input in inputs {
            let mut values: Vec<String> = input.iter().map(|s| s.to_string()).collect();
            sort(&mut values);
            assert_eq!(values, expected());
        }
        sort(&mut []);
    }

    #[test]
    fn test_prefixes_and_digits() {
        assert_eq!(compare("cats", "cats1"), Ordering::Less);
        assert_eq!(compare("1a", "a"), Ordering::Less);
        assert_eq!(compare("v007", "v7"), Ordering::Less);
        assert_eq!(compare("v7", "v7"), Ordering::Equal);
        assert_eq!(compare("host10b", "host10a"), Ordering::Greater);
    }
}
