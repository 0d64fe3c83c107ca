//! Natural ordering of migration versions
//!
//! Digit runs compare by numeric magnitude, everything else compares bytewise,
//! so `"2" < "10"`, `"v9" < "v10"` and `"001" < "001a" < "002"`.

use std::cmp::Ordering;

/// Compare two migration versions in natural order
///
/// Both strings are scanned in lock-step. Where both continue with a digit run,
/// the runs are compared as unbounded non-negative integers; otherwise the
/// non-digit runs are compared bytewise. When one string runs out first it
/// sorts first; strings whose runs all tie (`"1"` and `"001"`) fall back to
/// the shorter one first.
///
/// # Example
///
/// ```
/// use lockstep::migration::compare_versions;
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_versions("2", "10"), Ordering::Less);
/// assert_eq!(compare_versions("post_001", "user_001"), Ordering::Less);
/// assert_eq!(compare_versions("v10", "v2"), Ordering::Greater);
/// ```
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut ia, mut ib) = (0, 0);

    while ia < a.len() && ib < b.len() {
        let next_a = digit_run_end(a, ia);
        let next_b = digit_run_end(b, ib);

        if next_a > ia && next_b > ib {
            match compare_digit_runs(&a[ia..next_a], &b[ib..next_b]) {
                Ordering::Equal => {
                    ia = next_a;
                    ib = next_b;
                    continue;
                }
                unequal => return unequal,
            }
        }

        let next_a = text_run_end(a, ia);
        let next_b = text_run_end(b, ib);
        match a[ia..next_a].cmp(&b[ib..next_b]) {
            Ordering::Equal => {
                ia = next_a;
                ib = next_b;
            }
            unequal => return unequal,
        }
    }

    match (ia < a.len(), ib < b.len()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        // Same runs, differing only in leading zeros.
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Sort versions ascending in natural order.
pub fn sort_versions<T, F>(items: &mut [T], version: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|x, y| compare_versions(version(x), version(y)));
}

fn digit_run_end(s: &[u8], start: usize) -> usize {
    s[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(s.len(), |offset| start + offset)
}

fn text_run_end(s: &[u8], start: usize) -> usize {
    s[start..]
        .iter()
        .position(u8::is_ascii_digit)
        .map_or(s.len(), |offset| start + offset)
}

// Magnitude comparison for digit strings of any length.
fn compare_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&c| c != b'0').unwrap_or(digits.len());
    &digits[first..]
}
