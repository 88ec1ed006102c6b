/// Lower-case, fold `-`/`_` to spaces and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Gestalt pattern-matching ratio `2·M / T` over the raw strings, where `M`
/// is the total size of the matching blocks found by recursively taking the
/// longest common substring.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    (2 * matched) as f64 / total as f64
}

/// Ratio after normalizing both names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    ratio(&normalize_name(a), &normalize_name(b))
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut stack = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            stack.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            stack.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

/// Longest common run in `a[alo..ahi]` and `b[blo..bhi]`; ties resolve to
/// the earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // lengths[j] = length of the common run ending at a[i-1], b[j-1]
    let mut prev = vec![0usize; bhi - blo + 1];
    for i in alo..ahi {
        let mut cur = vec![0usize; bhi - blo + 1];
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = prev[j - blo] + 1;
                cur[j - blo + 1] = k;
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        prev = cur;
    }
    (best_i, best_j, best_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(ratio("sift", "sift"), 1.0);
        assert_eq!(ratio("", ""), 1.0);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn classic_gestalt_examples() {
        // 2 * 3 matched / 8 chars
        assert!((ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        // WIKIMEDIA vs WIKIMANIA: W-I-K-I-M, A, I-A = 7 matched of 18
        assert!((ratio("wikimedia", "wikimania") - 14.0 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn normalization_folds_separators_and_case() {
        assert_eq!(normalize_name("  Home_Automation-Hub "), "home automation hub");
        assert_eq!(name_similarity("home-automation", "Home Automation"), 1.0);
    }

    #[test]
    fn near_duplicate_names_score_high() {
        assert!(name_similarity("personal-website", "personal website v2") >= 0.75);
        assert!(name_similarity("personal-website", "tax-scripts") < 0.5);
    }
}
