//! Filesystem-safe name generation for demuxed track directories and files.
//!
//! Ported from `original_source/src/tools.cpp::slugify_utf8`/`basename_utf8`,
//! which normalise with ICU; this uses the `unicode-normalization` crate's
//! NFKC/NFKD instead, the standard ecosystem equivalent.

use unicode_normalization::UnicodeNormalization;

/// Normalises, lowercases, and filters `s` into a name safe for filesystem
/// use. With `allow_unicode` the result keeps non-ASCII letters/digits
/// (NFKC); otherwise it folds to NFKD and drops anything outside ASCII.
pub fn slugify(s: &str, allow_unicode: bool) -> String {
    let normalized: String = if allow_unicode {
        s.nfkc().collect()
    } else {
        s.nfkd().collect()
    };

    let lowered = normalized.to_lowercase();

    let filtered: String = lowered
        .chars()
        .filter(|&c| {
            let keep = matches!(c, '_' | '.' | ',' | '+' | '-')
                || c.is_whitespace()
                || c.is_alphanumeric();
            keep && (allow_unicode || c.is_ascii())
        })
        .collect();

    let mut collapsed = String::with_capacity(filtered.len());
    let mut in_sep = false;
    for c in filtered.chars() {
        let sep = c.is_whitespace() || c == '-';
        if sep {
            if !in_sep {
                collapsed.push('-');
                in_sep = true;
            }
            continue;
        }
        in_sep = false;
        collapsed.push(c);
    }

    collapsed
        .trim_matches(|c: char| c == '-' || c == '_')
        .to_string()
}

/// Returns the final path component, treating both `/` and `\` as
/// separators.
pub fn basename(path_like: &str) -> &str {
    match path_like.rfind(['/', '\\']) {
        Some(idx) => &path_like[idx + 1..],
        None => path_like,
    }
}
