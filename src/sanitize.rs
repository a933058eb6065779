//! Filesystem- and identity-safe string cleaning.
//!
//! Recording titles arrive with quotes, slashes, smart punctuation, and the
//! occasional accented character; everything that ends up in a path or a
//! dedup key goes through [`clean`] first. The transform is pure: same input
//! and override table, same output, independent of locale.

/// Base substitution table. Characters outside `[0-9A-Za-z_.-]` that do not
/// appear here are dropped.
fn base_substitution(ch: char) -> Option<&'static str> {
    match ch {
        '(' => Some("("),
        ')' => Some(")"),
        // '+' preserved so the '&' substitution survives a second pass
        '+' => Some("+"),
        ' ' => Some(" "),
        '"' => Some(" "),
        '&' => Some("+"),
        '/' => Some(" "),
        '\\' => Some(" "),
        '|' => Some(" "),
        '\'' => Some(""),
        '?' => Some(""),
        '@' => Some("at "),
        '\u{2019}' => Some(""), // right single quote
        '\u{2026}' => Some(""), // ellipsis
        '\u{00f8}' => Some(""),
        _ => None,
    }
}

/// Clean `text` with the base substitution table.
pub fn clean(text: &str) -> String {
    clean_with(text, &[])
}

/// Clean `text`, with `overrides` shadowing the base table per character.
///
/// Keeps ASCII alphanumerics, `_`, `.`, `-` verbatim; substitutes table
/// hits; drops everything else. Runs of emitted spaces are collapsed by
/// tracking the last emitted character (not the last input character), so
/// two substitutions that both produce a space still emit only one.
pub fn clean_with(text: &str, overrides: &[(char, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last: Option<char> = None;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
            out.push(ch);
            last = Some(ch);
            continue;
        }
        let substitution = overrides
            .iter()
            .find(|(k, _)| *k == ch)
            .map(|(_, v)| *v)
            .or_else(|| base_substitution(ch));
        if let Some(replacement) = substitution {
            for r in replacement.chars() {
                if r == ' ' && last == Some(' ') {
                    continue;
                }
                out.push(r);
                last = Some(r);
            }
        }
    }
    out
}

/// Trim leading whitespace and trailing space / hyphen / newline runs.
/// Applied to templated names before sanitization.
pub fn squish(text: &str) -> String {
    text.trim_start()
        .trim_end_matches(|c| c == ' ' || c == '-' || c == '\n' || c == '\r')
        .to_string()
}
