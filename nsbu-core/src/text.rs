//! Text normalization shared by detection and row rules

/// Lower-case, collapse whitespace and unify apostrophes and `ё`.
///
/// Uzbek Latin uses several apostrophe code points for `o'` and `g'`; they are
/// all mapped to ASCII `'` so keyword tables only need one spelling.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{02BB}' | '\u{02BC}' | '`' | '\u{00B4}' => out.push('\''),
            'ё' | 'Ё' => out.push('е'),
            _ => out.extend(ch.to_lowercase()),
        }
    }
    out
}

/// Whether the label looks like a code cell value ("010", "1.1", "2900")
pub fn looks_like_code(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty()
        && t.len() <= 8
        && t.chars().all(|c| c.is_ascii_digit() || c == '.')
        && t.chars().next().is_some_and(|c| c.is_ascii_digit())
}
