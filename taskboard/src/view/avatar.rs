//! Avatar initials and colors derived from a display name.

/// Up to two upper-cased initials for `name`.
///
/// Several words give the first letters of the first and last word; a
/// single word gives its first two characters. An empty name gives `?`.
#[must_use]
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let raw: String = match words.as_slice() {
        [] => return "?".to_string(),
        [single] => single.chars().take(2).collect(),
        [first, .., last] => first.chars().take(1).chain(last.chars().take(1)).collect(),
    };
    raw.to_uppercase()
}

/// A stable `#rrggbb` color for `name`.
///
/// Hashes the UTF-16 code units with `hash * 31 + unit` in wrapping 32-bit
/// arithmetic and takes the low three bytes, lowest first, so the same name
/// gets the same color on every client.
#[must_use]
pub fn color(name: &str) -> String {
    let hash = name.encode_utf16().fold(0i32, |hash, unit| {
        i32::from(unit).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    let bytes = hash.to_le_bytes();
    format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}
