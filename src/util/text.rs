use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;

/// Named references the HTML5 parser also accepts without a trailing `;`.
const LEGACY_ENTITIES: [&str; 106] = [
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren",
    "deg", "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34",
    "gt", "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm", "oslash",
    "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy", "sup1",
    "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml", "uuml",
    "yacute", "yen", "yuml",
];

/// Length of the longest name in [`LEGACY_ENTITIES`].
const LONGEST_LEGACY_ENTITY: usize = 6;

/// Numeric references in 0x80..=0x9F name Windows-1252 characters.
const WINDOWS_1252: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}', '\u{17D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}', '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
];

/// Replaces HTML character references with the characters they name.
///
/// Follows the HTML5 parsing rules for text content:
///
/// - Named references from the HTML5 table (`&eacute;`, `&nbsp;`, ...)
/// - Legacy names without the `;` (`&amp`, `&copy`), including as the
///   longest prefix of a longer run (`&copyright` is `©right`)
/// - Numeric references in decimal (`&#233;`) or hex (`&#xE9;`) form, with
///   the `;` optional; digits end at the first non-digit
///
/// Anything else after a `&` is left untouched, so `"AT&T"` survives as-is.
/// Numeric references that do not name a valid scalar value (NUL, surrogates,
/// out-of-range) decode to U+FFFD.
///
/// Returns `Cow::Borrowed` when the input contains no `&`.
///
/// # Examples
///
/// ```
/// use feedstage::util::unescape_html;
///
/// assert_eq!(unescape_html("Tom &amp; Jerry"), "Tom & Jerry");
/// assert_eq!(unescape_html("Fish &amp chips"), "Fish & chips");
/// assert_eq!(unescape_html("&#72;&#x69;"), "Hi");
/// assert_eq!(unescape_html("AT&T"), "AT&T");
/// ```
pub fn unescape_html(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];

        match decode_reference(tail) {
            Some((replacement, consumed)) => {
                out.push_str(&replacement);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Decodes the reference at the start of `tail`, the text right after a `&`.
///
/// Returns the replacement and the number of bytes of `tail` it used up.
fn decode_reference(tail: &str) -> Option<(Cow<'static, str>, usize)> {
    match tail.strip_prefix('#') {
        Some(numeric) => {
            decode_numeric(numeric).map(|(c, used)| (Cow::Owned(c.to_string()), used + 1))
        }
        None => decode_named(tail),
    }
}

fn decode_numeric(s: &str) -> Option<(char, usize)> {
    let (start, radix) = match s.as_bytes().first() {
        Some(b'x' | b'X') => (1, 16),
        _ => (0, 10),
    };
    let len = s[start..]
        .bytes()
        .take_while(|b| char::from(*b).is_digit(radix))
        .count();
    if len == 0 {
        return None;
    }

    let digits = &s[start..start + len];
    let mut used = start + len;
    if s[used..].starts_with(';') {
        used += 1;
    }

    // Overlong references still decode, just to U+FFFD.
    let code = u32::from_str_radix(digits, radix).unwrap_or(u32::MAX);
    let c = match code {
        0x80..=0x9F => WINDOWS_1252[(code - 0x80) as usize],
        _ => match char::from_u32(code) {
            Some('\0') | None => char::REPLACEMENT_CHARACTER,
            Some(c) => c,
        },
    };
    Some((c, used))
}

fn decode_named(s: &str) -> Option<(Cow<'static, str>, usize)> {
    let len = s.bytes().take_while(u8::is_ascii_alphanumeric).count();
    if len == 0 {
        return None;
    }
    let name = &s[..len];
    let terminated = s[len..].starts_with(';');

    if terminated {
        if let Some(value) = resolve_html5_entity(name) {
            return Some((Cow::Borrowed(value), len + 1));
        }
    } else if let Some(value) = resolve_legacy(name) {
        return Some((Cow::Borrowed(value), len));
    }

    // Longest legacy name that is a strict prefix of the run (the `;` counts
    // as part of the run)
    let max = if terminated { len } else { len - 1 };
    (2..=max.min(LONGEST_LEGACY_ENTITY))
        .rev()
        .find_map(|end| resolve_legacy(&name[..end]).map(|value| (Cow::Borrowed(value), end)))
}

fn resolve_legacy(name: &str) -> Option<&'static str> {
    if LEGACY_ENTITIES.contains(&name) {
        resolve_html5_entity(name)
    } else {
        None
    }
}

/// Replaces every code point at or above U+0080 with a single ASCII space.
///
/// Lossy: `"Café"` becomes `"Caf "`. The output always
/// has the same number of characters as the input and is pure ASCII.
pub fn fold_ascii(s: &str) -> Cow<'_, str> {
    if s.is_ascii() {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.chars()
            .map(|c| if c.is_ascii() { c } else { ' ' })
            .collect(),
    )
}

/// Normalizes a feed text field: entity unescaping followed by ASCII folding.
///
/// ```
/// use feedstage::util::sanitize_text;
///
/// assert_eq!(sanitize_text("Café déjà vu"), "Caf  d j  vu");
/// assert_eq!(sanitize_text("caf&eacute;"), "caf ");
/// ```
pub fn sanitize_text(s: &str) -> String {
    fold_ascii(&unescape_html(s)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fold_replaces_each_non_ascii_code_point() {
        assert_eq!(fold_ascii("Café déjà vu"), "Caf  d j  vu");
    }

    #[test]
    fn test_fold_borrows_ascii_input() {
        assert!(matches!(fold_ascii("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_fold_multibyte_emoji_is_one_space() {
        assert_eq!(fold_ascii("a🎉b"), "a b");
        assert_eq!(fold_ascii("日本"), "  ");
    }

    #[test]
    fn test_unescape_named() {
        assert_eq!(unescape_html("&lt;b&gt;bold&lt;/b&gt;"), "<b>bold</b>");
        assert_eq!(unescape_html("a&nbsp;b"), "a\u{a0}b");
        assert_eq!(unescape_html("&quot;hi&quot; &apos;x&apos;"), "\"hi\" 'x'");
    }

    #[test]
    fn test_unescape_numeric() {
        assert_eq!(unescape_html("&#233;"), "é");
        assert_eq!(unescape_html("&#xe9;&#XE9;"), "éé");
    }

    #[test]
    fn test_unescape_invalid_code_point_becomes_replacement() {
        assert_eq!(unescape_html("&#0;"), "\u{fffd}");
        assert_eq!(unescape_html("&#xD800;"), "\u{fffd}");
    }

    #[test]
    fn test_unescape_leaves_malformed_references() {
        assert_eq!(unescape_html("AT&T"), "AT&T");
        assert_eq!(unescape_html("a & b"), "a & b");
        assert_eq!(unescape_html("&;"), "&;");
        assert_eq!(unescape_html("&zzzz;"), "&zzzz;");
        assert_eq!(unescape_html("&hellip no"), "&hellip no");
        assert_eq!(unescape_html("&#xZZ;"), "&#xZZ;");
        assert_eq!(unescape_html("trailing &"), "trailing &");
    }

    #[test]
    fn test_unescape_legacy_names_without_semicolon() {
        assert_eq!(unescape_html("Fish &amp chips &copy 2024"), "Fish & chips \u{a9} 2024");
        assert_eq!(unescape_html("&lt;tag&gt"), "<tag>");
        assert_eq!(unescape_html("a&ltb"), "a<b");
    }

    #[test]
    fn test_unescape_legacy_longest_prefix() {
        assert_eq!(unescape_html("&copyright"), "\u{a9}right");
        assert_eq!(unescape_html("&notit;"), "\u{ac}it;");
        assert_eq!(unescape_html("&ampx;"), "&x;");
    }

    #[test]
    fn test_unescape_numeric_without_semicolon() {
        assert_eq!(unescape_html("&#233 x"), "\u{e9} x");
        assert_eq!(unescape_html("&#x41B"), "\u{41b}");
        assert_eq!(unescape_html("&#65bc"), "Abc");
        assert_eq!(unescape_html("&#"), "&#");
        assert_eq!(unescape_html("&#x;"), "&#x;");
    }

    #[test]
    fn test_unescape_windows_1252_range() {
        assert_eq!(unescape_html("&#150;&#x80;"), "\u{2013}\u{20ac}");
    }

    #[test]
    fn test_sanitize_legacy_references() {
        assert_eq!(
            sanitize_text("Fish &amp chips &copy 2024 &#233 x"),
            "Fish & chips   2024   x"
        );
    }

    #[test]
    fn test_unescape_recovers_after_stray_ampersand() {
        assert_eq!(unescape_html("a & b &amp; c"), "a & b & c");
    }

    #[test]
    fn test_unescape_is_single_pass() {
        assert_eq!(unescape_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_sanitize_unescapes_before_folding() {
        assert_eq!(sanitize_text("Caf&eacute; &amp; bar"), "Caf  & bar");
        assert_eq!(sanitize_text("&#8212;"), " ");
    }

    proptest! {
        #[test]
        fn fold_output_is_ascii_and_same_char_count(s in "\\PC*") {
            let folded = fold_ascii(&s);
            prop_assert!(folded.is_ascii());
            prop_assert_eq!(folded.chars().count(), s.chars().count());
        }

        #[test]
        fn sanitize_output_is_ascii(s in "\\PC*") {
            prop_assert!(sanitize_text(&s).is_ascii());
        }
    }
}
