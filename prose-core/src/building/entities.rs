//! HTML character references.

/// Named references that show up in prose. Unknown names stay literal text.
const NAMED: &[(&str, &str)] = &[
    ("AElig", "\u{c6}"),
    ("Agrave", "\u{c0}"),
    ("Auml", "\u{c4}"),
    ("Eacute", "\u{c9}"),
    ("Ouml", "\u{d6}"),
    ("Uuml", "\u{dc}"),
    ("aacute", "\u{e1}"),
    ("acirc", "\u{e2}"),
    ("aelig", "\u{e6}"),
    ("agrave", "\u{e0}"),
    ("amp", "&"),
    ("apos", "'"),
    ("aring", "\u{e5}"),
    ("auml", "\u{e4}"),
    ("bdquo", "\u{201e}"),
    ("bull", "\u{2022}"),
    ("ccedil", "\u{e7}"),
    ("cent", "\u{a2}"),
    ("copy", "\u{a9}"),
    ("dagger", "\u{2020}"),
    ("deg", "\u{b0}"),
    ("divide", "\u{f7}"),
    ("eacute", "\u{e9}"),
    ("ecirc", "\u{ea}"),
    ("egrave", "\u{e8}"),
    ("euml", "\u{eb}"),
    ("euro", "\u{20ac}"),
    ("frac12", "\u{bd}"),
    ("gt", ">"),
    ("hellip", "\u{2026}"),
    ("iacute", "\u{ed}"),
    ("iuml", "\u{ef}"),
    ("laquo", "\u{ab}"),
    ("ldquo", "\u{201c}"),
    ("lsaquo", "\u{2039}"),
    ("lsquo", "\u{2018}"),
    ("lt", "<"),
    ("mdash", "\u{2014}"),
    ("middot", "\u{b7}"),
    ("minus", "\u{2212}"),
    ("nbsp", "\u{a0}"),
    ("ndash", "\u{2013}"),
    ("ntilde", "\u{f1}"),
    ("oacute", "\u{f3}"),
    ("ocirc", "\u{f4}"),
    ("ouml", "\u{f6}"),
    ("para", "\u{b6}"),
    ("plusmn", "\u{b1}"),
    ("pound", "\u{a3}"),
    ("quot", "\""),
    ("raquo", "\u{bb}"),
    ("rdquo", "\u{201d}"),
    ("reg", "\u{ae}"),
    ("rsaquo", "\u{203a}"),
    ("rsquo", "\u{2019}"),
    ("sbquo", "\u{201a}"),
    ("sect", "\u{a7}"),
    ("shy", "\u{ad}"),
    ("szlig", "\u{df}"),
    ("thinsp", "\u{2009}"),
    ("times", "\u{d7}"),
    ("trade", "\u{2122}"),
    ("uacute", "\u{fa}"),
    ("uuml", "\u{fc}"),
    ("yen", "\u{a5}"),
];

/// Decode a full reference such as `&copy;`, `&#169;` or `&#xA9;`.
pub(crate) fn decode(reference: &str) -> Option<String> {
    let body = reference.strip_prefix('&')?.strip_suffix(';')?;
    if let Some(number) = body.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        let ch = match char::from_u32(code) {
            Some('\0') | None => '\u{fffd}',
            Some(ch) => ch,
        };
        return Some(ch.to_string());
    }
    NAMED
        .binary_search_by(|(name, _)| name.cmp(&body))
        .ok()
        .map(|index| NAMED[index].1.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted() {
        assert!(NAMED.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn decodes_references() {
        assert_eq!(decode("&copy;").as_deref(), Some("\u{a9}"));
        assert_eq!(decode("&#8211;").as_deref(), Some("\u{2013}"));
        assert_eq!(decode("&#x2014;").as_deref(), Some("\u{2014}"));
        assert_eq!(decode("&#0;").as_deref(), Some("\u{fffd}"));
        assert_eq!(decode("&bogus;"), None);
    }
}
