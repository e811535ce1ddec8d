//! Accent commands to precomposed letters.

/// Combining mark for the character after the backslash of an accent command.
fn combining_mark(accent: char) -> Option<char> {
    Some(match accent {
        '`' => '\u{300}',
        '\'' => '\u{301}',
        '^' => '\u{302}',
        '~' => '\u{303}',
        '"' => '\u{308}',
        '=' => '\u{304}',
        '.' => '\u{307}',
        'H' => '\u{30b}',
        'b' => '\u{331}',
        'c' => '\u{327}',
        'd' => '\u{323}',
        'k' => '\u{328}',
        'r' => '\u{30a}',
        'u' => '\u{306}',
        'v' => '\u{30c}',
        _ => return None,
    })
}

/// (accent, base letters, precomposed letters), position for position.
const PRECOMPOSED: &[(char, &str, &str)] = &[
    ('`', "AEIOUaeiouNnWwYy", "ÀÈÌÒÙàèìòùǸǹẀẁỲỳ"),
    ('\'', "AEIOUYaeiouyCcLlNnRrSsZzGgWw", "ÁÉÍÓÚÝáéíóúýĆćĹĺŃńŔŕŚśŹźǴǵẂẃ"),
    ('^', "AEIOUaeiouCcGgHhJjSsWwYy", "ÂÊÎÔÛâêîôûĈĉĜĝĤĥĴĵŜŝŴŵŶŷ"),
    ('~', "ANOanoIiUu", "ÃÑÕãñõĨĩŨũ"),
    ('"', "AEIOUaeiouyY", "ÄËÏÖÜäëïöüÿŸ"),
    ('=', "AaEeIiOoUuGg", "ĀāĒēĪīŌōŪūḠḡ"),
    ('.', "AaCcEeGgIZz", "ȦȧĊċĖėĠġİŻż"),
    ('H', "OoUu", "ŐőŰű"),
    ('b', "Bb", "Ḇḇ"),
    ('c', "CcSsTtGgKkLlNnRr", "ÇçŞşŢţĢģĶķĻļŅņŖŗ"),
    ('d', "Aa", "Ạạ"),
    ('k', "AaEeIiUu", "ĄąĘęĮįŲų"),
    ('r', "AaUu", "ÅåŮů"),
    ('u', "AaEeGgIiOoUu", "ĂăĔĕĞğĬĭŎŏŬŭ"),
    ('v', "CcDdEeNnRrSsTtZz", "ČčĎďĚěŇňŘřŠšŤťŽž"),
];

/// Render `command` (e.g. `\"`) applied to `letter` (e.g. `a`, `\i`).
///
/// Falls back to the base letter followed by the combining mark when no precomposed
/// letter exists.
pub(super) fn compose(command: &str, letter: &str) -> String {
    let base = match letter {
        r"\i" => '\u{131}',
        r"\j" => '\u{237}',
        other => match other.chars().next() {
            Some(ch) => ch,
            None => return String::new(),
        },
    };
    let Some(accent) = command.chars().nth(1) else {
        return base.to_string();
    };

    let precomposed = PRECOMPOSED
        .iter()
        .find(|(candidate, _, _)| *candidate == accent)
        .and_then(|(_, bases, results)| {
            let index = bases.chars().position(|candidate| candidate == base)?;
            results.chars().nth(index)
        });

    match (precomposed, combining_mark(accent)) {
        (Some(letter), _) => letter.to_string(),
        (None, Some(mark)) => format!("{base}{mark}"),
        (None, None) => base.to_string(),
    }
}
