//! Placeholder words for constructs that cannot be analyzed as prose
//!
//!     Math, opaque commands and link targets are replaced by a single inert word so the
//!     analysis engine still sees a well-formed sentence. The word is a function of the
//!     language and a running counter only, which keeps the plain text deterministic.

/// Generates `Dummy0`, `Ina1`, `Dummies`, `Jimmy-2` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DummyGenerator {
    plural: bool,
    vowel: bool,
}

impl DummyGenerator {
    pub const SINGULAR: DummyGenerator = DummyGenerator {
        plural: false,
        vowel: false,
    };

    pub const PLURAL: DummyGenerator = DummyGenerator {
        plural: true,
        vowel: false,
    };

    pub const VOWEL: DummyGenerator = DummyGenerator {
        plural: false,
        vowel: true,
    };

    pub fn new(plural: bool, vowel: bool) -> Self {
        Self { plural, vowel }
    }

    pub fn is_plural(&self) -> bool {
        self.plural
    }

    pub fn generate(&self, language: &str, number: usize) -> String {
        self.generate_with_vowel(language, number, false)
    }

    /// Like [`generate`](Self::generate), but asks for a vowel-initial word.
    ///
    /// English articles agree with the following sound (`an Ina0` vs `a Dummy0`), so math
    /// starting with a vowel-sounding symbol gets a vowel dummy.
    pub fn generate_with_vowel(&self, language: &str, number: usize, vowel: bool) -> String {
        if language.eq_ignore_ascii_case("fr") {
            // French agreement rules need a proper-name-like token
            format!("Jimmy-{number}")
        } else if self.plural {
            "Dummies".to_string()
        } else if vowel || self.vowel {
            format!("Ina{number}")
        } else {
            format!("Dummy{number}")
        }
    }
}

/// Matches every word this module can produce, e.g. for generalizing sentences.
pub const DUMMY_PATTERN: &str = "(?:Dummy|Ina|Jimmy-)[0-9]+";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DummyGenerator::SINGULAR, "en-US", 3, false, "Dummy3")]
    #[case(DummyGenerator::SINGULAR, "en-US", 0, true, "Ina0")]
    #[case(DummyGenerator::VOWEL, "de-DE", 7, false, "Ina7")]
    #[case(DummyGenerator::PLURAL, "en-US", 1, false, "Dummies")]
    #[case(DummyGenerator::PLURAL, "en-US", 1, true, "Dummies")]
    #[case(DummyGenerator::SINGULAR, "fr", 2, false, "Jimmy-2")]
    #[case(DummyGenerator::PLURAL, "FR", 4, true, "Jimmy-4")]
    fn generates_expected_words(
        #[case] generator: DummyGenerator,
        #[case] language: &str,
        #[case] number: usize,
        #[case] vowel: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(
            generator.generate_with_vowel(language, number, vowel),
            expected
        );
    }

    #[test]
    fn is_deterministic() {
        let generator = DummyGenerator::default();
        assert_eq!(generator.generate("en", 5), generator.generate("en", 5));
    }

    #[test]
    fn pattern_matches_generated_words() {
        let pattern = regex::Regex::new(&format!("^{DUMMY_PATTERN}$")).unwrap();
        for word in ["Dummy12", "Ina0", "Jimmy-3"] {
            assert!(pattern.is_match(word));
        }
        assert!(!pattern.is_match("Dummies"));
    }
}
