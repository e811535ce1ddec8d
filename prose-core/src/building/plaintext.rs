//! The two trivial builders: everything is text, or everything is markup.

use crate::annotated::{AnnotatedText, AnnotatedTextBuilder};
use crate::error::MalformedInputError;

use super::MarkupBuilder;

#[derive(Debug, Default)]
pub struct PlaintextBuilder {
    out: AnnotatedTextBuilder,
}

impl PlaintextBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkupBuilder for PlaintextBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.out.add_text(code);
        Ok(())
    }

    fn add_markup(&mut self, raw: &str, interpret_as: &str) {
        self.out.add_markup_as(raw, interpret_as);
    }

    fn set_strict(&mut self, _strict: bool) {}

    fn build(&self) -> AnnotatedText {
        self.out.build()
    }
}

/// Hides its whole input from the analysis engine.
#[derive(Debug, Default)]
pub struct NopBuilder {
    out: AnnotatedTextBuilder,
}

impl NopBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkupBuilder for NopBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.out.add_markup(code);
        Ok(())
    }

    fn add_markup(&mut self, raw: &str, interpret_as: &str) {
        self.out.add_markup_as(raw, interpret_as);
    }

    fn set_strict(&mut self, _strict: bool) {}

    fn build(&self) -> AnnotatedText {
        self.out.build()
    }
}
