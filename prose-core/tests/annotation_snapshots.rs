//! Snapshot tests for annotated part lists

use prose_core::annotated::AnnotatedText;
use prose_core::building::builder_for;
use prose_core::settings::Settings;

fn render(annotated: &AnnotatedText) -> String {
    annotated
        .parts()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn plaintext_keeps_injected_markup_separate() {
    let mut builder = builder_for("plaintext", &Settings::default());
    builder.add_code("See ").unwrap();
    builder.add_markup("\\ref{fig}", "Dummy0");
    builder.add_code(" and ").unwrap();
    builder.add_code("more.").unwrap();
    builder.add_markup("\n", "");

    insta::assert_snapshot!(render(&builder.build()), @r###"
    TEXT("See ")
    MARKUP("\\ref{fig}", "Dummy0")
    TEXT(" and more.")
    MARKUP("\n")
    "###);
}

#[test]
fn nop_hides_everything() {
    let mut builder = builder_for("nop", &Settings::default());
    builder.add_code("% ltex: language=de-DE").unwrap();

    insta::assert_snapshot!(render(&builder.build()), @r###"MARKUP("% ltex: language=de-DE")"###);
}
