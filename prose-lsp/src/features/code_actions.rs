//! Quick fixes for matches under the requested range
//!
//!     - one edit per suggested replacement (at most [`MAX_SUGGESTIONS`] per match)
//!     - add unknown words to the dictionary
//!     - hide a false positive by rule id and sentence pattern
//!     - disable the rule
//!
//!     The last three are client commands (`_prose.*`): the editor owns the settings and
//!     writes them, then notifies the server through `didChangeConfiguration`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Command, Range, TextEdit, Url, WorkspaceEdit,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use prose_core::checking::{CheckResult, RuleMatch};
use prose_core::document::Document;
use prose_core::dummy::DUMMY_PATTERN;

use super::diagnostics::{intersects, to_lsp_range};

pub const ACCEPT_SUGGESTIONS: &str = "quickfix.prose.acceptSuggestions";
pub const ADD_TO_DICTIONARY: &str = "quickfix.prose.addToDictionary";
pub const DISABLE_RULES: &str = "quickfix.prose.disableRules";
pub const HIDE_FALSE_POSITIVES: &str = "quickfix.prose.hideFalsePositives";

pub const ADD_TO_DICTIONARY_COMMAND: &str = "_prose.addToDictionary";
pub const DISABLE_RULES_COMMAND: &str = "_prose.disableRules";
pub const HIDE_FALSE_POSITIVES_COMMAND: &str = "_prose.hideFalsePositives";

pub const MAX_SUGGESTIONS: usize = 5;

static DUMMY: Lazy<Regex> = Lazy::new(|| Regex::new(DUMMY_PATTERN).unwrap());

pub fn code_action_kinds() -> Vec<CodeActionKind> {
    [
        ACCEPT_SUGGESTIONS,
        ADD_TO_DICTIONARY,
        DISABLE_RULES,
        HIDE_FALSE_POSITIVES,
    ]
    .into_iter()
    .map(CodeActionKind::from)
    .collect()
}

/// A regex matching `sentence` exactly, with placeholder words matching any placeholder.
pub fn sentence_pattern(sentence: &str) -> String {
    let sentence = sentence.trim();
    let mut pattern = String::from("^");
    let mut last = 0;
    for dummy in DUMMY.find_iter(sentence) {
        pattern.push_str(&regex::escape(&sentence[last..dummy.start()]));
        pattern.push_str(DUMMY_PATTERN);
        last = dummy.end();
    }
    pattern.push_str(&regex::escape(&sentence[last..]));
    pattern.push('$');
    pattern
}

/// Language-keyed, de-duplicated, order-preserving lists.
fn group_by_language<'a>(
    entries: impl Iterator<Item = (&'a str, String)>,
) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for (language, entry) in entries {
        if seen.insert((language.to_string(), entry.clone())) {
            groups.entry(language.to_string()).or_default().push(entry);
        }
    }
    groups
}

fn command_action(
    title: String,
    kind: &str,
    command: &str,
    key: &str,
    uri: &Url,
    groups: BTreeMap<String, Vec<String>>,
) -> CodeActionOrCommand {
    let arguments: Value = json!({ "uri": uri.as_str(), key: groups });
    CodeActionOrCommand::CodeAction(CodeAction {
        title: title.clone(),
        kind: Some(CodeActionKind::from(kind.to_string())),
        command: Some(Command {
            title,
            command: command.to_string(),
            arguments: Some(vec![arguments]),
        }),
        ..CodeAction::default()
    })
}

fn plural(count: usize, one: String, many: impl FnOnce(usize) -> String) -> String {
    if count == 1 {
        one
    } else {
        many(count)
    }
}

pub fn code_actions(
    uri: &Url,
    document: &Document,
    result: &CheckResult,
    range: Range,
    dictionary_supported: bool,
) -> Vec<CodeActionOrCommand> {
    let selected: Vec<(&RuleMatch, Range)> = result
        .matches
        .iter()
        .map(|found| (found, to_lsp_range(document, &found.range)))
        .filter(|(_, match_range)| intersects(match_range, &range))
        .collect();
    if selected.is_empty() {
        return Vec::new();
    }

    let mut actions = Vec::new();

    for (found, match_range) in &selected {
        let mut offered = BTreeSet::new();
        for replacement in found
            .replacements
            .iter()
            .filter(|replacement| offered.insert(replacement.as_str()))
            .take(MAX_SUGGESTIONS)
        {
            let edit = TextEdit::new(*match_range, replacement.clone());
            actions.push(CodeActionOrCommand::CodeAction(CodeAction {
                title: format!("Use '{replacement}'"),
                kind: Some(CodeActionKind::from(ACCEPT_SUGGESTIONS.to_string())),
                edit: Some(WorkspaceEdit {
                    changes: Some(HashMap::from([(uri.clone(), vec![edit])])),
                    ..WorkspaceEdit::default()
                }),
                ..CodeAction::default()
            }));
        }
    }

    if dictionary_supported {
        let words = group_by_language(selected.iter().filter_map(|(found, _)| {
            found
                .word
                .as_ref()
                .filter(|word| !word.is_empty())
                .map(|word| (found.language.as_str(), word.clone()))
        }));
        let count: usize = words.values().map(Vec::len).sum();
        if count > 0 {
            let first = words
                .values()
                .flatten()
                .next()
                .map(String::as_str)
                .unwrap_or("");
            let title = plural(
                count,
                format!("Add '{first}' to dictionary"),
                |count| format!("Add all {count} unknown words to dictionary"),
            );
            actions.push(command_action(
                title,
                ADD_TO_DICTIONARY,
                ADD_TO_DICTIONARY_COMMAND,
                "words",
                uri,
                words,
            ));
        }
    }

    let false_positives = group_by_language(selected.iter().map(|(found, _)| {
        let entry = json!({
            "rule": found.rule_id,
            "sentence": sentence_pattern(&found.sentence),
        });
        (found.language.as_str(), entry.to_string())
    }));
    let count: usize = false_positives.values().map(Vec::len).sum();
    actions.push(command_action(
        plural(count, "Hide false positive".to_string(), |count| {
            format!("Hide all {count} false positives")
        }),
        HIDE_FALSE_POSITIVES,
        HIDE_FALSE_POSITIVES_COMMAND,
        "falsePositives",
        uri,
        false_positives,
    ));

    let rules = group_by_language(
        selected
            .iter()
            .map(|(found, _)| (found.language.as_str(), found.rule_id.clone())),
    );
    let count: usize = rules.values().map(Vec::len).sum();
    actions.push(command_action(
        plural(count, "Disable rule".to_string(), |count| {
            format!("Disable all {count} rules")
        }),
        DISABLE_RULES,
        DISABLE_RULES_COMMAND,
        "ruleIds",
        uri,
        rules,
    ));

    actions
}
