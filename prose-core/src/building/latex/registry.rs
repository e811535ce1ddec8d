//! Known LaTeX commands and environments
//!
//!     The default table covers the usual citation, reference, acronym and preamble
//!     commands. User settings add entries on top; since matching picks the longest match
//!     and later entries win ties, an override with the same prototype replaces the default.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::signature::{Action, CommandSignature, EnvironmentSignature};
use crate::dummy::DummyGenerator;

const DUMMY: Action = Action::Dummy(DummyGenerator::SINGULAR);
const PLURAL: Action = Action::Dummy(DummyGenerator::PLURAL);
const IGNORE: Action = Action::Ignore;

/// Acronym commands from the `acro` and `glossaries` families, each in four variants.
const ACRONYM_COMMANDS: &[&str] = &[
    "ac", "Ac", "aca", "Aca", "acap", "Acap", "acf", "Acf", "acfp", "Acfp", "acl", "Acl", "aclp",
    "Aclp", "acp", "Acp", "acs", "Acs", "acsp", "Acsp", "iac", "Iac", "iaca", "Iaca", "iacf",
    "Iacf", "iacl", "Iacl", "iacs", "Iacs",
];

/// biblatex citation commands taking up to two optional arguments.
const CITATION_COMMANDS: &[&str] = &[
    "autocite",
    "Autocite",
    "autocite*",
    "Autocite*",
    "cite",
    "Cite",
    "cite*",
    "citeauthor",
    "Citeauthor",
    "citeauthor*",
    "Citeauthor*",
    "citedate",
    "citedate*",
    "citetitle",
    "citetitle*",
    "citeurl",
    "citeyear",
    "citeyear*",
    "footcite",
    "footcitetext",
    "parencite",
    "Parencite",
    "parencite*",
    "smartcite",
    "Smartcite",
    "textcite",
    "Textcite",
];

/// natbib citation commands taking one optional argument.
const NATBIB_COMMANDS: &[&str] = &[
    "citealp", "citealp*", "citealt", "citealt*", "citep", "citep*", "citet", "citet*",
];

/// Multi-citation commands; they read as a plural noun.
const MULTI_CITATION_COMMANDS: &[&str] = &[
    "autocites",
    "Autocites",
    "cites",
    "Cites",
    "textcites",
    "Textcites",
];

const OTHER_COMMANDS: &[(&str, Action)] = &[
    (r"\acreset{}", IGNORE),
    (r"\acresetall", IGNORE),
    (r"\acsetup{}", IGNORE),
    (r"\acuse{}", IGNORE),
    (r"\acuseall", IGNORE),
    (r"\addbibresource{}", IGNORE),
    (r"\addcontentsline{}{}{}", IGNORE),
    (r"\addtocontents{}", IGNORE),
    (r"\addtocounter{}{}", IGNORE),
    (r"\addtokomafont{}{}", IGNORE),
    (r"\algdef{}[]{}{}", IGNORE),
    (r"\algnewcommand{}{}", IGNORE),
    (r"\algrenewcommand{}{}", IGNORE),
    (r"\arabic{}", DUMMY),
    (r"\AtBeginEnvironment{}{}", IGNORE),
    (r"\AtEndEnvironment{}{}", IGNORE),
    (r"\autopageref{}", DUMMY),
    (r"\autopageref*{}", DUMMY),
    (r"\autoref{}", DUMMY),
    (r"\autoref*{}", DUMMY),
    (r"\babeltags{}", IGNORE),
    (r"\bibitem{}", IGNORE),
    (r"\bibliography{}", IGNORE),
    (r"\bibliographystyle{}", IGNORE),
    (r"\captionof{}", IGNORE),
    (r"\captionsetup{}", IGNORE),
    (r"\captionsetup[]{}", IGNORE),
    (r"\clearfield{}", IGNORE),
    (r"\color{}", IGNORE),
    (r"\color[]{}", IGNORE),
    (r"\colorbox{}", IGNORE),
    (r"\colorlet{}{}", IGNORE),
    (r"\cref{}", DUMMY),
    (r"\Cref{}", DUMMY),
    (r"\crefname{}{}{}", IGNORE),
    (r"\Crefname{}{}{}", IGNORE),
    (r"\DeclareAcronym{}{}", IGNORE),
    (r"\DeclareCaptionFormat{}{}", IGNORE),
    (r"\DeclareCaptionLabelFormat{}{}", IGNORE),
    (r"\DeclareFieldFormat{}{}", IGNORE),
    (r"\DeclareFieldFormat[]{}{}", IGNORE),
    (r"\DeclareGraphicsExtensions{}", IGNORE),
    (r"\DeclareMathOperator{}{}", IGNORE),
    (r"\DeclareMathOperator*{}{}", IGNORE),
    (r"\DeclareSIUnit{}{}", IGNORE),
    (r"\declaretheorem{}", IGNORE),
    (r"\declaretheorem[]{}", IGNORE),
    (r"\definecolor{}{}{}", IGNORE),
    (r"\documentclass{}", IGNORE),
    (r"\documentclass[]{}", IGNORE),
    (r"\email{}", DUMMY),
    (r"\enlargethispage{}", IGNORE),
    (r"\eqref{}", DUMMY),
    (r"\fcolorbox{}", IGNORE),
    (r"\floatname{}{}", IGNORE),
    (r"\floatstyle{}", IGNORE),
    (r"\footnote{}", IGNORE),
    (r"\footnote[]{}", IGNORE),
    (r"\foreignlanguage{}{}", IGNORE),
    (r"\foreignlanguage[]{}{}", IGNORE),
    (r"\geometry{}", IGNORE),
    (r"\graphicspath{}", IGNORE),
    (r"\href{}{}", DUMMY),
    (r"\hyperref[]", IGNORE),
    (r"\hypersetup{}", IGNORE),
    (r"\include{}", IGNORE),
    (r"\includegraphics{}", IGNORE),
    (r"\includegraphics[]{}", IGNORE),
    (r"\includepdf{}", IGNORE),
    (r"\includepdf[]{}", IGNORE),
    (r"\input{}", IGNORE),
    (r"\KOMAoptions{}", IGNORE),
    (r"\KOMAScript", DUMMY),
    (r"\label{}", IGNORE),
    (r"\LaTeX", DUMMY),
    (r"\lettrine{}{}", DUMMY),
    (r"\lettrine[]{}{}", DUMMY),
    (r"\linespread{}", IGNORE),
    (r"\multicolumn{}{}", IGNORE),
    (r"\multirow{}{}", IGNORE),
    (r"\newboolean{}", IGNORE),
    (r"\newcolumntype{}{}", IGNORE),
    (r"\newcommand{}{}", IGNORE),
    (r"\newcommand{}[]{}", IGNORE),
    (r"\newcommand{}[][]{}", IGNORE),
    (r"\newcommand*{}{}", IGNORE),
    (r"\newcommand*{}[]{}", IGNORE),
    (r"\newcommand*{}[][]{}", IGNORE),
    (r"\newcounter{}", IGNORE),
    (r"\newenvironment{}{}{}", IGNORE),
    (r"\newenvironment{}[]{}{}", IGNORE),
    (r"\newenvironment*{}{}{}", IGNORE),
    (r"\newenvironment*{}[]{}{}", IGNORE),
    (r"\newgeometry{}", IGNORE),
    (r"\newglossaryentry{}{}", IGNORE),
    (r"\newtheorem{}{}", IGNORE),
    (r"\newtheorem{}{}[]", IGNORE),
    (r"\newtheorem{}[]{}", IGNORE),
    (r"\newtheorem*{}{}", IGNORE),
    (r"\newtoggle{}", IGNORE),
    (r"\nolinkurl{}", DUMMY),
    (r"\PackageWarning{}{}", IGNORE),
    (r"\pagecolor{}", IGNORE),
    (r"\pagenumbering{}", IGNORE),
    (r"\pageref{}", DUMMY),
    (r"\pageref*{}", DUMMY),
    (r"\pagestyle{}", IGNORE),
    (r"\pdfbookmark{}{}", IGNORE),
    (r"\pdfbookmark[]{}{}", IGNORE),
    (r"\printacronyms", IGNORE),
    (r"\printacronyms[]", IGNORE),
    (r"\printbibliography", IGNORE),
    (r"\printbibliography[]", IGNORE),
    (r"\printglossary", IGNORE),
    (r"\printglossary[]", IGNORE),
    (r"\providecommand{}{}", IGNORE),
    (r"\providecommand{}[]{}", IGNORE),
    (r"\providecommand*{}{}", IGNORE),
    (r"\providecommand*{}[]{}", IGNORE),
    (r"\raisebox{}", IGNORE),
    (r"\ref{}", DUMMY),
    (r"\ref*{}", DUMMY),
    (r"\renewcommand{}{}", IGNORE),
    (r"\renewcommand{}[]{}", IGNORE),
    (r"\renewcommand{}[][]{}", IGNORE),
    (r"\renewcommand*{}{}", IGNORE),
    (r"\renewcommand*{}[]{}", IGNORE),
    (r"\renewcommand*{}[][]{}", IGNORE),
    (r"\renewenvironment{}{}{}", IGNORE),
    (r"\renewenvironment{}[]{}{}", IGNORE),
    (r"\renewenvironment*{}{}{}", IGNORE),
    (r"\renewenvironment*{}[]{}{}", IGNORE),
    (r"\RequirePackage{}", IGNORE),
    (r"\RequirePackage[]{}", IGNORE),
    (r"\scalebox{}", IGNORE),
    (r"\selectlanguage{}", IGNORE),
    (r"\setboolean{}", IGNORE),
    (r"\setcounter{}{}", IGNORE),
    (r"\setkomafont{}{}", IGNORE),
    (r"\setlength{}{}", IGNORE),
    (r"\setlist{}", IGNORE),
    (r"\setlist[]{}", IGNORE),
    (r"\setstretch{}", IGNORE),
    (r"\sisetup{}", IGNORE),
    (r"\stepcounter{}", IGNORE),
    (r"\supercite{}", DUMMY),
    (r"\SweaveInput{}", IGNORE),
    (r"\SweaveOpts{}", IGNORE),
    (r"\SweaveSyntax{}", IGNORE),
    (r"\TeX", DUMMY),
    (r"\textcolor{}", IGNORE),
    (r"\textcolor[]{}", IGNORE),
    (r"\textproc{}", DUMMY),
    (r"\theoremstyle{}", IGNORE),
    (r"\thispagestyle{}", IGNORE),
    (r"\tikz{}", IGNORE),
    (r"\tikzset{}", IGNORE),
    (r"\todo{}", IGNORE),
    (r"\todo[]{}", IGNORE),
    (r"\togglefalse{}", IGNORE),
    (r"\toggletrue{}", IGNORE),
    (r"\url{}", DUMMY),
    (r"\usepackage{}", IGNORE),
    (r"\usepackage[]{}", IGNORE),
    (r"\usetikzlibrary{}", IGNORE),
    (r"\value{}", IGNORE),
    (r"\vspace{}", IGNORE),
    (r"\vspace*{}", IGNORE),
];

const DEFAULT_ENVIRONMENTS: &[&str] = &[
    "lstlisting",
    "otherlanguage",
    "otherlanguage*",
    "tikzpicture",
    "verbatim",
];

fn default_command_prototypes() -> Vec<(String, Action)> {
    let mut prototypes = Vec::new();
    for name in ACRONYM_COMMANDS {
        for arguments in ["{}", "[]{}"] {
            prototypes.push((format!("\\{name}{arguments}"), DUMMY));
            prototypes.push((format!("\\{name}*{arguments}"), DUMMY));
        }
    }
    for name in CITATION_COMMANDS {
        for arguments in ["{}", "[]{}", "[][]{}"] {
            prototypes.push((format!("\\{name}{arguments}"), DUMMY));
        }
    }
    for name in NATBIB_COMMANDS {
        for arguments in ["{}", "[]{}"] {
            prototypes.push((format!("\\{name}{arguments}"), DUMMY));
        }
    }
    for name in MULTI_CITATION_COMMANDS {
        let mut arguments = String::new();
        for _ in 0..5 {
            arguments.push_str("{}");
            prototypes.push((format!("\\{name}{arguments}"), PLURAL));
        }
        let mut arguments = String::from("()()");
        for _ in 0..5 {
            arguments.push_str("[][]{}");
            prototypes.push((format!("\\{name}{arguments}"), PLURAL));
        }
    }
    prototypes.extend(
        OTHER_COMMANDS
            .iter()
            .map(|(prototype, action)| (prototype.to_string(), *action)),
    );
    prototypes
}

/// Immutable lookup tables for the LaTeX builder, keyed by literal prefix.
#[derive(Debug, Default)]
pub struct LatexRegistry {
    commands: HashMap<String, Vec<CommandSignature>>,
    environments: HashMap<String, Vec<EnvironmentSignature>>,
}

static DEFAULT_REGISTRY: Lazy<Arc<LatexRegistry>> =
    Lazy::new(|| Arc::new(LatexRegistry::build(&BTreeMap::new(), &BTreeMap::new())));

impl LatexRegistry {
    /// The shared default registry.
    pub fn defaults() -> Arc<LatexRegistry> {
        Arc::clone(&DEFAULT_REGISTRY)
    }

    /// The registry for a set of overrides; the shared default when there are none.
    pub fn with_overrides(
        commands: &BTreeMap<String, String>,
        environments: &BTreeMap<String, String>,
    ) -> Arc<LatexRegistry> {
        if commands.is_empty() && environments.is_empty() {
            Self::defaults()
        } else {
            Arc::new(Self::build(commands, environments))
        }
    }

    fn build(
        command_overrides: &BTreeMap<String, String>,
        environment_overrides: &BTreeMap<String, String>,
    ) -> Self {
        let mut registry = Self::default();

        for (prototype, action) in default_command_prototypes() {
            registry.add_command(&prototype, action);
        }
        for (prototype, value) in command_overrides {
            match Action::parse(value) {
                Some(action) => registry.add_command(prototype, action),
                None => {
                    tracing::warn!(
                        command = %prototype,
                        action = %value,
                        "ignoring unknown LaTeX command action"
                    )
                }
            }
        }

        for name in DEFAULT_ENVIRONMENTS {
            registry.add_environment(name, Action::Ignore);
        }
        for (prototype, value) in environment_overrides {
            match Action::parse(value) {
                Some(action @ (Action::Default | Action::Ignore)) => {
                    registry.add_environment(prototype, action)
                }
                _ => {
                    tracing::warn!(
                        environment = %prototype,
                        action = %value,
                        "ignoring unknown LaTeX environment action"
                    )
                }
            }
        }

        registry
    }

    fn add_command(&mut self, prototype: &str, action: Action) {
        if let Some(signature) = CommandSignature::parse(prototype, action) {
            self.commands
                .entry(signature.prefix().to_string())
                .or_default()
                .push(signature);
        }
    }

    fn add_environment(&mut self, prototype: &str, action: Action) {
        if let Some(signature) = EnvironmentSignature::parse(prototype, action) {
            self.environments
                .entry(signature.prefix().to_string())
                .or_default()
                .push(signature);
        }
    }

    /// The longest matching command signature at `pos`; later entries win ties.
    pub fn match_command(
        &self,
        command: &str,
        code: &str,
        pos: usize,
    ) -> Option<(&CommandSignature, usize)> {
        let mut best: Option<(&CommandSignature, usize)> = None;
        for signature in self.commands.get(command).into_iter().flatten() {
            if let Some(end) = signature.match_at(code, pos) {
                if best.map_or(true, |(_, best_end)| end >= best_end) {
                    best = Some((signature, end));
                }
            }
        }
        best
    }

    /// The matching environment signature for a `\begin{name}` at `pos`.
    ///
    /// Bare-name signatures win over full prototypes regardless of match length.
    pub fn match_environment(
        &self,
        begin: &str,
        code: &str,
        pos: usize,
    ) -> Option<(&EnvironmentSignature, usize)> {
        let mut best: Option<(&EnvironmentSignature, usize)> = None;
        for signature in self.environments.get(begin).into_iter().flatten() {
            if let Some(end) = signature.match_at(code, pos) {
                let longer = best.map_or(true, |(_, best_end)| end >= best_end);
                if longer || signature.ignores_all_arguments() {
                    best = Some((signature, end));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_shared() {
        let first = LatexRegistry::defaults();
        let second = LatexRegistry::with_overrides(&BTreeMap::new(), &BTreeMap::new());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn longest_match_wins() {
        let registry = LatexRegistry::defaults();
        let code = r"\cite[a][b]{key}";
        let (signature, end) = registry.match_command(r"\cite", code, 0).unwrap();
        assert_eq!(end, code.len());
        assert_eq!(signature.arguments().len(), 3);
    }

    #[test]
    fn overrides_take_precedence() {
        let commands = BTreeMap::from([(r"\ref{}".to_string(), "ignore".to_string())]);
        let registry = LatexRegistry::with_overrides(&commands, &BTreeMap::new());
        let (signature, _) = registry.match_command(r"\ref", r"\ref{x}", 0).unwrap();
        assert_eq!(signature.action(), Action::Ignore);
    }

    #[test]
    fn unknown_actions_are_skipped() {
        let commands = BTreeMap::from([(r"\foo{}".to_string(), "explode".to_string())]);
        let registry = LatexRegistry::with_overrides(&commands, &BTreeMap::new());
        assert!(registry.match_command(r"\foo", r"\foo{x}", 0).is_none());
    }
}
