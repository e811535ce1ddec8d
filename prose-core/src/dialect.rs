//! Dialect ids from file names

use std::path::Path;

/// Extension (case-sensitive) to dialect id.
const EXTENSIONS: &[(&str, &str)] = &[
    ("bib", "bibtex"),
    ("c", "c"),
    ("h", "c"),
    ("clj", "clojure"),
    ("coffee", "coffeescript"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hh", "cpp"),
    ("hpp", "cpp"),
    ("inl", "cpp"),
    ("cs", "csharp"),
    ("dart", "dart"),
    ("ex", "elixir"),
    ("elm", "elm"),
    ("erl", "erlang"),
    ("f90", "fortran-modern"),
    ("fs", "fsharp"),
    ("go", "go"),
    ("groovy", "groovy"),
    ("hs", "haskell"),
    ("htm", "html"),
    ("html", "html"),
    ("xht", "html"),
    ("xhtml", "html"),
    ("java", "java"),
    ("js", "javascript"),
    ("jl", "julia"),
    ("kt", "kotlin"),
    ("tex", "latex"),
    ("lisp", "lisp"),
    ("lua", "lua"),
    ("md", "markdown"),
    ("m", "matlab"),
    ("org", "org"),
    ("pl", "perl"),
    ("php", "php"),
    ("txt", "plaintext"),
    ("ps1", "powershell"),
    ("pp", "puppet"),
    ("py", "python"),
    ("r", "r"),
    ("Rmd", "rmd"),
    ("rmd", "rmd"),
    ("rst", "restructuredtext"),
    ("Rnw", "rsweave"),
    ("rnw", "rsweave"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("scala", "scala"),
    ("sh", "shellscript"),
    ("sql", "sql"),
    ("swift", "swift"),
    ("ts", "typescript"),
    ("vb", "vb"),
    ("v", "verilog"),
];

/// The dialect of a file, judged by its extension. `None` for unknown extensions.
pub fn dialect_for_path(path: impl AsRef<Path>) -> Option<&'static str> {
    let extension = path.as_ref().extension()?.to_str()?;
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|(_, dialect)| *dialect)
}
