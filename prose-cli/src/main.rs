//! Command-line interface for prose
//! Checks files without an editor, using the same pipeline and settings as the server.
//!
//! Usage:
//!   prose check `<file>...` [--language `<lang>`] [--config `<file>`] [--log-level `<level>`]
//!
//! Prints one `path:line:col: [rule] message` line per finding and exits with 1 when
//! anything was found, 2 on usage or configuration errors.

mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgMatches, Command};
use prose_config::Loader;
use prose_core::checking::DocumentChecker;
use prose_core::engine::engine_for;
use prose_core::settings::Settings;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("prose")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Check grammar and spelling in markup and source files")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .subcommand(
            Command::new("check")
                .about("Check files and print findings")
                .arg(
                    Arg::new("files")
                        .help("Files to check; the dialect follows the extension")
                        .required(true)
                        .num_args(1..)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("language")
                        .long("language")
                        .short('l')
                        .help("Language code, e.g. en-US or de-DE"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .help("TOML settings file layered over the defaults")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("log-level")
                        .long("log-level")
                        .help("Log level (error, warn, info, debug, trace)"),
                ),
        )
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_settings(matches: &ArgMatches) -> Result<(Settings, String), prose_config::ConfigError> {
    let mut loader = Loader::new();
    if let Some(path) = matches.get_one::<PathBuf>("config") {
        loader = loader.with_file(path);
    }
    if let Some(language) = matches.get_one::<String>("language") {
        loader = loader.set_override("language", language.as_str())?;
    }
    let config = loader.build()?;
    Ok((config.to_settings(), config.log_level))
}

fn handle_check_command(matches: &ArgMatches) -> ExitCode {
    let (settings, configured_level) = match load_settings(matches) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or(configured_level);
    init_tracing(&level);

    let mut checker = DocumentChecker::new(engine_for(&settings));
    let mut found = 0;
    let mut failed = false;
    for path in matches.get_many::<PathBuf>("files").into_iter().flatten() {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("Cannot read {}: {err}", path.display());
                failed = true;
                continue;
            }
        };
        for finding in report::check_text(&mut checker, path, &text, &settings) {
            println!("{finding}");
            found += 1;
        }
    }

    if failed {
        ExitCode::from(2)
    } else if found > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("check", check)) => handle_check_command(check),
        _ => ExitCode::from(2),
    }
}
