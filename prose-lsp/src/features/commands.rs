use std::path::PathBuf;

use lsp_types::{Range, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_lsp::jsonrpc::{Error, Result};

use prose_core::dialect::dialect_for_path;

pub const COMMAND_CHECK_DOCUMENT: &str = "prose.checkDocument";
pub const COMMAND_GET_SERVER_STATUS: &str = "prose.getServerStatus";

pub fn commands() -> Vec<String> {
    vec![
        COMMAND_CHECK_DOCUMENT.to_string(),
        COMMAND_GET_SERVER_STATUS.to_string(),
    ]
}

/// Failures of a workspace command. Reported to the client as `{success: false}`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot read {uri}: not a file URI")]
    NotAFile { uri: Url },
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("check did not complete")]
    Incomplete,
    #[error("server is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDocumentParams {
    pub uri: Url,
    pub code_language_id: Option<String>,
    pub text: Option<String>,
    pub range: Option<Range>,
}

impl CheckDocumentParams {
    /// The given dialect, else one inferred from the file extension, else plain text.
    pub fn dialect(&self) -> String {
        self.code_language_id
            .clone()
            .or_else(|| dialect_for_path(self.uri.path()).map(str::to_string))
            .unwrap_or_else(|| "plaintext".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceCommand {
    CheckDocument(CheckDocumentParams),
    GetServerStatus,
}

pub fn parse_command(command: &str, arguments: &[Value]) -> Result<WorkspaceCommand> {
    match command {
        COMMAND_CHECK_DOCUMENT => {
            let argument = arguments.first().cloned().unwrap_or(Value::Null);
            let params = serde_json::from_value(argument)
                .map_err(|err| Error::invalid_params(err.to_string()))?;
            Ok(WorkspaceCommand::CheckDocument(params))
        }
        COMMAND_GET_SERVER_STATUS => Ok(WorkspaceCommand::GetServerStatus),
        _ => Err(Error::invalid_request()),
    }
}

pub fn command_result(result: std::result::Result<(), CommandError>) -> Value {
    match result {
        Ok(()) => json!({ "success": true }),
        Err(err) => json!({ "success": false, "errorMessage": err.to_string() }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    pub process_id: u32,
    pub wall_clock_duration: f64,
    pub document_being_checked: Option<Url>,
}

impl ServerStatus {
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "success": true,
            "processId": self.process_id,
            "wallClockDuration": self.wall_clock_duration,
            "isChecking": self.document_being_checked.is_some(),
        });
        if let Some(uri) = &self.document_being_checked {
            value["documentUriBeingChecked"] = json!(uri.as_str());
        }
        value
    }
}
