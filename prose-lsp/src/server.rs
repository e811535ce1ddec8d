//! Main language server implementation

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tower_lsp::async_trait;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::{
    CodeActionOptions, CodeActionParams, CodeActionProviderCapability, CodeActionResponse,
    ConfigurationItem, Diagnostic, DidChangeConfigurationParams, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    ExecuteCommandOptions, ExecuteCommandParams, InitializeParams, InitializeResult,
    InitializedParams, ServerCapabilities, ServerInfo, TextDocumentContentChangeEvent,
    TextDocumentItem, TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, Url,
};
use tower_lsp::Client;

use prose_config::Loader;
use prose_core::checking::{CancellationCounter, CancellationToken};
use prose_core::document::TextChange;
use prose_core::engine::{engine_for, AnalysisEngine};
use prose_core::settings::Settings;

use crate::features::code_actions::code_action_kinds;
use crate::features::commands::{
    command_result, commands, parse_command, CheckDocumentParams, CommandError, ServerStatus,
    WorkspaceCommand,
};
use crate::features::diagnostics::from_lsp_position;
use crate::worker::{Job, SharedState, Trigger, Worker};

/// The client calls the worker makes. Implemented for [`Client`]; tests record instead.
#[async_trait]
pub trait LspClient: Send + Sync + Clone + 'static {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    );

    async fn configuration(&self, items: Vec<ConfigurationItem>) -> Result<Vec<Value>>;
}

#[async_trait]
impl LspClient for Client {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) {
        Client::publish_diagnostics(self, uri, diagnostics, version).await;
    }

    async fn configuration(&self, items: Vec<ConfigurationItem>) -> Result<Vec<Value>> {
        Client::configuration(self, items).await
    }
}

/// Builds the analysis engine for a set of settings. Called on the blocking pool whenever
/// the server URI, dictionary path or cache size changes.
pub trait EngineProvider: Send + Sync + 'static {
    fn engine(&self, settings: &Settings) -> Box<dyn AnalysisEngine>;
}

#[derive(Default)]
pub struct DefaultEngineProvider;

impl DefaultEngineProvider {
    pub fn new() -> Self {
        Self
    }
}

impl EngineProvider for DefaultEngineProvider {
    fn engine(&self, settings: &Settings) -> Box<dyn AnalysisEngine> {
        engine_for(settings)
    }
}

/// Cancels a command's check when the request future is dropped before it completes.
struct CancelOnDrop {
    counter: CancellationCounter,
    armed: bool,
}

impl CancelOnDrop {
    fn new(counter: CancellationCounter) -> Self {
        Self {
            counter,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.counter.cancel();
        }
    }
}

fn to_text_change(event: TextDocumentContentChangeEvent) -> TextChange {
    match event.range {
        Some(range) => TextChange::replace(
            from_lsp_position(range.start),
            from_lsp_position(range.end),
            event.text,
        ),
        None => TextChange::full(event.text),
    }
}

fn capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                ..TextDocumentSyncOptions::default()
            },
        )),
        code_action_provider: Some(CodeActionProviderCapability::Options(CodeActionOptions {
            code_action_kinds: Some(code_action_kinds()),
            ..CodeActionOptions::default()
        })),
        execute_command_provider: Some(ExecuteCommandOptions {
            commands: commands(),
            ..ExecuteCommandOptions::default()
        }),
        ..ServerCapabilities::default()
    }
}

pub struct ProseLanguageServer<C = Client, P = DefaultEngineProvider> {
    jobs: mpsc::UnboundedSender<Job>,
    cancellations: RwLock<HashMap<Url, CancellationCounter>>,
    shared: Arc<SharedState>,
    _types: PhantomData<fn() -> (C, P)>,
}

impl ProseLanguageServer<Client, DefaultEngineProvider> {
    pub fn new(client: Client) -> Self {
        Self::with_engines(client, Arc::new(DefaultEngineProvider::new()), Loader::new())
    }
}

impl<C, P> ProseLanguageServer<C, P>
where
    C: LspClient,
    P: EngineProvider,
{
    /// Start the server and its worker. Must be called inside a Tokio runtime.
    pub fn with_engines(client: C, engines: Arc<P>, loader: Loader) -> Self {
        let shared = Arc::new(SharedState::default());
        let jobs = Worker::spawn(client, engines, loader, shared.clone());
        Self {
            jobs,
            cancellations: RwLock::new(HashMap::new()),
            shared,
            _types: PhantomData,
        }
    }

    fn enqueue(&self, job: Job) -> bool {
        if self.jobs.send(job).is_err() {
            tracing::error!("worker is gone, dropping request");
            return false;
        }
        true
    }

    async fn counter(&self, uri: &Url) -> Option<CancellationCounter> {
        self.cancellations.read().await.get(uri).cloned()
    }

    /// Invalidate running checks of `uri` and return a token for the next one.
    async fn supersede(&self, uri: &Url) -> Option<CancellationToken> {
        let counter = self.counter(uri).await?;
        counter.cancel();
        Some(counter.token())
    }

    async fn server_status(&self) -> Value {
        ServerStatus {
            process_id: std::process::id(),
            wall_clock_duration: self.shared.started.elapsed().as_secs_f64(),
            document_being_checked: self.shared.being_checked.read().await.clone(),
        }
        .to_value()
    }

    async fn check_document(&self, params: CheckDocumentParams) -> Value {
        let counter = CancellationCounter::new();
        let guard = CancelOnDrop::new(counter.clone());
        let (reply, outcome) = oneshot::channel();
        let queued = self.enqueue(Job::CheckDocument {
            params,
            token: counter.token(),
            reply,
        });
        let outcome = if queued {
            outcome.await.unwrap_or(Err(CommandError::ShuttingDown))
        } else {
            Err(CommandError::ShuttingDown)
        };
        guard.disarm();
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "checkDocument failed");
        }
        command_result(outcome)
    }

    #[cfg(test)]
    async fn settle(&self) {
        let (reply, done) = oneshot::channel();
        if self.enqueue(Job::Barrier(reply)) {
            let _ = done.await;
        }
    }
}

#[async_trait]
impl<C, P> tower_lsp::LanguageServer for ProseLanguageServer<C, P>
where
    C: LspClient,
    P: EngineProvider,
{
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let supports_configuration = params
            .capabilities
            .workspace
            .and_then(|workspace| workspace.configuration)
            .unwrap_or(false);
        self.shared
            .supports_configuration
            .store(supports_configuration, Ordering::SeqCst);

        Ok(InitializeResult {
            capabilities: capabilities(),
            server_info: Some(ServerInfo {
                name: "prose-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("prose-lsp initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let TextDocumentItem {
            uri,
            language_id,
            version,
            text,
        } = params.text_document;
        let counter = CancellationCounter::new();
        if let Some(previous) = self
            .cancellations
            .write()
            .await
            .insert(uri.clone(), counter.clone())
        {
            previous.cancel();
        }
        let token = counter.token();
        self.enqueue(Job::Open {
            uri: uri.clone(),
            dialect: language_id,
            version,
            text,
            cancellation: counter,
        });
        self.enqueue(Job::Check {
            uri,
            trigger: Trigger::Open,
            token,
        });
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(token) = self.supersede(&uri).await else {
            tracing::warn!(uri = %uri, "change for unknown document");
            return;
        };
        self.enqueue(Job::Change {
            uri: uri.clone(),
            version: params.text_document.version,
            changes: params.content_changes.into_iter().map(to_text_change).collect(),
        });
        self.enqueue(Job::Check {
            uri,
            trigger: Trigger::Change,
            token,
        });
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        if let Some(counter) = self.counter(&uri).await {
            self.enqueue(Job::Check {
                uri,
                trigger: Trigger::Save,
                token: counter.token(),
            });
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        if let Some(counter) = self.cancellations.write().await.remove(&uri) {
            counter.cancel();
        }
        self.enqueue(Job::Close { uri });
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.enqueue(Job::ConfigurationChanged {
            settings: params.settings,
        });
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let (reply, actions) = oneshot::channel();
        if !self.enqueue(Job::CodeActions {
            uri: params.text_document.uri,
            range: params.range,
            reply,
        }) {
            return Ok(None);
        }
        match actions.await {
            Ok(actions) if !actions.is_empty() => Ok(Some(actions)),
            _ => Ok(None),
        }
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        match parse_command(&params.command, &params.arguments)? {
            WorkspaceCommand::GetServerStatus => Ok(Some(self.server_status().await)),
            WorkspaceCommand::CheckDocument(params) => Ok(Some(self.check_document(params).await)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::commands::{COMMAND_CHECK_DOCUMENT, COMMAND_GET_SERVER_STATUS};
    use prose_core::annotated::{AnnotatedText, Bias};
    use prose_core::engine::{EngineMatch, EngineSettings};
    use prose_core::error::EngineError;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tower_lsp::jsonrpc::{Error, ErrorCode};
    use tower_lsp::lsp_types::{
        ClientCapabilities, Position, Range, TextDocumentIdentifier,
        VersionedTextDocumentIdentifier, WorkspaceClientCapabilities,
    };
    use tower_lsp::LanguageServer;

    type Published = Arc<Mutex<Vec<(Url, Vec<Diagnostic>, Option<i32>)>>>;

    #[derive(Clone, Default)]
    struct RecordingClient {
        published: Published,
        settings: Arc<Mutex<Option<Value>>>,
    }

    impl RecordingClient {
        fn published(&self) -> Vec<(Url, Vec<Diagnostic>, Option<i32>)> {
            self.published.lock().unwrap().clone()
        }

        fn last_messages(&self) -> Vec<String> {
            self.published()
                .last()
                .map(|(_, diagnostics, _)| diagnostics.iter().map(|d| d.message.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LspClient for RecordingClient {
        async fn publish_diagnostics(
            &self,
            uri: Url,
            diagnostics: Vec<Diagnostic>,
            version: Option<i32>,
        ) {
            self.published
                .lock()
                .unwrap()
                .push((uri, diagnostics, version));
        }

        async fn configuration(&self, items: Vec<ConfigurationItem>) -> Result<Vec<Value>> {
            match self.settings.lock().unwrap().clone() {
                Some(settings) => Ok(items.iter().map(|_| settings.clone()).collect()),
                None => Err(Error::method_not_found()),
            }
        }
    }

    /// Flags every occurrence of "wrong".
    struct FlagEngine {
        calls: Arc<AtomicUsize>,
    }

    impl AnalysisEngine for FlagEngine {
        fn is_ready(&self) -> bool {
            true
        }

        fn check(
            &mut self,
            text: &AnnotatedText,
            _: &EngineSettings,
        ) -> std::result::Result<Vec<EngineMatch>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let plain = text.plain_text();
            Ok(plain
                .match_indices("wrong")
                .map(|(index, word)| EngineMatch {
                    rule_id: "WRONG_RULE".to_string(),
                    sentence: plain.to_string(),
                    from: text.original_offset(index, Bias::Start),
                    to: text.original_offset(index + word.len(), Bias::End),
                    message: "Use <suggestion>right</suggestion>.".to_string(),
                    replacements: vec!["right".to_string()],
                })
                .collect())
        }

        fn enable_rules(&mut self, _: &BTreeSet<String>) {}

        fn disable_rules(&mut self, _: &BTreeSet<String>) {}
    }

    #[derive(Default)]
    struct MockEngineProvider {
        engines_built: AtomicUsize,
        checks: Arc<AtomicUsize>,
    }

    impl MockEngineProvider {
        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl EngineProvider for MockEngineProvider {
        fn engine(&self, _: &Settings) -> Box<dyn AnalysisEngine> {
            self.engines_built.fetch_add(1, Ordering::SeqCst);
            Box::new(FlagEngine {
                calls: self.checks.clone(),
            })
        }
    }

    type TestServer = ProseLanguageServer<RecordingClient, MockEngineProvider>;

    fn server_with(loader: Loader) -> (TestServer, RecordingClient, Arc<MockEngineProvider>) {
        let client = RecordingClient::default();
        let engines = Arc::new(MockEngineProvider::default());
        let server = ProseLanguageServer::with_engines(client.clone(), engines.clone(), loader);
        (server, client, engines)
    }

    fn server() -> (TestServer, RecordingClient, Arc<MockEngineProvider>) {
        server_with(Loader::new())
    }

    fn uri() -> Url {
        Url::parse("file:///notes/readme.md").unwrap()
    }

    async fn open(server: &TestServer, text: &str) {
        server
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri(),
                    language_id: "markdown".to_string(),
                    version: 1,
                    text: text.to_string(),
                },
            })
            .await;
    }

    async fn change(server: &TestServer, version: i32, range: Range, text: &str) {
        server
            .did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: Some(range),
                    range_length: None,
                    text: text.to_string(),
                }],
            })
            .await;
    }

    fn range(a: (u32, u32), b: (u32, u32)) -> Range {
        Range::new(Position::new(a.0, a.1), Position::new(b.0, b.1))
    }

    fn command(command: &str, arguments: Vec<Value>) -> ExecuteCommandParams {
        ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: Default::default(),
        }
    }

    #[tokio::test]
    async fn initialize_advertises_capabilities() {
        let (server, _, _) = server();
        let result = server
            .initialize(InitializeParams {
                capabilities: ClientCapabilities {
                    workspace: Some(WorkspaceClientCapabilities {
                        configuration: Some(true),
                        ..WorkspaceClientCapabilities::default()
                    }),
                    ..ClientCapabilities::default()
                },
                ..InitializeParams::default()
            })
            .await
            .unwrap();

        let Some(TextDocumentSyncCapability::Options(sync)) = result.capabilities.text_document_sync
        else {
            panic!("expected sync options");
        };
        assert_eq!(sync.change, Some(TextDocumentSyncKind::INCREMENTAL));
        assert_eq!(sync.open_close, Some(true));
        assert_eq!(
            result.capabilities.execute_command_provider.unwrap().commands,
            ["prose.checkDocument", "prose.getServerStatus"]
        );
        assert!(result.capabilities.code_action_provider.is_some());
        assert_eq!(result.server_info.unwrap().name, "prose-lsp");
        assert!(server.shared.supports_configuration.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn opening_publishes_diagnostics() {
        let (server, client, engines) = server();
        open(&server, "Some wrong text.\n").await;
        server.settle().await;

        let published = client.published();
        assert_eq!(published.len(), 1);
        let (published_uri, diagnostics, version) = &published[0];
        assert_eq!(published_uri, &uri());
        assert_eq!(*version, Some(1));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, range((0, 5), (0, 10)));
        assert_eq!(diagnostics[0].message, "Use 'right'. \u{2013} WRONG_RULE");
        assert_eq!(engines.engines_built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn code_actions_reuse_cached_result() {
        let (server, _, engines) = server();
        open(&server, "Some wrong text.\n").await;
        server.settle().await;
        let checks = engines.checks();

        let actions = server
            .code_action(CodeActionParams {
                text_document: TextDocumentIdentifier { uri: uri() },
                range: range((0, 6), (0, 6)),
                context: Default::default(),
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(engines.checks(), checks);
        assert!(!actions.is_empty());
    }

    #[tokio::test]
    async fn edits_recheck_the_document() {
        let (server, client, _) = server();
        open(&server, "Some text.\n\nMore text here.\n").await;
        server.settle().await;
        assert!(client.last_messages().is_empty());

        change(&server, 2, range((0, 5), (0, 5)), "wrong ").await;
        server.settle().await;

        let published = client.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].2, Some(2));
    }

    #[tokio::test]
    async fn diagnostics_at_the_caret_are_held_back() {
        let (server, client, _) = server();
        open(&server, "Some text.\n").await;
        server.settle().await;

        // The caret ends up right after the flagged word.
        change(&server, 2, range((0, 10), (0, 10)), " wrong").await;
        server.settle().await;
        assert!(client.last_messages().is_empty());
    }

    #[tokio::test]
    async fn superseded_checks_publish_nothing() {
        let (server, client, engines) = server();
        open(&server, "Some wrong text.\n").await;
        change(&server, 2, range((0, 0), (0, 0)), "Intro.\n").await;
        server.settle().await;

        let published = client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].2, Some(2));
        assert_eq!(engines.checks(), 1);
    }

    #[tokio::test]
    async fn manual_frequency_waits_for_command() {
        let loader = Loader::new().set_override("checkFrequency", "manual").unwrap();
        let (server, client, _) = server_with(loader);
        open(&server, "Some wrong text.\n").await;
        server.settle().await;
        assert!(client.published().is_empty());

        let result = server
            .execute_command(command(
                COMMAND_CHECK_DOCUMENT,
                vec![json!({ "uri": uri().as_str() })],
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, json!({ "success": true }));
        assert_eq!(client.last_messages().len(), 1);
    }

    #[tokio::test]
    async fn check_document_with_text_needs_no_open_document() {
        let (server, client, _) = server();
        let other = Url::parse("file:///notes/draft.tex").unwrap();
        let result = server
            .execute_command(command(
                COMMAND_CHECK_DOCUMENT,
                vec![json!({
                    "uri": other.as_str(),
                    "text": "A \\textbf{wrong} word.",
                })],
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["success"], true);
        let published = client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, other);
        assert_eq!(published[0].1[0].range, range((0, 10), (0, 15)));
        assert_eq!(published[0].2, None);
    }

    #[tokio::test]
    async fn check_document_reports_unreadable_files() {
        let (server, client, _) = server();
        let dir = tempfile::tempdir().unwrap();
        let missing = Url::from_file_path(dir.path().join("missing.md")).unwrap();
        let result = server
            .execute_command(command(
                COMMAND_CHECK_DOCUMENT,
                vec![json!({ "uri": missing.as_str() })],
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["success"], false);
        assert!(result["errorMessage"]
            .as_str()
            .unwrap()
            .starts_with("cannot read"));
        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn closing_clears_diagnostics() {
        let (server, client, _) = server();
        open(&server, "Some wrong text.\n").await;
        server
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri() },
            })
            .await;
        server.settle().await;

        let published = client.published();
        let (_, diagnostics, _) = published.last().unwrap();
        assert!(diagnostics.is_empty());
        assert!(server.counter(&uri()).await.is_none());
    }

    #[tokio::test]
    async fn client_settings_are_applied() {
        let (server, client, _) = server();
        server
            .initialize(InitializeParams {
                capabilities: ClientCapabilities {
                    workspace: Some(WorkspaceClientCapabilities {
                        configuration: Some(true),
                        ..WorkspaceClientCapabilities::default()
                    }),
                    ..ClientCapabilities::default()
                },
                ..InitializeParams::default()
            })
            .await
            .unwrap();
        *client.settings.lock().unwrap() = Some(json!({ "enabled": ["latex"] }));

        open(&server, "Some wrong text.\n").await;
        server.settle().await;
        assert!(client.last_messages().is_empty());

        *client.settings.lock().unwrap() = Some(json!({ "enabled": ["markdown"] }));
        server
            .did_change_configuration(DidChangeConfigurationParams {
                settings: Value::Null,
            })
            .await;
        server.settle().await;
        assert_eq!(client.last_messages().len(), 1);
    }

    #[tokio::test]
    async fn configuration_notifications_apply_without_pull_support() {
        let (server, client, _) = server();
        open(&server, "Some wrong text.\n").await;
        server.settle().await;
        assert_eq!(client.last_messages().len(), 1);

        server
            .did_change_configuration(DidChangeConfigurationParams {
                settings: json!({ "prose": { "disabledRules": { "en-US": ["WRONG_RULE"] } } }),
            })
            .await;
        server.settle().await;
        // The mock ignores disabled rules; the recheck itself is what matters.
        assert_eq!(client.published().len(), 2);
    }

    #[tokio::test]
    async fn settings_changes_invalidate_cached_results() {
        let (server, client, engines) = server();
        open(&server, "Some wrong text.\n").await;
        server.settle().await;
        assert_eq!(client.last_messages().len(), 1);
        let checks = engines.checks();

        let hidden = json!({ "rule": "WRONG_RULE", "sentence": "^Some wrong text\\.$" });
        server
            .did_change_configuration(DidChangeConfigurationParams {
                settings: json!({
                    "prose": { "hiddenFalsePositives": { "en-US": [hidden.to_string()] } }
                }),
            })
            .await;
        server.settle().await;

        assert!(engines.checks() > checks);
        assert!(client.last_messages().is_empty());
    }

    #[tokio::test]
    async fn server_status_reports_process() {
        let (server, _, _) = server();
        let status = server
            .execute_command(command(COMMAND_GET_SERVER_STATUS, Vec::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status["success"], true);
        assert_eq!(status["processId"], std::process::id());
        assert_eq!(status["isChecking"], false);
    }

    #[tokio::test]
    async fn unknown_commands_are_rejected() {
        let (server, _, _) = server();
        let err = server
            .execute_command(command("prose.unknown", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn dropped_commands_cancel_their_check() {
        let counter = CancellationCounter::new();
        let token = counter.token();
        drop(CancelOnDrop::new(counter.clone()));
        assert!(token.is_cancelled());

        let token = counter.token();
        CancelOnDrop::new(counter).disarm();
        assert!(!token.is_cancelled());
    }
}
