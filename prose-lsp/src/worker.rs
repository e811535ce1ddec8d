//! The single worker queue
//!
//!     Protocol handlers never touch documents. They enqueue a [`Job`] and return; one
//!     worker task owns every open [`Document`] and applies jobs strictly in submission
//!     order. Checks run on the blocking pool and the worker awaits each before taking the
//!     next job, so an edit can never interleave with the check of an older text.
//!
//!     Cancellation tokens are taken when a check is enqueued, not when it starts. An edit
//!     that arrives while a check is waiting in the queue or running on the blocking pool
//!     bumps the document's counter, and the stale check publishes nothing.

use std::collections::HashMap;
use std::ops::Range as ByteRange;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use lsp_types::{CodeActionOrCommand, ConfigurationItem, Range, Url};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use prose_config::Loader;
use prose_core::checking::{
    CancellationCounter, CancellationToken, CheckRequest, CheckResult, DocumentChecker,
};
use prose_core::document::{Document, TextChange};
use prose_core::engine::NullEngine;
use prose_core::settings::{CheckFrequency, Settings};

use crate::features::code_actions::code_actions;
use crate::features::commands::{CheckDocumentParams, CommandError};
use crate::features::diagnostics::{
    diagnostics, from_lsp_range, hold_back_at_caret, to_lsp_position, CARET_DELAY,
};
use crate::server::{EngineProvider, LspClient};

/// Client settings section holding the checker configuration.
pub const SETTINGS_SECTION: &str = "prose";

/// What caused a check. Decides, together with the check frequency, whether it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Open,
    Change,
    Save,
    Configuration,
}

impl Trigger {
    pub fn applies(self, frequency: CheckFrequency) -> bool {
        match (self, frequency) {
            (_, CheckFrequency::Manual) => false,
            (Trigger::Open | Trigger::Configuration, _) => true,
            (Trigger::Change, CheckFrequency::Edit) => true,
            (Trigger::Save, CheckFrequency::Save) => true,
            _ => false,
        }
    }
}

pub enum Job {
    Open {
        uri: Url,
        dialect: String,
        version: i32,
        text: String,
        cancellation: CancellationCounter,
    },
    Change {
        uri: Url,
        version: i32,
        changes: Vec<TextChange>,
    },
    Close {
        uri: Url,
    },
    Check {
        uri: Url,
        trigger: Trigger,
        token: CancellationToken,
    },
    CheckDocument {
        params: CheckDocumentParams,
        token: CancellationToken,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    CodeActions {
        uri: Url,
        range: Range,
        reply: oneshot::Sender<Vec<CodeActionOrCommand>>,
    },
    /// Publish held-back diagnostics if the caret has not moved since `caret_changed_at`.
    Republish {
        uri: Url,
        caret_changed_at: Instant,
    },
    /// Settings changed on the client. `settings` is the notification payload, used when
    /// the client cannot answer `workspace/configuration`.
    ConfigurationChanged {
        settings: Value,
    },
    #[cfg(test)]
    Barrier(oneshot::Sender<()>),
}

/// State the protocol handlers read without going through the queue.
#[derive(Debug)]
pub struct SharedState {
    pub started: Instant,
    pub supports_configuration: AtomicBool,
    pub being_checked: RwLock<Option<Url>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            supports_configuration: AtomicBool::new(false),
            being_checked: RwLock::new(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EngineKey {
    server_uri: Option<String>,
    dictionary_path: Option<PathBuf>,
    cache_size: usize,
}

impl EngineKey {
    fn new(settings: &Settings) -> Self {
        Self {
            server_uri: settings.language_tool_http_server_uri().map(str::to_string),
            dictionary_path: settings.spelling_dictionary_path().cloned(),
            cache_size: settings.sentence_cache_size(),
        }
    }
}

/// The checker plus what its engine was built from. Only touched on the blocking pool.
struct EngineSlot {
    checker: DocumentChecker,
    key: Option<EngineKey>,
}

impl EngineSlot {
    fn prepare<P: EngineProvider>(&mut self, settings: &Settings, engines: &P) {
        let key = EngineKey::new(settings);
        if self.key.as_ref() != Some(&key) {
            tracing::info!(
                server = ?key.server_uri,
                dictionaries = ?key.dictionary_path,
                "setting up analysis engine"
            );
            self.checker.set_engine(engines.engine(settings));
            self.key = Some(key);
        }
    }
}

pub struct Worker<C, P> {
    client: C,
    engines: Arc<P>,
    loader: Loader,
    base_settings: Settings,
    shared: Arc<SharedState>,
    documents: HashMap<Url, Document>,
    slot: Arc<Mutex<EngineSlot>>,
    jobs: mpsc::WeakUnboundedSender<Job>,
}

impl<C, P> Worker<C, P>
where
    C: LspClient,
    P: EngineProvider,
{
    /// Start the worker task and return its queue.
    pub fn spawn(
        client: C,
        engines: Arc<P>,
        loader: Loader,
        shared: Arc<SharedState>,
    ) -> mpsc::UnboundedSender<Job> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let base_settings = match loader.clone().build() {
            Ok(config) => config.to_settings(),
            Err(err) => {
                tracing::warn!(error = %err, "invalid configuration, using defaults");
                Settings::default()
            }
        };
        let worker = Self {
            client,
            engines,
            loader,
            base_settings,
            shared,
            documents: HashMap::new(),
            slot: Arc::new(Mutex::new(EngineSlot {
                checker: DocumentChecker::new(Box::new(NullEngine)),
                key: None,
            })),
            jobs: sender.downgrade(),
        };
        tokio::spawn(worker.run(receiver));
        sender
    }

    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            self.handle(job).await;
        }
        tracing::debug!("worker queue closed");
        // The HTTP engine owns a blocking client, which must not be dropped on a runtime thread.
        let slot = self.slot.clone();
        drop(self);
        if let Err(err) = tokio::task::spawn_blocking(move || drop(slot)).await {
            tracing::error!(error = %err, "could not release analysis engine");
        }
    }

    fn configuration_changed(&mut self, settings: Value) {
        let Some(section @ Value::Object(_)) = settings.get(SETTINGS_SECTION) else {
            return;
        };
        match self.loader.clone().with_json(&section.to_string()).build() {
            Ok(config) => {
                tracing::info!("settings updated");
                self.base_settings = config.to_settings();
            }
            Err(err) => tracing::warn!(error = %err, "ignoring invalid settings"),
        }
    }

    async fn handle(&mut self, job: Job) {
        match job {
            Job::Open {
                uri,
                dialect,
                version,
                text,
                cancellation,
            } => {
                tracing::info!(uri = %uri, dialect = %dialect, "document opened");
                let document = Document::new(uri.as_str(), dialect, version, text)
                    .with_cancellation(cancellation);
                self.documents.insert(uri, document);
            }
            Job::Change {
                uri,
                version,
                changes,
            } => match self.documents.get_mut(&uri) {
                Some(document) => {
                    document.set_version(version);
                    document.apply_changes(&changes);
                }
                None => tracing::warn!(uri = %uri, "change for unknown document"),
            },
            Job::Close { uri } => {
                self.documents.remove(&uri);
                let settings = self.settings_for(&uri).await;
                if settings.clear_diagnostics_when_closing_file() {
                    self.client.publish_diagnostics(uri, Vec::new(), None).await;
                }
            }
            Job::Check {
                uri,
                trigger,
                token,
            } => self.check(uri, trigger, token).await,
            Job::CheckDocument {
                params,
                token,
                reply,
            } => {
                let outcome = self.check_document_command(params, token).await;
                if reply.send(outcome).is_err() {
                    tracing::debug!("checkDocument caller went away");
                }
            }
            Job::CodeActions { uri, range, reply } => {
                let actions = self.code_actions(&uri, range).await;
                if reply.send(actions).is_err() {
                    tracing::debug!("code action caller went away");
                }
            }
            Job::Republish {
                uri,
                caret_changed_at,
            } => self.republish(&uri, caret_changed_at).await,
            Job::ConfigurationChanged { settings } => {
                self.configuration_changed(settings);
                let uris: Vec<Url> = self.documents.keys().cloned().collect();
                for uri in uris {
                    let Some(document) = self.documents.get(&uri) else {
                        continue;
                    };
                    document.cancellation().cancel();
                    let token = document.cancellation().token();
                    self.check(uri, Trigger::Configuration, token).await;
                }
            }
            #[cfg(test)]
            Job::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// Settings for `uri`: the client's `prose` section layered over the configured files.
    async fn settings_for(&self, uri: &Url) -> Settings {
        if !self.shared.supports_configuration.load(Ordering::SeqCst) {
            return self.base_settings.clone();
        }
        let item = ConfigurationItem {
            scope_uri: Some(uri.clone()),
            section: Some(SETTINGS_SECTION.to_string()),
        };
        let values = match self.client.configuration(vec![item]).await {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(uri = %uri, error = %err, "could not fetch client settings");
                return self.base_settings.clone();
            }
        };
        match values.into_iter().next() {
            Some(value @ Value::Object(_)) => {
                match self.loader.clone().with_json(&value.to_string()).build() {
                    Ok(config) => config.to_settings(),
                    Err(err) => {
                        tracing::warn!(
                            uri = %uri,
                            error = %err,
                            "ignoring invalid client settings"
                        );
                        self.base_settings.clone()
                    }
                }
            }
            _ => self.base_settings.clone(),
        }
    }

    async fn check(&mut self, uri: Url, trigger: Trigger, token: CancellationToken) {
        if token.is_cancelled() || !self.documents.contains_key(&uri) {
            tracing::debug!(uri = %uri, "skipping superseded check");
            return;
        }
        let settings = self.settings_for(&uri).await;
        if !trigger.applies(settings.check_frequency()) {
            return;
        }
        if let Some(result) = self.check_open(&uri, &settings, None, &token).await {
            self.publish(&uri, &settings, &result, true).await;
        }
    }

    /// Run the pipeline on the blocking pool. `None` when cancelled or failed.
    async fn run_check(
        &self,
        uri: &Url,
        dialect: String,
        text: String,
        settings: Settings,
        range: Option<ByteRange<usize>>,
        token: CancellationToken,
    ) -> Option<CheckResult> {
        *self.shared.being_checked.write().await = Some(uri.clone());
        let slot = self.slot.clone();
        let engines = self.engines.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.prepare(&settings, engines.as_ref());
            let request = CheckRequest::new(&dialect, &text, &settings).with_range(range);
            slot.checker.check(&request, &token)
        })
        .await;
        *self.shared.being_checked.write().await = None;

        match outcome {
            Ok(Ok(result)) => Some(result),
            Ok(Err(cancelled)) => {
                tracing::debug!(uri = %uri, "{cancelled}");
                None
            }
            Err(err) => {
                tracing::error!(uri = %uri, error = %err, "check task failed");
                None
            }
        }
    }

    /// Check an open document, reusing its cached result when text and settings are
    /// unchanged.
    async fn check_open(
        &mut self,
        uri: &Url,
        settings: &Settings,
        range: Option<ByteRange<usize>>,
        token: &CancellationToken,
    ) -> Option<Arc<CheckResult>> {
        let document = self.documents.get_mut(uri)?;
        if range.is_none() {
            if let Some(result) = document.cached_result_for(settings) {
                tracing::debug!(uri = %uri, "using cached check result");
                return Some(result);
            }
        }

        let dialect = document.dialect().to_string();
        let text = document.text().to_string();
        document.set_being_checked(true);
        let result = self
            .run_check(uri, dialect, text, settings.clone(), range.clone(), token.clone())
            .await;

        let document = self.documents.get_mut(uri)?;
        document.set_being_checked(false);
        let result = Arc::new(result?);
        if token.is_cancelled() {
            return None;
        }
        if range.is_none() {
            document.set_cached_result(result.clone(), settings.clone());
        }
        Some(result)
    }

    async fn check_document_command(
        &mut self,
        params: CheckDocumentParams,
        token: CancellationToken,
    ) -> Result<(), CommandError> {
        let uri = params.uri.clone();
        let settings = self.settings_for(&uri).await;

        if params.text.is_none() {
            if let Some(document) = self.documents.get(&uri) {
                let range = params.range.map(|range| from_lsp_range(document, range));
                let result = self
                    .check_open(&uri, &settings, range, &token)
                    .await
                    .ok_or(CommandError::Incomplete)?;
                self.publish(&uri, &settings, &result, false).await;
                return Ok(());
            }
        }

        let text = match &params.text {
            Some(text) => text.clone(),
            None => read_file(&uri).await?,
        };
        let document = Document::new(uri.as_str(), params.dialect(), 0, text);
        let range = params.range.map(|range| from_lsp_range(&document, range));
        let result = self
            .run_check(
                &uri,
                document.dialect().to_string(),
                document.text().to_string(),
                settings.clone(),
                range,
                token.clone(),
            )
            .await
            .ok_or(CommandError::Incomplete)?;
        if token.is_cancelled() {
            return Err(CommandError::Incomplete);
        }
        self.publish_for(&uri, &document, None, &settings, &result, false)
            .await;
        Ok(())
    }

    async fn code_actions(&mut self, uri: &Url, range: Range) -> Vec<CodeActionOrCommand> {
        let Some(document) = self.documents.get(uri) else {
            return Vec::new();
        };
        let token = document.cancellation().token();
        let settings = self.settings_for(uri).await;
        let Some(result) = self.check_open(uri, &settings, None, &token).await else {
            return Vec::new();
        };
        let Some(document) = self.documents.get(uri) else {
            return Vec::new();
        };
        let dictionary_supported = settings.language_tool_http_server_uri().is_none();
        code_actions(uri, document, &result, range, dictionary_supported)
    }

    async fn republish(&self, uri: &Url, caret_changed_at: Instant) {
        let Some(document) = self.documents.get(uri) else {
            return;
        };
        if document.caret_changed_at() != caret_changed_at {
            return;
        }
        let Some((result, settings)) = document.cached_check() else {
            return;
        };
        tracing::debug!(uri = %uri, "publishing held-back diagnostics");
        self.publish(uri, settings, &result, false).await;
    }

    async fn publish(&self, uri: &Url, settings: &Settings, result: &CheckResult, hold_back: bool) {
        if let Some(document) = self.documents.get(uri) {
            self.publish_for(uri, document, Some(document.version()), settings, result, hold_back)
                .await;
        }
    }

    async fn publish_for(
        &self,
        uri: &Url,
        document: &Document,
        version: Option<i32>,
        settings: &Settings,
        result: &CheckResult,
        hold_back: bool,
    ) {
        let mut published = diagnostics(document, settings, result);
        if hold_back {
            if let Some(caret) = document.caret() {
                let elapsed = document.caret_changed_at().elapsed();
                if elapsed < CARET_DELAY {
                    let (visible, held_back) =
                        hold_back_at_caret(published, to_lsp_position(caret));
                    published = visible;
                    if held_back {
                        self.schedule_republish(
                            uri.clone(),
                            document.caret_changed_at(),
                            CARET_DELAY - elapsed,
                        );
                    }
                }
            }
        }
        tracing::debug!(uri = %uri, count = published.len(), "publishing diagnostics");
        self.client
            .publish_diagnostics(uri.clone(), published, version)
            .await;
    }

    fn schedule_republish(&self, uri: Url, caret_changed_at: Instant, delay: Duration) {
        let Some(jobs) = self.jobs.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = jobs.send(Job::Republish {
                uri,
                caret_changed_at,
            });
        });
    }
}

async fn read_file(uri: &Url) -> Result<String, CommandError> {
    let path = uri
        .to_file_path()
        .map_err(|_| CommandError::NotAFile { uri: uri.clone() })?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| CommandError::Read { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Trigger::Open, CheckFrequency::Edit, true)]
    #[case(Trigger::Open, CheckFrequency::Save, true)]
    #[case(Trigger::Open, CheckFrequency::Manual, false)]
    #[case(Trigger::Change, CheckFrequency::Edit, true)]
    #[case(Trigger::Change, CheckFrequency::Save, false)]
    #[case(Trigger::Save, CheckFrequency::Save, true)]
    #[case(Trigger::Save, CheckFrequency::Edit, false)]
    #[case(Trigger::Configuration, CheckFrequency::Save, true)]
    #[case(Trigger::Configuration, CheckFrequency::Manual, false)]
    fn triggers_follow_frequency(
        #[case] trigger: Trigger,
        #[case] frequency: CheckFrequency,
        #[case] expected: bool,
    ) {
        assert_eq!(trigger.applies(frequency), expected);
    }

    #[tokio::test]
    async fn reads_files_for_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Some notes.").unwrap();
        let uri = Url::from_file_path(&path).unwrap();
        assert_eq!(read_file(&uri).await.unwrap(), "Some notes.");

        let missing = Url::from_file_path(dir.path().join("missing.md")).unwrap();
        assert!(matches!(
            read_file(&missing).await,
            Err(CommandError::Read { .. })
        ));
        let untitled = Url::parse("untitled:Untitled-1").unwrap();
        assert!(matches!(
            read_file(&untitled).await,
            Err(CommandError::NotAFile { .. })
        ));
    }
}
