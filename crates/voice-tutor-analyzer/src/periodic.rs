//! Timer-driven transcript analysis.
//!
//! The analyzer runs on its own clock. New transcript entries never reset the
//! timer; the transcript is read through a [`TranscriptSource`] each time the
//! timer fires, so the analysis always covers the current conversation.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use voice_tutor_core::{
    ChatMessage, RealtimeConfig, Role, SummarizationError, Summarizer, TranscriptEntry,
    TranscriptSource,
};

/// Shown until the transcript has any entries.
pub const WAITING_MESSAGE: &str = "Waiting for the conversation to start...";

/// Shown when the summarization call fails.
pub const FALLBACK_MESSAGE: &str =
    "Unable to analyze the conversation right now. Please check back shortly.";

/// Map transcript entries to chat messages.
///
/// User turns stay `user`; assistant and system turns become `assistant`.
#[must_use]
pub fn map_messages(entries: &[TranscriptEntry]) -> Vec<ChatMessage> {
    entries
        .iter()
        .map(|entry| {
            let role = match entry.role {
                Role::User => "user",
                Role::Assistant | Role::System => "assistant",
            };
            ChatMessage::new(role, entry.text.clone())
        })
        .collect()
}

/// Shortest period the timer runs at.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

enum Outcome {
    Waiting,
    Analysis(String),
    Failed,
}

impl Outcome {
    fn into_message(self) -> String {
        match self {
            Self::Waiting => WAITING_MESSAGE.to_string(),
            Self::Analysis(analysis) => analysis,
            Self::Failed => FALLBACK_MESSAGE.to_string(),
        }
    }
}

async fn request_analysis(
    summarizer: &dyn Summarizer,
    instructions: &str,
    entries: &[TranscriptEntry],
) -> Outcome {
    if entries.is_empty() {
        return Outcome::Waiting;
    }
    match summarizer.summarize(instructions, &map_messages(entries)).await {
        Ok(analysis) => Outcome::Analysis(analysis),
        Err(e) => {
            tracing::warn!("Transcript analysis failed: {e}");
            Outcome::Failed
        }
    }
}

/// Analyze one transcript snapshot.
///
/// Never fails: an empty transcript yields [`WAITING_MESSAGE`] and any
/// summarization error yields [`FALLBACK_MESSAGE`].
pub async fn analyze_once(
    summarizer: &dyn Summarizer,
    instructions: &str,
    entries: &[TranscriptEntry],
) -> String {
    request_analysis(summarizer, instructions, entries)
        .await
        .into_message()
}

/// Periodically summarizes the current transcript.
pub struct PeriodicAnalyzer {
    source: Arc<dyn TranscriptSource>,
    summarizer: Arc<dyn Summarizer>,
    instructions: String,
    period: Duration,
}

impl PeriodicAnalyzer {
    /// Create an analyzer firing every `period`, raised to [`MIN_PERIOD`]
    /// if shorter.
    #[must_use]
    pub fn new(
        source: Arc<dyn TranscriptSource>,
        summarizer: Arc<dyn Summarizer>,
        instructions: impl Into<String>,
        period: Duration,
    ) -> Self {
        if period < MIN_PERIOD {
            tracing::warn!(
                period_ms = period.as_millis(),
                "Analysis interval too short, using {}s",
                MIN_PERIOD.as_secs()
            );
        }
        Self {
            source,
            summarizer,
            instructions: instructions.into(),
            period: period.max(MIN_PERIOD),
        }
    }

    /// Analyzer using the configured instructions and interval.
    #[must_use]
    pub fn from_config(
        config: &RealtimeConfig,
        source: Arc<dyn TranscriptSource>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self::new(
            source,
            summarizer,
            config.analysis_instructions.clone(),
            config.analysis_interval(),
        )
    }

    /// Start the timer. The first analysis runs one full period from now.
    ///
    /// Dropping the returned handle stops the task.
    #[must_use]
    pub fn spawn(self) -> AnalyzerHandle {
        let (analysis_tx, analysis) = watch::channel(WAITING_MESSAGE.to_string());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(analysis_tx, shutdown_rx));
        AnalyzerHandle {
            analysis,
            shutdown,
            task,
        }
    }

    async fn run(
        self,
        analysis: watch::Sender<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = self.period.as_secs(), "Starting transcript analyzer");

        let mut analyzed: Option<Vec<TranscriptEntry>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let entries = self.source.current();
                    if analyzed.as_ref() == Some(&entries) {
                        tracing::debug!("Transcript unchanged, keeping previous analysis");
                        continue;
                    }

                    let outcome =
                        request_analysis(self.summarizer.as_ref(), &self.instructions, &entries)
                            .await;
                    if matches!(outcome, Outcome::Analysis(_)) {
                        analyzed = Some(entries);
                    }
                    analysis.send_replace(outcome.into_message());
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        tracing::info!("Transcript analyzer stopped");
    }
}

/// Handle to a running [`PeriodicAnalyzer`].
pub struct AnalyzerHandle {
    analysis: watch::Receiver<String>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AnalyzerHandle {
    /// Receiver holding the latest analysis.
    #[must_use]
    pub fn analysis(&self) -> watch::Receiver<String> {
        self.analysis.clone()
    }

    #[must_use]
    pub fn latest(&self) -> String {
        self.analysis.borrow().clone()
    }

    /// Stop the timer and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Analyzer task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use httpmock::prelude::*;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::client::HttpSummarizer;

    const PERIOD: Duration = Duration::from_secs(30);

    /// Echoes the last message it was given and records every call.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
    }

    impl Recording {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for Recording {
        async fn summarize(
            &self,
            _instructions: &str,
            messages: &[ChatMessage],
        ) -> Result<String, SummarizationError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(SummarizationError::Status(503));
            }
            Ok(format!("about: {}", messages.last().map_or("", |m| m.content.as_str())))
        }
    }

    fn entry(key: &str, role: Role, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            key: key.to_string(),
            role,
            text: text.to_string(),
        }
    }

    fn shared_source() -> (Arc<Mutex<Vec<TranscriptEntry>>>, Arc<dyn TranscriptSource>) {
        let cell = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::clone(&cell);
        let source: Arc<dyn TranscriptSource> =
            Arc::new(move || reader.lock().unwrap().clone());
        (cell, source)
    }

    #[test]
    fn test_role_mapping() {
        let messages = map_messages(&[
            entry("a", Role::System, "be kind"),
            entry("b", Role::User, "hi"),
            entry("c", Role::Assistant, "hello"),
        ]);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["assistant", "user", "assistant"]);
        assert_eq!(messages[1].content, "hi");
    }

    #[tokio::test]
    async fn test_analyze_once_falls_back_on_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(502).json_body(serde_json::json!({"error": "bad gateway"}));
            })
            .await;
        let summarizer = HttpSummarizer::new(server.url("/analyze"), "gpt-4o-mini");

        let analysis =
            analyze_once(&summarizer, "Summarize.", &[entry("a", Role::User, "hi")]).await;
        assert_eq!(analysis, FALLBACK_MESSAGE);

        let direct = summarizer.summarize("Summarize.", &[]).await;
        assert_err!(direct);
    }

    #[tokio::test]
    async fn test_analyze_once_waits_for_entries() {
        let summarizer = Recording::default();
        assert_eq!(analyze_once(&summarizer, "x", &[]).await, WAITING_MESSAGE);
        assert!(summarizer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_one_period_out() {
        let (_cell, source) = shared_source();
        let summarizer = Arc::new(Recording::default());
        let handle = PeriodicAnalyzer::new(source, summarizer, "x", PERIOD).spawn();
        let mut analysis = handle.analysis();

        let start = Instant::now();
        assert_ok!(analysis.changed().await);

        assert!(start.elapsed() >= PERIOD);
        assert_eq!(handle.latest(), WAITING_MESSAGE);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_current_transcript_each_tick() {
        let (cell, source) = shared_source();
        let summarizer = Arc::new(Recording::default());
        let handle =
            PeriodicAnalyzer::new(source, Arc::clone(&summarizer) as _, "x", PERIOD).spawn();
        let mut analysis = handle.analysis();

        cell.lock().unwrap().push(entry("u1", Role::User, "first"));
        assert_ok!(analysis.changed().await);
        assert_eq!(*analysis.borrow_and_update(), "about: first");

        cell.lock().unwrap().push(entry("a1", Role::Assistant, "second"));
        assert_ok!(analysis.changed().await);
        assert_eq!(*analysis.borrow_and_update(), "about: second");

        let calls = summarizer.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 2);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_publishes_fallback() {
        let (cell, source) = shared_source();
        cell.lock().unwrap().push(entry("u1", Role::User, "hello"));
        let handle =
            PeriodicAnalyzer::new(source, Arc::new(Recording::failing()), "x", PERIOD).spawn();
        let mut analysis = handle.analysis();

        assert_ok!(analysis.changed().await);
        assert_eq!(*analysis.borrow(), FALLBACK_MESSAGE);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_transcript_is_not_resent() {
        let (cell, source) = shared_source();
        cell.lock().unwrap().push(entry("u1", Role::User, "hello"));
        let summarizer = Arc::new(Recording::default());
        let handle =
            PeriodicAnalyzer::new(source, Arc::clone(&summarizer) as _, "x", PERIOD).spawn();
        let mut analysis = handle.analysis();

        assert_ok!(analysis.changed().await);
        tokio::time::sleep(PERIOD * 3).await;

        assert_eq!(summarizer.calls().len(), 1);
        assert_eq!(handle.latest(), "about: hello");
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_runs_at_minimum_period() {
        let config: RealtimeConfig =
            serde_json::from_str(r#"{"analysis_interval_secs": 0}"#).unwrap();
        let (cell, source) = shared_source();
        cell.lock().unwrap().push(entry("u1", Role::User, "hello"));
        let summarizer = Arc::new(Recording::default());
        let handle =
            PeriodicAnalyzer::from_config(&config, source, Arc::clone(&summarizer) as _).spawn();
        let mut analysis = handle.analysis();

        let start = Instant::now();
        assert_ok!(analysis.changed().await);

        assert!(start.elapsed() >= MIN_PERIOD);
        assert_eq!(*analysis.borrow(), "about: hello");
        assert!(!handle.task.is_finished());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let (cell, source) = shared_source();
        cell.lock().unwrap().push(entry("u1", Role::User, "hello"));
        let summarizer = Arc::new(Recording::default());
        let handle =
            PeriodicAnalyzer::new(source, Arc::clone(&summarizer) as _, "x", PERIOD).spawn();

        tokio::time::sleep(PERIOD / 2).await;
        handle.stop().await;
        tokio::time::sleep(PERIOD * 2).await;

        assert!(summarizer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_handle_stops_task() {
        let (cell, source) = shared_source();
        cell.lock().unwrap().push(entry("u1", Role::User, "hello"));
        let summarizer = Arc::new(Recording::default());
        let handle =
            PeriodicAnalyzer::new(source, Arc::clone(&summarizer) as _, "x", PERIOD).spawn();

        drop(handle);
        tokio::time::sleep(PERIOD * 2).await;

        assert!(summarizer.calls().is_empty());
    }
}
