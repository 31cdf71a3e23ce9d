//! Knowledge topic ingestion for managed groups.
//!
//! Messages since a group's `last_ingest` are split into topics by the
//! model, each topic is embedded, and the topics are stored. Speakers are
//! anonymized as `@user_N` in the prompt and mapped back afterwards.
//! `last_ingest` only moves once the topics are stored.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::Outbox;
use crate::digest::schedule::spawn_ticker;
use crate::error::{DatabaseError, Error, LlmError};
use crate::jid;
use crate::llm::{
    ChatMessage, CompletionRequest, EmbeddingProvider, LlmProvider, RetryPolicy, embed_texts,
};
use crate::pipeline::types::{Group, KnowledgeTopic, Message};
use crate::prompts;
use crate::store::Database;

/// Room for a long list of topics.
const TOPIC_MAX_TOKENS: u32 = 4096;

static SPEAKER_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@user_(\d+)\b")
        .unwrap_or_else(|e| unreachable!("static speaker pattern is valid: {e}"))
});

/// One topic as the model returns it.
#[derive(Debug, Clone, Deserialize)]
struct ExtractedTopic {
    subject: String,
    summary: String,
    #[serde(default)]
    speakers: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TopicList {
    Bare(Vec<ExtractedTopic>),
    Wrapped { topics: Vec<ExtractedTopic> },
}

/// Parse the model's topic list, tolerating a fenced code block.
fn parse_topics(raw: &str) -> Result<Vec<ExtractedTopic>, serde_json::Error> {
    let mut body = raw.trim();
    if let Some(fenced) = body.strip_prefix("```") {
        body = fenced
            .split_once('\n')
            .map_or("", |(_, rest)| rest)
            .trim_end()
            .trim_end_matches("```")
            .trim();
    }
    Ok(match serde_json::from_str::<TopicList>(body)? {
        TopicList::Bare(topics) | TopicList::Wrapped { topics } => topics,
    })
}

/// `@user_N` labels for the senders of one conversation, in order of first
/// appearance.
struct SpeakerMap {
    senders: Vec<String>,
}

impl SpeakerMap {
    fn new(messages: &[&Message]) -> Self {
        let mut senders: Vec<String> = Vec::new();
        for message in messages {
            if !senders.contains(&message.sender_jid) {
                senders.push(message.sender_jid.clone());
            }
        }
        Self { senders }
    }

    fn label(&self, sender_jid: &str) -> String {
        match self.senders.iter().position(|s| s == sender_jid) {
            Some(i) => format!("@user_{}", i + 1),
            None => format!("@{}", jid::user_part(sender_jid)),
        }
    }

    fn sender(&self, label_number: &str) -> Option<&str> {
        let n: usize = label_number.parse().ok()?;
        self.senders.get(n.checked_sub(1)?).map(String::as_str)
    }

    /// Replace `@<phone>` tags of known senders with their labels.
    fn anonymize(&self, text: &str) -> String {
        let mut by_length: Vec<(usize, &String)> = self.senders.iter().enumerate().collect();
        by_length.sort_by_key(|(_, s)| std::cmp::Reverse(jid::user_part(s).len()));

        let mut out = text.to_string();
        for (i, sender) in by_length {
            let tag = format!("@{}", jid::user_part(sender));
            out = out.replace(&tag, &format!("@user_{}", i + 1));
        }
        out
    }

    /// Replace labels with `@<phone>` tags. Unknown labels are left alone.
    fn restore_tags(&self, text: &str) -> String {
        SPEAKER_TAG_RE
            .replace_all(text, |caps: &regex::Captures| match self.sender(&caps[1]) {
                Some(sender) => format!("@{}", jid::user_part(sender)),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Map a speaker entry back to a JID. Unknown speakers are kept as given.
    fn resolve_speaker(&self, speaker: &str) -> String {
        let speaker = speaker.trim();
        speaker
            .trim_start_matches('@')
            .strip_prefix("user_")
            .and_then(|n| self.sender(n))
            .map(str::to_string)
            .unwrap_or_else(|| speaker.to_string())
    }

    /// `timestamp: @user_N: text`, one line per message.
    fn render(&self, messages: &[&Message]) -> String {
        messages
            .iter()
            .filter_map(|m| {
                let text = m.text()?;
                Some(format!(
                    "{}: {}: {}",
                    m.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                    self.label(&m.sender_jid),
                    self.anonymize(text)
                ))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stable id: the same group, batch start, and subject always map to one row.
fn topic_id(group_jid: &str, start_time: DateTime<Utc>, subject: &str) -> String {
    let key = format!(
        "{group_jid}_{}_{subject}",
        start_time.to_rfc3339_opts(SecondsFormat::Micros, true)
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// What happened to one group in one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    /// Nothing new since the last ingestion.
    NoMessages,
    /// Topic extraction failed after retries; watermark untouched.
    GenerationFailed,
    /// Topics stored and watermark advanced.
    Loaded { topics: usize },
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicReport {
    pub groups: usize,
    pub topics: usize,
    pub no_messages: usize,
    pub generation_failed: usize,
    /// Groups that failed on storage, identity, or embedding.
    pub errored: Vec<String>,
}

pub struct TopicLoader {
    store: Arc<dyn Database>,
    outbox: Arc<Outbox>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    embedding_model: String,
    retry: RetryPolicy,
    running: Mutex<()>,
}

impl TopicLoader {
    pub fn new(
        store: Arc<dyn Database>,
        outbox: Arc<Outbox>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        embedding_model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            outbox,
            llm,
            embedder,
            embedding_model: embedding_model.into(),
            retry,
            running: Mutex::new(()),
        }
    }

    /// Extract, embed, and store the topics of one group.
    pub async fn load_group(&self, group: &Group) -> Result<TopicOutcome, Error> {
        let me = self.outbox.self_identity().await?;
        let mut messages = self
            .store
            .group_messages_since(&group.group_jid, group.last_ingest, &me)
            .await?;
        messages.sort_by_key(|m| m.timestamp);
        let messages: Vec<&Message> = messages.iter().filter(|m| m.text().is_some()).collect();

        let Some(start_time) = messages.first().map(|m| m.timestamp) else {
            info!(group = %group.group_jid, "No new messages for topic ingestion");
            return Ok(TopicOutcome::NoMessages);
        };

        let speakers = SpeakerMap::new(&messages);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::topic_split_system_prompt()),
            ChatMessage::user(speakers.render(&messages)),
        ])
        .with_max_tokens(TOPIC_MAX_TOKENS);

        let extracted = match self.extract(request).await {
            Ok(topics) => topics,
            Err(e) => {
                error!(
                    error = %e,
                    group = %group.group_jid,
                    attempts = self.retry.max_attempts,
                    "Topic extraction failed"
                );
                return Ok(TopicOutcome::GenerationFailed);
            }
        };

        let documents: Vec<String> = extracted
            .iter()
            .map(|t| format!("# {}\n{}", t.subject, speakers.restore_tags(&t.summary)))
            .collect();
        let embeddings =
            embed_texts(self.embedder.as_ref(), &documents, &self.embedding_model).await?;

        let topics: Vec<KnowledgeTopic> = extracted
            .into_iter()
            .zip(embeddings)
            .map(|(topic, embedding)| KnowledgeTopic {
                id: topic_id(&group.group_jid, start_time, &topic.subject),
                group_jid: group.group_jid.clone(),
                start_time,
                summary: speakers.restore_tags(&topic.summary),
                speakers: topic
                    .speakers
                    .iter()
                    .map(|s| speakers.resolve_speaker(s))
                    .collect(),
                subject: topic.subject,
                embedding,
            })
            .collect();

        self.store.upsert_topics(&topics).await?;
        self.store
            .advance_last_ingest(&group.group_jid, Utc::now())
            .await?;

        info!(
            group = %group.group_jid,
            messages = messages.len(),
            topics = topics.len(),
            "Knowledge topics loaded"
        );
        Ok(TopicOutcome::Loaded {
            topics: topics.len(),
        })
    }

    async fn extract(&self, request: CompletionRequest) -> Result<Vec<ExtractedTopic>, LlmError> {
        let llm = &self.llm;
        self.retry
            .run("topic_split", || {
                let request = request.clone();
                async move {
                    let response = llm.complete(request).await?;
                    parse_topics(&response.content).map_err(|e| LlmError::InvalidResponse {
                        provider: llm.provider_name().to_string(),
                        reason: format!("malformed topic list: {e}"),
                    })
                }
            })
            .await
    }

    /// Ingest every managed group, one after another.
    ///
    /// Returns `Ok(None)` without doing anything if a run is already in progress.
    pub async fn run_once(&self) -> Result<Option<TopicReport>, DatabaseError> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Topic ingestion already in progress, skipping");
            return Ok(None);
        };

        let groups = self.store.list_managed_groups().await?;
        info!(count = groups.len(), "Starting topic ingestion");

        let mut report = TopicReport {
            groups: groups.len(),
            ..Default::default()
        };
        for group in &groups {
            match self.load_group(group).await {
                Ok(TopicOutcome::Loaded { topics }) => report.topics += topics,
                Ok(TopicOutcome::NoMessages) => report.no_messages += 1,
                Ok(TopicOutcome::GenerationFailed) => report.generation_failed += 1,
                Err(e) => {
                    error!(error = %e, group = %group.group_jid, "Topic ingestion failed");
                    report.errored.push(group.group_jid.clone());
                }
            }
        }

        debug!(?report, "Topic ingestion report");
        info!(
            groups = report.groups,
            topics = report.topics,
            errored = report.errored.len(),
            "Topic ingestion complete"
        );
        Ok(Some(report))
    }
}

/// Run topic ingestion on `schedule` in the background.
pub fn spawn_topic_ticker(
    loader: Arc<TopicLoader>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    spawn_ticker("topics", schedule, move || {
        let loader = Arc::clone(&loader);
        async move {
            if let Err(e) = loader.run_once().await {
                error!(error = %e, "Scheduled topic ingestion failed");
            }
        }
    })
}
