//! Fan-out of scheduled summaries over managed groups.
//!
//! One task per managed group; a group that errors or panics is logged and
//! never stops its siblings.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::digest::engine::{GroupSummarizer, SummaryOutcome};
use crate::digest::schedule::spawn_ticker;
use crate::error::DatabaseError;

/// Totals for one fan-out run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub groups: usize,
    /// Summary generated and watermark advanced.
    pub summarized: usize,
    pub not_enough_messages: usize,
    pub generation_failed: usize,
    /// Groups whose task returned an error or panicked.
    pub errored: Vec<String>,
}

/// Runs the summarizer over every managed group, one run at a time.
pub struct SummaryFanout {
    summarizer: Arc<GroupSummarizer>,
    running: Mutex<()>,
}

impl SummaryFanout {
    pub fn new(summarizer: Arc<GroupSummarizer>) -> Self {
        Self {
            summarizer,
            running: Mutex::new(()),
        }
    }

    /// Summarize all managed groups concurrently.
    ///
    /// Returns `Ok(None)` without doing anything if a run is already in progress.
    pub async fn run_once(&self) -> Result<Option<FanoutReport>, DatabaseError> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Summary run already in progress, skipping");
            return Ok(None);
        };
        summarize_managed_groups(&self.summarizer).await.map(Some)
    }
}

/// Summarize every managed group, each in its own task.
pub async fn summarize_managed_groups(
    summarizer: &Arc<GroupSummarizer>,
) -> Result<FanoutReport, DatabaseError> {
    let groups = summarizer.store().list_managed_groups().await?;
    info!(count = groups.len(), "Starting scheduled summaries");

    let handles: Vec<_> = groups
        .into_iter()
        .map(|group| {
            let summarizer = Arc::clone(summarizer);
            let jid = group.group_jid.clone();
            let handle = tokio::spawn(async move { summarizer.summarize_group(&group).await });
            (jid, handle)
        })
        .collect();

    let (jids, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
    let results = join_all(tasks).await;

    let mut report = FanoutReport {
        groups: jids.len(),
        ..Default::default()
    };
    for (jid, result) in jids.into_iter().zip(results) {
        match result {
            Ok(Ok(SummaryOutcome::Delivered { .. })) => report.summarized += 1,
            Ok(Ok(SummaryOutcome::NotEnoughMessages { .. })) => report.not_enough_messages += 1,
            Ok(Ok(SummaryOutcome::GenerationFailed)) => report.generation_failed += 1,
            Ok(Err(e)) => {
                error!(error = %e, group = %jid, "Group summary failed");
                report.errored.push(jid);
            }
            Err(e) => {
                error!(error = %e, group = %jid, "Group summary task panicked");
                report.errored.push(jid);
            }
        }
    }

    info!(
        groups = report.groups,
        summarized = report.summarized,
        not_enough_messages = report.not_enough_messages,
        generation_failed = report.generation_failed,
        errored = report.errored.len(),
        "Scheduled summaries complete"
    );
    Ok(report)
}

/// Run the fan-out on `schedule` in the background.
pub fn spawn_summary_ticker(
    fanout: Arc<SummaryFanout>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    spawn_ticker("summaries", schedule, move || {
        let fanout = Arc::clone(&fanout);
        async move {
            if let Err(e) = fanout.run_once().await {
                error!(error = %e, "Scheduled summary run failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    use super::*;
    use crate::channels::Outbox;
    use crate::llm::RetryPolicy;
    use crate::pipeline::types::Group;
    use crate::store::{Database, LibSqlBackend};
    use crate::testing::{MockLlm, RecordingTransport, group_message};

    const BOT: &str = "972500000001@s.whatsapp.net";

    async fn seed(store: &dyn Database, jid: &str, name: &str, messages: usize) -> DateTime<Utc> {
        let t0 = Utc::now() - ChronoDuration::hours(2);
        store
            .upsert_group(&Group {
                group_jid: jid.into(),
                group_name: Some(name.into()),
                owner_jid: None,
                managed: true,
                last_summary_sync: t0,
                last_ingest: t0,
                community_keys: Vec::new(),
            })
            .await
            .unwrap();
        for i in 0..messages {
            store
                .insert_message(&group_message(
                    &format!("{jid}-{i}"),
                    jid,
                    "972511111111@s.whatsapp.net",
                    "hello",
                    t0 + ChronoDuration::seconds(i as i64 + 1),
                ))
                .await
                .unwrap();
        }
        t0
    }

    async fn setup(llm: MockLlm) -> (Arc<GroupSummarizer>, Arc<dyn Database>, Arc<RecordingTransport>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new(BOT));
        let outbox = Arc::new(Outbox::new(transport.clone(), store.clone()));
        let summarizer = Arc::new(GroupSummarizer::new(
            store.clone(),
            outbox,
            Arc::new(llm),
            RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
        ));
        (summarizer, store, transport)
    }

    #[tokio::test]
    async fn panicking_group_does_not_block_siblings() {
        let llm = MockLlm::new(|req, _| {
            if req.system_prompt().unwrap_or_default().contains("\"Beta\"") {
                panic!("model client crashed");
            }
            Ok("recap".into())
        });
        let (summarizer, store, transport) = setup(llm).await;
        let ta = seed(store.as_ref(), "a@g.us", "Alpha", 15).await;
        let tb = seed(store.as_ref(), "b@g.us", "Beta", 15).await;
        let tc = seed(store.as_ref(), "c@g.us", "Gamma", 15).await;

        let report = summarize_managed_groups(&summarizer).await.unwrap();

        assert_eq!(report.groups, 3);
        assert_eq!(report.summarized, 2);
        assert_eq!(report.errored, vec!["b@g.us".to_string()]);

        assert_eq!(transport.sent_to("a@g.us").len(), 1);
        assert_eq!(transport.sent_to("c@g.us").len(), 1);
        assert!(transport.sent_to("b@g.us").is_empty());

        let wm = |jid: &'static str| {
            let store = store.clone();
            async move { store.get_group(jid).await.unwrap().unwrap().last_summary_sync }
        };
        assert!(wm("a@g.us").await > ta);
        assert!(wm("c@g.us").await > tc);
        assert_eq!(wm("b@g.us").await.timestamp_micros(), tb.timestamp_micros());
    }

    #[tokio::test]
    async fn report_counts_each_outcome() {
        let llm = MockLlm::new(|req, _| {
            if req.system_prompt().unwrap_or_default().contains("\"Broken\"") {
                Err(crate::testing::request_failed("503"))
            } else {
                Ok("recap".into())
            }
        });
        let (summarizer, store, _transport) = setup(llm).await;
        seed(store.as_ref(), "a@g.us", "Busy", 20).await;
        seed(store.as_ref(), "b@g.us", "Quiet", 3).await;
        seed(store.as_ref(), "c@g.us", "Broken", 15).await;
        store.ensure_group("d@g.us", Utc::now()).await.unwrap();

        let report = summarize_managed_groups(&summarizer).await.unwrap();

        assert_eq!(
            report,
            FanoutReport {
                groups: 3,
                summarized: 1,
                not_enough_messages: 1,
                generation_failed: 1,
                errored: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn no_managed_groups_is_empty_report() {
        let (summarizer, _store, transport) = setup(MockLlm::replying("recap")).await;
        let fanout = SummaryFanout::new(summarizer);
        let report = fanout.run_once().await.unwrap().unwrap();
        assert_eq!(report, FanoutReport::default());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let (summarizer, _store, _transport) = setup(MockLlm::replying("recap")).await;
        let fanout = SummaryFanout::new(summarizer);
        let _held = fanout.running.lock().await;
        assert!(fanout.run_once().await.unwrap().is_none());
    }
}
