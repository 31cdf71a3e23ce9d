//! Scheduled jobs over managed groups: summaries and knowledge topics.

pub mod engine;
pub mod fanout;
pub mod schedule;
pub mod topics;

pub use engine::{GroupSummarizer, MIN_MESSAGES_FOR_SUMMARY, SummaryOutcome};
pub use fanout::{FanoutReport, SummaryFanout, spawn_summary_ticker, summarize_managed_groups};
pub use schedule::{next_fire, spawn_ticker};
pub use topics::{TopicLoader, TopicOutcome, TopicReport, spawn_topic_ticker};
