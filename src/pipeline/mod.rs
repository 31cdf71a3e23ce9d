//! Inbound message pipeline.
//!
//! Every inbound message flows through:
//! 1. `ingest::store_message()`: record sender, group, and message
//! 2. `IntentClassifier::classify()`: one constrained model call
//! 3. `MessageRouter::handle()`: on-demand summary, knowledge base,
//!    about text, or the default reply, always threaded to the request

pub mod ingest;
pub mod intent;
pub mod knowledge;
pub mod router;
pub mod types;

pub use intent::IntentClassifier;
pub use knowledge::UnavailableKnowledgeBase;
pub use router::MessageRouter;
