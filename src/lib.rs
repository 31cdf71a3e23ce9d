//! Group Assist: routing and scheduled summaries for group chats.

pub mod channels;
pub mod config;
pub mod digest;
pub mod error;
pub mod jid;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod store;

#[cfg(test)]
mod testing;
