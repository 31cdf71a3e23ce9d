//! Prompt text and chat rendering for model calls.

use crate::jid;
use crate::pipeline::types::Message;

/// System prompt for intent classification.
pub fn intent_system_prompt() -> String {
    "What is the intent of the message? What does the user want us to help with?\n\n\
     Intents:\n\
     - summarize: summarize TODAY's chat messages, or catch up on messages FROM TODAY ONLY. \
     Only for questions about today's chat. A request covering a broader time span is ask_question.\n\
     - ask_question: ask a question or learn from the collective knowledge of the group.\n\
     - about: learn about the assistant and its capabilities.\n\
     - other: anything else."
        .to_string()
}

/// System prompt for an on-demand summary of today's messages.
pub fn on_demand_summary_system_prompt() -> String {
    "Summarize the following group chat messages in a few words.\n\n\
     LANGUAGE REQUIREMENTS (CRITICAL):\n\
     - Respond in the EXACT same language as the chat messages.\n\
     - If the messages mix languages, use the DOMINANT language of the messages.\n\
     - NEVER translate or switch language, and do not default to English or any other language \
     unless it is the actual language of the messages.\n\n\
     CONTENT REQUIREMENTS:\n\
     - State that this is a summary of TODAY's messages.\n\
     - Personalize the summary to the user's request.\n\
     - Keep it short and conversational.\n\
     - Tag users when mentioning them (e.g., @972536150150).\n\
     - If the user asked about a different time period, say you can only summarize today's messages."
        .to_string()
}

/// System prompt for the scheduled summary of a group.
pub fn group_summary_system_prompt(group_name: &str) -> String {
    format!(
        "Write a quick summary of what happened in the chat group since the last summary.\n\n\
         LANGUAGE REQUIREMENTS (ABSOLUTELY CRITICAL):\n\
         - Respond in the EXACT same language as the chat messages below.\n\
         - If the messages mix languages, use the DOMINANT language of the messages.\n\
         - NEVER translate or switch language, and do not default to English or any other \
         language unless it is the actual language of the messages.\n\
         - Look at the language actually used in the messages and mirror it exactly.\n\n\
         CONTENT REQUIREMENTS:\n\
         - Start by stating this is a quick summary of what happened in \"{group_name}\" group recently.\n\
         - Use a casual conversational style matching the group's tone.\n\
         - Keep it short and sweet.\n\
         - Tag users when mentioning them (e.g., @972536150150).\n\
         - Focus on the main topics and interactions."
    )
}

/// System prompt for splitting an uninterrupted conversation into topics.
pub fn topic_split_system_prompt() -> String {
    "This conversation is a chain of messages that was uninterrupted by a break in the \
     conversation of up to 3 hours. Break the conversation into a list of topics.\n\n\
     Each line is `timestamp: @speaker: text`. Speakers are anonymized as @user_N; keep \
     those tags exactly as written.\n\n\
     Respond with a JSON array and nothing else. Each element is an object with:\n\
     - \"subject\": the subject of the topic.\n\
     - \"summary\": a concise summary of the topic discussed. Credit notable insights to \
     the speaker by tagging them (e.g. @user_1).\n\
     - \"speakers\": the speakers who took part, e.g. [\"@user_1\", \"@user_7\"]."
        .to_string()
}

/// User prompt for an on-demand summary: the request followed by the history.
pub fn on_demand_summary_user_prompt(request: &Message, history: &[Message]) -> String {
    format!(
        "@{}: {}\n\n# History:\n{}",
        jid::user_part(&request.sender_jid),
        request.text().unwrap_or_default(),
        chat_to_text(history)
    )
}

/// Render messages oldest-first as `[HH:MM] @user: text`, one per line.
///
/// Input order does not matter; messages without text are skipped.
pub fn chat_to_text(messages: &[Message]) -> String {
    let mut ordered: Vec<&Message> = messages.iter().filter(|m| m.text().is_some()).collect();
    ordered.sort_by_key(|m| m.timestamp);

    let mut out = String::with_capacity(ordered.len() * 64);
    for msg in ordered {
        out.push_str(&format!(
            "[{}] @{}: {}\n",
            msg.timestamp.format("%H:%M"),
            jid::user_part(&msg.sender_jid),
            msg.text().unwrap_or_default()
        ));
    }
    out
}
