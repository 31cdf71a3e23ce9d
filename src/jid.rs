//! Chat identifiers (`user[:device]@server`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Server part used by group chats.
pub const GROUP_SERVER: &str = "g.us";

static JID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<user>[^:@\s]+)(?::(?P<device>\d+))?@(?P<server>[^@\s]+)$")
        .unwrap_or_else(|e| unreachable!("static JID pattern is valid: {e}"))
});

/// A parsed chat identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: Option<u32>,
    pub server: String,
}

impl Jid {
    /// Parse `user[:device]@server`. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = JID_RE.captures(raw.trim())?;
        Some(Self {
            user: caps["user"].to_string(),
            device: caps.name("device").and_then(|d| d.as_str().parse().ok()),
            server: caps["server"].to_lowercase(),
        })
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Canonical form without the device suffix.
    pub fn normalized(&self) -> String {
        format!("{}@{}", self.user, self.server)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

/// Normalize an identifier, leaving unparseable input trimmed but otherwise intact.
pub fn normalize(raw: &str) -> String {
    Jid::parse(raw)
        .map(|j| j.normalized())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// User part of an identifier, used for `@user` tags.
pub fn user_part(raw: &str) -> String {
    Jid::parse(raw)
        .map(|j| j.user)
        .unwrap_or_else(|| raw.split('@').next().unwrap_or(raw).to_string())
}

pub fn is_group(raw: &str) -> bool {
    Jid::parse(raw).is_some_and(|j| j.is_group())
}

/// Whether `text` tags the given identity as `@user`.
pub fn mentions(text: &str, identity: &str) -> bool {
    let tag = format!("@{}", user_part(identity));
    text.match_indices(&tag).any(|(idx, _)| {
        text[idx + tag.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric())
    })
}
