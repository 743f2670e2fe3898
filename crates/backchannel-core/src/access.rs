//! Access guard: decides whether an inbound message may drive the relay.
//!
//! The guard is a pure predicate. Denials are never answered in chat, so the
//! relay does not advertise itself to unauthorized senders.

/// Identity of an inbound message's author and origin.
#[derive(Debug, Clone)]
pub struct Sender<'a> {
    pub user_id: &'a str,
    pub channel_id: &'a str,
    /// Message was produced by the relay's own identity or by another bot.
    pub automated: bool,
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny(DenyReason),
}

/// Why a message was denied (for logging only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Automated,
    WrongUser,
    WrongChannel,
}

/// Optional sender/channel restrictions. `None` means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub allowed_user: Option<String>,
    pub allowed_channel: Option<String>,
}

impl AccessPolicy {
    pub const fn new(allowed_user: Option<String>, allowed_channel: Option<String>) -> Self {
        Self {
            allowed_user,
            allowed_channel,
        }
    }

    /// Evaluate the rules in order: automated, user, channel.
    pub fn check(&self, sender: &Sender<'_>) -> Access {
        if sender.automated {
            return Access::Deny(DenyReason::Automated);
        }
        if let Some(user) = &self.allowed_user
            && user != sender.user_id
        {
            return Access::Deny(DenyReason::WrongUser);
        }
        if let Some(channel) = &self.allowed_channel
            && channel != sender.channel_id
        {
            return Access::Deny(DenyReason::WrongChannel);
        }
        Access::Allow
    }
}
