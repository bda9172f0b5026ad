//! The single user-facing message channel.
//!
//! Input mistakes, service fallbacks and resource failures all end up here as plain text; the
//! message is the only thing that tells them apart.

use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient message meant for the person driving the trip.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Cloneable sending half of the notice channel.
///
/// Sending never fails from the caller's point of view: with no receiver attached (or a
/// receiver that was dropped) notices are only logged.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    /// Create a notifier and the receiver the shell reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that only logs.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!(message = %notice.message, "notice"),
            NoticeLevel::Warning => tracing::warn!(message = %notice.message, "notice"),
            NoticeLevel::Error => tracing::error!(message = %notice.message, "notice"),
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(notice);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(Notice::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(Notice::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Notice::error(message));
    }
}

#[cfg(test)]
#[path = "../tests/unit/notice/notice.rs"]
mod tests;
