use log::{debug, error, info, warn};
use std::fmt;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Success => write!(f, "success"),
        }
    }
}

/// What the engine tells whoever is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    Log { level: LogLevel, message: String },
    /// A directory finished its backup and every write of it has reached the store.
    BackupFinished,
}

/// Receiver of engine events. The engine does not know who listens.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: BackupEvent);

    fn info(&self, message: String) {
        self.emit(BackupEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    fn warning(&self, message: String) {
        self.emit(BackupEvent::Log {
            level: LogLevel::Warning,
            message,
        });
    }

    fn error(&self, message: String) {
        self.emit(BackupEvent::Log {
            level: LogLevel::Error,
            message,
        });
    }

    fn success(&self, message: String) {
        self.emit(BackupEvent::Log {
            level: LogLevel::Success,
            message,
        });
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn emit(&self, event: BackupEvent) {
        match event {
            BackupEvent::Log {
                level: LogLevel::Info,
                message,
            } => info!("{}", message),
            BackupEvent::Log {
                level: LogLevel::Warning,
                message,
            } => warn!("{}", message),
            BackupEvent::Log {
                level: LogLevel::Error,
                message,
            } => error!("{}", message),
            BackupEvent::Log {
                level: LogLevel::Success,
                message,
            } => info!("success: {}", message),
            BackupEvent::BackupFinished => debug!("Backup finished notification"),
        }
    }
}

/// Pushes events into a channel; a closed receiver is ignored.
pub struct ChannelSink {
    sender: Sender<BackupEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<BackupEvent>) -> Self {
        Self { sender }
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, event: BackupEvent) {
        let _ = self.sender.send(event);
    }
}
