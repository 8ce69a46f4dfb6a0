//! Log messages of analysis runs and the thread collecting them.
//!
//! Analyses never print. They send [`LogMessage`]s through a channel
//! and the caller decides what happens to them.

use crate::prelude::*;
use std::{collections::BTreeMap, thread::JoinHandle};

/// A log message of an analysis run.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LogMessage {
    pub text: String,
    pub level: LogLevel,
    /// The serial number of the ARG state that the message is related to.
    pub state: Option<u64>,
    /// The name of the analysis that sent the message, e.g. `"BAM"`.
    pub source: Option<String>,
}

impl LogMessage {
    /// Create a log message for the user.
    pub fn new_info(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Info,
            state: None,
            source: None,
        }
    }

    pub fn new_debug(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Debug,
            state: None,
            source: None,
        }
    }

    pub fn new_error(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Error,
            state: None,
            source: None,
        }
    }

    /// Attach the serial number of an ARG state.
    pub fn state(mut self, serial: u64) -> LogMessage {
        self.state = Some(serial);
        self
    }

    /// Attach the name of the sending analysis.
    pub fn source(mut self, source: impl Into<String>) -> LogMessage {
        self.source = Some(source.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogLevel {
    /// Cache hits and misses, covered states, removals.
    Debug,
    Error,
    /// Results and resource limits.
    Info,
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            LogLevel::Debug => write!(formatter, "DEBUG: ")?,
            LogLevel::Error => write!(formatter, "ERROR: ")?,
            LogLevel::Info => write!(formatter, "INFO: ")?,
        };
        match (&self.source, &self.state) {
            (Some(source), Some(serial)) => write!(formatter, "{source} @ #{serial}: ")?,
            (Some(source), None) => write!(formatter, "{source}: ")?,
            (None, Some(serial)) => write!(formatter, "#{serial}: ")?,
            (None, None) => (),
        };
        write!(formatter, "{}", self.text)
    }
}

/// What a [`LogThread`] receives.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogThreadMsg {
    Log(LogMessage),
    /// Stop collecting and return the messages received so far.
    Terminate,
}

impl From<LogMessage> for LogThreadMsg {
    fn from(msg: LogMessage) -> Self {
        Self::Log(msg)
    }
}

/// A background thread collecting the log messages of one or more analyses.
///
/// Hand out senders with [`LogThread::get_msg_sender`] and call [`LogThread::collect`]
/// when all analyses are done. Dropping the `LogThread` stops the thread and discards its messages.
/// Analyses whose messages nobody wants get a sender from [`LogThread::create_disconnected_sender`].
pub struct LogThread {
    msg_sender: crossbeam_channel::Sender<LogThreadMsg>,
    thread_handle: Option<JoinHandle<Vec<LogMessage>>>,
}

impl Drop for LogThread {
    fn drop(&mut self) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LogThread {
    /// Spawn a thread running `collector_func`.
    /// The collector has to return once it receives [`LogThreadMsg::Terminate`] or the channel disconnects.
    pub fn spawn<F>(collector_func: F) -> LogThread
    where
        F: FnOnce(crossbeam_channel::Receiver<LogThreadMsg>) -> Vec<LogMessage> + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread_handle = std::thread::spawn(move || collector_func(receiver));
        LogThread {
            msg_sender: sender,
            thread_handle: Some(thread_handle),
        }
    }

    /// A sender whose messages are dropped.
    pub fn create_disconnected_sender() -> crossbeam_channel::Sender<LogThreadMsg> {
        let (sender, _) = crossbeam_channel::unbounded();
        sender
    }

    pub fn get_msg_sender(&self) -> crossbeam_channel::Sender<LogThreadMsg> {
        self.msg_sender.clone()
    }

    /// Stop the thread and return the collected messages.
    pub fn collect(mut self) -> Vec<LogMessage> {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        match self.thread_handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Collector for [`LogThread::spawn`].
    ///
    /// A text logged twice for the same state by the same source is kept once.
    /// State messages come first, ordered by serial number, then all other messages in arrival order.
    pub fn collect_and_deduplicate(
        receiver: crossbeam_channel::Receiver<LogThreadMsg>,
    ) -> Vec<LogMessage> {
        let mut logs_with_state = BTreeMap::new();
        let mut general_logs = Vec::new();

        while let Ok(log_thread_msg) = receiver.recv() {
            match log_thread_msg {
                LogThreadMsg::Log(log_message) => {
                    if let Some(serial) = log_message.state {
                        let key = (serial, log_message.source.clone(), log_message.text.clone());
                        logs_with_state.entry(key).or_insert(log_message);
                    } else {
                        general_logs.push(log_message);
                    }
                }
                LogThreadMsg::Terminate => break,
            }
        }
        logs_with_state
            .into_values()
            .chain(general_logs.into_iter())
            .collect()
    }
}
