//! Scripted in-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::llm::Completer;
use crate::progress::{MessageKind, ProgressEvent, ProgressSink};
use crate::search::SearchBackend;

type Reply = std::result::Result<String, String>;

/// Search backend answering from a script.
///
/// Routes (query substring → reply) win and are persistent. Otherwise queued
/// replies are handed out in order, the last one repeating. With nothing
/// scripted the backend returns an empty result text.
pub struct ScriptedBackend {
    name: String,
    routes: Vec<(String, Reply)>,
    queue: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routes: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, raw: impl Into<String>) -> Self {
        self.queue.lock().unwrap().push_back(Ok(raw.into()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.queue.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn on(mut self, query_part: &str, raw: impl Into<String>) -> Self {
        self.routes.push((query_part.to_string(), Ok(raw.into())));
        self
    }

    pub fn on_fail(mut self, query_part: &str, message: &str) -> Self {
        self.routes.push((query_part.to_string(), Err(message.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<String> {
        self.calls.lock().unwrap().push(query.to_string());

        let reply = match self.routes.iter().find(|(part, _)| query.contains(part.as_str())) {
            Some((_, reply)) => reply.clone(),
            None => {
                let mut queue = self.queue.lock().unwrap();
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or(Ok(String::new()))
                } else {
                    queue.front().cloned().unwrap_or(Ok(String::new()))
                }
            }
        };
        reply.map_err(|e| anyhow!(e))
    }
}

/// Completion capability answering by prompt content.
///
/// A route matches when every one of its markers occurs in the prompt; the
/// first matching route wins. Unmatched prompts get the default reply.
pub struct ScriptedCompleter {
    routes: Vec<(Vec<String>, Reply)>,
    default: String,
    unavailable: bool,
    stalled: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompleter {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            default: String::new(),
            unavailable: false,
            stalled: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default = reply.into();
        self
    }

    pub fn on(self, marker: &str, reply: impl Into<String>) -> Self {
        self.when(&[marker], reply)
    }

    pub fn when(mut self, markers: &[&str], reply: impl Into<String>) -> Self {
        self.routes.push((
            markers.iter().map(|m| m.to_string()).collect(),
            Ok(reply.into()),
        ));
        self
    }

    pub fn on_fail(self, marker: &str, message: &str) -> Self {
        self.fail_when(&[marker], message)
    }

    pub fn fail_when(mut self, markers: &[&str], message: &str) -> Self {
        self.routes.push((
            markers.iter().map(|m| m.to_string()).collect(),
            Err(message.to_string()),
        ));
        self
    }

    /// Prompts containing `marker` never get an answer.
    pub fn stall_on(mut self, marker: &str) -> Self {
        self.stalled.push(marker.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn count(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.stalled.iter().any(|m| prompt.contains(m.as_str())) {
            std::future::pending::<()>().await;
        }
        let route = self
            .routes
            .iter()
            .find(|(markers, _)| markers.iter().all(|m| prompt.contains(m.as_str())));
        match route {
            Some((_, Ok(reply))) => Ok(reply.clone()),
            Some((_, Err(message))) => Err(anyhow!(message.clone())),
            None => Ok(self.default.clone()),
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(anyhow!("completion backend unavailable"));
        }
        Ok(())
    }
}

/// Keeps every event; optionally reports each delivery as failed.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn send(&self, event: &ProgressEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.failing {
            return Err(anyhow!("sink offline"));
        }
        Ok(())
    }
}

/// One result stanza in backend output format.
pub fn block(title: &str, url: &str, content: &str) -> String {
    format!("[Result 1]\nTitle: {}\nURL: {}\nContent: {}\n", title, url, content)
}
