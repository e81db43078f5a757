//! Recording fakes for the outbound collaborators.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::bot::AppState;
use crate::config::Config;
use crate::github::{DispatchOutcome, HistoryRecord, HistorySource, JobDispatcher, JobRef};
use crate::platform::Messenger;

#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeMessenger {
    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_for(&self, chat_id: &str) {
        self.failing.lock().unwrap().insert(chat_id.to_string());
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(chat_id) {
            anyhow::bail!("chat {} unreachable", chat_id);
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FakeDispatch {
    Accept,
    Reject(u16),
    Fail,
}

pub struct FakeDispatcher {
    mode: Mutex<FakeDispatch>,
    calls: Mutex<Vec<JobRef>>,
}

impl Default for FakeDispatcher {
    fn default() -> Self {
        Self {
            mode: Mutex::new(FakeDispatch::Accept),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDispatcher {
    pub fn set(&self, mode: FakeDispatch) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JobDispatcher for FakeDispatcher {
    async fn dispatch(&self, job: &JobRef) -> DispatchOutcome {
        self.calls.lock().unwrap().push(job.clone());
        match *self.mode.lock().unwrap() {
            FakeDispatch::Accept => DispatchOutcome::Accepted,
            FakeDispatch::Reject(status) => DispatchOutcome::Rejected {
                status,
                body: "rejected".to_string(),
            },
            FakeDispatch::Fail => DispatchOutcome::Failed(anyhow::anyhow!("connection reset")),
        }
    }
}

pub struct FakeHistory {
    response: Mutex<Result<Vec<HistoryRecord>, String>>,
    calls: Mutex<usize>,
}

impl Default for FakeHistory {
    fn default() -> Self {
        Self {
            response: Mutex::new(Ok(Vec::new())),
            calls: Mutex::new(0),
        }
    }
}

impl FakeHistory {
    /// `Err` simulates an unreachable history file.
    pub fn set(&self, response: Result<Vec<HistoryRecord>, String>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn latest(&self) -> Result<Vec<HistoryRecord>> {
        *self.calls.lock().unwrap() += 1;
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }
}

pub struct Fakes {
    pub messenger: Arc<FakeMessenger>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub history: Arc<FakeHistory>,
}

pub fn config(admin: Option<&str>) -> Config {
    let mut config = Config::default();
    config.telegram.bot_token = "123:test".to_string();
    config.telegram.admin_chat_id = admin.map(String::from);
    config
}

/// A config with a complete `/hat` setup.
pub fn config_with_github(admin: Option<&str>) -> Config {
    let mut config = config(admin);
    config.github.repo = Some("elves/workshop".to_string());
    config.github.workflow = Some("draw.yml".to_string());
    config.github.token = Some("ghp_test".to_string());
    config
}

pub fn app_state(config: Config) -> (AppState, Fakes) {
    let fakes = Fakes {
        messenger: Arc::new(FakeMessenger::default()),
        dispatcher: Arc::new(FakeDispatcher::default()),
        history: Arc::new(FakeHistory::default()),
    };
    let state = AppState::new(
        config,
        fakes.messenger.clone(),
        fakes.dispatcher.clone(),
        fakes.history.clone(),
    );
    (state, fakes)
}
