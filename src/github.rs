use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GithubConfig;

const USER_AGENT: &str = "secret-santa-bot-worker";

/// One past draw, as written by the automation job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub date: String,
    #[serde(default, deserialize_with = "de_control_number")]
    pub control_number: Option<String>,
}

fn de_control_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Everything needed to trigger the draw workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub repo: String,
    pub workflow: String,
    pub git_ref: String,
    pub token: String,
}

impl JobRef {
    /// `None` when the repository, workflow or token is missing.
    pub fn from_config(config: &GithubConfig) -> Option<Self> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Some(Self {
            repo: present(&config.repo)?,
            workflow: present(&config.workflow)?,
            git_ref: config.git_ref.clone(),
            token: present(&config.token)?,
        })
    }
}

/// Result of a single dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    Accepted,
    /// The API answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The request never produced a response.
    Failed(anyhow::Error),
}

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &JobRef) -> DispatchOutcome;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Most recent first; the job keeps at most three records.
    async fn latest(&self) -> Result<Vec<HistoryRecord>>;
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

pub struct GithubClient {
    client: reqwest::Client,
    api_base_url: String,
    history_url: Option<String>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            history_url: config.effective_history_url(),
        }
    }

    fn dispatch_url(&self, job: &JobRef) -> String {
        format!(
            "{}/repos/{}/actions/workflows/{}/dispatches",
            self.api_base_url, job.repo, job.workflow
        )
    }
}

#[async_trait]
impl JobDispatcher for GithubClient {
    async fn dispatch(&self, job: &JobRef) -> DispatchOutcome {
        let url = self.dispatch_url(job);
        debug!("Dispatching workflow: {}", url);

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", job.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(&DispatchRequest {
                git_ref: &job.git_ref,
            })
            .send()
            .await
            .context("Failed to send workflow dispatch request")
        {
            Ok(response) => response,
            Err(e) => return DispatchOutcome::Failed(e),
        };

        let status = response.status();
        if status.is_success() {
            DispatchOutcome::Accepted
        } else {
            let body = response.text().await.unwrap_or_default();
            DispatchOutcome::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

#[async_trait]
impl HistorySource for GithubClient {
    async fn latest(&self) -> Result<Vec<HistoryRecord>> {
        let url = self
            .history_url
            .as_deref()
            .context("No repository configured for draw history")?;

        debug!("Fetching draw history: {}", url);

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("Failed to fetch draw history")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("History fetch failed ({})", status);
        }

        response
            .json()
            .await
            .context("Failed to parse draw history")
    }
}
