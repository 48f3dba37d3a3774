//! Request, result and response types of the poll protocol

use std::net::IpAddr;
use std::str::FromStr;

use axum::http::Method;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

use super::JobId;

// ============================================================================
// Agent role
// ============================================================================

/// Kind of work an agent performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Scans address ranges for reachable hosts
    Discovery,
    /// Samples latency towards known reachable hosts
    Data,
}

impl AgentRole {
    /// Metrics and log label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Data => "data",
        }
    }

    /// Value of `next` in a response that carries jobs for this role
    pub fn next_tag(&self) -> &'static str {
        match self {
            Self::Discovery => "ping",
            Self::Data => "data",
        }
    }
}

impl FromStr for AgentRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discovery" | "ping" => Ok(Self::Discovery),
            "data" | "latency" => Ok(Self::Data),
            other => Err(Error::config(format!("unknown agent role '{other}'"))),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// One agent poll, as seen by the protocol
///
/// Carries everything a poll needs; the coordinator keeps no session.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Address the agent polls from, used to locate its city
    pub source_ip: Option<IpAddr>,
    pub user_agent: String,
    pub method: Method,
    /// The `next` query parameter; echoed by agents, never interpreted
    pub query_next: Option<String>,
    /// Raw POST body holding the results of the previous round
    pub body: Option<String>,
    /// Explicit role from the `X-Agent-Role` header or `role` query parameter
    pub role_hint: Option<AgentRole>,
}

impl AgentRequest {
    /// A bodiless GET poll
    pub fn get(user_agent: impl Into<String>, source_ip: Option<IpAddr>) -> Self {
        Self {
            source_ip,
            user_agent: user_agent.into(),
            method: Method::GET,
            query_next: None,
            body: None,
            role_hint: None,
        }
    }

    /// A POST poll carrying results
    pub fn post(
        user_agent: impl Into<String>,
        source_ip: Option<IpAddr>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.into()),
            ..Self::get(user_agent, source_ip)
        }
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role_hint = Some(role);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.query_next = Some(next.into());
        self
    }

    /// Results body, when this poll carries one
    pub fn results_body(&self) -> Option<&str> {
        if self.method != Method::POST {
            return None;
        }
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of one job, as posted back by an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "jobId", alias = "jobid", default)]
    pub job_id: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stdout: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stderr: String,
}

/// Agents that captured no output may send `null`
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counts of what one ingest pass applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Addresses marked discovered
    pub discovered: usize,
    /// Statistics rows upserted
    pub rows: usize,
    /// Entries skipped (bad id, unresolved source, failed write)
    pub skipped: usize,
}

// ============================================================================
// Response
// ============================================================================

/// One job handed to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCommand {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub command: String,
}

/// Poll response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub job: Vec<JobCommand>,
    /// Tag the agent echoes in its next poll, empty when idle
    pub next: String,
    /// Seconds the agent waits before polling again
    pub interval: u64,
    pub status: u16,
}

impl PollResponse {
    pub fn is_idle(&self) -> bool {
        self.job.is_empty()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the poll protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// User agent prefixes that identify discovery agents
    pub discovery_user_agents: Vec<String>,
    /// Discovery jobs per response
    pub discovery_batch: usize,
    /// Latency jobs per response
    pub data_batch: usize,
    /// fping `-X`: stop a scan after this many reachable hosts
    pub max_found: u32,
    /// fping `-C`: samples per address
    pub sample_count: u32,
    /// Addresses per latency job
    pub targets_per_job: usize,
    /// Poll interval when jobs were handed out
    pub busy_interval: u64,
    /// Poll interval when there was nothing to do
    pub idle_interval: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            discovery_user_agents: vec!["fping-watchmen".to_string()],
            discovery_batch: 20,
            data_batch: 10,
            max_found: 100,
            sample_count: 11,
            targets_per_job: 100,
            busy_interval: 1,
            idle_interval: 3600,
        }
    }
}

impl ProtocolSettings {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_batch == 0 || self.data_batch == 0 {
            return Err(Error::config("protocol batch sizes must be > 0"));
        }
        if self.max_found == 0 {
            return Err(Error::config("protocol.max_found must be > 0"));
        }
        if self.sample_count == 0 {
            return Err(Error::config("protocol.sample_count must be > 0"));
        }
        if self.targets_per_job == 0 {
            return Err(Error::config("protocol.targets_per_job must be > 0"));
        }
        if self.idle_interval == 0 {
            return Err(Error::config("protocol.idle_interval must be > 0"));
        }
        Ok(())
    }

    /// Role implied by the user agent alone
    pub fn role_for_user_agent(&self, user_agent: &str) -> AgentRole {
        if self
            .discovery_user_agents
            .iter()
            .any(|prefix| !prefix.is_empty() && user_agent.starts_with(prefix.as_str()))
        {
            AgentRole::Discovery
        } else {
            AgentRole::Data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("discovery".parse::<AgentRole>().unwrap(), AgentRole::Discovery);
        assert_eq!(" DATA ".parse::<AgentRole>().unwrap(), AgentRole::Data);
        assert!("probe".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_role_for_user_agent() {
        let settings = ProtocolSettings::default();
        assert_eq!(settings.role_for_user_agent("fping-watchmen/1.2"), AgentRole::Discovery);
        assert_eq!(settings.role_for_user_agent("fping-agent/1.0"), AgentRole::Data);
        assert_eq!(settings.role_for_user_agent(""), AgentRole::Data);
    }

    #[test]
    fn test_job_result_accepts_both_id_spellings() {
        let results: Vec<JobResult> = serde_json::from_str(
            r#"[{"jobId":"ping1","status":0,"stdout":"","stderr":""},{"jobid":"data2"}]"#,
        )
        .unwrap();
        assert_eq!(results[0].job_id, "ping1");
        assert_eq!(results[1].job_id, "data2");
        assert_eq!(results[1].stdout, "");
    }

    #[test]
    fn test_job_result_null_output_is_empty() {
        let result: JobResult =
            serde_json::from_str(r#"{"jobId":"ping3","status":1,"stdout":null,"stderr":null}"#)
                .unwrap();
        assert_eq!(result.job_id, "ping3");
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "");

        assert!(serde_json::from_str::<JobResult>(r#"{"jobId":7}"#).is_err());
    }

    #[test]
    fn test_results_body_only_for_post() {
        let get = AgentRequest::get("ua", None);
        assert!(get.results_body().is_none());

        let empty = AgentRequest::post("ua", None, "  ");
        assert!(empty.results_body().is_none());

        let post = AgentRequest::post("ua", None, "[]");
        assert_eq!(post.results_body(), Some("[]"));
    }

    #[test]
    fn test_poll_response_wire_format() {
        let response = PollResponse {
            job: vec![JobCommand {
                job_id: JobId::discovery(3),
                command: "fping".to_string(),
            }],
            next: "ping".to_string(),
            interval: 1,
            status: 200,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["job"][0]["jobId"], "ping3");
        assert_eq!(json["status"], 200);
    }

    #[test]
    fn test_settings_validation() {
        assert!(ProtocolSettings::default().validate().is_ok());
        let settings = ProtocolSettings {
            data_batch: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
