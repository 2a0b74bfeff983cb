use coordination::{
    AgentError, CapabilityError, CapabilitySet, CapabilityTable, ConsensusConfig,
    ConsensusResolver, HttpSolverAgent, SolverAgent, WorkerRegistration,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Failed to build solver agent: {0}")]
    Agent(#[from] AgentError),
}

/// One consensus solver endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentEndpoint {
    pub id: String,
    pub url: String,
}

/// Top-level worker configuration.
///
/// Resolution order: built-in defaults, then the TOML file, then
/// `SWARM_*` environment variables, then CLI flags (applied by the binary).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queue service base URL
    pub queue_url: String,
    /// WebSocket push endpoint; polling only when unset
    pub push_url: Option<String>,
    pub name: String,
    pub worker_type: String,
    /// Capability tags; `"*"` serves every task type
    pub capabilities: Vec<String>,
    /// Task type → capability tag, on top of the built-in table
    pub task_types: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Egress proxy endpoints; empty means direct traffic
    pub proxies: Vec<String>,
    /// Solver endpoints queried by the captcha handler
    pub agents: Vec<AgentEndpoint>,
    pub heartbeat_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub agent_timeout_secs: u64,
    pub confidence_threshold: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_url: "http://localhost:3000".into(),
            push_url: None,
            name: format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            worker_type: "automation".into(),
            capabilities: vec!["*".into()],
            task_types: HashMap::new(),
            metadata: HashMap::new(),
            proxies: Vec::new(),
            agents: Vec::new(),
            heartbeat_interval_secs: 30,
            poll_interval_secs: 5,
            reconnect_delay_secs: 5,
            request_timeout_secs: 30,
            agent_timeout_secs: 30,
            confidence_threshold: 0.8,
        }
    }
}

impl WorkerConfig {
    /// Defaults, optionally overlaid with a TOML file, then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SWARM_*` overrides from `lookup`.
    ///
    /// List variables are comma-separated. `SWARM_AGENTS` entries are
    /// `id=url` or a bare URL (id assigned by position).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SWARM_QUEUE_URL") {
            self.queue_url = url;
        }
        if let Some(url) = lookup("SWARM_PUSH_URL") {
            self.push_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(name) = lookup("SWARM_WORKER_NAME") {
            self.name = name;
        }
        if let Some(caps) = lookup("SWARM_CAPABILITIES") {
            self.capabilities = split_list(&caps);
        }
        if let Some(proxies) = lookup("SWARM_PROXIES") {
            self.proxies = split_list(&proxies);
        }
        if let Some(agents) = lookup("SWARM_AGENTS") {
            self.agents = split_list(&agents)
                .into_iter()
                .enumerate()
                .map(|(i, entry)| match entry.split_once('=') {
                    Some((id, url)) => AgentEndpoint {
                        id: id.trim().to_string(),
                        url: url.trim().to_string(),
                    },
                    None => AgentEndpoint {
                        id: format!("agent-{}", i + 1),
                        url: entry,
                    },
                })
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_url.trim().is_empty() {
            return Err(ConfigError::Invalid("queue_url must not be empty".into()));
        }
        for (field, secs) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("reconnect_delay_secs", self.reconnect_delay_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("agent_timeout_secs", self.agent_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be > 0")));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.capabilities.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one capability is required".into(),
            ));
        }
        self.capability_set()?;
        self.capability_table()?;
        Ok(())
    }

    pub fn capability_set(&self) -> Result<CapabilitySet, CapabilityError> {
        CapabilitySet::parse(self.capabilities.as_slice())
    }

    pub fn capability_table(&self) -> Result<CapabilityTable, CapabilityError> {
        CapabilityTable::default().with_overrides(&self.task_types)
    }

    pub fn registration(&self) -> Result<WorkerRegistration, CapabilityError> {
        Ok(WorkerRegistration {
            name: self.name.clone(),
            worker_type: self.worker_type.clone(),
            capabilities: self.capability_set()?.tags(),
            metadata: self.metadata.clone(),
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            confidence_threshold: self.confidence_threshold,
        }
    }

    /// Resolver over one HTTP agent per configured endpoint.
    pub fn resolver(&self) -> Result<ConsensusResolver, ConfigError> {
        let agents = self
            .agents
            .iter()
            .map(|a| {
                HttpSolverAgent::new(&a.id, &a.url, self.request_timeout())
                    .map(|agent| Arc::new(agent) as Arc<dyn SolverAgent>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConsensusResolver::new(agents, self.consensus_config()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
