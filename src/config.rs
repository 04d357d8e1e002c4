use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How the coordinator submits work and waits for it.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delay between two polls of a blocking dispatch
    pub poll_interval_ms: u64,
    /// Give up waiting for a terminal state after this long. `None` waits forever.
    pub max_wait_ms: Option<u64>,
    /// Per-request timeout for submit and poll calls
    pub request_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_wait_ms: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_wait_ms(mut self, ms: u64) -> Self {
        self.max_wait_ms = Some(ms);
        self
    }
}

/// Worker-side execution limits.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Maximum number of jobs executing concurrently per producer
    pub pool_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self { pool_size: 2 }
    }
}

/// External program run for every job of a service type.
///
/// The job payload supplies extra arguments appended after `base_args`.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program to invoke, e.g. `ffmpeg` or `ffprobe`
    pub program: String,
    /// Arguments passed before the job's own arguments
    pub base_args: Vec<String>,
    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,
}

impl ExecutorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A service type hosted by this node and the program that performs it.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_type: String,
    pub executor: ExecutorConfig,
}

impl ServiceConfig {
    /// Path of this service's endpoints on the node.
    pub fn path(&self) -> String {
        format!("/services/{}", self.service_type)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    /// Base URL other nodes use to reach this one
    pub host_url: String,
    /// Registry/store node to join. `None` hosts the registry and job store locally.
    pub registry_url: Option<String>,
    pub services: Vec<ServiceConfig>,
    pub producer: ProducerConfig,
    pub dispatch: DispatchConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            host_url: "http://127.0.0.1:8080".to_string(),
            registry_url: None,
            services: Vec::new(),
            producer: ProducerConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr, host_url: impl Into<String>) -> Self {
        Self {
            listen_addr,
            host_url: host_url.into(),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service_type: impl Into<String>, executor: ExecutorConfig) -> Self {
        self.services.push(ServiceConfig {
            service_type: service_type.into(),
            executor,
        });
        self
    }

    pub fn with_registry(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    /// Whether this node owns the registry and job store.
    pub fn hosts_registry(&self) -> bool {
        self.registry_url.is_none()
    }
}
