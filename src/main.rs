use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use dispatch_lite::config::{DispatchConfig, ExecutorConfig, NodeConfig, ProducerConfig};
use dispatch_lite::dispatch::{DispatchClient, HttpTransport};
use dispatch_lite::node::Node;
use dispatch_lite::remote::{RemoteJobStore, RemoteRegistry};
use dispatch_lite::scheduler::{Job, JobStore, Registry, ServiceRegistration, ServiceStatistics};
use dispatch_lite::shutdown::install_shutdown_handler;
use dispatch_lite::worker::CommandPayload;

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "Least-loaded job dispatch across a fleet of worker hosts")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a node hosting job producers and, without --registry, the registry
    Server(ServerArgs),

    /// Job submission and inspection
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Registry management commands
    Registry {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: RegistryCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for HTTP
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// URL other nodes use to reach this one (default: http://127.0.0.1:<port>)
    #[arg(long)]
    host_url: Option<String>,

    /// Registry node URL. When omitted this node hosts the registry itself.
    #[arg(long)]
    registry: Option<String>,

    /// Hosted service, format: "type=program [args...]"
    /// Example: --service "compose=/usr/bin/ffmpeg -y"
    #[arg(long = "service")]
    services: Vec<String>,

    /// Maximum concurrently running jobs per service
    #[arg(long, default_value = "2")]
    pool_size: usize,

    /// Timeout for requests to other nodes
    #[arg(long, default_value = "30000")]
    request_timeout_ms: u64,
}

// =============================================================================
// Client Arguments (shared by job and registry commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Registry node URL
    #[arg(long, short = 'r', default_value = "http://127.0.0.1:8080")]
    registry: String,

    /// Request timeout
    #[arg(long, default_value = "30000")]
    request_timeout_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Dispatch a job to the least loaded host for a service type
    Submit {
        /// Service type, e.g. "compose"
        service_type: String,

        /// Arguments appended to the service's program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Wait until the job is FINISHED or FAILED
        #[arg(long)]
        block: bool,

        /// Poll interval while blocking
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,

        /// Give up blocking after this long
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },
    /// Get a job from the shared store
    Status {
        /// The job ID (UUID)
        job_id: Uuid,
    },
    /// List jobs, optionally filtered
    List {
        #[arg(long)]
        service_type: Option<String>,

        #[arg(long)]
        host: Option<String>,
    },
}

// =============================================================================
// Registry Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum RegistryCommands {
    /// Registrations, optionally narrowed to a service type or host
    List {
        #[arg(long)]
        service_type: Option<String>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Eligible hosts for a service type, least loaded first
    Hosts { service_type: String },
    /// Per-registration job statistics
    Stats {
        #[arg(long)]
        service_type: Option<String>,
    },
    /// Put every registration of a host into or out of maintenance
    Maintenance {
        service_type: String,
        host: String,
        state: Switch,
    },
    /// Mark every registration of a host online or offline
    Online {
        service_type: String,
        host: String,
        state: Switch,
    },
    /// Remove one registration
    Unregister {
        service_type: String,
        host: String,
        path: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListOutput<'a> {
    jobs: &'a [Job],
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse a `type=program [args...]` service flag.
fn parse_service(raw: &str) -> Result<(String, ExecutorConfig), String> {
    let (service_type, command) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid service '{}', expected type=program", raw))?;
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| format!("service '{}' has no program", service_type))?;
    let service_type = service_type.trim();
    if service_type.is_empty() {
        return Err(format!("invalid service '{}', empty type", raw));
    }
    Ok((
        service_type.to_string(),
        ExecutorConfig::new(program).with_base_args(parts),
    ))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job ID:        {}", job.id);
    println!("Service Type:  {}", job.service_type);
    println!("Status:        {}", job.status);
    if let Some(ref host) = job.assigned_host {
        println!("Assigned Host: {}", host);
    }
    println!("Created:       {}", job.created_at);
    if let Some(started) = job.started_at {
        println!("Started:       {}", started);
    }
    if let Some(completed) = job.completed_at {
        println!("Completed:     {}", completed);
    }
    if let Some(ref payload) = job.payload {
        println!("Payload:");
        for line in payload.lines() {
            println!("  {}", line);
        }
    }
}

fn print_registrations(registrations: &[ServiceRegistration]) {
    if registrations.is_empty() {
        println!("No registrations found.");
        return;
    }
    println!(
        "{:<16} {:<32} {:<24} {:<8} {:<12} PRODUCER",
        "TYPE", "HOST", "PATH", "ONLINE", "MAINTENANCE"
    );
    println!("{}", "-".repeat(104));
    for r in registrations {
        println!(
            "{:<16} {:<32} {:<24} {:<8} {:<12} {}",
            r.service_type, r.host, r.path, r.online, r.maintenance, r.job_producer
        );
    }
}

fn print_statistics(stats: &[ServiceStatistics]) {
    if stats.is_empty() {
        println!("No registrations found.");
        return;
    }
    println!(
        "{:<16} {:<32} {:>7} {:>7} {:>8} {:>6} {:>10} {:>10}",
        "TYPE", "HOST", "QUEUED", "RUNNING", "FINISHED", "FAILED", "QUEUE MS", "RUN MS"
    );
    println!("{}", "-".repeat(104));
    for s in stats {
        println!(
            "{:<16} {:<32} {:>7} {:>7} {:>8} {:>6} {:>10} {:>10}",
            s.registration.service_type,
            s.registration.host,
            s.queued_jobs,
            s.running_jobs,
            s.finished_jobs,
            s.failed_jobs,
            s.mean_queue_time_ms,
            s.mean_run_time_ms
        );
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let host_url = args
        .host_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", args.port));

    let mut config = NodeConfig::new(listen_addr, host_url);
    config.producer = ProducerConfig {
        pool_size: args.pool_size,
    };
    config.dispatch = DispatchConfig {
        request_timeout_ms: args.request_timeout_ms,
        ..DispatchConfig::default()
    };
    for raw in &args.services {
        let (service_type, executor) = parse_service(raw)?;
        config = config.with_service(service_type, executor);
    }
    if let Some(url) = args.registry {
        config = config.with_registry(url);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        host_url = %config.host_url,
        registry = ?config.registry_url,
        services = ?config.services.iter().map(|s| s.service_type.as_str()).collect::<Vec<_>>(),
        pool_size = config.producer.pool_size,
        "Starting dispatch-lite node"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config)?;
    node.run(shutdown)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_command(
    client: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = std::time::Duration::from_millis(client.request_timeout_ms);

    match command {
        JobCommands::Submit {
            service_type,
            args,
            block,
            poll_interval_ms,
            max_wait_ms,
        } => {
            let registry = Arc::new(RemoteRegistry::new(client.registry.clone(), timeout)?);
            let transport = Arc::new(HttpTransport::new(timeout)?);
            let mut config = DispatchConfig::default().with_poll_interval_ms(poll_interval_ms);
            if let Some(ms) = max_wait_ms {
                config = config.with_max_wait_ms(ms);
            }
            let mut dispatcher = DispatchClient::new(registry, transport, config);
            if block {
                dispatcher = dispatcher.with_cancellation(install_shutdown_handler()?);
            }

            let job = dispatcher
                .dispatch(&service_type, &CommandPayload::new(args), block)
                .await?;
            match client.output {
                OutputFormat::Json => print_json(&job)?,
                OutputFormat::Table => {
                    if !block {
                        println!("Job submitted successfully!");
                    }
                    print_job(&job);
                }
            }
        }
        JobCommands::Status { job_id } => {
            let store = RemoteJobStore::new(client.registry, timeout)?;
            let job = store.get(job_id).await?;
            match client.output {
                OutputFormat::Json => print_json(&job)?,
                OutputFormat::Table => print_job(&job),
            }
        }
        JobCommands::List { service_type, host } => {
            let store = RemoteJobStore::new(client.registry, timeout)?;
            let jobs: Vec<Job> = store
                .jobs()
                .await?
                .into_iter()
                .filter(|j| service_type.as_ref().map_or(true, |t| &j.service_type == t))
                .filter(|j| host.is_none() || j.assigned_host == host)
                .collect();

            match client.output {
                OutputFormat::Json => print_json(&JobListOutput {
                    jobs: &jobs,
                    total_count: jobs.len(),
                })?,
                OutputFormat::Table => {
                    if jobs.is_empty() {
                        println!("No jobs found.");
                    } else {
                        println!(
                            "{:<38} {:<16} {:<10} HOST",
                            "JOB ID", "TYPE", "STATUS"
                        );
                        println!("{}", "-".repeat(90));
                        for job in &jobs {
                            println!(
                                "{:<38} {:<16} {:<10} {}",
                                job.id,
                                job.service_type,
                                job.status,
                                job.assigned_host.as_deref().unwrap_or("-")
                            );
                        }
                        println!();
                        println!("{} jobs", jobs.len());
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_registry_command(
    client: ClientArgs,
    command: RegistryCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = std::time::Duration::from_millis(client.request_timeout_ms);
    let registry = RemoteRegistry::new(client.registry, timeout)?;

    match command {
        RegistryCommands::List { service_type, host } => {
            let registrations = match (service_type, host) {
                (Some(service_type), Some(host)) => {
                    vec![registry.registration(&service_type, &host).await?]
                }
                (Some(service_type), None) => registry.registrations_by_type(&service_type).await?,
                (None, Some(host)) => registry.registrations_by_host(&host).await?,
                (None, None) => registry.registrations().await?,
            };
            match client.output {
                OutputFormat::Json => print_json(&registrations)?,
                OutputFormat::Table => print_registrations(&registrations),
            }
        }
        RegistryCommands::Hosts { service_type } => {
            let ranked = registry.ranked_registrations(&service_type).await?;
            match client.output {
                OutputFormat::Json => print_json(&ranked)?,
                OutputFormat::Table => print_registrations(&ranked),
            }
        }
        RegistryCommands::Stats { service_type } => {
            let stats = registry.statistics(service_type.as_deref()).await?;
            match client.output {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Table => print_statistics(&stats),
            }
        }
        RegistryCommands::Maintenance {
            service_type,
            host,
            state,
        } => {
            registry
                .set_maintenance(&service_type, &host, state.enabled())
                .await?;
            println!("Maintenance {:?} for {} on {}", state, service_type, host);
        }
        RegistryCommands::Online {
            service_type,
            host,
            state,
        } => {
            registry
                .set_online(&service_type, &host, state.enabled())
                .await?;
            println!("Online {:?} for {} on {}", state, service_type, host);
        }
        RegistryCommands::Unregister {
            service_type,
            host,
            path,
        } => {
            registry.unregister(&service_type, &host, &path).await?;
            println!("Unregistered {} at {}{}", service_type, host, path);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Job { client, command } => handle_job_command(client, command).await,
        Commands::Registry { client, command } => handle_registry_command(client, command).await,
    }
}
