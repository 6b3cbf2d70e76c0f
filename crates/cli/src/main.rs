//! dcctl - operator CLI for the data center agent
//!
//! Runs one task operation directly against the cluster, using the same
//! reconciliation path as the daemon.

mod commands;
mod config;
mod output;

use agent_lib::cluster::{ClusterClient, ClusterSettings};
use agent_lib::task::Tasker;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use commands::{cluster, jobs, tasks};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcctl")]
#[command(author, version, about = "CLI for the data center agent", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (falls back to ~/.kube/config, then in-cluster)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace the agent manages
    #[arg(long, short, env = "DCAGENT_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Base domain for generated route hosts
    #[arg(long, env = "DCAGENT_INGRESS_HOST", global = true)]
    pub ingress_host: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub output: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy, update, cancel and list workload tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Run and cancel batch or scheduled jobs
    #[command(subcommand)]
    Job(JobCommands),

    /// Show rollout status of a workload
    Status {
        /// Workload name
        name: String,
    },

    /// Show available capacity per schedulable node
    Inventory,

    /// Show resource-seconds consumed per workload
    Metering,

    /// Show cluster totals, usage and exposed ports
    Metrics,

    /// Delete the managed namespace and everything in it
    Teardown {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct ImageArgs {
    /// Container image; repeat or comma-separate for several
    #[arg(long = "image", short = 'i', value_delimiter = ',', required = true)]
    pub images: Vec<String>,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Deploy a workload with a service and route per image
    Create {
        /// Task id, also the workload name
        id: String,

        #[command(flatten)]
        images: ImageArgs,
    },

    /// Update replicas and ports of a workload
    Update {
        id: String,

        #[command(flatten)]
        images: ImageArgs,

        #[arg(long, default_value_t = 1)]
        replicas: u32,

        #[arg(long, default_value_t = 80)]
        internal_port: u32,

        #[arg(long, default_value_t = 80)]
        external_port: u32,
    },

    /// Remove a workload with its services and routes
    Cancel { id: String },

    /// List deployed workloads
    List,
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Run a job per image, on a cron schedule if one is given
    Create {
        id: String,

        #[command(flatten)]
        images: ImageArgs,

        /// Cron schedule, e.g. "*/5 * * * *"
        #[arg(long)]
        schedule: Option<String>,
    },

    /// Remove a job
    Cancel {
        id: String,

        /// The job is a scheduled job
        #[arg(long)]
        scheduled: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let defaults = config::Config::load()?;
    let settings = ClusterSettings {
        namespace: cli
            .namespace
            .or(defaults.namespace)
            .unwrap_or_else(|| ClusterSettings::default().namespace),
        ingress_host: cli
            .ingress_host
            .or(defaults.ingress_host)
            .unwrap_or_else(|| ClusterSettings::default().ingress_host),
    };
    let kubeconfig = cli.kubeconfig.or(defaults.kubeconfig);

    if let Commands::Teardown { yes: false } = cli.command {
        bail!(
            "Refusing to delete namespace {:?} without --yes",
            settings.namespace
        );
    }

    let client = ClusterClient::connect(kubeconfig.as_deref(), settings)
        .await
        .context("Failed to reach the cluster")?;
    let tasker = Tasker::new(client);
    let format = cli.output;

    match cli.command {
        Commands::Task(command) => match command {
            TaskCommands::Create { id, images } => {
                tasks::create(&tasker, &id, &images.images, format).await
            }
            TaskCommands::Update {
                id,
                images,
                replicas,
                internal_port,
                external_port,
            } => {
                tasks::update(
                    &tasker,
                    &id,
                    &images.images,
                    replicas,
                    (internal_port, external_port),
                    format,
                )
                .await
            }
            TaskCommands::Cancel { id } => tasks::cancel(&tasker, &id).await,
            TaskCommands::List => tasks::list(&tasker, format).await,
        },
        Commands::Job(command) => match command {
            JobCommands::Create {
                id,
                images,
                schedule,
            } => jobs::create(&tasker, &id, schedule.as_deref(), &images.images).await,
            JobCommands::Cancel { id, scheduled } => jobs::cancel(&tasker, &id, scheduled).await,
        },
        Commands::Status { name } => tasks::status(&tasker, &name, format).await,
        Commands::Inventory => cluster::inventory(&tasker, format).await,
        Commands::Metering => cluster::metering(&tasker, format).await,
        Commands::Metrics => cluster::metrics(&tasker, format).await,
        Commands::Teardown { .. } => cluster::teardown(&tasker).await,
    }
}
