//! fleetd — the fleetscale daemon.
//!
//! Single binary that assembles the controller:
//! - Simulated cloud (redb) standing in for the provisioning and
//!   load-balancer collaborators
//! - Scale engine + trigger dispatcher
//! - Reconciliation loop
//! - Decision metrics
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd init --name web
//! fleetd check --config fleet.toml
//! fleetd run --config fleet.toml --port 9090 --data-dir /var/lib/fleetscale
//! ```

mod daemon;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use fleet_core::{FleetConfig, parse_duration};

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetscale elastic-scaling controller", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller against the simulated cloud.
    Run {
        /// Fleet configuration file. Built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: FleetOverrides,

        /// Port for the REST API.
        #[arg(long, default_value = "9090")]
        port: u16,

        /// Persist the simulated cloud here. In-memory when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Reconciliation sweep interval in seconds (0 disables).
        #[arg(long, default_value = "60")]
        reconcile_interval: u64,

        /// Time a simulated worker spends provisioning.
        #[arg(long, default_value = "5s")]
        sim_boot_delay: String,

        /// Time a simulated worker spends draining after delete.
        #[arg(long, default_value = "2s")]
        sim_teardown_delay: String,
    },
    /// Write a scaffold fleet.toml.
    Init {
        /// Fleet name; also seeds the worker prefix and backend set name.
        #[arg(long, default_value = "autoscaling-demo")]
        name: String,

        #[arg(short, long, default_value = "fleet.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        overrides: FleetOverrides,
    },
    /// Validate a fleet.toml and print the resolved settings.
    Check {
        #[arg(short, long, default_value = "fleet.toml")]
        config: PathBuf,

        #[command(flatten)]
        overrides: FleetOverrides,
    },
}

/// Settings that can also come from the environment, under the names the
/// deployment manifests already use.
#[derive(Args, Debug, Default, Clone)]
struct FleetOverrides {
    #[arg(long, env = "MIN_INSTANCES")]
    min_instances: Option<u32>,

    #[arg(long, env = "MAX_INSTANCES")]
    max_instances: Option<u32>,

    #[arg(long, env = "BACKEND_SET_NAME")]
    backend_set_name: Option<String>,

    #[arg(long, env = "DISPLAY_NAME_PREFIX")]
    display_name_prefix: Option<String>,

    #[arg(long, env = "APP_PORT")]
    app_port: Option<u16>,
}

impl FleetOverrides {
    fn apply(&self, config: &mut FleetConfig) {
        if let Some(n) = self.min_instances {
            config.fleet.min_instances = n;
        }
        if let Some(n) = self.max_instances {
            config.fleet.max_instances = n;
        }
        if let Some(name) = &self.backend_set_name {
            config.backend_set.name = name.clone();
        }
        if let Some(prefix) = &self.display_name_prefix {
            config.fleet.name_prefix = prefix.clone();
        }
        if let Some(port) = self.app_port {
            config.fleet.app_port = port;
        }
    }
}

fn load_config(path: Option<&PathBuf>, overrides: &FleetOverrides) -> anyhow::Result<FleetConfig> {
    let mut config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FleetConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetscale=debug"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            overrides,
            port,
            data_dir,
            reconcile_interval,
            sim_boot_delay,
            sim_teardown_delay,
        } => {
            let config = load_config(config.as_ref(), &overrides)?;
            let settings = config.settings().context("invalid fleet configuration")?;
            let options = daemon::DaemonOptions {
                port,
                data_dir,
                reconcile_interval: Duration::from_secs(reconcile_interval),
                boot_delay: parse_duration(&sim_boot_delay)
                    .with_context(|| format!("invalid --sim-boot-delay {sim_boot_delay:?}"))?,
                teardown_delay: parse_duration(&sim_teardown_delay).with_context(|| {
                    format!("invalid --sim-teardown-delay {sim_teardown_delay:?}")
                })?,
            };
            daemon::run(settings, options).await
        }
        Command::Init {
            name,
            output,
            force,
            overrides,
        } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            let defaults = FleetConfig::default();
            let mut config =
                FleetConfig::scaffold(&name, defaults.fleet.min_instances, defaults.fleet.max_instances);
            overrides.apply(&mut config);
            config.settings().context("scaffold would be invalid")?;
            std::fs::write(&output, config.to_toml_string()?)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(path = %output.display(), fleet = %name, "wrote fleet configuration");
            Ok(())
        }
        Command::Check { config, overrides } => {
            let loaded = load_config(Some(&config), &overrides)?;
            let settings = loaded
                .settings()
                .with_context(|| format!("{} is invalid", config.display()))?;
            println!("fleet:          {}", settings.fleet_id);
            println!("name prefix:    {}", settings.filter.name_prefix);
            println!(
                "instances:      {}..={}",
                settings.min_instances, settings.max_instances
            );
            println!("backend set:    {}", settings.backend_set.name);
            println!("app port:       {}", settings.app_port);
            println!("ready timeout:  {:?}", settings.provision_ready_timeout);
            println!("drain timeout:  {:?}", settings.backend_drain_timeout);
            println!("guard timeout:  {:?}", settings.guard_acquire_timeout);
            println!("call timeout:   {:?}", settings.call_timeout);
            Ok(())
        }
    }
}
