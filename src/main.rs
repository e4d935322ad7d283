//! nslb - namespace-scoped SEnginx load balancer driver
//!
//! Usage:
//!     nslb --config <path> run
//!     nslb render --device <file>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use nslb::agent::{parse_device, AgentManager, DeviceWatcher, DirectorySource, SourcePlugCallback};
use nslb::config::{load_config, validate_config, Config};
use nslb::model::LogicalConfig;
use nslb::namespace::{LoggingPlugCallback, PlugCallback, RootHelperExecutor};
use nslb::render::{ConfigCompiler, Dialect};
use nslb::supervisor::{DeviceDriver, InstanceSupervisor};
use nslb::util::init_logging;

/// Runs SEnginx load balancer instances inside network namespaces.
#[derive(Parser, Debug)]
#[command(name = "nslb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the agent configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the proxy configuration for a device file
    Render {
        /// Device description (YAML or JSON)
        #[arg(short, long, value_name = "FILE")]
        device: PathBuf,

        /// Override the configured dialect
        #[arg(long, value_enum)]
        dialect: Option<DialectArg>,
    },
    /// Plug the VIP port and start a proxy instance
    Create {
        #[arg(short, long, value_name = "FILE")]
        device: PathBuf,
    },
    /// Rewrite the configuration and reload a running instance
    Update {
        #[arg(short, long, value_name = "FILE")]
        device: PathBuf,
    },
    /// Stop an instance and remove its state
    Destroy { pool_id: String },
    /// Report whether an instance is running
    Exists { pool_id: String },
    /// Validate the configuration and exit
    Validate,
    /// Run the agent, keeping instances in line with the devices directory
    Run,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    Senginx,
    Legacy,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Senginx => Dialect::Senginx,
            DialectArg::Legacy => Dialect::Legacy,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => {
            let config = Config::default();
            validate_config(&config)
                .map_err(anyhow::Error::msg)
                .context("default configuration is invalid")?;
            config
        }
    };

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    match cli.command {
        Command::Render { device, dialect } => render(&config, &device, dialect),
        Command::Create { device } => {
            let device = load_device(&device)?;
            supervisor(&config)?
                .create(&device)
                .with_context(|| format!("failed to create instance for pool '{}'", device.pool_id()))?;
            info!(pool_id = %device.pool_id(), "instance created");
            Ok(())
        }
        Command::Update { device } => {
            let device = load_device(&device)?;
            supervisor(&config)?
                .update(&device)
                .with_context(|| format!("failed to update instance for pool '{}'", device.pool_id()))?;
            info!(pool_id = %device.pool_id(), "instance updated");
            Ok(())
        }
        Command::Destroy { pool_id } => {
            let report = supervisor(&config)?
                .destroy(&pool_id)
                .with_context(|| format!("failed to destroy instance for pool '{}'", pool_id))?;
            println!("Destroyed instance for pool {}.", pool_id);
            println!("  Signalled: {:?}", report.signalled);
            for failure in &report.failed {
                println!("  Failed to signal {}: {}", failure.pid, failure.reason);
            }
            println!("  Port unplugged: {}", report.unplugged);
            println!("  Namespace removed: {}", report.namespace_removed);
            Ok(())
        }
        Command::Exists { pool_id } => {
            let running = supervisor(&config)?.exists(&pool_id);
            println!("{}", if running { "running" } else { "not running" });
            if !running {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Validate => {
            info!("Configuration is valid");
            println!("Configuration is valid.");
            println!("  State path: {}", config.agent.state_path.display());
            println!("  Devices path: {}", config.agent.devices_path.display());
            println!(
                "  Proxy: {} ({:?})",
                config.proxy.binary.display(),
                config.proxy.dialect
            );
            println!(
                "  Interface: {:?} on {}",
                config.interface.driver, config.interface.bridge
            );
            Ok(())
        }
        Command::Run => run(&config),
    }
}

fn load_device(path: &Path) -> Result<LogicalConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read device file '{}'", path.display()))?;
    Ok(parse_device(path, &contents)?)
}

fn supervisor(config: &Config) -> Result<InstanceSupervisor> {
    supervisor_with_callback(config, Arc::new(LoggingPlugCallback))
}

fn supervisor_with_callback(
    config: &Config,
    callback: Arc<dyn PlugCallback>,
) -> Result<InstanceSupervisor> {
    let executor = RootHelperExecutor::from_shell(&config.agent.root_helper)
        .context("invalid root helper")?;
    Ok(InstanceSupervisor::from_config(config, Arc::new(executor), callback))
}

/// Print the rendered configuration for a device file.
fn render(config: &Config, device: &Path, dialect: Option<DialectArg>) -> Result<()> {
    let logical = load_device(device)?;
    let dialect = dialect.map(Dialect::from).unwrap_or(config.proxy.dialect);
    let compiler = ConfigCompiler::new(dialect, config.proxy.compiler_options());

    match compiler
        .render(&logical)
        .with_context(|| format!("failed to render pool '{}'", logical.pool_id()))?
    {
        Some(text) => print!("{}", text),
        None => warn!(pool_id = %logical.pool_id(), "VIP has no protocol, nothing rendered"),
    }
    Ok(())
}

/// Run the agent loop until the process is terminated.
fn run(config: &Config) -> Result<()> {
    let source = Arc::new(DirectorySource::new(&config.agent.devices_path));
    let callback = Arc::new(SourcePlugCallback::new(source.clone()));
    let driver = Arc::new(supervisor_with_callback(config, callback)?);
    let manager = AgentManager::new(driver, source);
    let interval = config.agent.periodic_interval;

    let watcher = match DeviceWatcher::new(&config.agent.devices_path) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "failed to watch devices directory, relying on periodic resync");
            None
        }
    };

    info!(
        state_path = %config.agent.state_path.display(),
        devices_path = %config.agent.devices_path.display(),
        interval = %humantime::format_duration(interval),
        "nslb agent starting"
    );

    manager.sync_state();

    loop {
        let changed = match &watcher {
            Some(watcher) => watcher.wait(interval),
            None => {
                std::thread::sleep(interval);
                false
            }
        };

        if changed {
            manager.request_resync();
        }
        manager.periodic_resync();
        manager.collect_stats();
    }
}
