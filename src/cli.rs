use crate::config::daemon::DaemonConfig;
use crate::config::types::SubidType;
use crate::enforcement::{
    EnforcementDaemon, EnforcementSettings, PolicyOracle, PortTimePolicy, UtmpSource,
};
use crate::kernel::signal::{KernelSignaler, SignalHandler};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    Logoutd,
    Loginkit,
}

const LOGOUTD_USAGE: &str = "Usage: logoutd [--config FILE] [--foreground] [--once] [--interval SECS]";

#[derive(Parser, Debug, Default)]
#[command(name = "logoutd", author, version, about = "Enforce login time and port restrictions")]
struct LogoutdCli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stay attached to the terminal
    #[arg(long)]
    foreground: bool,
    /// Run a single scan pass, wait for its enforcement tasks and exit
    #[arg(long)]
    once: bool,
    /// Seconds between scans (overrides the configuration file)
    #[arg(long)]
    interval: Option<u64>,
    /// Accepted for compatibility; any value only triggers a usage warning
    #[arg(hide = true)]
    extra: Vec<String>,
}

#[derive(Parser)]
#[command(name = "loginkit", author, version, about = "Login support utilities")]
struct LoginkitCli {
    #[command(subcommand)]
    command: LoginkitCommand,
}

#[derive(Subcommand)]
enum LoginkitCommand {
    /// Show which subordinate-id backend is configured
    Subid(SubidArgs),
    /// Draw cryptographically secure random numbers
    Rand(RandArgs),
    /// Evaluate the porttime policy for a user on a line right now
    Check {
        #[arg(long)]
        user: String,
        #[arg(long)]
        line: String,
        #[arg(long, default_value = crate::config::daemon::DEFAULT_PORTTIME_FILE)]
        porttime: PathBuf,
    },
}

#[derive(Args)]
struct SubidArgs {
    /// Alternate name-service switch file
    #[arg(long)]
    nsswitch: Option<PathBuf>,
    /// List the ranges delegated to this owner
    #[arg(long)]
    owner: Option<String>,
    /// Query group ranges instead of user ranges
    #[arg(long)]
    gid: bool,
}

#[derive(Args)]
struct RandArgs {
    /// Uniform value in [0, N)
    #[arg(long, conflicts_with_all = ["min", "max"])]
    below: Option<u64>,
    /// Lower bound (inclusive)
    #[arg(long, requires = "max")]
    min: Option<u64>,
    /// Upper bound (inclusive)
    #[arg(long, requires = "min")]
    max: Option<u64>,
    /// How many values to draw
    #[arg(long, default_value_t = 1)]
    count: usize,
}

pub fn run(mode: CliMode) -> Result<()> {
    match mode {
        CliMode::Logoutd => run_logoutd(),
        CliMode::Loginkit => run_loginkit(),
    }
}

fn parse_logoutd() -> LogoutdCli {
    match LogoutdCli::try_parse() {
        Ok(cli) => {
            if !cli.extra.is_empty() {
                eprintln!("{}", LOGOUTD_USAGE);
            }
            cli
        }
        Err(e) if !e.use_stderr() => e.exit(),
        Err(_) => {
            eprintln!("{}", LOGOUTD_USAGE);
            LogoutdCli::default()
        }
    }
}

fn open_log_sink(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

fn init_logging(sink: Option<std::fs::File>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(file) = sink {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

fn run_logoutd() -> Result<()> {
    let cli = parse_logoutd();

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load_from_file(path)?,
        None => DaemonConfig::load_default()?,
    };
    if let Some(secs) = cli.interval {
        config.scan_interval_secs = secs;
    }
    config.validate()?;

    let detached = !(cli.foreground || cli.once);
    // Opened while stderr can still report a failure.
    let sink = config
        .log_destination(detached)
        .map(|path| open_log_sink(&path))
        .transpose()?;
    crate::observability::audit::init_security_logger(config.audit_log.as_deref())?;

    if detached {
        // Before any thread or logger exists.
        crate::kernel::daemon::detach()?;
    }
    init_logging(sink);

    if !nix::unistd::geteuid().is_root() {
        log::warn!("logoutd is not running as root; signals to other users' sessions will fail");
    }

    let shutdown = SignalHandler::init()?;
    let policy = PortTimePolicy::new(&config.porttime_file);
    log::info!(
        "logoutd started (pid {}, policy {})",
        std::process::id(),
        policy.path().display()
    );

    let mut daemon = EnforcementDaemon::new(
        UtmpSource,
        policy,
        Arc::new(KernelSignaler),
        EnforcementSettings::from(&config),
    );
    daemon.run(&shutdown, cli.once)?;

    log::info!("logoutd stopped");
    Ok(())
}

fn run_loginkit() -> Result<()> {
    init_logging(None);
    let cli = LoginkitCli::parse();

    match cli.command {
        LoginkitCommand::Subid(args) => show_subid(args),
        LoginkitCommand::Rand(args) => draw_random(args),
        LoginkitCommand::Check {
            user,
            line,
            porttime,
        } => {
            let policy = PortTimePolicy::new(porttime);
            let decision = policy.decide(&user, &line, chrono::Local::now());
            println!("{:?}", decision);
            Ok(())
        }
    }
}

fn show_subid(args: SubidArgs) -> Result<()> {
    let resolution = crate::identity::init(args.nsswitch.as_deref());
    println!("{}", serde_json::to_string_pretty(&resolution_json(resolution))?);

    let Some(owner) = args.owner else {
        return Ok(());
    };
    let backend = crate::identity::get_handle()
        .ok_or_else(|| anyhow::anyhow!("no subordinate-id backend is configured"))?;
    let kind = if args.gid { SubidType::Gid } else { SubidType::Uid };
    for range in backend.list_owner_ranges(&owner, kind)? {
        println!("{}:{}:{}", owner, range.start, range.count);
    }
    Ok(())
}

fn resolution_json(resolution: &crate::identity::Resolution) -> serde_json::Value {
    match resolution {
        crate::identity::Resolution::Backend(name) => {
            serde_json::json!({ "backend": name })
        }
        crate::identity::Resolution::Degraded(reason) => serde_json::json!({
            "backend": null,
            "reason": reason.to_string(),
            "expected": reason.is_expected(),
        }),
    }
}

fn draw_random(args: RandArgs) -> Result<()> {
    for _ in 0..args.count {
        let value = match (args.below, args.min, args.max) {
            (Some(n), _, _) => crate::random::csrand_uniform(n),
            (None, Some(min), Some(max)) => {
                if min > max {
                    anyhow::bail!("--min must not exceed --max");
                }
                crate::random::csrand_interval(min, max)
            }
            _ => crate::random::try_csrand()?,
        };
        println!("{}", value);
    }
    Ok(())
}
