use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use sortie_mission::{fly, MissionPlan, RunOptions, WaitPolicy};
use sortie_vehicle::Endpoint;

/// Shared argument surface of both mission binaries.
#[derive(Debug, Parser)]
pub struct MissionArgs {
    /// Connection URL: tcp://[host][:port], udp://[host][:port] or
    /// serial:///path/to/serial/dev[:baudrate].
    /// To connect to the simulator use udp://:14540.
    pub connection_url: String,

    /// How long to listen for a vehicle after opening the link, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    pub discovery_timeout: u64,

    /// Give up on the pre-arm health gate after this many seconds.
    /// Without it the gate retries forever.
    #[arg(long, value_name = "SECS")]
    pub ready_timeout: Option<u64>,

    /// Give up waiting for touchdown after return-to-launch after this many
    /// seconds. Without it the landing gate waits forever.
    #[arg(long, value_name = "SECS")]
    pub land_timeout: Option<u64>,
}

impl MissionArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            discovery_window: Duration::from_secs(self.discovery_timeout),
            ready_wait: policy(self.ready_timeout),
            land_wait: policy(self.land_timeout),
        }
    }
}

fn policy(timeout_s: Option<u64>) -> WaitPolicy {
    match timeout_s {
        Some(s) => WaitPolicy::Bounded(Duration::from_secs(s)),
        None => WaitPolicy::Forever,
    }
}

/// Parse arguments, exiting 1 (not clap's 2) on a usage error. The exit-code
/// contract for these tools is success=0, everything else=1; `--help` and
/// `--version` are not errors and exit 0.
pub fn parse_args() -> MissionArgs {
    match MissionArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(parse_exit_code(&e));
        }
    }
}

fn parse_exit_code(e: &clap::Error) -> i32 {
    use clap::error::ErrorKind;
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Shared body of both binaries: parse the endpoint, fly the plan, map the
/// outcome to an exit code.
pub async fn run_mission(args: &MissionArgs, plan: &MissionPlan) -> ExitCode {
    match mission(args, plan).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn mission(args: &MissionArgs, plan: &MissionPlan) -> Result<()> {
    let endpoint = Endpoint::parse(&args.connection_url)?;
    fly(&endpoint, plan, &args.run_options()).await?;
    Ok(())
}
