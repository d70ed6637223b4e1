//! Scripted flight: arm, take off, rise and rotate under offboard velocity
//! control for thirty seconds, then return to launch and land.

use std::process::ExitCode;

use sortie_cli::{init_tracing, parse_args, run_mission};
use sortie_mission::offboard_plan;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = parse_args();
    run_mission(&args, &offboard_plan()).await
}
