//! Scripted flight: arm, take off, reposition to a fixed coordinate, return
//! to launch, disarm.

use std::process::ExitCode;

use sortie_cli::{init_tracing, parse_args, run_mission};
use sortie_mission::goto_plan;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = parse_args();
    run_mission(&args, &goto_plan()).await
}
