pub mod plan;
pub mod runner;

pub use plan::{goto_plan, offboard_plan, MissionPlan, Step};
pub use runner::{fly, MissionRunner, Phase, RunOptions, WaitPolicy};
