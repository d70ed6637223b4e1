use std::time::Duration;

use sortie_vehicle::BodyVelocity;

/// One scripted mission step. A plan is data, so a new mission is a new step
/// list rather than another copy of the control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Arm,
    /// Issue takeoff, then wait for the vehicle to report airborne (failing
    /// if the climb window elapses first), then hold a settle delay before
    /// the next step.
    Takeoff {
        climb_within: Duration,
        settle: Duration,
    },
    /// Discrete reposition to a global coordinate, then a scripted transit
    /// hold before the next step.
    GoTo {
        lat: f64,
        lon: f64,
        alt_m: f32,
        yaw_deg: f32,
        transit: Duration,
    },
    /// Offboard session: start, hold a body-frame velocity setpoint for
    /// `hold`, stop, then settle before the next step.
    OffboardVelocity {
        setpoint: BodyVelocity,
        hold: Duration,
        settle: Duration,
    },
    /// Return to launch and wait (per the landing policy) until the vehicle
    /// is no longer in the air.
    ReturnToLaunch,
    Disarm,
    /// Plain scripted delay.
    Hold(Duration),
}

#[derive(Debug, Clone)]
pub struct MissionPlan {
    pub name: &'static str,
    pub steps: Vec<Step>,
}

/// Variant A: climb, one reposition to a fixed coordinate, return, disarm.
pub fn goto_plan() -> MissionPlan {
    MissionPlan {
        name: "goto",
        steps: vec![
            Step::Arm,
            Step::Takeoff {
                climb_within: Duration::from_secs(10),
                settle: Duration::from_secs(10),
            },
            Step::GoTo {
                lat: 47.398139363821485,
                lon: 8.5453846156597137,
                alt_m: 500.0,
                yaw_deg: -60.0,
                transit: Duration::from_secs(10),
            },
            Step::ReturnToLaunch,
            Step::Disarm,
        ],
    }
}

/// Variant B: climb, then rise and rotate under offboard velocity control,
/// return. RTL lands the vehicle; no explicit disarm.
pub fn offboard_plan() -> MissionPlan {
    MissionPlan {
        name: "offboard",
        steps: vec![
            Step::Arm,
            Step::Takeoff {
                climb_within: Duration::from_secs(10),
                settle: Duration::from_secs(10),
            },
            Step::OffboardVelocity {
                setpoint: BodyVelocity::new(5.0, 0.0, -0.2, 30.0),
                hold: Duration::from_secs(30),
                settle: Duration::from_secs(10),
            },
            Step::ReturnToLaunch,
            Step::Hold(Duration::from_secs(3)),
        ],
    }
}
