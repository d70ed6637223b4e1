use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use sortie_mission::{goto_plan, offboard_plan, MissionRunner, Phase, WaitPolicy};
use sortie_vehicle::error::CmdResult;
use sortie_vehicle::{
    BodyVelocity, OffboardControl, Position, TelemetryStream, VehicleControl, VehicleError,
};

/// Scripted vehicle double: records every command in order and flips the
/// in-air flag the way a cooperative autopilot would.
struct MockVehicle {
    commands: Mutex<Vec<String>>,
    stamps: Mutex<Vec<(String, Instant)>>,
    rate_calls: Mutex<Vec<f32>>,
    fail_on: Option<&'static str>,
    health: watch::Sender<bool>,
    in_air: watch::Sender<bool>,
    position: watch::Sender<Option<Position>>,
    /// When false, return_to_launch leaves the in-air flag for the test to
    /// clear manually.
    auto_land: bool,
}

impl MockVehicle {
    fn healthy() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            stamps: Mutex::new(Vec::new()),
            rate_calls: Mutex::new(Vec::new()),
            fail_on: None,
            health: watch::channel(true).0,
            in_air: watch::channel(false).0,
            position: watch::channel(None).0,
            auto_land: true,
        }
    }

    fn failing_on(cmd: &'static str) -> Self {
        Self { fail_on: Some(cmd), ..Self::healthy() }
    }

    fn record(&self, cmd: String) -> CmdResult {
        let name = cmd.split('(').next().unwrap_or_default().to_string();
        self.stamps.lock().unwrap().push((name.clone(), Instant::now()));
        self.commands.lock().unwrap().push(cmd);
        if self.fail_on == Some(name.as_str()) {
            return Err(VehicleError::Command {
                cmd: self.fail_on.unwrap(),
                reason: "MAV_RESULT_DENIED".into(),
            });
        }
        Ok(())
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn issued_at(&self, cmd: &str) -> Instant {
        self.stamps
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == cmd)
            .map(|(_, at)| *at)
            .unwrap_or_else(|| panic!("{cmd} was never issued"))
    }
}

#[async_trait]
impl VehicleControl for MockVehicle {
    async fn arm(&self) -> CmdResult {
        self.record("arm".into())
    }

    async fn takeoff(&self) -> CmdResult {
        self.record("takeoff".into())?;
        self.in_air.send_replace(true);
        Ok(())
    }

    async fn go_to(&self, lat: f64, lon: f64, alt_m: f32, yaw_deg: f32) -> CmdResult {
        self.record(format!("go_to({:.6},{:.6},{},{})", lat, lon, alt_m, yaw_deg))
    }

    async fn return_to_launch(&self) -> CmdResult {
        self.record("return_to_launch".into())?;
        if self.auto_land {
            self.in_air.send_replace(false);
        }
        Ok(())
    }

    async fn disarm(&self) -> CmdResult {
        self.record("disarm".into())
    }
}

#[async_trait]
impl OffboardControl for MockVehicle {
    async fn start(&self) -> CmdResult {
        self.record("offboard_start".into())
    }

    async fn set_body_velocity(&self, sp: BodyVelocity) -> CmdResult {
        self.record(format!(
            "set_body_velocity({},{},{},{})",
            sp.forward_m_s, sp.right_m_s, sp.down_m_s, sp.yaw_rate_deg_s
        ))
    }

    async fn stop(&self) -> CmdResult {
        self.record("offboard_stop".into())
    }
}

#[async_trait]
impl TelemetryStream for MockVehicle {
    async fn set_position_rate(&self, hz: f32) -> CmdResult {
        self.rate_calls.lock().unwrap().push(hz);
        Ok(())
    }

    fn position(&self) -> watch::Receiver<Option<Position>> {
        self.position.subscribe()
    }

    fn health(&self) -> watch::Receiver<bool> {
        self.health.subscribe()
    }

    fn in_air(&self) -> watch::Receiver<bool> {
        self.in_air.subscribe()
    }
}

fn runner() -> MissionRunner {
    MissionRunner::new(WaitPolicy::Forever, WaitPolicy::Forever)
}

#[tokio::test(start_paused = true)]
async fn goto_plan_issues_commands_in_order() {
    let vehicle = MockVehicle::healthy();
    let mut runner = runner();

    runner.run(&vehicle, &goto_plan()).await.unwrap();

    assert_eq!(
        vehicle.commands(),
        vec![
            "arm",
            "takeoff",
            "go_to(47.398139,8.545385,500,-60)",
            "return_to_launch",
            "disarm",
        ]
    );
    assert_eq!(*vehicle.rate_calls.lock().unwrap(), vec![1.0]);
    assert_eq!(runner.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn offboard_plan_issues_commands_in_order() {
    let vehicle = MockVehicle::healthy();
    let mut runner = runner();

    runner.run(&vehicle, &offboard_plan()).await.unwrap();

    assert_eq!(
        vehicle.commands(),
        vec![
            "arm",
            "takeoff",
            "offboard_start",
            "set_body_velocity(5,0,-0.2,30)",
            "offboard_stop",
            "return_to_launch",
        ]
    );
    assert_eq!(runner.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn maneuvers_wait_out_the_takeoff_settle() {
    let vehicle = MockVehicle::healthy();
    runner().run(&vehicle, &goto_plan()).await.unwrap();
    // the reposition must not go out while the vehicle is still climbing
    let settled = vehicle.issued_at("go_to") - vehicle.issued_at("takeoff");
    assert!(settled >= Duration::from_secs(10), "settled only {settled:?}");

    let vehicle = MockVehicle::healthy();
    runner().run(&vehicle, &offboard_plan()).await.unwrap();
    let settled = vehicle.issued_at("offboard_start") - vehicle.issued_at("takeoff");
    assert!(settled >= Duration::from_secs(10), "settled only {settled:?}");
}

#[tokio::test(start_paused = true)]
async fn failed_command_aborts_the_rest_of_the_plan() {
    let vehicle = MockVehicle::failing_on("takeoff");
    let mut runner = runner();

    let err = runner.run(&vehicle, &goto_plan()).await.unwrap_err();
    match err {
        VehicleError::Command { cmd, .. } => assert_eq!(cmd, "takeoff"),
        other => panic!("unexpected error: {other}"),
    }

    // nothing after the failing command was issued
    assert_eq!(vehicle.commands(), vec!["arm", "takeoff"]);
    assert_eq!(runner.phase(), Phase::Failed);
}

#[tokio::test(start_paused = true)]
async fn failure_late_in_the_plan_stops_there() {
    let vehicle = MockVehicle::failing_on("return_to_launch");
    let mut runner = runner();

    runner.run(&vehicle, &goto_plan()).await.unwrap_err();

    assert_eq!(
        vehicle.commands(),
        vec![
            "arm",
            "takeoff",
            "go_to(47.398139,8.545385,500,-60)",
            "return_to_launch",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn bounded_readiness_gate_times_out_without_commands() {
    let mut vehicle = MockVehicle::healthy();
    vehicle.health = watch::channel(false).0;
    let mut runner =
        MissionRunner::new(WaitPolicy::Bounded(Duration::from_secs(5)), WaitPolicy::Forever);

    let err = runner.run(&vehicle, &goto_plan()).await.unwrap_err();
    match err {
        VehicleError::WaitTimeout { what, waited } => {
            assert_eq!(what, "vehicle ready to arm");
            assert!(waited >= Duration::from_secs(5));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(vehicle.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn readiness_gate_opens_when_health_arrives() {
    let mut vehicle = MockVehicle::healthy();
    let (health_tx, _) = watch::channel(false);
    vehicle.health = health_tx;
    let health = vehicle.health.clone();

    // healthy after 4 seconds of "getting ready"
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        health.send_replace(true);
    });

    let mut runner = runner();
    runner.run(&vehicle, &goto_plan()).await.unwrap();
    assert_eq!(runner.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn landing_gate_waits_for_the_in_air_flag_to_clear() {
    let mut vehicle = MockVehicle::healthy();
    vehicle.auto_land = false;
    let in_air = vehicle.in_air.clone();

    // touch down 60 simulated seconds after becoming airborne
    tokio::spawn(async move {
        let mut rx = in_air.subscribe();
        // wait until takeoff set it
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        in_air.send_replace(false);
    });

    let mut runner =
        MissionRunner::new(WaitPolicy::Forever, WaitPolicy::Bounded(Duration::from_secs(300)));
    runner.run(&vehicle, &goto_plan()).await.unwrap();
    assert_eq!(runner.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn landing_gate_can_time_out() {
    let mut vehicle = MockVehicle::healthy();
    vehicle.auto_land = false; // never lands

    let wall = std::time::Instant::now();
    let mut runner =
        MissionRunner::new(WaitPolicy::Forever, WaitPolicy::Bounded(Duration::from_secs(30)));
    let err = runner.run(&vehicle, &goto_plan()).await.unwrap_err();
    match err {
        VehicleError::WaitTimeout { what, waited } => {
            assert_eq!(what, "landing");
            assert!(waited >= Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.phase(), Phase::Failed);
    // 30 simulated seconds of waiting must not consume 30 real ones
    assert!(wall.elapsed() < Duration::from_secs(5));
}
