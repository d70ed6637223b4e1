use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use sortie_vehicle::{
    Endpoint, MavVehicle, OffboardControl, Position, TelemetryStream, VehicleControl,
    VehicleError,
};

use crate::plan::{MissionPlan, Step};

/// Cadence of the "still waiting" progress logs while blocked on a gate.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Where the run currently is. `Failed` is absorbing; every other phase only
/// moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Discovering,
    ReadinessWait,
    Armed,
    AirborneTakeoff,
    Maneuvering,
    ReturningHome,
    Landed,
    Disarmed,
    Done,
    Failed,
}

/// How long a telemetry gate may block. `Forever` reproduces the historical
/// behavior of retrying with no escape; `Bounded` surfaces a timeout error
/// instead of hanging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    Forever,
    Bounded(Duration),
}

impl WaitPolicy {
    fn expired(&self, started: Instant) -> bool {
        matches!(self, WaitPolicy::Bounded(limit) if started.elapsed() >= *limit)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// How long to listen for the first heartbeat after opening the link.
    pub discovery_window: Duration,
    /// Gate before arming: all systems nominal.
    pub ready_wait: WaitPolicy,
    /// Gate after return-to-launch: vehicle back on the ground.
    pub land_wait: WaitPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            discovery_window: Duration::from_secs(2),
            ready_wait: WaitPolicy::Forever,
            land_wait: WaitPolicy::Forever,
        }
    }
}

/// Executes a [`MissionPlan`] against a connected vehicle, aborting the
/// remainder of the plan on the first failed command.
pub struct MissionRunner {
    ready_wait: WaitPolicy,
    land_wait: WaitPolicy,
    phase: Phase,
}

impl MissionRunner {
    pub fn new(ready_wait: WaitPolicy, land_wait: WaitPolicy) -> Self {
        Self { ready_wait, land_wait, phase: Phase::Disconnected }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    pub async fn run<V>(&mut self, vehicle: &V, plan: &MissionPlan) -> Result<(), VehicleError>
    where
        V: VehicleControl + OffboardControl + TelemetryStream,
    {
        info!("mission {}: starting", plan.name);
        match self.execute(vehicle, plan).await {
            Ok(()) => {
                self.set_phase(Phase::Done);
                info!("mission {}: finished", plan.name);
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Failed);
                Err(e)
            }
        }
    }

    async fn execute<V>(&mut self, vehicle: &V, plan: &MissionPlan) -> Result<(), VehicleError>
    where
        V: VehicleControl + OffboardControl + TelemetryStream,
    {
        self.set_phase(Phase::ReadinessWait);
        wait_for_flag(
            vehicle.health(),
            true,
            "vehicle ready to arm",
            self.ready_wait,
            Some("vehicle is getting ready to arm"),
        )
        .await?;

        vehicle.set_position_rate(1.0).await?;
        let _observer = AltitudeObserver::spawn(vehicle.position());

        for step in &plan.steps {
            self.step(vehicle, step).await?;
        }
        Ok(())
    }

    async fn step<V>(&mut self, vehicle: &V, step: &Step) -> Result<(), VehicleError>
    where
        V: VehicleControl + OffboardControl + TelemetryStream,
    {
        match step {
            Step::Arm => {
                info!("arming");
                vehicle.arm().await?;
                self.set_phase(Phase::Armed);
                info!("armed");
            }
            Step::Takeoff { climb_within, settle } => {
                info!("taking off");
                vehicle.takeoff().await?;
                self.set_phase(Phase::AirborneTakeoff);
                wait_for_flag(
                    vehicle.in_air(),
                    true,
                    "takeoff",
                    WaitPolicy::Bounded(*climb_within),
                    None,
                )
                .await?;
                info!("airborne");
                // The in-air flag flips while the climb is still underway;
                // hold the settle delay so the next step starts at altitude.
                tokio::time::sleep(*settle).await;
            }
            Step::GoTo { lat, lon, alt_m, yaw_deg, transit } => {
                self.set_phase(Phase::Maneuvering);
                info!("flying to {:.6}, {:.6} at {} m", lat, lon, alt_m);
                vehicle.go_to(*lat, *lon, *alt_m, *yaw_deg).await?;
                tokio::time::sleep(*transit).await;
            }
            Step::OffboardVelocity { setpoint, hold, settle } => {
                self.set_phase(Phase::Maneuvering);
                info!("offboard: holding {:?} for {:?}", setpoint, hold);
                vehicle.start().await?;
                vehicle.set_body_velocity(*setpoint).await?;
                tokio::time::sleep(*hold).await;
                vehicle.stop().await?;
                tokio::time::sleep(*settle).await;
            }
            Step::ReturnToLaunch => {
                self.set_phase(Phase::ReturningHome);
                info!("returning to launch");
                vehicle.return_to_launch().await?;
                wait_for_flag(
                    vehicle.in_air(),
                    false,
                    "landing",
                    self.land_wait,
                    Some("vehicle is returning to launch"),
                )
                .await?;
                self.set_phase(Phase::Landed);
                info!("landed");
            }
            Step::Disarm => {
                info!("disarming");
                vehicle.disarm().await?;
                self.set_phase(Phase::Disarmed);
                info!("disarmed");
            }
            Step::Hold(d) => tokio::time::sleep(*d).await,
        }
        Ok(())
    }
}

/// Connect, discover, and run the plan. This is the shared bootstrap both
/// binaries go through; the mission itself is the `plan` argument.
pub async fn fly(
    endpoint: &Endpoint,
    plan: &MissionPlan,
    opts: &RunOptions,
) -> Result<(), VehicleError> {
    let mut runner = MissionRunner::new(opts.ready_wait, opts.land_wait);
    runner.set_phase(Phase::Discovering);
    let vehicle = match MavVehicle::connect(endpoint, opts.discovery_window).await {
        Ok(v) => v,
        Err(e) => {
            runner.set_phase(Phase::Failed);
            return Err(e);
        }
    };
    runner.run(&vehicle, plan).await
}

/// Prints altitude whenever a position sample arrives. Display only; the
/// task is aborted when the runner is done with it.
struct AltitudeObserver(JoinHandle<()>);

impl AltitudeObserver {
    fn spawn(mut rx: watch::Receiver<Option<Position>>) -> Self {
        Self(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if let Some(pos) = *rx.borrow() {
                    info!("altitude: {:.1} m", pos.relative_alt_m);
                }
            }
        }))
    }
}

impl Drop for AltitudeObserver {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Block until the watched flag reads `want`, logging progress once per
/// second, bounded by `policy`.
async fn wait_for_flag(
    mut rx: watch::Receiver<bool>,
    want: bool,
    what: &'static str,
    policy: WaitPolicy,
    progress: Option<&'static str>,
) -> Result<(), VehicleError> {
    let started = Instant::now();
    loop {
        if *rx.borrow() == want {
            return Ok(());
        }
        if policy.expired(started) {
            return Err(VehicleError::WaitTimeout { what, waited: started.elapsed() });
        }
        match tokio::time::timeout(PROGRESS_INTERVAL, rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(VehicleError::LinkClosed),
            Err(_) => {
                if let Some(msg) = progress {
                    info!("{}", msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flag_already_set_returns_immediately() {
        let (tx, rx) = watch::channel(true);
        wait_for_flag(rx, true, "ready", WaitPolicy::Bounded(Duration::from_millis(10)), None)
            .await
            .unwrap();
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out() {
        let (_tx, rx) = watch::channel(false);
        let wall = std::time::Instant::now();
        let err = wait_for_flag(rx, true, "ready", WaitPolicy::Bounded(Duration::from_secs(3)), None)
            .await
            .unwrap_err();
        match err {
            VehicleError::WaitTimeout { what, waited } => {
                assert_eq!(what, "ready");
                assert!(waited >= Duration::from_secs(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the deadline follows the (paused) runtime clock, not wall time
        assert!(wall.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_observes_flag_change() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_flag(
            rx,
            true,
            "ready",
            WaitPolicy::Forever,
            None,
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send_replace(true);
        waiter.await.unwrap().unwrap();
    }
}
