use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::CmdResult;

/// Position sample for operator display. Not part of control-flow state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub relative_alt_m: f32,
}

/// Body-frame velocity setpoint for an offboard session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyVelocity {
    pub forward_m_s: f32,
    pub right_m_s: f32,
    pub down_m_s: f32,
    pub yaw_rate_deg_s: f32,
}

impl BodyVelocity {
    pub fn new(forward_m_s: f32, right_m_s: f32, down_m_s: f32, yaw_rate_deg_s: f32) -> Self {
        Self { forward_m_s, right_m_s, down_m_s, yaw_rate_deg_s }
    }
}

/// High-level vehicle commands. Each resolves once the autopilot has
/// acknowledged (or rejected) the command.
#[async_trait]
pub trait VehicleControl: Send + Sync {
    async fn arm(&self) -> CmdResult;
    async fn takeoff(&self) -> CmdResult;
    async fn go_to(&self, lat: f64, lon: f64, alt_m: f32, yaw_deg: f32) -> CmdResult;
    async fn return_to_launch(&self) -> CmdResult;
    async fn disarm(&self) -> CmdResult;
}

/// Offboard session: while started, the latest body-frame setpoint is
/// streamed to the autopilot until `stop()` hands control back.
#[async_trait]
pub trait OffboardControl: Send + Sync {
    async fn start(&self) -> CmdResult;
    async fn set_body_velocity(&self, setpoint: BodyVelocity) -> CmdResult;
    async fn stop(&self) -> CmdResult;
}

/// Telemetry flags and samples published through watch channels so waiters
/// block on updates instead of polling the wire.
#[async_trait]
pub trait TelemetryStream: Send + Sync {
    async fn set_position_rate(&self, hz: f32) -> CmdResult;

    fn position(&self) -> watch::Receiver<Option<Position>>;
    fn health(&self) -> watch::Receiver<bool>;
    fn in_air(&self) -> watch::Receiver<bool>;
}
