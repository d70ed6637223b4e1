use mavlink::common::{MavCmd, MavLandedState, MavMessage, MavResult};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::traits::Position;

/// COMMAND_ACK as routed to whoever issued the command.
#[derive(Debug, Clone)]
pub struct CommandAck {
    pub command: MavCmd,
    pub result: MavResult,
}

/// Decoded link state, published through channels. The reader task is the
/// single writer; command issuers and the mission runner subscribe.
pub struct StateFeed {
    pub(crate) discovered: watch::Sender<Option<u8>>,
    pub(crate) health: watch::Sender<bool>,
    pub(crate) in_air: watch::Sender<bool>,
    pub(crate) position: watch::Sender<Option<Position>>,
    pub(crate) acks: broadcast::Sender<CommandAck>,
}

impl StateFeed {
    pub fn new() -> Self {
        Self {
            discovered: watch::channel(None).0,
            health: watch::channel(false).0,
            in_air: watch::channel(false).0,
            position: watch::channel(None).0,
            acks: broadcast::channel(32).0,
        }
    }

    /// Fold one inbound message into the published state.
    pub fn apply(&self, src_system: u8, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(_) => {
                if self.discovered.borrow().is_none() {
                    info!("discovered system {}", src_system);
                    self.discovered.send_replace(Some(src_system));
                }
            }
            MavMessage::SYS_STATUS(status) => {
                // all systems nominal: every enabled sensor also reports healthy
                let ok = status
                    .onboard_control_sensors_health
                    .contains(status.onboard_control_sensors_enabled);
                self.health.send_if_modified(|v| {
                    let changed = *v != ok;
                    *v = ok;
                    changed
                });
            }
            MavMessage::EXTENDED_SYS_STATE(state) => {
                let airborne = matches!(
                    state.landed_state,
                    MavLandedState::MAV_LANDED_STATE_IN_AIR
                        | MavLandedState::MAV_LANDED_STATE_TAKEOFF
                        | MavLandedState::MAV_LANDED_STATE_LANDING
                );
                self.in_air.send_if_modified(|v| {
                    let changed = *v != airborne;
                    *v = airborne;
                    changed
                });
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.position.send_replace(Some(Position {
                    lat: pos.lat as f64 / 1e7,
                    lon: pos.lon as f64 / 1e7,
                    relative_alt_m: pos.relative_alt as f32 / 1000.0,
                }));
            }
            MavMessage::COMMAND_ACK(ack) => {
                let _ = self.acks.send(CommandAck {
                    command: ack.command,
                    result: ack.result,
                });
            }
            _ => {}
        }
    }
}

impl Default for StateFeed {
    fn default() -> Self {
        Self::new()
    }
}
