use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_INT_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    MavConnection, MavHeader,
};
use tokio::sync::{broadcast, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{CmdResult, VehicleError};
use crate::state::StateFeed;
use crate::traits::{BodyVelocity, OffboardControl, Position, TelemetryStream, VehicleControl};

// Our ids on the link (companion/GCS side).
const OWN_SYSTEM_ID: u8 = 245;
const OWN_COMPONENT_ID: u8 = 190;
// Autopilot component on the discovered system.
const TARGET_COMPONENT: u8 = 1;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const SETPOINT_INTERVAL: Duration = Duration::from_millis(100);

// Message ids for SET_MESSAGE_INTERVAL.
const MSG_ID_GLOBAL_POSITION_INT: f32 = 33.0;
const MSG_ID_EXTENDED_SYS_STATE: f32 = 245.0;

// PX4 custom main mode for offboard control (custom_mode main field).
const PX4_MAIN_MODE_OFFBOARD: f32 = 6.0;

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// MAVLink-backed vehicle. One blocking reader task decodes inbound traffic
/// into the [`StateFeed`]; commands go out on the shared connection and wait
/// for their COMMAND_ACK.
pub struct MavVehicle {
    conn: Conn,
    feed: Arc<StateFeed>,
    seq: Arc<AtomicU8>,
    boot: Instant,
    setpoint: watch::Sender<BodyVelocity>,
    offboard_active: watch::Sender<bool>,
}

impl std::fmt::Debug for MavVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavVehicle").finish_non_exhaustive()
    }
}

impl MavVehicle {
    /// Open the link and wait for the first heartbeat, bounded by
    /// `discovery_window`. Discovery is a one-shot watch signal set by the
    /// reader thread, not a sleep-then-check.
    pub async fn connect(
        endpoint: &Endpoint,
        discovery_window: Duration,
    ) -> Result<Self, VehicleError> {
        if let Endpoint::Serial { path, baud } = endpoint {
            // quick validate the device before handing it to the mavlink backend
            let _ = tokio_serial::new(path, *baud)
                .open_native_async()
                .map_err(|e| {
                    VehicleError::Connection(format!("open serial device {}: {}", path, e))
                })?;
        }

        let addr = endpoint.mav_address();
        let conn = mavlink::connect::<MavMessage>(&addr)
            .map_err(|e| VehicleError::Connection(format!("{}: {}", addr, e)))?;
        let conn: Conn = Arc::from(conn);
        info!("link open on {}", endpoint);

        let feed = Arc::new(StateFeed::new());
        let seq = Arc::new(AtomicU8::new(0));

        // Detached thread, not spawn_blocking: the reader lives for the whole
        // process and must not keep runtime shutdown waiting on a blocked
        // recv().
        {
            let conn = conn.clone();
            let feed = feed.clone();
            let seq = seq.clone();
            std::thread::spawn(move || reader_loop(conn, feed, seq));
        }

        let mut discovered = feed.discovered.subscribe();
        info!("waiting to discover system");
        let started = Instant::now();
        let outcome = tokio::time::timeout(discovery_window, async {
            loop {
                if discovered.borrow().is_some() {
                    return Ok(());
                }
                if discovered.changed().await.is_err() {
                    return Err(VehicleError::LinkClosed);
                }
            }
        })
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VehicleError::NoSystemFound { waited: started.elapsed() });
            }
        }

        Ok(Self {
            conn,
            feed,
            seq,
            boot: Instant::now(),
            setpoint: watch::channel(BodyVelocity::default()).0,
            offboard_active: watch::channel(false).0,
        })
    }

    fn target_system(&self) -> u8 {
        self.feed.discovered.borrow().unwrap_or(1)
    }

    fn send(&self, msg: MavMessage) -> CmdResult {
        send_msg(&self.conn, &self.seq, msg)
    }

    async fn command_long(
        &self,
        name: &'static str,
        cmd: MavCmd,
        params: [f32; 7],
    ) -> CmdResult {
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system(),
            target_component: TARGET_COMPONENT,
            command: cmd.into(),
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        });
        self.issue(name, cmd, msg).await
    }

    /// Send a command and wait for its acknowledgement. Subscribes before
    /// sending so the ack cannot be missed.
    async fn issue(&self, name: &'static str, expect: MavCmd, msg: MavMessage) -> CmdResult {
        let mut acks = self.feed.acks.subscribe();
        self.send(msg)?;

        let started = Instant::now();
        loop {
            let remaining = match ACK_TIMEOUT.checked_sub(started.elapsed()) {
                Some(d) => d,
                None => {
                    return Err(VehicleError::Command {
                        cmd: name,
                        reason: "no COMMAND_ACK from autopilot".into(),
                    })
                }
            };
            let ack = match tokio::time::timeout(remaining, acks.recv()).await {
                Err(_) => {
                    return Err(VehicleError::Command {
                        cmd: name,
                        reason: "no COMMAND_ACK from autopilot".into(),
                    })
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(VehicleError::LinkClosed)
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Ok(ack)) => ack,
            };
            if ack.command != expect {
                continue;
            }
            match ack.result {
                MavResult::MAV_RESULT_ACCEPTED => {
                    debug!("{}: accepted", name);
                    return Ok(());
                }
                MavResult::MAV_RESULT_IN_PROGRESS => continue,
                other => {
                    return Err(VehicleError::Command {
                        cmd: name,
                        reason: format!("{:?}", other),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl VehicleControl for MavVehicle {
    async fn arm(&self) -> CmdResult {
        self.command_long(
            "arm",
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn takeoff(&self) -> CmdResult {
        // NaNs take the autopilot's defaults (current position, default
        // takeoff altitude).
        self.command_long(
            "takeoff",
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, f32::NAN],
        )
        .await
    }

    async fn go_to(&self, lat: f64, lon: f64, alt_m: f32, yaw_deg: f32) -> CmdResult {
        // COMMAND_INT keeps full coordinate precision (lat/lon scaled 1e7).
        let msg = MavMessage::COMMAND_INT(COMMAND_INT_DATA {
            param1: -1.0, // ground speed: autopilot default
            param2: 1.0,  // MAV_DO_REPOSITION_FLAGS_CHANGE_MODE
            param3: 0.0,
            param4: yaw_deg,
            x: (lat * 1e7).round() as i32,
            y: (lon * 1e7).round() as i32,
            z: alt_m,
            command: MavCmd::MAV_CMD_DO_REPOSITION.into(),
            target_system: self.target_system(),
            target_component: TARGET_COMPONENT,
            frame: MavFrame::MAV_FRAME_GLOBAL_INT,
            current: 0,
            autocontinue: 0,
        });
        self.issue("go_to", MavCmd::MAV_CMD_DO_REPOSITION, msg).await
    }

    async fn return_to_launch(&self) -> CmdResult {
        self.command_long(
            "return_to_launch",
            MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
            [0.0; 7],
        )
        .await
    }

    async fn disarm(&self) -> CmdResult {
        self.command_long(
            "disarm",
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0; 7],
        )
        .await
    }
}

#[async_trait]
impl OffboardControl for MavVehicle {
    async fn start(&self) -> CmdResult {
        // The autopilot rejects the mode switch unless setpoints are already
        // streaming, so prime one and start the stream first.
        self.setpoint.send_replace(BodyVelocity::default());
        self.send(setpoint_msg(
            self.target_system(),
            self.boot,
            BodyVelocity::default(),
        ))?;
        self.offboard_active.send_replace(true);

        let conn = self.conn.clone();
        let seq = self.seq.clone();
        let boot = self.boot;
        let target = self.target_system();
        let setpoint = self.setpoint.subscribe();
        let active = self.offboard_active.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SETPOINT_INTERVAL);
            while *active.borrow() {
                tick.tick().await;
                let sp = *setpoint.borrow();
                if send_msg(&conn, &seq, setpoint_msg(target, boot, sp)).is_err() {
                    warn!("offboard setpoint stream: send failed, stopping");
                    break;
                }
            }
        });

        self.command_long(
            "offboard start",
            MavCmd::MAV_CMD_DO_SET_MODE,
            [1.0, PX4_MAIN_MODE_OFFBOARD, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn set_body_velocity(&self, sp: BodyVelocity) -> CmdResult {
        self.setpoint.send_replace(sp);
        // push one immediately; the stream keeps it refreshed
        self.send(setpoint_msg(self.target_system(), self.boot, sp))
    }

    async fn stop(&self) -> CmdResult {
        self.offboard_active.send_replace(false);
        // hand control back to the autopilot: loiter where we are
        self.command_long(
            "offboard stop",
            MavCmd::MAV_CMD_NAV_LOITER_UNLIM,
            [0.0; 7],
        )
        .await
    }
}

#[async_trait]
impl TelemetryStream for MavVehicle {
    async fn set_position_rate(&self, hz: f32) -> CmdResult {
        let interval_us = if hz > 0.0 { 1_000_000.0 / hz } else { -1.0 };
        self.command_long(
            "set position rate",
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [MSG_ID_GLOBAL_POSITION_INT, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await?;
        // landing detection needs EXTENDED_SYS_STATE, which PX4 does not
        // stream unless asked
        self.command_long(
            "set landed-state rate",
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [MSG_ID_EXTENDED_SYS_STATE, 1_000_000.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    fn position(&self) -> watch::Receiver<Option<Position>> {
        self.feed.position.subscribe()
    }

    fn health(&self) -> watch::Receiver<bool> {
        self.feed.health.subscribe()
    }

    fn in_air(&self) -> watch::Receiver<bool> {
        self.feed.in_air.subscribe()
    }
}

fn send_msg(conn: &Conn, seq: &AtomicU8, msg: MavMessage) -> CmdResult {
    let hdr = MavHeader {
        system_id: OWN_SYSTEM_ID,
        component_id: OWN_COMPONENT_ID,
        sequence: seq.fetch_add(1, Ordering::Relaxed),
    };
    conn.send(&hdr, &msg)
        .map(|_| ())
        .map_err(|e| VehicleError::Connection(format!("mavlink send: {}", e)))
}

fn setpoint_msg(target: u8, boot: Instant, sp: BodyVelocity) -> MavMessage {
    MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
        time_boot_ms: boot.elapsed().as_millis() as u32,
        x: 0.0,
        y: 0.0,
        z: 0.0,
        vx: sp.forward_m_s,
        vy: sp.right_m_s,
        vz: sp.down_m_s,
        afx: 0.0,
        afy: 0.0,
        afz: 0.0,
        yaw: 0.0,
        yaw_rate: sp.yaw_rate_deg_s.to_radians(),
        type_mask: PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Y_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Z_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE,
        target_system: target,
        target_component: TARGET_COMPONENT,
        coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
    })
}

/// Blocking reader: periodic companion heartbeat plus inbound decode into the
/// feed. Runs until the process exits; recv errors are tolerated (serial
/// noise, lost datagrams) with a short backoff.
fn reader_loop(conn: Conn, feed: Arc<StateFeed>, seq: Arc<AtomicU8>) {
    let mut last_hb: Option<Instant> = None;
    loop {
        if last_hb.map_or(true, |t| t.elapsed() >= HEARTBEAT_INTERVAL) {
            let hb = HEARTBEAT_DATA {
                custom_mode: 0,
                mavtype: MavType::MAV_TYPE_GCS,
                autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
                base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
                system_status: MavState::MAV_STATE_ACTIVE,
                mavlink_version: 3,
            };
            if send_msg(&conn, &seq, MavMessage::HEARTBEAT(hb)).is_err() {
                warn!("link heartbeat send failed");
            }
            last_hb = Some(Instant::now());
        }

        match conn.recv() {
            Ok((hdr, msg)) => feed.apply(hdr.system_id, &msg),
            Err(e) => {
                debug!("link recv: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_gives_up_when_no_heartbeat_arrives() {
        // nothing speaks MAVLink on this port
        let endpoint = Endpoint::parse("udp://127.0.0.1:24599").unwrap();
        let window = Duration::from_millis(200);
        let err = MavVehicle::connect(&endpoint, window).await.unwrap_err();
        match err {
            VehicleError::NoSystemFound { waited } => assert!(waited >= window),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn refused_link_reports_a_connection_error() {
        // discard port; nothing listens there, the dial is refused outright
        let endpoint = Endpoint::parse("tcp://127.0.0.1:9").unwrap();
        let err = MavVehicle::connect(&endpoint, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, VehicleError::Connection(_)));
    }
}
