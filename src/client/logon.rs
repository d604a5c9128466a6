//! Built-in handler for logon results.
//!
//! Registered ahead of every user handler so identity is stored before any
//! other handler sees the logon response.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::event::Event;
use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::dispatcher::{HandlerContext, PacketHandler, SessionIdentity};
use crate::protocol::emsg::{EMsg, EResult};
use crate::protocol::proto::{CMsgClientLoggedOff, CMsgClientLogonResponse};
use crate::utils::timeout::DEFAULT_HEARTBEAT_INTERVAL;

#[derive(Debug, Default)]
pub struct LogonHandler;

impl LogonHandler {
    fn handle_logon_response(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<()> {
        let body: CMsgClientLogonResponse = packet.read_proto()?;
        let result = EResult(body.eresult());

        match result {
            EResult::OK => {
                let identity = SessionIdentity {
                    session_id: packet.session_id().unwrap_or_default(),
                    steam_id: packet.steam_id().unwrap_or_default(),
                };
                let heartbeat = match body.out_of_game_heartbeat_seconds() {
                    secs if secs > 0 => Duration::from_secs(secs as u64),
                    _ => DEFAULT_HEARTBEAT_INTERVAL,
                };

                ctx.set_identity(identity);
                ctx.set_logged_on(true);
                ctx.start_heartbeat(heartbeat);
                info!(steam_id = %identity.steam_id, session_id = identity.session_id, "Logged on");
                ctx.emit(Event::LoggedOn {
                    steam_id: identity.steam_id,
                    session_id: identity.session_id,
                    heartbeat,
                });
            }
            // the server closes the socket shortly after; the EOF drives the retry
            EResult::FAIL | EResult::SERVICE_UNAVAILABLE | EResult::TRY_ANOTHER_CM => {
                debug!(%result, "Logon refused, waiting for disconnect");
            }
            other => {
                warn!(result = %other, "Logon failed");
                ctx.emit(Event::LogOnFailed { result: other });
                ctx.disconnect();
            }
        }
        Ok(())
    }

    fn handle_logged_off(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<()> {
        let body: CMsgClientLoggedOff = packet.read_proto()?;
        let result = EResult(body.eresult());
        info!(%result, "Logged off");
        ctx.set_logged_on(false);
        ctx.emit(Event::LoggedOff { result });
        Ok(())
    }
}

impl PacketHandler for LogonHandler {
    fn handle_packet(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<()> {
        match packet.emsg() {
            EMsg::CLIENT_LOG_ON_RESPONSE => self.handle_logon_response(ctx, packet),
            EMsg::CLIENT_LOGGED_OFF => self.handle_logged_off(ctx, packet),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::dispatcher::Action;
    use crate::protocol::header::SteamId;
    use crate::protocol::job::JobIdGenerator;
    use crate::protocol::message::OutgoingMessage;

    fn logon_response(eresult: i32, heartbeat: i32) -> Packet {
        let mut msg = OutgoingMessage::protobuf(
            EMsg::CLIENT_LOG_ON_RESPONSE,
            &CMsgClientLogonResponse {
                eresult: Some(eresult),
                out_of_game_heartbeat_seconds: Some(heartbeat),
                ..Default::default()
            },
        );
        msg.set_identity(321, SteamId(76561197960265729));
        Packet::from_bytes(msg.serialize().unwrap()).unwrap()
    }

    fn run(packet: &Packet) -> Vec<Action> {
        let jobs = JobIdGenerator::new();
        let mut ctx = HandlerContext::new(&jobs, SessionIdentity::default());
        LogonHandler.handle_packet(&mut ctx, packet).unwrap();
        ctx.into_actions()
    }

    #[test]
    fn test_successful_logon() {
        let actions = run(&logon_response(1, 9));
        assert_eq!(actions.len(), 4);
        match &actions[0] {
            Action::SetIdentity(id) => {
                assert_eq!(id.session_id, 321);
                assert_eq!(id.steam_id, SteamId(76561197960265729));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(actions[1], Action::SetLoggedOn(true)));
        assert!(matches!(actions[2], Action::StartHeartbeat(d) if d == Duration::from_secs(9)));
        assert!(matches!(actions[3], Action::Emit(Event::LoggedOn { session_id: 321, .. })));
    }

    #[test]
    fn test_zero_heartbeat_uses_default() {
        let actions = run(&logon_response(1, 0));
        assert!(matches!(actions[2], Action::StartHeartbeat(d) if d == DEFAULT_HEARTBEAT_INTERVAL));
    }

    #[test]
    fn test_soft_failures_are_silent() {
        for code in [2, 20, 48] {
            assert!(run(&logon_response(code, 9)).is_empty());
        }
    }

    #[test]
    fn test_hard_failure_disconnects() {
        let actions = run(&logon_response(5, 9));
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            actions[0],
            Action::Emit(Event::LogOnFailed { result: EResult(5) })
        ));
        assert!(matches!(actions[1], Action::Disconnect));
    }

    #[test]
    fn test_logged_off() {
        let msg = OutgoingMessage::protobuf(
            EMsg::CLIENT_LOGGED_OFF,
            &CMsgClientLoggedOff { eresult: Some(6) },
        );
        let packet = Packet::from_bytes(msg.serialize().unwrap()).unwrap();
        let actions = run(&packet);
        assert!(matches!(actions[0], Action::SetLoggedOn(false)));
        assert!(matches!(
            actions[1],
            Action::Emit(Event::LoggedOff { result: EResult(6) })
        ));
    }
}
