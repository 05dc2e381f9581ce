//! Session bootstrap.
//!
//! ```text
//! client                                       server
//! ──────                                       ──────
//! namespace, turn locks (both unavailable)
//! return-code = 0xFF, server-info
//! launcher ─────── argv ───────▶               starts, opens locks + bootstrap segments
//! hand-off #1 ─────────────────▶               writes server-info, return-code = 0
//!             ◀──────────────────              hands back
//! decode server-info, create
//! instruction info reward termination
//! observation action
//! hand-off #2 ─────────────────▶               opens the new segments, return-code = 0
//!             ◀──────────────────              hands back, waits for instructions
//! ```
//!
//! Any failure drops the partially built link, which releases whatever
//! was created so far.

use pursuit_shm::layout::{
    INFO_SIZE, INSTRUCTION_SIZE, NOT_ACKNOWLEDGED, RETURN_CODE_SIZE, REWARD_SIZE,
    SERVER_INFO_SIZE, TERMINATION_SIZE,
};
use pursuit_shm::{Channel, Namespace, ServerInfo};

use crate::config::{ServerPaths, SessionConfig};
use crate::decoder::{Handoff, HandshakeStage};
use crate::error::{Error, Result};
use crate::launcher::{LaunchArgs, LaunchReport, ServerLauncher};
use crate::link::Link;

pub(crate) struct Established {
    pub(crate) namespace: Namespace,
    pub(crate) link: Link,
    pub(crate) server_info: ServerInfo,
    pub(crate) launch: LaunchReport,
}

pub(crate) fn establish(
    paths: &ServerPaths,
    config: &SessionConfig,
    launcher: &dyn ServerLauncher,
) -> Result<Established> {
    let namespace = Namespace::generate();
    let mut link = Link::open(&namespace)?;

    link.create_segment(Channel::ReturnCode, RETURN_CODE_SIZE)?;
    link.write(Channel::ReturnCode, &[NOT_ACKNOWLEDGED])?;
    link.create_segment(Channel::ServerInfo, SERVER_INFO_SIZE)?;
    tracing::debug!(%namespace, "bootstrap objects ready");

    let args = LaunchArgs {
        launcher: paths.launcher.clone(),
        payload: paths.payload.clone(),
        module: paths.module.clone(),
        real_time: config.real_time,
        frame_skip: config.effective_frame_skip(),
        log_dir: config.resolve_log_dir(paths),
        namespace: namespace.clone(),
    };
    let launch = launcher.launch(&args)?;

    link.exchange(
        Handoff::Handshake(HandshakeStage::ServerInfo),
        config.handshake_timeout,
    )?;
    let raw_info = link.read_array::<SERVER_INFO_SIZE>(Channel::ServerInfo)?;
    let server_info = ServerInfo::from_bytes(&raw_info);
    let (observation_len, action_len) = segment_sizes(&server_info)?;
    tracing::debug!(?server_info, "server announced its shape");

    for (channel, len) in [
        (Channel::Instruction, INSTRUCTION_SIZE),
        (Channel::Info, INFO_SIZE),
        (Channel::Reward, REWARD_SIZE),
        (Channel::Termination, TERMINATION_SIZE),
        (Channel::Observation, observation_len),
        (Channel::Action, action_len),
    ] {
        link.create_segment(channel, len)?;
    }

    link.exchange(
        Handoff::Handshake(HandshakeStage::Attach),
        config.handshake_timeout,
    )?;
    tracing::debug!(%namespace, "server attached to all segments");

    Ok(Established {
        namespace,
        link,
        server_info,
        launch,
    })
}

/// Observation and action segment sizes, or `InvalidServerInfo` when the
/// announced shape has a zero dimension or overflows.
pub(crate) fn segment_sizes(info: &ServerInfo) -> Result<(usize, usize)> {
    let observation_len = info
        .observation_len()
        .filter(|&len| len > 0)
        .ok_or(Error::InvalidServerInfo(*info))?;
    let action_len = info.action_len();
    if action_len == 0 {
        return Err(Error::InvalidServerInfo(*info));
    }
    Ok((observation_len, action_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_server_info() {
        let info = ServerInfo::new(84, 84, 4, 5);
        assert_eq!(segment_sizes(&info).unwrap(), (84 * 84 * 4, 5));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        for info in [
            ServerInfo::new(0, 84, 4, 5),
            ServerInfo::new(84, 84, 0, 5),
            ServerInfo::new(84, 84, 3, 0),
            ServerInfo::new(u32::MAX, u32::MAX, u32::MAX, 5),
        ] {
            assert!(matches!(
                segment_sizes(&info),
                Err(Error::InvalidServerInfo(got)) if got == info
            ));
        }
    }
}
