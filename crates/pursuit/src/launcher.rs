//! Starting the game server.
//!
//! The launcher starts the game, injects the server module and exits. Its
//! exit code is the only startup signal: `0` means the server is up and
//! will open the session's named objects by namespace.
//!
//! ```text
//! <launcher> <payload> <module> <real-time> <frame-skip> <log-dir> <namespace>
//! ```

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use pursuit_shm::Namespace;

/// Everything the launcher is told on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub launcher: PathBuf,
    pub payload: PathBuf,
    pub module: PathBuf,
    pub real_time: bool,
    pub frame_skip: u32,
    pub log_dir: PathBuf,
    pub namespace: Namespace,
}

impl LaunchArgs {
    /// Arguments after the launcher path, in the order the launcher reads them.
    pub fn server_args(&self) -> Vec<OsString> {
        vec![
            self.payload.clone().into_os_string(),
            self.module.clone().into_os_string(),
            OsString::from(if self.real_time { "true" } else { "false" }),
            OsString::from(self.frame_skip.to_string()),
            self.log_dir.clone().into_os_string(),
            OsString::from(self.namespace.as_str()),
        ]
    }

    /// The full command line, launcher first.
    pub fn command_line(&self) -> Vec<OsString> {
        let mut argv = vec![self.launcher.clone().into_os_string()];
        argv.extend(self.server_args());
        argv
    }
}

/// What a successful launch leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchReport {
    /// Pid of the launcher process (it has exited by now).
    pub launcher_pid: u32,
}

/// Launcher exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherExit {
    /// `1`: the launcher rejected its arguments.
    InvalidArguments,
    /// `2`: the module could not be injected into the game.
    InjectionFailed,
    /// `3`: the launcher failed for an unspecified reason.
    Unknown,
    /// Any other non-zero code.
    Other(i32),
}

impl LauncherExit {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => LauncherExit::InvalidArguments,
            2 => LauncherExit::InjectionFailed,
            3 => LauncherExit::Unknown,
            other => LauncherExit::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            LauncherExit::InvalidArguments => 1,
            LauncherExit::InjectionFailed => 2,
            LauncherExit::Unknown => 3,
            LauncherExit::Other(code) => code,
        }
    }
}

impl fmt::Display for LauncherExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherExit::InvalidArguments => write!(f, "code 1 (invalid arguments)"),
            LauncherExit::InjectionFailed => write!(f, "code 2 (injection failed)"),
            LauncherExit::Unknown => write!(f, "code 3 (unknown error)"),
            LauncherExit::Other(code) => write!(f, "code {code}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchFailure {
    #[error("could not start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("launcher exited with {0}")]
    Exit(LauncherExit),
    #[error("launcher was terminated without an exit code")]
    Killed,
}

impl LaunchFailure {
    /// Map a finished launcher's status; `Ok` only for exit code 0.
    pub fn check(status: ExitStatus) -> Result<(), LaunchFailure> {
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(LaunchFailure::Exit(LauncherExit::from_code(code))),
            None => Err(LaunchFailure::Killed),
        }
    }
}

/// Starts the server for a session.
///
/// `launch` returns once the server is running or has failed to start;
/// it must not perform any hand-off.
pub trait ServerLauncher {
    fn launch(&self, args: &LaunchArgs) -> Result<LaunchReport, LaunchFailure>;
}

/// Runs the real launcher executable and waits for it to exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, args: &LaunchArgs) -> Result<LaunchReport, LaunchFailure> {
        tracing::info!(argv = ?args.command_line(), "starting launcher");

        let mut child = Command::new(&args.launcher)
            .args(args.server_args())
            .spawn()
            .map_err(|source| LaunchFailure::Spawn {
                program: args.launcher.clone(),
                source,
            })?;
        let launcher_pid = child.id();

        let status = child.wait().map_err(|source| LaunchFailure::Spawn {
            program: args.launcher.clone(),
            source,
        })?;

        if let Err(e) = LaunchFailure::check(status) {
            tracing::warn!(pid = launcher_pid, "launcher failed: {}", e);
            return Err(e);
        }
        tracing::info!(pid = launcher_pid, "launcher finished, server is up");
        Ok(LaunchReport { launcher_pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> LaunchArgs {
        LaunchArgs {
            launcher: PathBuf::from("/opt/hp/launcher.exe"),
            payload: PathBuf::from("/opt/hp/game.exe"),
            module: PathBuf::from("/opt/hp/server.dll"),
            real_time: false,
            frame_skip: 4,
            log_dir: PathBuf::from("/opt/hp/logs"),
            namespace: Namespace::parse("ns-1").unwrap(),
        }
    }

    #[test]
    fn argv_order_is_fixed() {
        let argv = args().command_line();
        let expected: Vec<OsString> = [
            "/opt/hp/launcher.exe",
            "/opt/hp/game.exe",
            "/opt/hp/server.dll",
            "false",
            "4",
            "/opt/hp/logs",
            "ns-1",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(argv, expected);
    }

    #[test]
    fn real_time_is_lowercase_text() {
        let mut a = args();
        a.real_time = true;
        assert_eq!(a.server_args()[2], OsString::from("true"));
    }

    #[test]
    fn exit_codes_are_named() {
        assert_eq!(LauncherExit::from_code(2), LauncherExit::InjectionFailed);
        assert_eq!(LauncherExit::from_code(9), LauncherExit::Other(9));
        assert_eq!(LauncherExit::InvalidArguments.code(), 1);
        assert_eq!(
            LaunchFailure::Exit(LauncherExit::InjectionFailed).to_string(),
            "launcher exited with code 2 (injection failed)"
        );
    }

    #[test]
    fn missing_launcher_is_a_spawn_failure() {
        let mut a = args();
        a.launcher = PathBuf::from("/definitely/not/here/launcher");
        assert!(matches!(
            ProcessLauncher.launch(&a),
            Err(LaunchFailure::Spawn { .. })
        ));
    }
}
