//! [`ServerLauncher`] that starts a [`MockServer`] thread instead of a process.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use pursuit::{LaunchArgs, LaunchFailure, LaunchReport, LauncherExit, ServerLauncher};

use crate::mock_server::{MockServer, Witness};

pub struct MockLauncher {
    server: Mutex<Option<MockServer>>,
    exit_code: Option<i32>,
    witness: Arc<Witness>,
    launches: Mutex<Vec<LaunchArgs>>,
    handle: Mutex<Option<JoinHandle<Result<(), String>>>>,
}

impl MockLauncher {
    /// Launch `server` on a thread when the session asks for it.
    pub fn new(server: MockServer) -> Self {
        Self {
            witness: server.witness(),
            server: Mutex::new(Some(server)),
            exit_code: None,
            launches: Mutex::new(Vec::new()),
            handle: Mutex::new(None),
        }
    }

    /// A launcher that exits with `code` without starting anything.
    pub fn failing(code: i32) -> Self {
        Self {
            server: Mutex::new(None),
            exit_code: Some(code),
            witness: Arc::new(Witness::default()),
            launches: Mutex::new(Vec::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn witness(&self) -> Arc<Witness> {
        self.witness.clone()
    }

    /// Arguments of every launch attempt, oldest first.
    pub fn launches(&self) -> Vec<LaunchArgs> {
        self.launches.lock().clone()
    }

    pub fn last_launch(&self) -> Option<LaunchArgs> {
        self.launches.lock().last().cloned()
    }

    /// Wait for the server thread to stop. `None` if it was never started.
    pub fn join(&self) -> Option<Result<(), String>> {
        let handle = self.handle.lock().take()?;
        Some(
            handle
                .join()
                .unwrap_or_else(|_| Err("mock server panicked".to_owned())),
        )
    }
}

impl ServerLauncher for MockLauncher {
    fn launch(&self, args: &LaunchArgs) -> Result<LaunchReport, LaunchFailure> {
        self.launches.lock().push(args.clone());

        if let Some(code) = self.exit_code {
            return Err(LaunchFailure::Exit(LauncherExit::from_code(code)));
        }
        let Some(server) = self.server.lock().take() else {
            return Err(LaunchFailure::Exit(LauncherExit::Unknown));
        };

        let namespace = args.namespace.clone();
        let handle = std::thread::Builder::new()
            .name("mock-server".into())
            .spawn(move || server.serve(&namespace))
            .map_err(|source| LaunchFailure::Spawn {
                program: args.launcher.clone(),
                source,
            })?;
        *self.handle.lock() = Some(handle);

        Ok(LaunchReport {
            launcher_pid: std::process::id(),
        })
    }
}
