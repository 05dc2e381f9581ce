//! `ProcessLauncher` against real launcher stand-ins (shell scripts).
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{const_mutex, Mutex};
use pursuit::{
    Error, LaunchArgs, LaunchFailure, LauncherExit, Namespace, ProcessLauncher, ServerLauncher,
    ServerPaths, Session, SessionConfig,
};
use tempfile::TempDir;

// Writing an executable while another test thread forks can fail the exec
// with ETXTBSY, so script creation and spawning are serialized.
static SPAWN: Mutex<()> = const_mutex(());

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn launch_args(launcher: &Path, log_dir: &Path) -> LaunchArgs {
    LaunchArgs {
        launcher: launcher.to_path_buf(),
        payload: PathBuf::from("/games/hp/HighwayPursuit.exe"),
        module: PathBuf::from("/games/hp/server.dll"),
        real_time: false,
        frame_skip: 4,
        log_dir: log_dir.to_path_buf(),
        namespace: Namespace::parse("argv-test").unwrap(),
    }
}

#[test]
fn launcher_receives_arguments_in_order() {
    let _guard = SPAWN.lock();
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("argv.txt");
    let launcher = script(
        &dir,
        "launcher",
        &format!("for a in \"$@\"; do echo \"$a\" >> '{}'; done", out.display()),
    );
    let log_dir = dir.path().join("logs");

    let report = ProcessLauncher
        .launch(&launch_args(&launcher, &log_dir))
        .unwrap();
    assert_ne!(report.launcher_pid, 0);

    let argv = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = argv.lines().collect();
    assert_eq!(
        lines,
        [
            "/games/hp/HighwayPursuit.exe",
            "/games/hp/server.dll",
            "false",
            "4",
            log_dir.to_str().unwrap(),
            "argv-test",
        ]
    );
}

#[test]
fn exit_codes_map_to_failures() {
    let _guard = SPAWN.lock();
    let dir = TempDir::new().unwrap();

    for (code, expected) in [
        (1, LauncherExit::InvalidArguments),
        (2, LauncherExit::InjectionFailed),
        (3, LauncherExit::Unknown),
        (7, LauncherExit::Other(7)),
    ] {
        let launcher = script(&dir, &format!("exit-{code}"), &format!("exit {code}"));
        let result = ProcessLauncher.launch(&launch_args(&launcher, dir.path()));
        match result {
            Err(LaunchFailure::Exit(got)) => assert_eq!(got, expected),
            other => panic!("exit {code}: expected an exit failure, got {other:?}"),
        }
    }
}

#[test]
fn launcher_killed_by_signal() {
    let _guard = SPAWN.lock();
    let dir = TempDir::new().unwrap();
    let launcher = script(&dir, "launcher", "kill -9 $$");

    assert!(matches!(
        ProcessLauncher.launch(&launch_args(&launcher, dir.path())),
        Err(LaunchFailure::Killed)
    ));
}

#[test]
fn connect_fails_fast_when_injection_fails() {
    let _guard = SPAWN.lock();
    let dir = TempDir::new().unwrap();
    let launcher = script(&dir, "launcher", "exit 2");
    let paths = ServerPaths::new(&launcher, "/games/hp/HighwayPursuit.exe", "/games/hp/server.dll");
    let config = SessionConfig::default().with_handshake_timeout(Duration::from_secs(30));

    let start = Instant::now();
    let result = Session::connect(&paths, config);

    assert!(matches!(
        result,
        Err(Error::ProcessLaunchFailure(LaunchFailure::Exit(
            LauncherExit::InjectionFailed
        )))
    ));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn connect_reports_missing_launcher() {
    let _guard = SPAWN.lock();
    let dir = TempDir::new().unwrap();
    let paths = ServerPaths::new(
        dir.path().join("no-such-launcher"),
        "/games/hp/HighwayPursuit.exe",
        "/games/hp/server.dll",
    );

    let err = Session::connect(&paths, SessionConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessLaunchFailure(LaunchFailure::Spawn { .. })
    ));
    assert!(!err.is_restartable());
}
