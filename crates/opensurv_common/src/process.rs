//! Detached process launch and scheduled self-termination.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Process-level side effects of an update handoff
pub trait ProcessControl: Send + Sync {
    /// Start `command` so it outlives the current process. Returns its PID.
    fn spawn_detached(&self, command: Command) -> io::Result<u32>;

    /// Terminate the current process after `delay`, without blocking the caller
    fn schedule_exit(&self, delay: Duration);
}

/// The real thing: detached spawns and `std::process::exit`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn spawn_detached(&self, command: Command) -> io::Result<u32> {
        spawn_detached(command)
    }

    fn schedule_exit(&self, delay: Duration) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    info!("Exiting for update handoff");
                    std::process::exit(0);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    info!("Exiting for update handoff");
                    std::process::exit(0);
                });
            }
        }
    }
}

/// Records spawns and exit requests instead of acting on them
#[derive(Debug, Default)]
pub struct RecordingProcessControl {
    spawned: Mutex<Vec<String>>,
    exits: Mutex<Vec<Duration>>,
}

impl RecordingProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program and arguments of each spawn, space-joined
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn exit_requests(&self) -> Vec<Duration> {
        self.exits.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProcessControl for RecordingProcessControl {
    fn spawn_detached(&self, command: Command) -> io::Result<u32> {
        let mut line = command.get_program().to_string_lossy().into_owned();
        for arg in command.get_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        let mut spawned = self
            .spawned
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "poisoned"))?;
        spawned.push(line);
        Ok(40_000 + spawned.len() as u32)
    }

    fn schedule_exit(&self, delay: Duration) {
        if let Ok(mut exits) = self.exits.lock() {
            exits.push(delay);
        }
    }
}

/// Spawn `command` in its own session with no inherited stdio
pub fn spawn_detached(mut command: Command) -> io::Result<u32> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = command.spawn()?;
    Ok(child.id())
}

/// Mark a file executable (no-op off Unix)
pub fn set_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    {
        if !path.exists() {
            tracing::warn!("set_executable: {} does not exist", path.display());
        }
    }
    Ok(())
}
