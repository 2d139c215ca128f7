//! Headless display session: display number search, server child process,
//! connection, and teardown.
//!
//! A [`Session`] owns the child server and the backend connection. Dropping a
//! partially built session (any bootstrap failure) terminates the child, so
//! nothing is left running when `initialize` fails.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::backend::{self, DisplayBackend};
use crate::config::CompositorConfig;
use crate::error::BootstrapError;

/// Find the first display number with no lock file, no socket and no live server
///
/// `is_live` attempts a client connection to a display string such as `:3`.
pub fn find_free_display(config: &CompositorConfig, is_live: &dyn Fn(&str) -> bool) -> Option<u32> {
    (config.display_first..=config.display_last).find(|&number| {
        if config.display_artifacts_exist(number) {
            debug!("Display :{} has lock or socket file, skipping", number);
            return false;
        }
        if is_live(&backend::display_name(number)) {
            debug!("Display :{} already accepts connections, skipping", number);
            return false;
        }
        true
    })
}

/// Headless X server child process
pub struct ServerProcess {
    child: Child,
    display: u32,
    poll_interval: Duration,
    shutdown_polls: u32,
    reaped: bool,
}

impl ServerProcess {
    /// Spawn the server and wait until `is_live` accepts its display
    ///
    /// Polls at most `startup_attempts` times; gives up early if the child exits.
    pub fn launch(
        config: &CompositorConfig,
        number: u32,
        is_live: &dyn Fn(&str) -> bool,
    ) -> Result<Self, BootstrapError> {
        let args = config.server_args(number);
        info!("Launching {} on display :{}", config.server_binary, number);
        debug!("Server arguments: {:?}", args);

        let child = Command::new(&config.server_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BootstrapError::Spawn {
                binary: config.server_binary.clone(),
                source,
            })?;

        // From here on, any early return drops (and terminates) the child
        let mut server = Self {
            child,
            display: number,
            poll_interval: config.startup_poll_interval(),
            shutdown_polls: config.shutdown_polls,
            reaped: false,
        };

        let name = backend::display_name(number);
        for attempt in 1..=config.startup_attempts {
            thread::sleep(server.poll_interval);

            if is_live(&name) {
                info!("Display server ready on {} after {} attempts", name, attempt);
                return Ok(server);
            }

            if let Ok(Some(status)) = server.child.try_wait() {
                server.reaped = true;
                return Err(BootstrapError::ServerExited {
                    display: number,
                    status,
                });
            }
        }

        warn!("Timeout waiting for display server on {}", name);
        server.terminate();
        Err(BootstrapError::StartupTimeout {
            display: number,
            attempts: config.startup_attempts,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn display(&self) -> u32 {
        self.display
    }

    /// SIGTERM, wait a bounded number of polls, then SIGKILL
    pub fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.reaped = true;
            return;
        }

        info!("Terminating display server (PID {})", self.pid());
        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }

        for _ in 0..self.shutdown_polls {
            if let Ok(Some(_)) = self.child.try_wait() {
                self.reaped = true;
                return;
            }
            thread::sleep(self.poll_interval);
        }

        warn!("Display server did not exit, force killing PID {}", self.pid());
        if let Err(e) = self.child.kill() {
            debug!("SIGKILL failed: {}", e);
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A connected headless display
pub struct Session {
    display: u32,
    server: Option<ServerProcess>,
    backend: Box<dyn DisplayBackend>,
}

impl Session {
    /// Pick a display, launch the server and connect to it
    pub fn start(config: &CompositorConfig) -> Result<Self, BootstrapError> {
        let is_live = |name: &str| backend::display_is_live(name);

        let number = find_free_display(config, &is_live).ok_or(BootstrapError::NoFreeDisplay {
            first: config.display_first,
            last: config.display_last,
        })?;
        info!("Using display number: {}", number);

        let server = ServerProcess::launch(config, number, &is_live)?;

        let backend = backend::connect(&backend::display_name(number)).map_err(|e| {
            BootstrapError::Connect {
                display: number,
                message: format!("{:#}", e),
            }
        })?;

        Ok(Self {
            display: number,
            server: Some(server),
            backend,
        })
    }

    /// Adopt an already connected backend; no child process is owned
    pub fn attach(display: u32, backend: Box<dyn DisplayBackend>) -> Self {
        Self {
            display,
            server: None,
            backend,
        }
    }

    pub fn display(&self) -> u32 {
        self.display
    }

    pub fn display_name(&self) -> String {
        backend::display_name(self.display)
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().map(ServerProcess::pid)
    }

    pub fn backend(&self) -> &dyn DisplayBackend {
        self.backend.as_ref()
    }

    /// Undo session setup, close the connection, then stop the server
    pub fn teardown(self) {
        let Self {
            display: number,
            server,
            backend,
        } = self;

        backend.shutdown();
        drop(backend);

        if let Some(mut server) = server {
            server.terminate();
        }
        info!("Session on :{} torn down", number);
    }
}
