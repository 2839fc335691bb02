use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tabmux_vt::Geometry;

use crate::backend::SessionId;

/// Errors from PTY backend operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
    #[error("no backend session for tab {0}")]
    NotFound(SessionId),
    #[error("backend session for tab {0} is closed")]
    Closed(SessionId),
}

/// What to run inside a new PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    /// Shell program; `None` means the user's default shell.
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Value of `TERM` in the child environment.
    pub term: String,
    /// Starting directory; `None` means the user's home directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for ShellSpec {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            term: "xterm-256color".to_string(),
            working_dir: None,
        }
    }
}

impl ShellSpec {
    fn command(&self) -> CommandBuilder {
        let program = self.program.clone().unwrap_or_else(default_shell);
        let mut cmd = CommandBuilder::new(program);
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd.env("TERM", &self.term);
        if let Some(dir) = self.working_dir.clone().or_else(home_dir) {
            cmd.cwd(dir);
        }
        cmd
    }
}

/// The pieces of a spawned PTY, for callers that hand them to separate threads.
pub struct PtyParts {
    pub master: Box<dyn MasterPty + Send>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `spec` in a new PTY of the given size.
    ///
    /// The size is clamped to at least 2 columns by 1 row.
    pub fn spawn(spec: &ShellSpec, geometry: Geometry) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(geometry))
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut child = pair
            .slave
            .spawn_command(spec.command())
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;
        // Only the child holds the slave from here on, so reads hit EOF when it exits.
        drop(pair.slave);

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = child.kill();
                return Err(PtyError::SpawnFailed(format!("failed to clone reader: {e}")));
            }
        };

        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                let _ = child.kill();
                return Err(PtyError::SpawnFailed(format!("failed to take writer: {e}")));
            }
        };

        Ok(Self {
            master: pair.master,
            reader,
            writer,
            child,
        })
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    pub fn into_parts(self) -> PtyParts {
        PtyParts {
            master: self.master,
            reader: self.reader,
            writer: self.writer,
            child: self.child,
        }
    }
}

pub(crate) fn resize_master(master: &dyn MasterPty, geometry: Geometry) -> Result<(), PtyError> {
    master
        .resize(pty_size(geometry))
        .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows.max(1),
        cols: geometry.cols.max(2),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Returns the user's default shell.
fn default_shell() -> String {
    if cfg!(target_os = "windows") {
        "cmd".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    let key = if cfg!(target_os = "windows") {
        "USERPROFILE"
    } else {
        "HOME"
    };
    std::env::var_os(key).map(PathBuf::from)
}
