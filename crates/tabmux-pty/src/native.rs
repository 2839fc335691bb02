//! `portable-pty` implementation of [`PtyBackend`].
//!
//! Every process gets two dedicated OS threads: a reader, because PTY reads
//! block, and a writer fed by a channel so `write` never blocks the caller.
//! Neither thread holds the process table lock while doing I/O.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{Child, MasterPty};
use tabmux_vt::Geometry;
use tokio::sync::mpsc;

use crate::backend::{BackendEvent, BackendEvents, BackendHandle, PtyBackend, SessionId};
use crate::pty::{resize_master, PtyError, PtyHandle, PtyParts, ShellSpec};

const READ_BUFFER_SIZE: usize = 8192;

struct PtyProcess {
    generation: u64,
    master: Box<dyn MasterPty + Send>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    child: Box<dyn Child + Send + Sync>,
}

type ProcessTable = Arc<Mutex<HashMap<SessionId, PtyProcess>>>;

/// Spawns shells in native pseudo-terminals.
pub struct NativeBackend {
    spec: ShellSpec,
    processes: ProcessTable,
    events: mpsc::UnboundedSender<BackendEvent>,
    next_generation: AtomicU64,
}

impl NativeBackend {
    /// Create a backend and the receiver its output events are pushed to.
    pub fn new(spec: ShellSpec) -> (Self, BackendEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let backend = Self {
            spec,
            processes: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_generation: AtomicU64::new(1),
        };
        (backend, rx)
    }

    /// Ids with a running process, sorted.
    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = match self.processes.lock() {
            Ok(processes) => processes.keys().copied().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, PtyProcess>>, PtyError> {
        self.processes
            .lock()
            .map_err(|_| PtyError::SpawnFailed("process table lock poisoned".to_string()))
    }
}

impl PtyBackend for NativeBackend {
    fn spawn(&self, id: SessionId, geometry: Geometry) -> Result<BackendHandle, PtyError> {
        let handle = PtyHandle::spawn(&self.spec, geometry)?;
        let pid = handle.process_id();
        let PtyParts {
            master,
            reader,
            writer,
            mut child,
        } = handle.into_parts();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let (input, input_rx) = mpsc::unbounded_channel();
        if let Err(e) = start_writer_thread(id, writer, input_rx) {
            let _ = child.kill();
            return Err(e.into());
        }

        let process = PtyProcess {
            generation,
            master,
            input,
            child,
        };
        let previous = match self.table() {
            Ok(mut processes) => processes.insert(id, process),
            Err(e) => {
                let _ = terminate(id, process);
                return Err(e);
            }
        };
        if let Some(previous) = previous {
            log::warn!(
                "tab {id} already had a shell (generation {}); closing it before replacing",
                previous.generation
            );
            if let Err(e) = terminate(id, previous) {
                log::warn!("failed to stop replaced shell for tab {id}: {e}");
            }
        }

        let io = ReaderContext {
            id,
            generation,
            processes: Arc::clone(&self.processes),
            events: self.events.clone(),
        };
        if let Err(e) = start_reader_thread(io, reader) {
            if let Ok(mut processes) = self.processes.lock() {
                if let Some(process) = processes.remove(&id) {
                    let _ = terminate(id, process);
                }
            }
            return Err(e.into());
        }

        log::info!("spawned shell for tab {id} at {geometry} (pid {pid:?}, generation {generation})");
        Ok(BackendHandle {
            session_id: id,
            generation,
            pid,
        })
    }

    fn write(&self, id: SessionId, data: &[u8]) -> Result<(), PtyError> {
        let processes = self.table()?;
        let process = processes.get(&id).ok_or(PtyError::NotFound(id))?;
        process
            .input
            .send(data.to_vec())
            .map_err(|_| PtyError::Closed(id))
    }

    fn resize(&self, id: SessionId, geometry: Geometry) -> Result<(), PtyError> {
        let processes = self.table()?;
        let process = processes.get(&id).ok_or(PtyError::NotFound(id))?;
        resize_master(process.master.as_ref(), geometry)
    }

    fn close(&self, id: SessionId) -> Result<(), PtyError> {
        let removed = self.table()?.remove(&id);
        match removed {
            Some(process) => {
                log::debug!("closing shell for tab {id}");
                terminate(id, process)
            }
            None => Ok(()),
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        if let Ok(mut processes) = self.processes.lock() {
            for (id, process) in processes.drain() {
                let _ = terminate(id, process);
            }
        }
    }
}

/// Kill a process and reap it in the background.
fn terminate(id: SessionId, process: PtyProcess) -> Result<(), PtyError> {
    let PtyProcess {
        master,
        input,
        mut child,
        ..
    } = process;
    // Dropping the sender ends the writer thread.
    drop(input);
    let killed = child.kill();
    reap(id, child);
    drop(master);
    killed.map_err(PtyError::from)
}

fn reap(id: SessionId, mut child: Box<dyn Child + Send + Sync>) {
    let spawned = std::thread::Builder::new()
        .name(format!("pty-reap-{id}"))
        .spawn(move || {
            let _ = child.wait();
        });
    if let Err(e) = spawned {
        log::warn!("could not start reaper for tab {id}: {e}");
    }
}

struct ReaderContext {
    id: SessionId,
    generation: u64,
    processes: ProcessTable,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl ReaderContext {
    /// Whether this reader still belongs to the canonical process for its id.
    fn is_current(&self) -> bool {
        match self.processes.lock() {
            Ok(processes) => processes
                .get(&self.id)
                .is_some_and(|process| process.generation == self.generation),
            Err(_) => false,
        }
    }

    /// Remove the process if it is still the canonical one for this id.
    fn take_if_current(&self) -> Option<PtyProcess> {
        let mut processes = self.processes.lock().ok()?;
        let current = processes
            .get(&self.id)
            .is_some_and(|process| process.generation == self.generation);
        if current {
            processes.remove(&self.id)
        } else {
            None
        }
    }
}

fn start_reader_thread(io: ReaderContext, reader: Box<dyn Read + Send>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-io-{}", io.id))
        .spawn(move || io_loop(io, reader))?;
    Ok(())
}

fn io_loop(io: ReaderContext, mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO once the child side is gone.
            Err(_) => break,
        };

        // Output from a closed or superseded process is discarded here.
        if !io.is_current() {
            return;
        }
        let event = BackendEvent::Output {
            id: io.id,
            data: buf[..n].to_vec(),
        };
        if io.events.send(event).is_err() {
            return;
        }
    }

    // A process that was closed explicitly is no longer in the table and
    // reports nothing; one that exited by itself is reaped here.
    if let Some(process) = io.take_if_current() {
        let PtyProcess { mut child, .. } = process;
        let code = child.wait().ok().map(|status| status.exit_code());
        log::info!("shell for tab {} exited with {code:?}", io.id);
        let _ = io.events.send(BackendEvent::Exited {
            id: io.id,
            generation: io.generation,
            code,
        });
    }
}

fn start_writer_thread(
    id: SessionId,
    mut writer: Box<dyn Write + Send>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-write-{id}"))
        .spawn(move || {
            while let Some(data) = input.blocking_recv() {
                if data.is_empty() {
                    continue;
                }
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    log::warn!("input for tab {id} could not be written: {e}");
                    break;
                }
            }
        })?;
    Ok(())
}
