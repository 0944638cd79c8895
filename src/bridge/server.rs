//! Programmer server: runs the bridge protocol for one connection on a
//! dedicated thread.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use uuid::Uuid;

use super::connection::{Connection, Flow};
use super::{BridgeError, Progress, ProgressSnapshot, Result, ServerOptions};
use crate::serial::protocol::FrameError;
use crate::serial::SerialDevice;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

type Interrupt = Box<dyn Fn() + Send + Sync>;

/// State shared between the server handle and its thread
struct Shared {
    state: AtomicU8,
    progress: Progress,
}

pub struct ProgrammerServerBuilder {
    device: Box<dyn SerialDevice>,
    input: Box<dyn Read + Send>,
    output: Box<dyn Write + Send>,
    options: ServerOptions,
    interrupt: Option<Interrupt>,
}

impl ProgrammerServerBuilder {
    pub fn new<D, R, W>(device: D, input: R, output: W) -> Self
    where
        D: SerialDevice + 'static,
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            device: Box::new(device),
            input: Box::new(input),
            output: Box::new(output),
            options: ServerOptions::default(),
            interrupt: None,
        }
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Hook run by [`ProgrammerServer::close`] to unblock a pending read on the
    /// input stream (shut a socket down, drop the far end of a pipe, ...).
    pub fn on_close<F>(mut self, interrupt: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.interrupt = Some(Box::new(interrupt));
        self
    }

    pub fn build(self) -> ProgrammerServer {
        let session = Uuid::new_v4();
        let connection = Connection::new(session, self.device, self.input, self.output, self.options);
        ProgrammerServer {
            session,
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                progress: Progress::new(),
            }),
            connection: Mutex::new(Some(connection)),
            worker: Mutex::new(None),
            interrupt: self.interrupt,
        }
    }
}

/// Owns one connection and the thread serving it.
///
/// Lifecycle is Idle -> Running -> Closed. Closed is terminal: a closed server
/// cannot be started again.
pub struct ProgrammerServer {
    session: Uuid,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    interrupt: Option<Interrupt>,
}

/// Build and start a server with default options.
///
/// No close hook is installed, so [`ProgrammerServer::close`] on a running
/// server returns only once `input` reaches end of stream. Callers that need
/// to close from another thread while the peer is idle should use
/// [`ProgrammerServerBuilder::on_close`] instead.
pub fn start_server<D, R, W>(device: D, input: R, output: W) -> Result<ProgrammerServer>
where
    D: SerialDevice + 'static,
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let server = ProgrammerServerBuilder::new(device, input, output).build();
    server.start()?;
    Ok(server)
}

impl ProgrammerServer {
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// Spawn the server thread (idempotent while running)
    pub fn start(&self) -> Result<()> {
        // held until the handle is stored so a concurrent close() waits to join it
        let mut worker = lock(&self.worker);
        match self
            .shared
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) => return Ok(()),
            Err(_) => return Err(BridgeError::Closed),
        }

        let Some(connection) = lock(&self.connection).take() else {
            self.shared.state.store(CLOSED, Ordering::Release);
            return Err(BridgeError::Closed);
        };

        self.shared.progress.reset();
        let shared = self.shared.clone();
        let session = self.session;
        let spawned = thread::Builder::new()
            .name(format!("flashbridge-{}", session.simple()))
            .spawn(move || serve(connection, shared, session));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("[{}] programmer server started", self.session);
                Ok(())
            }
            Err(e) => {
                self.shared.state.store(CLOSED, Ordering::Release);
                Err(BridgeError::Spawn(e))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == CLOSED
    }

    pub fn percent_progress(&self) -> u8 {
        self.shared.progress.percent()
    }

    pub fn elapsed_time_ms(&self) -> u32 {
        self.shared.progress.elapsed_ms()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot()
    }

    /// Stop serving and wait for the server thread to exit.
    ///
    /// Safe from any thread. Without an [`ProgrammerServerBuilder::on_close`]
    /// hook, this returns once the pending opcode read ends, i.e. when the
    /// bridged process closes its side.
    pub fn close(&self) -> Result<()> {
        let previous = self.shared.state.swap(CLOSED, Ordering::AcqRel);
        match previous {
            IDLE => {
                if let Some(connection) = lock(&self.connection).take() {
                    connection.abandon();
                }
                log::info!("[{}] programmer server closed before start", self.session);
            }
            RUNNING => {
                if let Some(interrupt) = &self.interrupt {
                    interrupt();
                }
            }
            _ => {}
        }
        self.wait()
    }

    /// Wait for the server thread to finish on its own (CLOSE or end of input)
    pub fn wait(&self) -> Result<()> {
        let handle = lock(&self.worker).take();
        match handle {
            Some(handle) if handle.thread().id() != thread::current().id() => {
                handle.join().map_err(|_| BridgeError::WorkerPanicked)
            }
            _ => Ok(()),
        }
    }
}

impl Drop for ProgrammerServer {
    fn drop(&mut self) {
        // the thread is not joined here; it exits at its next opcode read
        if self.shared.state.swap(CLOSED, Ordering::AcqRel) == RUNNING {
            if let Some(interrupt) = &self.interrupt {
                interrupt();
            }
        }
    }
}

fn serve(mut connection: Connection, shared: Arc<Shared>, session: Uuid) {
    while shared.state.load(Ordering::Acquire) == RUNNING {
        let command = match connection.read_command() {
            Ok(command) => command,
            Err(FrameError::Closed) => {
                log::debug!("[{}] command stream closed", session);
                break;
            }
            Err(e @ FrameError::Truncated { .. }) => {
                log::warn!("[{}] {}", session, e);
                connection.fail_frame(&e);
                break;
            }
            Err(e) => {
                log::debug!("[{}] command stream error: {}", session, e);
                break;
            }
        };

        let flow = match connection.dispatch(command, &shared.progress) {
            Ok(flow) => flow,
            Err(e) => {
                log::debug!("[{}] response stream error: {}", session, e);
                break;
            }
        };
        if let Err(e) = connection.flush() {
            log::debug!("[{}] response stream error: {}", session, e);
            break;
        }
        if flow == Flow::Terminate {
            break;
        }
    }

    shared.state.store(CLOSED, Ordering::Release);
    drop(connection);
    log::info!("[{}] programmer server stopped", session);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
