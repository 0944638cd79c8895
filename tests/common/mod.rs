#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flashbridge_lib::bridge::{ProgrammerServer, ProgrammerServerBuilder, RemotePort, ServerOptions};
use flashbridge_lib::serial::protocol::{read_i32, Command};
use flashbridge_lib::serial::{ControlLine, LineParameters, SerialDevice, SerialError};

/// Everything the scripted device saw and will answer with
#[derive(Debug, Default)]
pub struct MockState {
    pub rx: VecDeque<u8>,
    pub written: Vec<u8>,
    pub read_requests: Vec<(usize, Duration)>,
    pub write_calls: usize,
    pub params: Option<LineParameters>,
    pub cd: bool,
    pub cts: bool,
    pub dsr: bool,
    pub ri: bool,
    pub dtr: bool,
    pub rts: bool,
    pub ops: usize,
    pub failures: HashMap<usize, String>,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct MockDevice {
    pub state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rx(bytes: &[u8]) -> Self {
        let device = Self::new();
        device.state.lock().unwrap().rx.extend(bytes.iter().copied());
        device
    }

    /// Make the next device operation fail with `message`
    pub fn fail_next(&self, message: &str) {
        let mut state = self.state.lock().unwrap();
        let op = state.ops;
        state.failures.insert(op, message.to_string());
    }

    /// Make the `op`-th device operation (counting from zero) fail
    pub fn fail_at(&self, op: usize, message: &str) {
        self.state.lock().unwrap().failures.insert(op, message.to_string());
    }

    fn check_failure(state: &mut MockState) -> Result<(), SerialError> {
        if state.closed {
            return Err(SerialError::Closed);
        }
        let op = state.ops;
        state.ops += 1;
        match state.failures.remove(&op) {
            Some(message) => Err(SerialError::IoError(io::Error::new(io::ErrorKind::Other, message))),
            None => Ok(()),
        }
    }
}

impl SerialDevice for MockDevice {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        state.read_requests.push((buffer.len(), timeout));
        let n = buffer.len().min(state.rx.len());
        for slot in buffer.iter_mut().take(n) {
            *slot = state.rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        state.write_calls += 1;
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn set_parameters(&mut self, params: &LineParameters) -> Result<(), SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        state.params = Some(*params);
        Ok(())
    }

    fn control_line(&mut self, line: ControlLine) -> Result<bool, SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        Ok(match line {
            ControlLine::Cd => state.cd,
            ControlLine::Cts => state.cts,
            ControlLine::Dsr => state.dsr,
            ControlLine::Dtr => state.dtr,
            ControlLine::Ri => state.ri,
            ControlLine::Rts => state.rts,
        })
    }

    fn set_control_line(&mut self, line: ControlLine, asserted: bool) -> Result<(), SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        match line {
            ControlLine::Dtr => state.dtr = asserted,
            ControlLine::Rts => state.rts = asserted,
            other => return Err(SerialError::Unsupported(other.name().to_string())),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SerialError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;
        state.closed = true;
        Ok(())
    }
}

/// Writer whose contents stay inspectable after the server drops it
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking in-memory pipe; reads return end-of-stream once every writer is gone
pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = mpsc::channel();
    (
        PipeReader { rx, pending: Vec::new(), pos: 0 },
        PipeWriter { tx },
    )
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Clone)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn encode(commands: &[Command]) -> Vec<u8> {
    let mut wire = Vec::new();
    for command in commands {
        command.write_to(&mut wire).unwrap();
    }
    wire
}

/// Feed `script` to a fresh server, let it run to the end of input and
/// return everything it wrote back.
pub fn run_script(device: MockDevice, script: Vec<u8>) -> Vec<u8> {
    run_script_with(device, script, ServerOptions::default())
}

pub fn run_script_with(device: MockDevice, script: Vec<u8>, options: ServerOptions) -> Vec<u8> {
    let output = SharedBuf::default();
    let server = ProgrammerServerBuilder::new(device, Cursor::new(script), output.clone())
        .options(options)
        .build();
    server.start().unwrap();
    server.wait().unwrap();
    assert!(!server.is_running());
    output.contents()
}

pub fn wait_until_stopped(server: &ProgrammerServer, limit: Duration) {
    let start = Instant::now();
    while server.is_running() {
        assert!(start.elapsed() < limit, "server still running after {:?}", limit);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Sequential reader over a server's response bytes
pub struct Replies(Cursor<Vec<u8>>);

impl Replies {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Cursor::new(bytes))
    }

    pub fn status(&mut self) -> i32 {
        read_i32(&mut self.0).expect("status word")
    }

    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.0.read_exact(&mut buf).expect("payload bytes");
        buf
    }

    pub fn is_empty(&self) -> bool {
        self.0.position() as usize == self.0.get_ref().len()
    }
}

/// Running server wired to a [`RemotePort`] through in-memory pipes
pub fn bridged(device: MockDevice) -> (ProgrammerServer, RemotePort<PipeReader, PipeWriter>) {
    let (command_rx, command_tx) = pipe();
    let (response_rx, response_tx) = pipe();
    let server = ProgrammerServerBuilder::new(device, command_rx, response_tx).build();
    server.start().unwrap();
    (server, RemotePort::new(response_rx, command_tx))
}
