use std::any::Any;
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::debugger::{Session, SessionConfig, SessionError};
use crate::protocol::{dispatch, Command, Response};

/// Shared flag checked by a running session at each yield point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The engine thread has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Engine thread is no longer running")
    }
}

impl Error for Disconnected {}

struct Request {
    command: Command,
    cancel: CancelToken,
}

/// A [`Session`] running on its own thread, driven by [`Command`]s.
///
/// Commands are handled strictly in order. Sending a command which supersedes any
/// in-flight run (assembling or resetting) cancels that run at its next yield point.
pub struct Engine {
    commands: Option<Sender<Request>>,
    responses: Receiver<Response>,
    current: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn spawn(config: SessionConfig) -> io::Result<Self> {
        Self::with_session(Session::new(config))
    }

    pub fn with_session(session: Session) -> io::Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("toyasm-engine".to_string())
            .spawn(move || serve(session, command_rx, response_tx))?;
        Ok(Self {
            commands: Some(command_tx),
            responses: response_rx,
            current: CancelToken::new(),
            handle: Some(handle),
        })
    }

    /// Queue `command`, returning the token that cancels it.
    pub fn send(&mut self, command: Command) -> Result<CancelToken, Disconnected> {
        if command.supersedes() {
            self.current.cancel();
            self.current = CancelToken::new();
        }
        let cancel = self.current.clone();
        let commands = self.commands.as_ref().ok_or(Disconnected)?;
        commands
            .send(Request {
                command,
                cancel: cancel.clone(),
            })
            .map_err(|_| Disconnected)?;
        Ok(cancel)
    }

    /// Cancel every queued or running command.
    pub fn cancel(&mut self) {
        self.current.cancel();
        self.current = CancelToken::new();
    }

    /// Block for the next response, progress included.
    pub fn recv(&self) -> Result<Response, Disconnected> {
        self.responses.recv().map_err(|_| Disconnected)
    }

    /// Like [`Engine::recv`], but `Ok(None)` once `timeout` passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Response>, Disconnected> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// Send `command` and wait for its terminal response, calling `on_progress` for
    /// everything emitted before it.
    pub fn request(
        &mut self,
        command: Command,
        mut on_progress: impl FnMut(&Response),
    ) -> Result<Response, Disconnected> {
        self.send(command)?;
        loop {
            let response = self.recv()?;
            if response.is_terminal() {
                return Ok(response);
            }
            on_progress(&response);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.current.cancel();
        drop(self.commands.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(mut session: Session, commands: Receiver<Request>, responses: Sender<Response>) {
    for Request { command, cancel } in commands {
        let terminal = Cell::new(false);
        let mut emit = |response: Response| {
            terminal.set(terminal.get() || response.is_terminal());
            // Host hung up, nothing left to tell
            let _ = responses.send(response);
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch(&mut session, command, &cancel, &mut emit)
        }));
        if let Err(payload) = result {
            if !terminal.get() {
                emit(Response::Error {
                    diagnostic: SessionError::Panicked {
                        message: panic_message(payload.as_ref()),
                    }
                    .into(),
                    state: None,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::{Cpu, Memory};
    use crate::syscall::Console;

    fn terminal_responses(engine: &Engine, count: usize) -> Vec<Response> {
        let mut responses = Vec::new();
        while responses.len() < count {
            let response = engine.recv().unwrap();
            if response.is_terminal() {
                responses.push(response);
            }
        }
        responses
    }

    #[test]
    fn handles_commands_in_order() {
        let mut engine = Engine::spawn(SessionConfig::default()).unwrap();
        engine
            .send(Command::AssembleStep {
                source: "MOV R0, #2\nHLT".to_string(),
            })
            .unwrap();
        engine.send(Command::Step).unwrap();
        engine.send(Command::Continue { step_limit: None }).unwrap();
        let outcomes: Vec<_> = terminal_responses(&engine, 3)
            .iter()
            .map(Response::outcome)
            .collect();
        assert_eq!(outcomes, vec!["success", "step_complete", "run_complete"]);
    }

    #[test]
    fn new_assembly_cancels_run() {
        let mut engine = Engine::spawn(SessionConfig {
            step_limit: u64::MAX,
            yield_interval: 64,
            ..SessionConfig::default()
        })
        .unwrap();
        let first = engine
            .send(Command::AssembleRun {
                source: "spin: JMP spin".to_string(),
            })
            .unwrap();
        engine
            .send(Command::AssembleStep {
                source: "HLT".to_string(),
            })
            .unwrap();
        assert!(first.is_cancelled());

        let responses = terminal_responses(&engine, 2);
        assert_eq!(responses[0].pause_reason(), Some("cancelled"));
        assert_eq!(responses[1].outcome(), "success");
    }

    #[test]
    fn request_waits_for_terminal() {
        let mut engine = Engine::spawn(SessionConfig {
            step_limit: 500,
            yield_interval: 100,
            ..SessionConfig::default()
        })
        .unwrap();
        let mut progress = 0;
        let response = engine
            .request(
                Command::AssembleRun {
                    source: "spin: JMP spin".to_string(),
                },
                |_| progress += 1,
            )
            .unwrap();
        assert_eq!(progress, 5);
        assert_eq!(response.pause_reason(), Some("step_limit"));
    }

    #[test]
    fn panics_become_errors() {
        let session = Session::with_syscalls(
            SessionConfig::default(),
            Box::new(
                |_: i16, _: &mut Cpu, _: &Memory, _: &mut Console| -> Result<(), RuntimeError> {
                    panic!("handler exploded")
                },
            ),
        );
        let mut engine = Engine::with_session(session).unwrap();
        let response = engine
            .request(
                Command::AssembleRun {
                    source: "SYS #1".to_string(),
                },
                |_| (),
            )
            .unwrap();
        let Response::Error { diagnostic, .. } = response else {
            panic!("expected an error response");
        };
        assert_eq!(diagnostic.code, "session::panic");
        assert!(diagnostic.message.contains("handler exploded"));

        // Engine keeps serving afterwards
        let response = engine.request(Command::GetDisassembly, |_| ()).unwrap();
        assert_eq!(response.outcome(), "disassembly");
    }
}
