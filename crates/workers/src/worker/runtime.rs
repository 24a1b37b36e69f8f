//! Worker thread main loop
//!
//! Runs on the worker's own OS thread. Loads the module, then serves commands
//! strictly in arrival order until told to terminate, the channel closes, or
//! the module reports a fatal error. Panics inside the module are caught here
//! and never unwind across the worker boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::handle::{Command, WorkerId};
use crate::error::{CallError, LoadError};
use crate::module::{ComputationModule, ModuleEntry, ModuleError};

pub(crate) fn run_worker(
    entry: Arc<dyn ModuleEntry>,
    id: WorkerId,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut module = match guard(|| entry.load()) {
        Ok(module) => module,
        Err(err) => {
            warn!(worker_id = %id, module = entry.name(), error = %err, "Module failed to load");
            // The spawner always sends the handshake first
            if let Some(Command::Handshake { ack }) = commands.blocking_recv() {
                let _ = ack.send(Err(err));
            }
            return;
        }
    };

    debug!(worker_id = %id, module = entry.name(), "Module loaded");
    serve(module.as_mut(), id, &mut commands);
    drop(module);
    debug!(worker_id = %id, "Worker thread exiting");
}

fn serve(
    module: &mut dyn ComputationModule,
    id: WorkerId,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) {
    let mut initialized = false;

    while let Some(command) = commands.blocking_recv() {
        debug!(worker_id = %id, command = command.label(), "Worker received command");

        match command {
            Command::Handshake { ack } => {
                if ack.send(Ok(())).is_err() {
                    // Spawner gave up waiting
                    warn!(worker_id = %id, "Handshake acknowledged too late, exiting");
                    break;
                }
            }
            Command::Init { reply } => {
                let result = if initialized {
                    Ok(())
                } else {
                    guard(|| module.initialize())
                };
                let fatal = matches!(&result, Err(err) if err.fatal);
                if result.is_ok() && !initialized {
                    initialized = true;
                    info!(worker_id = %id, "Module runtime initialized");
                }
                let _ = reply.send(result.map_err(LoadError::Module));
                if fatal {
                    error!(worker_id = %id, "Module initialization failed fatally");
                    break;
                }
            }
            Command::Call {
                function,
                args,
                reply,
            } => {
                if !initialized {
                    let _ = reply.send(Err(CallError::Uninitialized));
                    continue;
                }
                let result = guard(|| module.call(&function, args));
                let fatal = matches!(&result, Err(err) if err.fatal);
                let _ = reply.send(result.map_err(CallError::ModuleThrew));
                if fatal {
                    error!(worker_id = %id, %function, "Module reported a fatal error");
                    break;
                }
            }
            Command::Stream {
                function,
                args,
                callbacks,
            } => {
                if !initialized {
                    callbacks.fail_if_open(
                        ModuleError::new("module is not initialized").with_kind("uninitialized"),
                    );
                    continue;
                }
                if callbacks.is_cancelled() {
                    callbacks.complete_if_open();
                    continue;
                }
                match guard(|| module.stream(&function, args, &callbacks)) {
                    Ok(()) => callbacks.complete_if_open(),
                    Err(err) => {
                        let fatal = err.fatal;
                        callbacks.fail_if_open(err);
                        if fatal {
                            error!(worker_id = %id, %function, "Module reported a fatal error");
                            break;
                        }
                    }
                }
            }
            Command::Terminate => break,
        }
    }
}

/// Run module code, converting a panic into a `ModuleError`
fn guard<T>(f: impl FnOnce() -> Result<T, ModuleError>) -> Result<T, ModuleError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ModuleError::new(panic_message(payload.as_ref())).with_kind("panic")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("module panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("module panicked: {message}")
    } else {
        "module panicked".to_string()
    }
}
