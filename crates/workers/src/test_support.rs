//! Scriptable computation module for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::module::{ComputationModule, ModuleEntry, ModuleError, Payload};
use crate::stream::StreamCallbacks;

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicUsize,
    inits: AtomicUsize,
    drops: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
struct Behaviour {
    load_delay: Option<Duration>,
    init_delay: Option<Duration>,
    failing_load: bool,
    panicking_load: bool,
    /// Fail the init attempt with this index (counted across all instances)
    failing_init_at: Option<usize>,
    failing_init: bool,
}

/// Entry point for [`EchoModule`], counting loads, inits and drops
#[derive(Debug, Clone, Default)]
pub(crate) struct EchoEntry {
    behaviour: Behaviour,
    counters: Arc<Counters>,
}

impl EchoEntry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_load_delay(mut self, delay: Duration) -> Self {
        self.behaviour.load_delay = Some(delay);
        self
    }

    pub(crate) fn with_init_delay(mut self, delay: Duration) -> Self {
        self.behaviour.init_delay = Some(delay);
        self
    }

    pub(crate) fn failing_load(mut self) -> Self {
        self.behaviour.failing_load = true;
        self
    }

    pub(crate) fn panicking_load(mut self) -> Self {
        self.behaviour.panicking_load = true;
        self
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.behaviour.failing_init = true;
        self
    }

    pub(crate) fn failing_init_at(mut self, attempt: usize) -> Self {
        self.behaviour.failing_init_at = Some(attempt);
        self
    }

    pub(crate) fn shared(&self) -> Arc<dyn ModuleEntry> {
        Arc::new(self.clone())
    }

    pub(crate) fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn inits(&self) -> usize {
        self.counters.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn drops(&self) -> usize {
        self.counters.drops.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` module instances were dropped
    pub(crate) async fn wait_for_drops(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.drops() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl ModuleEntry for EchoEntry {
    fn name(&self) -> &str {
        "echo"
    }

    fn load(&self) -> Result<Box<dyn ComputationModule>, ModuleError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behaviour.load_delay {
            std::thread::sleep(delay);
        }
        if self.behaviour.panicking_load {
            panic!("load exploded");
        }
        if self.behaviour.failing_load {
            return Err(ModuleError::new("module binary missing").with_kind("load"));
        }
        Ok(Box::new(EchoModule {
            behaviour: self.behaviour.clone(),
            counters: Arc::clone(&self.counters),
            served: 0,
        }))
    }
}

/// Test module
///
/// Calls: `echo`, `fail` (recoverable), `panic`, `crash` (fatal),
/// `sleep` (millis in args, echoes args), `record` (calls served before this one).
///
/// Streams: `count_to` (1..=n), `emit_then_fail`, `return_without_complete`.
struct EchoModule {
    behaviour: Behaviour,
    counters: Arc<Counters>,
    served: usize,
}

impl ComputationModule for EchoModule {
    fn initialize(&mut self) -> Result<(), ModuleError> {
        let attempt = self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behaviour.init_delay {
            std::thread::sleep(delay);
        }
        if self.behaviour.failing_init || self.behaviour.failing_init_at == Some(attempt) {
            return Err(ModuleError::new("runtime refused to start").with_kind("init"));
        }
        Ok(())
    }

    fn call(&mut self, function: &str, args: Payload) -> Result<Payload, ModuleError> {
        let served = self.served;
        self.served += 1;

        match function {
            "echo" => Ok(args),
            "fail" => Err(ModuleError::new("requested failure").with_kind("test")),
            "panic" => panic!("requested panic"),
            "crash" => Err(ModuleError::fatal("requested crash")),
            "sleep" => {
                let millis = args.as_text().and_then(|s| s.parse().ok()).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(millis));
                Ok(args)
            }
            "record" => Ok(Payload::text(served.to_string())),
            other => Err(ModuleError::unknown_function(other)),
        }
    }

    fn stream(
        &mut self,
        function: &str,
        args: Payload,
        callbacks: &StreamCallbacks,
    ) -> Result<(), ModuleError> {
        match function {
            "count_to" => {
                let n: usize = args.as_text().and_then(|s| s.parse().ok()).unwrap_or(0);
                for i in 1..=n {
                    if !callbacks.on_item(i.to_string()) {
                        break;
                    }
                }
                callbacks.on_complete();
                Ok(())
            }
            "emit_then_fail" => {
                callbacks.on_item("1");
                Err(ModuleError::new("stream broke").with_kind("test"))
            }
            "return_without_complete" => {
                callbacks.on_item("a");
                Ok(())
            }
            other => Err(ModuleError::unknown_function(other)),
        }
    }
}

impl Drop for EchoModule {
    fn drop(&mut self) {
        self.counters.drops.fetch_add(1, Ordering::SeqCst);
    }
}
