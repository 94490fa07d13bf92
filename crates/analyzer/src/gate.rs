//! Safe-enable barrier.
//!
//! Pipeline passes enter the gate concurrently. Swapping an algorithm waits
//! until no pass is in flight and keeps new passes out until it is done.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{EngineError, EngineResult};

#[derive(Debug, Default)]
struct GateState {
    running: usize,
    enabling: bool,
}

#[derive(Debug, Default)]
pub struct PassGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Held for the duration of one pipeline pass
#[must_use]
pub struct PassGuard<'a> {
    gate: &'a PassGate,
}

/// Held while a handle swap is in progress
#[must_use]
pub struct EnableGuard<'a> {
    gate: &'a PassGate,
}

impl PassGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter a pass, waiting for an in-progress swap to finish
    pub fn begin_pass(&self) -> PassGuard<'_> {
        let state = self.lock();
        let mut state = self
            .changed
            .wait_while(state, |s| s.enabling)
            .unwrap_or_else(PoisonError::into_inner);
        state.running += 1;
        PassGuard { gate: self }
    }

    /// Block new passes and wait for in-flight ones to drain
    ///
    /// # Errors
    /// `EngineError::Timeout` when the passes do not drain within `timeout`;
    /// the gate is left open again in that case.
    pub fn begin_enable(&self, timeout: Duration) -> EngineResult<EnableGuard<'_>> {
        let started = Instant::now();
        let timed_out = || EngineError::Timeout {
            op: "enable_algo",
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let state = self.lock();
        let (mut state, wait) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.enabling)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            return Err(timed_out());
        }
        state.enabling = true;

        let remaining = timeout.saturating_sub(started.elapsed());
        let (mut state, wait) = self
            .changed
            .wait_timeout_while(state, remaining, |s| s.running > 0)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            state.enabling = false;
            drop(state);
            self.changed.notify_all();
            return Err(timed_out());
        }
        Ok(EnableGuard { gate: self })
    }

    /// Passes currently in flight
    pub fn in_flight(&self) -> usize {
        self.lock().running
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.running -= 1;
        if state.running == 0 {
            drop(state);
            self.gate.changed.notify_all();
        }
    }
}

impl Drop for EnableGuard<'_> {
    fn drop(&mut self) {
        self.gate.lock().enabling = false;
        self.gate.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_enable_waits_for_running_pass() {
        let gate = Arc::new(PassGate::new());
        let pass = gate.begin_pass();
        assert_eq!(gate.in_flight(), 1);

        let err = gate.begin_enable(Duration::from_millis(20)).err().unwrap();
        assert!(matches!(err, EngineError::Timeout { op: "enable_algo", .. }));

        // a timed out enable leaves the gate usable
        let second = gate.begin_pass();
        drop(second);
        drop(pass);
        assert!(gate.begin_enable(Duration::from_millis(20)).is_ok());
    }

    #[test]
    fn test_pass_blocked_while_enabling() {
        let gate = Arc::new(PassGate::new());
        let guard = gate.begin_enable(Duration::from_millis(50)).unwrap();

        let worker_gate = gate.clone();
        let worker = thread::spawn(move || {
            let _pass = worker_gate.begin_pass();
            Instant::now()
        });

        thread::sleep(Duration::from_millis(30));
        let released = Instant::now();
        drop(guard);
        let entered = worker.join().unwrap();
        assert!(entered >= released);
        assert_eq!(gate.in_flight(), 0);
    }
}
