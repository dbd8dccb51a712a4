//! Execution controller — compile, run, supervise, kill, join.
//!
//! `execute` runs guest source on a dedicated worker thread and supervises
//! it from the caller's thread. The lifecycle is:
//!
//! 1. Reset the governor and reject oversized or non-text source
//! 2. Poll limits once (an expired deadline never spawns a worker)
//! 3. Spawn a scoped worker that compiles, then runs, posting [`RunEvent`]s
//! 4. Wake on every event or poll tick; on a breach, halt the bridge and
//!    interrupt the engine
//! 5. Join the worker (always) and fold everything into a [`ValueTuple`]

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use gasvm_hostapi::TransferBuffer;
use tracing::{debug, info, warn};

use crate::engine::{GuestContext, GuestFailure, GuestValue, RunTicket, ScriptEngine};
use crate::governor::{Breach, Governor};
use crate::sandbox::Sandbox;
use crate::value::{Deadline, ErrorKind, ValueTuple};

/// Where an execution is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Ready,
    Compiling,
    Running,
    Completed,
    Failed,
    Killed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Compiling => "compiling",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Messages from the worker (and the governor) to the supervisor.
pub(crate) enum RunEvent {
    Compiled,
    Finished(Result<GuestValue, GuestFailure>),
    Breach,
}

/// A kill issued by the supervisor.
struct Kill {
    reason: Breach,
    at: Instant,
    gas_used: u64,
}

/// What the supervisor saw before joining.
struct Supervised {
    finished: Option<Result<GuestValue, GuestFailure>>,
    kill: Option<Kill>,
    panic: Option<String>,
}

/// Execute `source` in `sandbox` under its gas, memory, and deadline limits.
///
/// Never returns early with the worker still running, and never panics on
/// guest misbehavior: every outcome is a [`ValueTuple`].
pub fn execute<E: ScriptEngine>(
    sandbox: &mut Sandbox<'_, E>,
    source: TransferBuffer,
    deadline: Deadline,
) -> ValueTuple {
    let started = Instant::now();
    let id = sandbox.id();
    let config = sandbox.config().clone();
    let governor = sandbox.governor().clone();

    governor.reset(config.gas_limit, config.mem_limit, config.memory_check_interval);
    debug!(
        sandbox = %id,
        state = %ExecutionState::Ready,
        gas_limit = config.gas_limit,
        mem_limit = config.mem_limit,
        "execute"
    );

    if source.len() > config.max_source_len {
        let message = format!(
            "source too large: {} bytes exceeds limit of {}",
            source.len(),
            config.max_source_len
        );
        return finish(id, started, ValueTuple::failed(ErrorKind::Compile, message, 0));
    }
    if E::TEXT_SOURCE && source.as_str().is_err() {
        return finish(
            id,
            started,
            ValueTuple::failed(ErrorKind::Compile, "source is not valid UTF-8", 0),
        );
    }
    if let Some(reason) = poll(&governor, &deadline) {
        warn!(sandbox = %id, reason = %reason, "killed before start");
        return finish(
            id,
            started,
            ValueTuple::failed(reason.error_kind(), reason.message(), governor.gas_used()),
        );
    }

    let ticket = RunTicket::next();
    let (tx, rx) = mpsc::channel();
    governor.arm(tx.clone());

    let context = sandbox.context();
    let tag = config.source_tag.as_str();
    let source = source.as_bytes();

    let supervised = thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name(format!("gasvm-worker-{}", id.0))
            .stack_size(sandbox.worker_stack_size())
            .spawn_scoped(scope, move || {
                let script = match context.compile(tag, source) {
                    Ok(script) => script,
                    Err(failure) => {
                        let _ = tx.send(RunEvent::Finished(Err(failure)));
                        return;
                    }
                };
                let _ = tx.send(RunEvent::Compiled);
                let _ = tx.send(RunEvent::Finished(context.run(script, ticket)));
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                return Supervised {
                    finished: Some(Err(GuestFailure::Internal(format!(
                        "failed to spawn worker: {}",
                        e
                    )))),
                    kill: None,
                    panic: None,
                }
            }
        };

        let mut state = ExecutionState::Compiling;
        let mut finished = None;
        let mut kill: Option<Kill> = None;

        debug!(sandbox = %id, state = %state, "worker started");
        loop {
            match rx.recv_timeout(config.poll_interval) {
                Ok(RunEvent::Compiled) => {
                    state = ExecutionState::Running;
                    debug!(
                        sandbox = %id,
                        state = %state,
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "compiled"
                    );
                }
                Ok(RunEvent::Finished(result)) => {
                    finished = Some(result);
                    break;
                }
                Ok(RunEvent::Breach) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            match &kill {
                None => {
                    if let Some(reason) = poll(&governor, &deadline) {
                        let gas_used = governor.gas_used();
                        warn!(
                            sandbox = %id,
                            reason = %reason,
                            gas_used,
                            state = %state,
                            "killing guest"
                        );
                        governor.halt(reason);
                        context.interrupt(ticket);
                        kill = Some(Kill {
                            reason,
                            at: Instant::now(),
                            gas_used,
                        });
                    }
                }
                // Keep nudging until the worker reaches a checkpoint.
                Some(_) => context.interrupt(ticket),
            }

            if worker.is_finished() {
                while let Ok(event) = rx.try_recv() {
                    if let RunEvent::Finished(result) = event {
                        finished = Some(result);
                    }
                }
                break;
            }
        }

        let panic = worker.join().err().map(|payload| panic_message(payload.as_ref()));

        if let Some(kill) = &kill {
            let latency = kill.at.elapsed();
            if latency > config.kill_grace {
                warn!(
                    sandbox = %id,
                    latency_us = latency.as_micros() as u64,
                    grace_us = config.kill_grace.as_micros() as u64,
                    "kill latency exceeded grace period"
                );
            } else {
                debug!(sandbox = %id, latency_us = latency.as_micros() as u64, "worker stopped");
            }
        }

        Supervised {
            finished,
            kill,
            panic,
        }
    });

    governor.disarm();
    let result = conclude(&governor, supervised);
    finish(id, started, result)
}

/// The breach that should stop the run now, if any.
fn poll(governor: &Governor, deadline: &Deadline) -> Option<Breach> {
    governor.breach().or_else(|| {
        if deadline.is_expired() {
            Some(Breach::Deadline)
        } else {
            None
        }
    })
}

fn conclude(governor: &Governor, supervised: Supervised) -> ValueTuple {
    // An in-flight host call may still have charged after the kill.
    let gas_used = governor.gas_used();
    let killed = |reason: Breach, gas: u64| {
        ValueTuple::failed(reason.error_kind(), reason.message(), gas.max(gas_used))
    };

    if let Some(kill) = supervised.kill {
        return killed(kill.reason, kill.gas_used);
    }
    if let Some(message) = supervised.panic {
        return ValueTuple::failed(
            ErrorKind::Internal,
            format!("worker panicked: {}", message),
            gas_used,
        );
    }

    match supervised.finished {
        // A breached run never reports success.
        Some(_) if governor.breach().is_some() => {
            let reason = governor.breach().unwrap_or(Breach::Gas);
            killed(reason, gas_used)
        }
        Some(Ok(value)) => ValueTuple::completed(value.data, value.is_json, gas_used),
        Some(Err(failure)) => failed(failure, gas_used),
        None => ValueTuple::failed(
            ErrorKind::Internal,
            "worker exited without a result",
            gas_used,
        ),
    }
}

fn failed(failure: GuestFailure, gas_used: u64) -> ValueTuple {
    match failure {
        GuestFailure::Compile(diag) => ValueTuple::failed(ErrorKind::Compile, diag.render(), gas_used),
        GuestFailure::Exception(diag) => {
            ValueTuple::failed(ErrorKind::GuestException, diag.render(), gas_used)
        }
        GuestFailure::OutOfMemory => ValueTuple::failed(
            Breach::Memory.error_kind(),
            Breach::Memory.message(),
            gas_used,
        ),
        GuestFailure::Interrupted => {
            ValueTuple::failed(ErrorKind::Internal, "execution interrupted", gas_used)
        }
        GuestFailure::Internal(message) => ValueTuple::failed(ErrorKind::Internal, message, gas_used),
    }
}

fn finish(id: gasvm_hostapi::SandboxId, started: Instant, result: ValueTuple) -> ValueTuple {
    let elapsed_us = elapsed_us(started.elapsed());
    match result.error_kind() {
        None => info!(
            sandbox = %id,
            state = %ExecutionState::Completed,
            gas_used = result.gas_used(),
            elapsed_us,
            is_json = result.is_json(),
            "execution finished"
        ),
        Some(kind) => {
            let state = if kind.is_kill() {
                ExecutionState::Killed
            } else {
                ExecutionState::Failed
            };
            info!(
                sandbox = %id,
                state = %state,
                kind = %kind,
                gas_used = result.gas_used(),
                elapsed_us,
                "execution finished"
            );
        }
    }
    result
}

fn elapsed_us(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostic;
    use crate::engine::AllocatorGauge;
    use crate::value::Resource;
    use std::sync::Arc;

    fn supervised(finished: Option<Result<GuestValue, GuestFailure>>) -> Supervised {
        Supervised {
            finished,
            kill: None,
            panic: None,
        }
    }

    fn governor(gas_limit: u64) -> Governor {
        Governor::new(Arc::new(AllocatorGauge::default()), gas_limit, 1_000, 10)
    }

    #[test]
    fn test_completed_value() {
        let gov = governor(100);
        gov.charge(5).unwrap();
        let result = conclude(&gov, supervised(Some(Ok(GuestValue::json(r#"{"a":1}"#)))));
        assert_eq!(result.value(), Some(r#"{"a":1}"#));
        assert!(result.is_json());
        assert_eq!(result.gas_used(), 5);
    }

    #[test]
    fn test_value_over_budget_is_killed() {
        let gov = governor(0);
        gov.charge(3).unwrap_err();
        let result = conclude(&gov, supervised(Some(Ok(GuestValue::text("done")))));
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded(Resource::Gas)));
        assert_eq!(result.error(), Some("out of gas"));
        assert_eq!(result.gas_used(), 3);
    }

    #[test]
    fn test_kill_wins_over_late_value() {
        let gov = governor(100);
        let result = conclude(
            &gov,
            Supervised {
                finished: Some(Ok(GuestValue::text("late"))),
                kill: Some(Kill {
                    reason: Breach::Deadline,
                    at: Instant::now(),
                    gas_used: 0,
                }),
                panic: None,
            },
        );
        assert_eq!(result.error_kind(), Some(ErrorKind::DeadlineExceeded));
        assert_eq!(result.error(), Some("execution killed: deadline exceeded"));
    }

    #[test]
    fn test_exception_renders_diagnostic() {
        let gov = governor(100);
        let diag = Diagnostic::new("Error: boom")
            .with_tag("contract.js")
            .with_location(Some(3), None);
        let result = conclude(&gov, supervised(Some(Err(GuestFailure::Exception(diag)))));
        assert_eq!(result.error_kind(), Some(ErrorKind::GuestException));
        assert!(result.error().unwrap().contains("contract.js:3"));
    }

    #[test]
    fn test_panic_is_internal() {
        let gov = governor(100);
        let result = conclude(
            &gov,
            Supervised {
                finished: None,
                kill: None,
                panic: Some("boom".into()),
            },
        );
        assert_eq!(result.error_kind(), Some(ErrorKind::Internal));
        assert_eq!(result.error(), Some("worker panicked: boom"));
    }

    #[test]
    fn test_poll_reports_expired_deadline() {
        let gov = governor(100);
        let past = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert_eq!(poll(&gov, &past), Some(Breach::Deadline));
        let future = Deadline::after(Duration::from_secs(5));
        assert_eq!(poll(&gov, &future), None);
    }
}
