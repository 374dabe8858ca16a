//! Background task dispatch.
//!
//! Every player command runs as one task on a [`TaskPool`]. The pool bounds
//! how many commands run at once and wires each task's failure path into the
//! exception funnel:
//!
//! - `Ok(())` is logged at debug level
//! - `Err(e)` is logged and published as [`CoreEvent::Exception`]
//! - a panic is caught at the join point, logged, and published as
//!   `UnknownError`
//!
//! [`InFlight`] flags implement drop-duplicate semantics: a command that
//! arrives while its predecessor holds the flag is ignored, not queued.
//! Station loads are the exception and wait for the slot.

use crate::error::{CoreError, Result};
use core_runtime::events::{CoreEvent, EventBus, ExceptionEvent};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Bounded pool for background commands.
#[derive(Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    bus: EventBus,
}

impl TaskPool {
    pub fn new(workers: usize, bus: EventBus) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            bus,
        }
    }

    /// Number of idle workers.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` once a worker is free. Returns immediately.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatch(name, task, Some(self.permits.clone()))
    }

    /// Like [`TaskPool::spawn`] but outside the worker bound.
    ///
    /// Used for playlist refills, which a command holding a worker may be
    /// waiting on.
    pub fn spawn_unbounded<F>(&self, name: &'static str, task: F) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatch(name, task, None)
    }

    fn dispatch<F>(&self, name: &'static str, task: F, permits: Option<Arc<Semaphore>>) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let bus = self.bus.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            match tokio::spawn(task).await {
                Ok(Ok(())) => debug!(task = name, "Task finished"),
                Ok(Err(err)) => {
                    warn!(task = name, code = %err.fault_code(), error = %err, "Task failed");
                    report(&bus, &err);
                }
                Err(join) if join.is_panic() => {
                    let err = CoreError::TaskPanicked(panic_message(join.into_panic().as_ref()));
                    error!(task = name, error = %err, "Task panicked");
                    report(&bus, &err);
                }
                Err(_) => debug!(task = name, "Task cancelled"),
            }
        });

        TaskHandle(Some(handle))
    }
}

/// Publish `err` on the exception funnel.
pub fn report(bus: &EventBus, err: &CoreError) {
    let code = err.fault_code();
    let _ = bus.emit(CoreEvent::Exception(ExceptionEvent {
        code: code.as_u32(),
        message: err.user_message(),
        hard_fail: code.is_hard_fail(),
    }));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a dispatched command.
///
/// Dropping it does not cancel the command. Commands dropped by an in-flight
/// guard get an empty handle.
#[derive(Debug, Default)]
pub struct TaskHandle(Option<JoinHandle<()>>);

impl TaskHandle {
    pub(crate) fn skipped() -> Self {
        Self(None)
    }

    /// False when the command was dropped without running.
    pub fn was_dispatched(&self) -> bool {
        self.0.is_some()
    }

    /// Wait for the command to finish. Failures were already reported.
    pub async fn wait(self) {
        if let Some(handle) = self.0 {
            let _ = handle.await;
        }
    }
}

/// Single-slot in-flight flag.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl InFlight {
    /// Claim the slot, or `None` while another holder is active.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
                released: self.released.clone(),
            })
    }

    /// Claim the slot, waiting for the current holder to let go.
    pub async fn acquire(&self) -> FlightGuard {
        loop {
            let released = self.released.notified();
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            released.await;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its [`InFlight`] slot on drop.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_playback::PlaybackError;
    use core_session::FaultCode;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let flag = InFlight::default();
        let guard = flag.try_acquire().unwrap();
        assert!(flag.try_acquire().is_none());
        assert!(flag.is_busy());

        drop(guard);
        assert!(flag.try_acquire().is_some());
    }

    #[tokio::test]
    async fn waiting_acquire_gets_the_released_slot() {
        let flag = InFlight::default();
        let guard = flag.try_acquire().unwrap();

        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move {
                let _guard = flag.acquire().await;
            }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!flag.is_busy());
    }

    #[tokio::test]
    async fn failed_task_is_reported() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let pool = TaskPool::new(2, bus);

        pool.spawn("fail", async { Err(PlaybackError::EndOfPlaylist.into()) })
            .wait()
            .await;

        match rx.recv().await.unwrap() {
            CoreEvent::Exception(event) => {
                assert_eq!(event.code, FaultCode::EndOfPlaylist.as_u32());
                assert!(!event.hard_fail);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn panicking_task_is_reported_as_unknown() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let pool = TaskPool::new(1, bus);

        pool.spawn("panic", async { panic!("worker exploded") })
            .wait()
            .await;

        match rx.recv().await.unwrap() {
            CoreEvent::Exception(event) => {
                assert_eq!(event.code, FaultCode::UnknownError.as_u32());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // the worker survives
        assert_eq!(pool.available(), 1);
    }
}
