//! Device event for cross-stream ordering and host synchronization

use std::sync::{Arc, Condvar, Mutex};

use crate::backend::accel::error::DeviceResult;
use crate::backend::accel::stream::DeviceStream;

#[derive(Debug, Default)]
struct EventProgress {
    /// Generation handed out by the latest `record`
    recorded: u64,
    /// Highest generation whose marker has executed
    completed: u64,
}

#[derive(Debug, Default)]
struct EventState {
    progress: Mutex<EventProgress>,
    signaled: Condvar,
}

impl EventState {
    fn complete(&self, generation: u64) -> DeviceResult<()> {
        let mut progress = self.progress.lock()?;
        progress.completed = progress.completed.max(generation);
        self.signaled.notify_all();
        Ok(())
    }

    fn wait_for(&self, generation: u64) -> DeviceResult<()> {
        let mut progress = self.progress.lock()?;
        while progress.completed < generation {
            progress = self.signaled.wait(progress)?;
        }
        Ok(())
    }
}

/// Device event
///
/// Events capture a point in a stream. A host thread can block on that point
/// with [`synchronize`](Self::synchronize), another stream can be made to
/// wait on it with [`DeviceStream::wait_event`]. Re-recording moves the
/// captured point; waits already enqueued keep the generation they saw.
#[derive(Debug, Default)]
pub struct DeviceEvent {
    inner: Arc<EventState>,
}

/// A snapshot of an event's latest generation, waitable from any thread
#[derive(Debug)]
pub(crate) struct EventTicket {
    state: Arc<EventState>,
    target: u64,
}

impl EventTicket {
    pub(crate) fn target(&self) -> u64 {
        self.target
    }

    pub(crate) fn wait(self) -> DeviceResult<()> {
        self.state.wait_for(self.target)
    }
}

impl DeviceEvent {
    /// Create a new event. A never-recorded event counts as complete.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this event in the given stream
    ///
    /// Future calls to `synchronize()` wait until all operations enqueued
    /// on `stream` before this call have completed.
    pub fn record(&self, stream: &DeviceStream) -> DeviceResult<()> {
        let generation = {
            let mut progress = self.inner.progress.lock()?;
            progress.recorded += 1;
            progress.recorded
        };
        tracing::trace!(
            "DeviceEvent::record: generation {} on device {}",
            generation,
            stream.device_id()
        );

        let state = Arc::clone(&self.inner);
        if let Err(err) = stream.enqueue(move || state.complete(generation)) {
            // The marker will never run; release anyone who would wait on it
            self.inner.complete(generation)?;
            return Err(err);
        }
        Ok(())
    }

    /// Block the host until the most recent record has completed
    pub fn synchronize(&self) -> DeviceResult<()> {
        self.ticket()?.wait()
    }

    /// True if the most recent record has completed
    pub fn query(&self) -> DeviceResult<bool> {
        let progress = self.inner.progress.lock()?;
        Ok(progress.completed >= progress.recorded)
    }

    pub(crate) fn ticket(&self) -> DeviceResult<EventTicket> {
        let target = self.inner.progress.lock()?.recorded;
        Ok(EventTicket {
            state: Arc::clone(&self.inner),
            target,
        })
    }
}
