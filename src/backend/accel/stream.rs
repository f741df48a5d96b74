//! In-order device execution stream
//!
//! A stream is a FIFO command queue drained by one worker thread per device.
//! Commands enqueued on the same stream run strictly in submission order;
//! commands on different streams run concurrently and are only ordered
//! through [`DeviceEvent`](super::event::DeviceEvent) dependencies.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};

use crate::backend::accel::error::{DeviceError, DeviceResult};
use crate::backend::accel::event::DeviceEvent;

/// Work item executed on a stream's worker thread
type Command = Box<dyn FnOnce() -> DeviceResult<()> + Send + 'static>;

#[derive(Debug, Default)]
struct ProgressState {
    submitted: u64,
    completed: u64,
    /// First failure observed on this stream. Sticky, like a device error.
    fault: Option<String>,
}

#[derive(Debug, Default)]
struct StreamProgress {
    state: Mutex<ProgressState>,
    drained: Condvar,
}

/// Device stream wrapper
///
/// NOTE: DeviceStream does NOT implement Clone. The worker thread is joined
/// when the stream is dropped, after every queued command has run.
#[derive(Debug)]
pub struct DeviceStream {
    device_id: usize,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    progress: Arc<StreamProgress>,
}

impl DeviceStream {
    /// Create a new stream bound to the device with physical id `device_id`
    pub fn new(device_id: usize) -> DeviceResult<Self> {
        tracing::debug!("DeviceStream::new: Creating stream for device {}", device_id);
        let (sender, receiver) = channel::unbounded::<Command>();
        let progress = Arc::new(StreamProgress::default());

        let worker_progress = Arc::clone(&progress);
        let worker = thread::Builder::new()
            .name(format!("device-{}-stream", device_id))
            .spawn(move || {
                for command in receiver.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(command));
                    let mut state = worker_progress
                        .state
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::error!("device {} stream command failed: {}", device_id, err);
                            state.fault.get_or_insert_with(|| err.to_string());
                        }
                        Err(_) => {
                            tracing::error!("device {} stream command panicked", device_id);
                            state
                                .fault
                                .get_or_insert_with(|| "stream command panicked".to_string());
                        }
                    }
                    state.completed += 1;
                    worker_progress.drained.notify_all();
                }
                tracing::trace!("device {} stream worker exiting", device_id);
            })
            .map_err(|e| {
                DeviceError::InitializationFailed(format!(
                    "Failed to spawn stream worker for device {}: {}",
                    device_id, e
                ))
            })?;

        tracing::debug!("DeviceStream::new: stream for device {} created", device_id);
        Ok(DeviceStream {
            device_id,
            sender: Some(sender),
            worker: Some(worker),
            progress,
        })
    }

    /// Physical id of the device this stream issues on
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Enqueue a command; returns as soon as it is queued
    pub fn enqueue<F>(&self, command: F) -> DeviceResult<()>
    where
        F: FnOnce() -> DeviceResult<()> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or(DeviceError::StreamClosed(self.device_id))?;

        // Count before sending so `completed` can never overtake `submitted`
        self.progress.state.lock()?.submitted += 1;
        if sender.send(Box::new(command)).is_err() {
            self.progress.state.lock()?.submitted -= 1;
            return Err(DeviceError::StreamClosed(self.device_id));
        }
        Ok(())
    }

    /// Make all later work on this stream wait until `event`'s most recent
    /// record has completed. Does not block the calling thread.
    pub fn wait_event(&self, event: &DeviceEvent) -> DeviceResult<()> {
        let ticket = event.ticket()?;
        tracing::trace!(
            "DeviceStream::wait_event: device {} waits on event generation {}",
            self.device_id,
            ticket.target()
        );
        self.enqueue(move || ticket.wait())
    }

    /// Block until every command submitted so far has completed
    pub fn synchronize(&self) -> DeviceResult<()> {
        let mut state = self.progress.state.lock()?;
        let target = state.submitted;
        while state.completed < target {
            state = self.progress.drained.wait(state)?;
        }
        match &state.fault {
            Some(message) => Err(DeviceError::StreamFault {
                device: self.device_id,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Number of commands queued or running
    pub fn pending(&self) -> DeviceResult<u64> {
        let state = self.progress.state.lock()?;
        Ok(state.submitted - state.completed)
    }

    /// True when no command is queued or running
    pub fn is_idle(&self) -> DeviceResult<bool> {
        Ok(self.pending()? == 0)
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("device {} stream worker panicked on shutdown", self.device_id);
            }
        }
    }
}
