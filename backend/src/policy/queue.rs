//! Device lifecycle requests coming from HAL threads.
//!
//! A HAL backend may ask for a device to be loaded, opened, closed or
//! unloaded from any of its own threads. The audio-core graph is owned by the
//! engine thread, so such a request is queued here and the calling thread
//! blocks until the engine thread has applied it.

use crate::error::{AudioResult, HalStatus};
use audio_policy_types::{AudioDeviceInfo, DeviceParam};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Load,
    Open,
    Close,
    CloseAll,
    Unload,
}

impl DeviceEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceEventKind::Load => "load-device",
            DeviceEventKind::Open => "open-device",
            DeviceEventKind::Close => "close-device",
            DeviceEventKind::CloseAll => "close-all-devices",
            DeviceEventKind::Unload => "unload-device",
        }
    }
}

/// Single-slot rendezvous between a producer thread and the engine thread.
#[derive(Debug, Default)]
pub struct Completion {
    result: Mutex<Option<AudioResult>>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result and wake the waiting producer.
    pub fn complete(&self, result: AudioResult) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.cond.notify_all();
    }

    /// Block until [`Completion::complete`] was called. No timeout.
    pub fn wait(&self) -> AudioResult {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.cond.wait(&mut slot);
        }
    }
}

/// One queued lifecycle request.
#[derive(Debug)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    /// `None` only for [`DeviceEventKind::CloseAll`]
    pub device: Option<AudioDeviceInfo>,
    pub params: Vec<DeviceParam>,
    pub completion: Option<Arc<Completion>>,
}

/// FIFO of device events plus the "armed" flag of the engine's drain source.
#[derive(Debug, Default)]
pub struct DeviceEventQueue {
    events: Mutex<VecDeque<DeviceEvent>>,
    armed: AtomicBool,
    notify: Notify,
}

impl DeviceEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` and arm the drain source.
    pub fn push(&self, event: DeviceEvent) {
        self.events.lock().push_back(event);
        self.armed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Take the oldest event. Disarms the drain source once the queue is empty.
    pub fn pop(&self) -> Option<DeviceEvent> {
        let mut events = self.events.lock();
        let event = events.pop_front();
        if events.is_empty() {
            self.armed.store(false, Ordering::SeqCst);
        }
        event
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Resolves once an event was pushed since the last call.
    pub async fn armed(&self) {
        self.notify.notified().await
    }
}

/// Entry points handed to the HAL through `set_callback`.
#[derive(Debug, Clone)]
pub struct DeviceCallbacks {
    queue: Arc<DeviceEventQueue>,
    main_thread: ThreadId,
}

impl DeviceCallbacks {
    pub fn new(queue: Arc<DeviceEventQueue>, main_thread: ThreadId) -> Self {
        Self { queue, main_thread }
    }

    pub fn load_device(&self, device: AudioDeviceInfo, params: Vec<DeviceParam>) -> AudioResult {
        self.submit(DeviceEventKind::Load, Some(device), params)
    }

    pub fn open_device(&self, device: AudioDeviceInfo, params: Vec<DeviceParam>) -> AudioResult {
        self.submit(DeviceEventKind::Open, Some(device), params)
    }

    pub fn close_all_devices(&self) -> AudioResult {
        self.submit(DeviceEventKind::CloseAll, None, Vec::new())
    }

    pub fn close_device(&self, device: AudioDeviceInfo) -> AudioResult {
        self.submit(DeviceEventKind::Close, Some(device), Vec::new())
    }

    pub fn unload_device(&self, device: AudioDeviceInfo) -> AudioResult {
        self.submit(DeviceEventKind::Unload, Some(device), Vec::new())
    }

    fn submit(
        &self,
        kind: DeviceEventKind,
        device: Option<AudioDeviceInfo>,
        params: Vec<DeviceParam>,
    ) -> AudioResult {
        if std::thread::current().id() == self.main_thread {
            // The engine is busy with the call that led here; it drains the
            // queue as soon as that call returns.
            debug!("{} is called within the engine thread", kind.as_str());
            self.queue.push(DeviceEvent {
                kind,
                device,
                params,
                completion: None,
            });
            return Ok(HalStatus::Ok);
        }

        debug!("{} is called within thread", kind.as_str());
        let completion = Arc::new(Completion::new());
        self.queue.push(DeviceEvent {
            kind,
            device,
            params,
            completion: Some(completion.clone()),
        });
        let result = completion.wait();
        info!("{} is finished within thread", kind.as_str());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_policy_types::Direction;
    use std::time::Duration;

    #[test]
    fn test_pop_disarms_when_empty() {
        let queue = DeviceEventQueue::new();
        for kind in [DeviceEventKind::Load, DeviceEventKind::Open] {
            queue.push(DeviceEvent {
                kind,
                device: None,
                params: Vec::new(),
                completion: None,
            });
        }
        assert!(queue.is_armed());
        assert_eq!(queue.pop().map(|e| e.kind), Some(DeviceEventKind::Load));
        assert!(queue.is_armed());
        assert_eq!(queue.pop().map(|e| e.kind), Some(DeviceEventKind::Open));
        assert!(!queue.is_armed());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_worker_blocks_until_completed() {
        let queue = Arc::new(DeviceEventQueue::new());
        let callbacks = DeviceCallbacks::new(queue.clone(), std::thread::current().id());

        let worker = std::thread::spawn(move || {
            callbacks.close_device(AudioDeviceInfo::alsa(Direction::Out, 0, 0))
        });

        // Wait for the worker to enqueue
        while queue.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!worker.is_finished());

        let event = queue.pop().unwrap();
        assert_eq!(event.kind, DeviceEventKind::Close);
        event.completion.unwrap().complete(Ok(HalStatus::Ok));

        assert_eq!(worker.join().unwrap(), Ok(HalStatus::Ok));
    }

    #[test]
    fn test_main_thread_does_not_block() {
        let queue = Arc::new(DeviceEventQueue::new());
        let callbacks = DeviceCallbacks::new(queue.clone(), std::thread::current().id());
        assert_eq!(callbacks.close_all_devices(), Ok(HalStatus::Ok));
        let event = queue.pop().unwrap();
        assert_eq!(event.kind, DeviceEventKind::CloseAll);
        assert!(event.completion.is_none());
    }
}
