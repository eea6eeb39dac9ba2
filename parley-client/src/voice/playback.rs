//! Playback scheduler
//!
//! Inbound audio chunks arrive in bursts faster than real time. Each chunk is
//! placed on the output clock immediately after the previous one so playback
//! is gapless, and the scheduler remembers every in-flight buffer so a
//! barge-in can silence all of them at once.
//!
//! The live set and the `next_start_time` cursor share one mutex because the
//! output device reports completions from its own realtime thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_common::AudioFrame;

use super::device::{OutputBuffer, PlaybackDevice, PlaybackId};
use crate::error::SchedulingError;

/// One buffer scheduled on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    /// Start time in output clock seconds
    pub start_time: f64,
    /// Length in seconds
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[derive(Debug)]
struct SchedulerState {
    live: HashMap<PlaybackId, PlaybackHandle>,
    next_start_time: f64,
}

/// Schedules decoded frames back to back on an output device
pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    state: Arc<Mutex<SchedulerState>>,
    closed: bool,
}

impl PlaybackScheduler {
    /// Take ownership of `device` and register for its completion callbacks
    pub fn new(mut device: Box<dyn PlaybackDevice>) -> Self {
        let state = Arc::new(Mutex::new(SchedulerState {
            live: HashMap::new(),
            next_start_time: device.current_time(),
        }));

        let weak = Arc::downgrade(&state);
        device.set_completion_callback(Arc::new(move |id| {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.live.remove(&id);
            }
        }));

        Self {
            device,
            state,
            closed: false,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.device.current_time()
    }

    /// Point the cursor at "now"
    ///
    /// Called when the session opens so the first chunk plays immediately.
    pub fn reset_cursor(&self) {
        let mut state = self.lock_state();
        state.next_start_time = self.device.current_time();
    }

    /// Schedule a decoded frame right after everything already queued
    ///
    /// If the cursor has fallen behind the clock (the queue ran dry), the
    /// frame starts now instead of in the past. Empty frames are skipped and
    /// return `Ok(None)`.
    pub fn schedule_playback(
        &self,
        frame: &AudioFrame,
    ) -> Result<Option<PlaybackHandle>, SchedulingError> {
        if self.closed {
            return Err(SchedulingError::DeviceClosed);
        }

        let buffer = OutputBuffer::from_frame(frame);
        if buffer.is_empty() {
            return Ok(None);
        }
        let duration = buffer.duration();

        let mut state = self.lock_state();
        let mut start_time = state.next_start_time.max(self.device.current_time());

        let id = match self.device.schedule_at(&buffer, start_time) {
            Ok(id) => id,
            Err(SchedulingError::InPast { start, now }) => {
                // The clock moved between reading it and scheduling
                tracing::debug!(start, now, "start time slipped behind clock, retrying");
                start_time = now.max(self.device.current_time());
                self.device.schedule_at(&buffer, start_time)?
            }
            Err(e) => return Err(e),
        };

        let handle = PlaybackHandle {
            id,
            start_time,
            duration,
        };
        state.live.insert(id, handle);
        state.next_start_time = start_time + duration;

        Ok(Some(handle))
    }

    /// Stop everything in flight and move the cursor to the current clock
    ///
    /// Returns the number of buffers cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock_state();
        for id in state.live.keys() {
            self.device.cancel(*id);
        }
        let cancelled = state.live.len();
        state.live.clear();
        state.next_start_time = self.device.current_time();
        cancelled
    }

    /// Cancel pending audio and release the output device
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending playback on close");
        }
        self.device.close();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Where the next chunk will start on the output clock
    pub fn next_start_time(&self) -> f64 {
        self.lock_state().next_start_time
    }

    /// Number of buffers scheduled but not yet finished
    pub fn live_count(&self) -> usize {
        self.lock_state().live.len()
    }

    /// In-flight buffers ordered by start time
    pub fn live_handles(&self) -> Vec<PlaybackHandle> {
        let mut handles: Vec<PlaybackHandle> = self.lock_state().live.values().copied().collect();
        handles.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        handles
    }

    pub fn check_error(&self) -> Option<String> {
        self.device.check_error()
    }
}
