// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

/// Paces the frame loop against the wall clock. The deadline advances
/// by one frame duration per frame; when the emulator falls behind or
/// jumps ahead by more than the resync threshold (warp toggles, host
/// suspends), the timer is restarted instead of trying to catch up.
pub struct FramePacer {
    frame_duration: Duration,
    target: Instant,
    warp: bool,
}

const EARLY_WAKEUP: Duration = Duration::from_micros(1500);
const RESYNC_THRESHOLD: Duration = Duration::from_millis(200);

impl FramePacer {
    pub fn new(frame_duration_ns: u64) -> Self {
        let frame_duration = Duration::from_nanos(frame_duration_ns);
        Self {
            frame_duration,
            target: Instant::now() + frame_duration,
            warp: false,
        }
    }

    pub fn is_warp(&self) -> bool {
        self.warp
    }

    pub fn set_warp(&mut self, warp: bool) {
        if self.warp && !warp {
            self.restart();
        }
        self.warp = warp;
    }

    pub fn restart(&mut self) {
        self.target = Instant::now() + self.frame_duration;
    }

    /// Block until the deadline for the current frame. Wake-ups earlier
    /// than the early wakeup margin go back to sleep.
    pub fn synchronize(&mut self) {
        if self.warp {
            return;
        }
        let now = Instant::now();
        let behind = now.checked_duration_since(self.target);
        if let Some(drift) = behind {
            if drift > RESYNC_THRESHOLD {
                debug!(target: "c64", "Frame timing lost by {:?}, resynchronizing", drift);
                self.restart();
                return;
            }
        } else if self.target.duration_since(now) > RESYNC_THRESHOLD + self.frame_duration {
            debug!(target: "c64", "Frame deadline too far ahead, resynchronizing");
            self.restart();
            return;
        }
        loop {
            let now = Instant::now();
            if now >= self.target {
                break;
            }
            let remaining = self.target - now;
            if remaining > EARLY_WAKEUP {
                thread::sleep(remaining - EARLY_WAKEUP);
            } else {
                thread::sleep(remaining);
            }
        }
        self.target += self.frame_duration;
    }
}
