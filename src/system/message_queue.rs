// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

/// Notifications from the emulation core to the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    ReadyToRun,
    Vsync,
    WarpOn,
    WarpOff,
    DriveLed(bool),
    DriveMotor(bool),
    DriveHead(u8),
    DiskInserted,
    DiskEjected,
    SnapshotTaken,
}

const CAPACITY: usize = 64;

/// Bounded ring buffer between the emulator thread and the GUI. On
/// overflow the oldest message is dropped.
pub struct MessageQueue {
    buffer: [Option<Message>; CAPACITY],
    head: usize,
    tail: usize,
    count: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            buffer: [None; CAPACITY],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn put(&mut self, message: Message) {
        if self.count == CAPACITY {
            self.head = (self.head + 1) % CAPACITY;
            self.count -= 1;
        }
        self.buffer[self.tail] = Some(message);
        self.tail = (self.tail + 1) % CAPACITY;
        self.count += 1;
    }

    pub fn get(&mut self) -> Option<Message> {
        if self.count == 0 {
            None
        } else {
            let message = self.buffer[self.head].take();
            self.head = (self.head + 1) % CAPACITY;
            self.count -= 1;
            message
        }
    }

    pub fn reset(&mut self) {
        self.buffer = [None; CAPACITY];
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue = MessageQueue::new();
        queue.put(Message::Vsync);
        queue.put(Message::DriveLed(true));
        assert_eq!(Some(Message::Vsync), queue.get());
        assert_eq!(Some(Message::DriveLed(true)), queue.get());
        assert_eq!(None, queue.get());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut queue = MessageQueue::new();
        for _ in 0..CAPACITY {
            queue.put(Message::Vsync);
        }
        queue.put(Message::DiskInserted);
        assert_eq!(CAPACITY, queue.len());
        let mut last = None;
        while let Some(message) = queue.get() {
            last = Some(message);
        }
        assert_eq!(Some(Message::DiskInserted), last);
    }
}
