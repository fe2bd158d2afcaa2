// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod c64;
mod config;
mod factory;
mod frame_pacer;
mod message_queue;
mod null;
pub mod snapshot;

pub use self::c64::C64;
pub use self::config::{Config, Roms};
pub use self::factory::ChipFactory;
pub use self::frame_pacer::FramePacer;
pub use self::message_queue::{Message, MessageQueue};
pub use self::null::{NullCpu, NullFactory, NullSid};
pub use self::snapshot::Snapshot;
