// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod border_unit;
mod frame_buffer;
mod gfx_sequencer;
mod mux_unit;
mod spec;
mod sprite_sequencer;
mod vic;
mod vic_memory;

pub use self::frame_buffer::{FrameBuffer, Palette};
pub use self::spec::Spec;
pub use self::vic::{IrqSource, Vic};
pub use self::vic_memory::VicMemory;
