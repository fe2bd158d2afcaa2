// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

#[derive(Copy, Clone, PartialEq)]
pub enum Mode {
    Standard = 0,
    Multicolor = 1,
}

pub struct Config {
    pub mode: Mode,
    pub color: u8,
    pub enabled: bool,
    pub expand_x: bool,
    pub expand_y: bool,
    pub multicolor: [u8; 2],
    pub x: u16,
    pub x_screen: u16,
    pub y: u8,
}

impl Config {
    pub fn new() -> Self {
        Config {
            mode: Mode::Standard,
            color: 0,
            enabled: false,
            expand_x: false,
            expand_y: false,
            multicolor: [0; 2],
            x: 0,
            x_screen: 0,
            y: 0,
        }
    }

    pub fn reset(&mut self) {
        self.mode = Mode::Standard;
        self.color = 0;
        self.enabled = false;
        self.expand_x = false;
        self.expand_y = false;
        self.multicolor = [0; 2];
        self.x = 0;
        self.x_screen = 0;
        self.y = 0;
    }
}

/// 24-bit sprite shift register. The three s-access bytes are loaded
/// into the upper bits; output starts when the raster X position passes
/// the sprite X coordinate. X expansion and multicolor stretch pixels
/// by holding the shift for extra clocks.
pub struct SpriteSequencer {
    // Configuration
    pub config: Config,
    // Runtime State
    counter: u32,
    data: u32,
    delay_cycles: u8,
    pub display: bool,
    pub dma: bool,
    pub expansion_flop: bool,
    output: Option<u8>,
}

impl SpriteSequencer {
    pub fn new() -> Self {
        SpriteSequencer {
            config: Config::new(),
            counter: 0,
            data: 0,
            delay_cycles: 0,
            display: false,
            dma: false,
            expansion_flop: true,
            output: None,
        }
    }

    pub fn set_data(&mut self, byte: usize, value: u8) {
        self.counter = 0;
        match byte {
            0 => {
                self.data.set_bits(24..32, value as u32);
            }
            1 => {
                self.data.set_bits(16..24, value as u32);
            }
            2 => {
                self.data.set_bits(8..16, value as u32);
            }
            _ => panic!("invalid sprite data index {}", byte),
        }
    }

    pub fn clock(&mut self, x: u16) {
        if self.display {
            if self.delay_cycles == 0 {
                if x == self.config.x_screen && self.counter == 0 {
                    self.counter = 0xffff_ff00;
                }
                if x >= self.config.x_screen && self.counter != 0 {
                    match self.config.mode {
                        Mode::Standard => {
                            self.output = self.output_pixel();
                            self.counter <<= 1;
                            self.data <<= 1;
                            if self.config.expand_x {
                                self.delay_cycles = 0b0001;
                            }
                        }
                        Mode::Multicolor => {
                            self.output = self.output_mc_pixel();
                            self.counter <<= 2;
                            self.data <<= 2;
                            self.delay_cycles = if self.config.expand_x { 0b0111 } else { 0b0001 }
                        }
                    }
                } else {
                    self.output = None;
                }
            } else {
                self.delay_cycles >>= 1;
            }
        } else {
            self.output = None;
        }
    }

    pub fn output(&self) -> Option<u8> {
        self.output
    }

    pub fn reset(&mut self) {
        self.config.reset();
        self.counter = 0;
        self.data = 0;
        self.delay_cycles = 0;
        self.display = false;
        self.dma = false;
        self.expansion_flop = true;
        self.output = None;
    }

    pub fn snapshot_state(&self) -> (u32, u32, u8, bool, bool, bool) {
        (
            self.counter,
            self.data,
            self.delay_cycles,
            self.display,
            self.dma,
            self.expansion_flop,
        )
    }

    pub fn restore_state(&mut self, state: (u32, u32, u8, bool, bool, bool)) {
        self.counter = state.0;
        self.data = state.1;
        self.delay_cycles = state.2;
        self.display = state.3;
        self.dma = state.4;
        self.expansion_flop = state.5;
    }

    fn output_pixel(&self) -> Option<u8> {
        if self.data.get_bit(31) {
            Some(self.config.color)
        } else {
            None
        }
    }

    fn output_mc_pixel(&self) -> Option<u8> {
        match self.data >> 30 {
            0 => None,
            1 => Some(self.config.multicolor[0]),
            2 => Some(self.config.color),
            _ => Some(self.config.multicolor[1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_starts_at_x_coordinate() {
        let mut sprite = SpriteSequencer::new();
        sprite.config.color = 5;
        sprite.config.x_screen = 100;
        sprite.display = true;
        sprite.set_data(0, 0xff);
        sprite.clock(99);
        assert_eq!(None, sprite.output());
        sprite.clock(100);
        assert_eq!(Some(5), sprite.output());
    }

    #[test]
    fn transparent_bits_yield_no_output() {
        let mut sprite = SpriteSequencer::new();
        sprite.config.color = 5;
        sprite.config.x_screen = 10;
        sprite.display = true;
        sprite.set_data(0, 0b0100_0000);
        sprite.clock(10);
        assert_eq!(None, sprite.output());
        sprite.clock(11);
        assert_eq!(Some(5), sprite.output());
    }
}
