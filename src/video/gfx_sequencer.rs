// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

#[derive(Copy, Clone, PartialEq)]
pub enum Mode {
    // (ECM/BMM/MCM=0/0/0)
    Text = 0x00,
    // (ECM/BMM/MCM=0/0/1)
    McText = 0x01,
    // (ECM/BMM/MCM=0/1/0)
    Bitmap = 0x02,
    // (ECM/BMM/MCM=0/1/1)
    McBitmap = 0x03,
    // (ECM/BMM/MCM=1/0/0)
    EcmText = 0x04,
    // (ECM/BMM/MCM=1/0/1)
    InvalidText = 0x05,
    // (ECM/BMM/MCM=1/1/0)
    InvalidBitmap1 = 0x06,
    // (ECM/BMM/MCM=1/1/1)
    InvalidBitmap2 = 0x07,
}

impl Mode {
    pub fn from(mode: u8) -> Mode {
        match mode {
            0x00 => Mode::Text,
            0x01 => Mode::McText,
            0x02 => Mode::Bitmap,
            0x03 => Mode::McBitmap,
            0x04 => Mode::EcmText,
            0x05 => Mode::InvalidText,
            0x06 => Mode::InvalidBitmap1,
            0x07 => Mode::InvalidBitmap2,
            _ => panic!("invalid mode {}", mode),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

pub struct Config {
    pub mode: Mode,
    pub bg_color: [u8; 4],
}

impl Config {
    pub fn new() -> Self {
        Config {
            mode: Mode::Text,
            bg_color: [0; 4],
        }
    }

    pub fn reset(&mut self) {
        self.mode = Mode::Text;
        self.bg_color = [0x06, 0, 0, 0];
    }
}

/// Graphics shift register. Loaded once per g-access, clocked once per
/// pixel; multicolor modes hold each color for two pixels via the
/// mc flop.
pub struct GfxSequencer {
    pub config: Config,
    c_data: u8,
    c_color: u8,
    g_data: u8,
    data: u8,
    mc_flop: bool,
    output: (u8, bool),
}

impl GfxSequencer {
    pub fn new() -> Self {
        GfxSequencer {
            config: Config::new(),
            c_data: 0,
            c_color: 0,
            g_data: 0,
            data: 0,
            mc_flop: false,
            output: (0, false),
        }
    }

    pub fn set_data(&mut self, c_data: u8, c_color: u8, g_data: u8) {
        self.c_data = c_data;
        self.c_color = c_color;
        self.g_data = g_data;
    }

    pub fn load_data(&mut self) {
        self.data = self.g_data;
        self.mc_flop = false;
    }

    pub fn clock(&mut self) {
        if !self.mc_flop {
            match self.config.mode {
                Mode::Text => self.output = self.output_text(),
                Mode::McText => {
                    self.mc_flop = self.c_color.get_bit(3);
                    self.output = self.output_text_mc()
                }
                Mode::Bitmap => self.output = self.output_bitmap(),
                Mode::McBitmap => {
                    self.mc_flop = true;
                    self.output = self.output_bitmap_mc()
                }
                Mode::EcmText => self.output = self.output_text_ecm(),
                // The invalid modes render black but keep their
                // foreground bits for collision detection
                Mode::InvalidText => {
                    self.mc_flop = self.c_color.get_bit(3);
                    self.output = (0, self.output_text_mc().1)
                }
                Mode::InvalidBitmap1 => self.output = (0, self.data.get_bit(7)),
                Mode::InvalidBitmap2 => {
                    self.mc_flop = true;
                    self.output = (0, self.output_bitmap_mc().1)
                }
            };
            self.data <<= if !self.mc_flop { 1 } else { 2 };
        } else {
            self.mc_flop = false;
        }
    }

    pub fn output(&self) -> (u8, bool) {
        self.output
    }

    pub fn reset(&mut self) {
        self.config.reset();
        self.c_data = 0;
        self.c_color = 0;
        self.g_data = 0;
        self.data = 0;
        self.mc_flop = false;
        self.output = (0, false);
    }

    pub fn snapshot_state(&self) -> (u8, u8, u8, u8, bool) {
        (self.c_data, self.c_color, self.g_data, self.data, self.mc_flop)
    }

    pub fn restore_state(&mut self, state: (u8, u8, u8, u8, bool)) {
        self.c_data = state.0;
        self.c_color = state.1;
        self.g_data = state.2;
        self.data = state.3;
        self.mc_flop = state.4;
    }

    /*
     +----+----+----+----+----+----+----+----+
     |  7 |  6 |  5 |  4 |  3 |  2 |  1 |  0 |
     +----+----+----+----+----+----+----+----+
     |         8 pixels (1 bit/pixel)        |
     |                                       |
     | "0": Color from bits 0-3 of c-data    |
     | "1": Color from bits 4-7 of c-data    |
     +---------------------------------------+
    */
    fn output_bitmap(&self) -> (u8, bool) {
        if self.data.get_bit(7) {
            (self.c_data >> 4, true)
        } else {
            (self.c_data & 0x0f, false)
        }
    }

    /*
     +----+----+----+----+----+----+----+----+
     |  7 |  6 |  5 |  4 |  3 |  2 |  1 |  0 |
     +----+----+----+----+----+----+----+----+
     |         4 pixels (2 bits/pixel)       |
     |                                       |
     | "00": Background color 0 ($d021)      |
     | "01": Color from bits 4-7 of c-data   |
     | "10": Color from bits 0-3 of c-data   |
     | "11": Color from bits 8-11 of c-data  |
     +---------------------------------------+
    */
    fn output_bitmap_mc(&self) -> (u8, bool) {
        match self.data >> 6 {
            0 => (self.config.bg_color[0], false),
            1 => (self.c_data >> 4, false),
            2 => (self.c_data & 0x0f, true),
            _ => (self.c_color, true),
        }
    }

    /*
     +----+----+----+----+----+----+----+----+
     |  7 |  6 |  5 |  4 |  3 |  2 |  1 |  0 |
     +----+----+----+----+----+----+----+----+
     |         8 pixels (1 bit/pixel)        |
     |                                       |
     | "0": Background color 0 ($d021)       |
     | "1": Color from bits 8-11 of c-data   |
     +---------------------------------------+
    */
    fn output_text(&self) -> (u8, bool) {
        if self.data.get_bit(7) {
            (self.c_color, true)
        } else {
            (self.config.bg_color[0], false)
        }
    }

    /*
     "0": Background color from bits 6/7 of c-data ($d021-$d024)
     "1": Color from bits 8-11 of c-data
    */
    fn output_text_ecm(&self) -> (u8, bool) {
        if self.data.get_bit(7) {
            (self.c_color, true)
        } else {
            (self.config.bg_color[(self.c_data >> 6) as usize], false)
        }
    }

    /*
     MC flag = 0: as standard text.
     MC flag = 1 (c-color bit 3 set):
     | "00": Background color 0 ($d021)      |
     | "01": Background color 1 ($d022)      |
     | "10": Background color 2 ($d023)      |
     | "11": Color from bits 8-10 of c-data  |
    */
    fn output_text_mc(&self) -> (u8, bool) {
        if self.c_color.get_bit(3) {
            match self.data >> 6 {
                0 => (self.config.bg_color[0], false),
                1 => (self.config.bg_color[1], false),
                2 => (self.config.bg_color[2], true),
                _ => (self.c_color & 0x07, true),
            }
        } else {
            self.output_text()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_mode_pixels() {
        let mut seq = GfxSequencer::new();
        seq.config.bg_color[0] = 6;
        seq.set_data(0x01, 0x0e, 0b1010_0000);
        seq.load_data();
        seq.clock();
        assert_eq!((0x0e, true), seq.output());
        seq.clock();
        assert_eq!((6, false), seq.output());
        seq.clock();
        assert_eq!((0x0e, true), seq.output());
    }

    #[test]
    fn multicolor_pixels_come_in_pairs() {
        let mut seq = GfxSequencer::new();
        seq.config.mode = Mode::McBitmap;
        seq.config.bg_color[0] = 0;
        seq.set_data(0x12, 0x07, 0b0110_0000);
        seq.load_data();
        seq.clock();
        assert_eq!((0x01, false), seq.output());
        seq.clock();
        assert_eq!((0x01, false), seq.output());
        seq.clock();
        assert_eq!((0x02, true), seq.output());
        seq.clock();
        assert_eq!((0x02, true), seq.output());
    }
}
