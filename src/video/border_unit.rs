// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

pub struct Config {
    pub border_color: u8,
    pub csel: bool,
    pub rsel: bool,
}

impl Config {
    pub fn new() -> Self {
        Config {
            border_color: 0x0e,
            csel: true,
            rsel: true,
        }
    }

    pub fn reset(&mut self) {
        self.border_color = 0x0e;
        self.csel = true;
        self.rsel = true;
    }
}

/*
       |   CSEL=0   |   CSEL=1
 ------+------------+-----------
 Left  |  31 ($1f)  |  24 ($18)
 Right | 335 ($14f) | 344 ($158)

        |   RSEL=0  |  RSEL=1
 -------+-----------+----------
 Top    |  55 ($37) |  51 ($33)
 Bottom | 247 ($f7) | 251 ($fb)
*/

pub struct BorderUnit {
    pub config: Config,
    // Offset between hardware X coordinates and raster positions, fixed
    // by the chip revision
    x_offset: u16,
    main_flop: bool,
    vertical_flop: bool,
}

impl BorderUnit {
    pub fn new(x_offset: u16) -> Self {
        BorderUnit {
            config: Config::new(),
            x_offset,
            main_flop: false,
            vertical_flop: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.main_flop || self.vertical_flop
    }

    pub fn is_vertical_enabled(&self) -> bool {
        self.vertical_flop
    }

    pub fn output(&self) -> u8 {
        self.config.border_color
    }

    pub fn reset(&mut self) {
        self.config.reset();
        self.main_flop = false;
        self.vertical_flop = false;
    }

    /*
    Section: 3.9. The border unit
    1. If the X coordinate reaches the right comparison value, the main
       border flip flop is set.
    4. If the X coordinate reaches the left comparison value and the Y
       coordinate reaches the bottom one, the vertical border flip flop
       is set.
    5. If the X coordinate reaches the left comparison value and the Y
       coordinate reaches the top one and the DEN bit in register $d011
       is set, the vertical border flip flop is reset.
    6. If the X coordinate reaches the left comparison value and the
       vertical border flip flop is not set, the main flip flop is reset.
    */
    pub fn update_main_flop(&mut self, x: u16, y: u16, den: bool) {
        let (left, right) = if self.config.csel {
            (24 + self.x_offset, 344 + self.x_offset)
        } else {
            (31 + self.x_offset, 335 + self.x_offset)
        };
        if x == left {
            self.update_vertical_flop(y, den);
            if !self.vertical_flop {
                self.main_flop = false;
            }
        } else if x == right {
            self.main_flop = true;
        }
    }

    /*
    2. If the Y coordinate reaches the bottom comparison value in the
       last cycle of the line, the vertical border flip flop is set.
    3. If the Y coordinate reaches the top comparison value in the last
       cycle and the DEN bit in register $d011 is set, the vertical
       border flip flop is reset.
    */
    pub fn update_vertical_flop(&mut self, y: u16, den: bool) {
        let (top, bottom) = if self.config.rsel {
            (51, 251)
        } else {
            (55, 247)
        };
        if y == top && den {
            self.vertical_flop = false;
        } else if y == bottom {
            self.vertical_flop = true;
        }
    }

    pub fn snapshot_state(&self) -> (bool, bool) {
        (self.main_flop, self.vertical_flop)
    }

    pub fn restore_state(&mut self, main_flop: bool, vertical_flop: bool) {
        self.main_flop = main_flop;
        self.vertical_flop = vertical_flop;
    }
}
