// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

use crate::core::{IoPort, Shared};

// The cartridge itself is an external collaborator; only the port
// contract is modelled here. The io line carries the GAME and EXROM
// lines that participate in memory banking.

#[derive(Copy, Clone)]
enum IoLine {
    Game = 3,
    Exrom = 4,
}

impl IoLine {
    pub fn value(self) -> usize {
        self as usize
    }
}

/// Contract implemented by cartridge emulations plugged into the port.
pub trait Cartridge {
    /// ROML/ROMH reads ($8000-$9fff, $a000-$bfff or $e000-$ffff in
    /// Ultimax mode).
    fn read_rom(&mut self, address: u16) -> u8;
    /// IO1/IO2 reads ($de00-$dfff). None lets the bus float.
    fn read_io(&mut self, address: u16) -> Option<u8>;
    fn write(&mut self, address: u16, value: u8);
    /// Current GAME/EXROM line state.
    fn io_config(&self) -> (bool, bool);
    fn reset(&mut self);
}

pub struct ExpansionPort {
    cartridge: Option<Box<dyn Cartridge>>,
    // I/O
    io_line: Shared<IoPort>,
}

impl ExpansionPort {
    pub fn new(io_line: Shared<IoPort>) -> Self {
        Self {
            cartridge: None,
            io_line,
        }
    }

    pub fn attach(&mut self, cartridge: Box<dyn Cartridge>) {
        let (game, exrom) = cartridge.io_config();
        self.cartridge = Some(cartridge);
        self.set_io_lines(game, exrom);
    }

    pub fn detach(&mut self) {
        if self.cartridge.take().is_some() {
            self.set_io_lines(true, true);
        }
    }

    pub fn reset(&mut self) {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.reset();
            let (game, exrom) = cartridge.io_config();
            self.set_io_lines(game, exrom);
        } else {
            self.set_io_lines(true, true);
        }
    }

    pub fn read_rom(&mut self, address: u16) -> u8 {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.read_rom(address)
        } else {
            0
        }
    }

    pub fn read_io(&mut self, address: u16) -> u8 {
        self.cartridge
            .as_mut()
            .and_then(|crt| crt.read_io(address))
            .unwrap_or(0)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.write(address, value);
        }
    }

    fn set_io_lines(&mut self, game: bool, exrom: bool) {
        let mut io_value = 0u8;
        io_value.set_bit(IoLine::Game.value(), game);
        io_value.set_bit(IoLine::Exrom.value(), exrom);
        self.io_line.borrow_mut().set_value(io_value);
    }
}
