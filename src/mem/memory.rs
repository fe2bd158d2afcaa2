// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::{log_enabled, trace, Level};

use crate::core::{Addressable, Chip, Ram, Rom, Shared};
use crate::io::Cia;
use crate::video::Vic;

use super::expansion_port::ExpansionPort;
use super::memory_map::{Bank, Configuration, MemoryMap};

// Spec: COMMODORE 64 MEMORY MAPS p. 263
// Design:
//   Addressable zones mapped to banks by the PLA configuration; the CPU
//   reconfigures the layout through the processor port at 0x0001 and the
//   expansion port GAME/EXROM lines.

#[derive(Copy, Clone)]
enum BaseAddr {
    Charset = 0xd000,
    ColorRam = 0xd800,
}

impl BaseAddr {
    pub fn addr(self) -> u16 {
        self as u16
    }
}

pub struct Memory {
    // Configuration
    map: MemoryMap,
    configuration: Configuration,
    // Addressable
    basic: Shared<Rom>,
    charset: Shared<Rom>,
    cia_1: Shared<Cia>,
    cia_2: Shared<Cia>,
    color_ram: Shared<Ram>,
    expansion_port: Shared<ExpansionPort>,
    kernal: Shared<Rom>,
    ram: Shared<Ram>,
    sid: Shared<dyn Chip>,
    vic: Shared<Vic>,
}

impl Memory {
    #![cfg_attr(feature = "cargo-clippy", allow(clippy::too_many_arguments))]
    pub fn new(
        cia_1: Shared<Cia>,
        cia_2: Shared<Cia>,
        color_ram: Shared<Ram>,
        expansion_port: Shared<ExpansionPort>,
        ram: Shared<Ram>,
        rom_basic: Shared<Rom>,
        rom_charset: Shared<Rom>,
        rom_kernal: Shared<Rom>,
        sid: Shared<dyn Chip>,
        vic: Shared<Vic>,
    ) -> Self {
        let map = MemoryMap::default();
        let configuration = map.get(31);
        Memory {
            map,
            configuration,
            basic: rom_basic,
            charset: rom_charset,
            cia_1,
            cia_2,
            color_ram,
            expansion_port,
            kernal: rom_kernal,
            ram,
            sid,
            vic,
        }
    }

    pub fn switch_banks(&mut self, mode: u8) {
        if log_enabled!(target: "mem::banks", Level::Trace) {
            trace!(target: "mem::banks", "Switching to {}", mode);
        }
        self.configuration = self.map.get(mode);
    }

    // -- I/O page $d000-$dfff

    fn read_io(&self, address: u16) -> u8 {
        match address {
            0xd000..=0xd3ff => self.vic.borrow_mut().read((address & 0x003f) as u8),
            0xd400..=0xd7ff => self.sid.borrow_mut().read((address & 0x001f) as u8),
            0xd800..=0xdbff => {
                // Color RAM has 4 data lines; the upper nibble floats
                self.color_ram.borrow().read(address - BaseAddr::ColorRam.addr()) | 0xf0
            }
            0xdc00..=0xdcff => self.cia_1.borrow_mut().read((address & 0x000f) as u8),
            0xdd00..=0xddff => self.cia_2.borrow_mut().read((address & 0x000f) as u8),
            _ => self.expansion_port.borrow_mut().read_io(address),
        }
    }

    fn write_io(&mut self, address: u16, value: u8) {
        match address {
            0xd000..=0xd3ff => self
                .vic
                .borrow_mut()
                .write((address & 0x003f) as u8, value),
            0xd400..=0xd7ff => self
                .sid
                .borrow_mut()
                .write((address & 0x001f) as u8, value),
            0xd800..=0xdbff => self
                .color_ram
                .borrow_mut()
                .write(address - BaseAddr::ColorRam.addr(), value & 0x0f),
            0xdc00..=0xdcff => self
                .cia_1
                .borrow_mut()
                .write((address & 0x000f) as u8, value),
            0xdd00..=0xddff => self
                .cia_2
                .borrow_mut()
                .write((address & 0x000f) as u8, value),
            _ => self.expansion_port.borrow_mut().write(address, value),
        }
    }
}

impl Addressable for Memory {
    fn read(&self, address: u16) -> u8 {
        let zone = (address >> 12) as u8;
        match self.configuration.get(zone) {
            Bank::Ram => self.ram.borrow().read(address),
            Bank::Basic => self.basic.borrow().read(address),
            Bank::Charset => self
                .charset
                .borrow()
                .read(address - BaseAddr::Charset.addr()),
            Bank::Kernal => self.kernal.borrow().read(address),
            Bank::RomL => self.expansion_port.borrow_mut().read_rom(address),
            Bank::RomH => self.expansion_port.borrow_mut().read_rom(address),
            Bank::Io => self.read_io(address),
            Bank::Disabled => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        let zone = (address >> 12) as u8;
        match self.configuration.get(zone) {
            Bank::Io => self.write_io(address, value),
            Bank::Disabled => {}
            // Writes under ROM land in the RAM below
            _ => self.ram.borrow_mut().write(address, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{new_shared, Clock, IoPort, IrqLine, Pin};
    use crate::io::cia;
    use crate::video::{FrameBuffer, VicMemory};
    use std::rc::Rc;

    struct NullSid;

    impl Chip for NullSid {
        fn clock(&mut self) {}
        fn clock_delta(&mut self, _delta: u32) {}
        fn process_vsync(&mut self) {}
        fn reset(&mut self) {}
        fn read(&mut self, _reg: u8) -> u8 {
            0
        }
        fn write(&mut self, _reg: u8, _value: u8) {}
    }

    fn setup_memory() -> Memory {
        let clock = Rc::new(Clock::default());
        let ram = new_shared(Ram::new(0x10000));
        ram.borrow_mut().fill(0x44);
        let color_ram = new_shared(Ram::new(1024));
        let basic = new_shared(Rom::new(0x2000, 0xa000, 0x10));
        let charset = new_shared(Rom::new(0x1000, 0x0000, 0x11));
        let kernal = new_shared(Rom::new(0x2000, 0xe000, 0x12));
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));
        let ba_line = new_shared(Pin::new_high());
        let cia_1 = new_shared(Cia::new(
            cia::Mode::Cia1,
            clock.clone(),
            None,
            None,
            None,
            new_shared(IoPort::new(0x00, 0xff)),
            new_shared(IoPort::new(0x00, 0xff)),
            new_shared(Pin::new_low()),
            irq_line.clone(),
        ));
        let cia_2_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_2 = new_shared(Cia::new(
            cia::Mode::Cia2,
            clock.clone(),
            None,
            None,
            None,
            cia_2_port_a.clone(),
            new_shared(IoPort::new(0x00, 0xff)),
            new_shared(Pin::new_low()),
            nmi_line,
        ));
        let frame_buffer = new_shared(FrameBuffer::new(504, 312));
        let vic_mem = VicMemory::new(charset.clone(), cia_2_port_a, ram.clone());
        let vic = new_shared(Vic::new(
            crate::core::VicModel::Mos6569,
            ba_line,
            color_ram.clone(),
            irq_line,
            frame_buffer,
            vic_mem,
        ));
        let exp_io_line = new_shared(IoPort::new(0xff, 0xff));
        let expansion_port = new_shared(ExpansionPort::new(exp_io_line));
        Memory::new(
            cia_1,
            cia_2,
            color_ram,
            expansion_port,
            ram,
            basic,
            charset,
            kernal,
            new_shared(NullSid),
            vic,
        )
    }

    #[test]
    fn read_basic_in_default_mode() {
        let mut mem = setup_memory();
        mem.switch_banks(31);
        assert_eq!(0x10, mem.read(0xa000));
    }

    #[test]
    fn read_charset_with_charen_low() {
        let mut mem = setup_memory();
        mem.switch_banks(27);
        assert_eq!(0x11, mem.read(0xd000));
    }

    #[test]
    fn read_kernal() {
        let mut mem = setup_memory();
        mem.switch_banks(31);
        assert_eq!(0x12, mem.read(0xe000));
    }

    #[test]
    fn ram_only_mode_hides_roms() {
        let mut mem = setup_memory();
        mem.switch_banks(0);
        assert_eq!(0x44, mem.read(0xa000));
        assert_eq!(0x44, mem.read(0xe000));
    }

    #[test]
    fn write_under_rom_lands_in_ram() {
        let mut mem = setup_memory();
        mem.switch_banks(31);
        mem.write(0xa000, 0x55);
        assert_eq!(0x10, mem.read(0xa000));
        mem.switch_banks(0);
        assert_eq!(0x55, mem.read(0xa000));
    }

    #[test]
    fn color_ram_upper_nibble_floats_high() {
        let mut mem = setup_memory();
        mem.switch_banks(31);
        mem.write(0xd800, 0x05);
        assert_eq!(0xf5, mem.read(0xd800));
    }

    #[test]
    fn vic_registers_mirror_every_64_bytes() {
        let mut mem = setup_memory();
        mem.switch_banks(31);
        mem.write(0xd020, 0x02);
        assert_eq!(0xf2, mem.read(0xd020));
        assert_eq!(0xf2, mem.read(0xd060));
        assert_eq!(0xf2, mem.read(0xd3e0));
    }
}
