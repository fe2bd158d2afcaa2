// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::core::snapshot::{Reader, Result, Writer};
use crate::core::{Addressable, Chip, Cpu, IoPort, IrqLine, Pin, Shared, SystemModel};

use super::factory::ChipFactory;

// Headless stand-ins for the external collaborators. They keep the bus
// semantics intact (SID registers are readable, the CPUs hold a program
// counter) without emulating anything, which is all the chip level test
// harnesses need.

pub struct NullCpu {
    pc: u16,
}

impl NullCpu {
    pub fn new() -> Self {
        Self { pc: 0 }
    }
}

impl Cpu for NullCpu {
    fn clock(&mut self) {}

    fn is_fetch_cycle(&self) -> bool {
        true
    }

    fn get_pc(&self) -> u16 {
        self.pc
    }

    fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    fn reset(&mut self) {
        self.pc = 0;
    }

    fn save_state(&self, writer: &mut Writer) {
        writer.write_u16(self.pc);
    }

    fn restore_state(&mut self, reader: &mut Reader) -> Result<()> {
        self.pc = reader.read_u16()?;
        Ok(())
    }
}

pub struct NullSid {
    regs: [u8; 32],
}

impl NullSid {
    pub fn new() -> Self {
        Self { regs: [0; 32] }
    }
}

impl Chip for NullSid {
    fn clock(&mut self) {}

    fn clock_delta(&mut self, _delta: u32) {}

    fn process_vsync(&mut self) {}

    fn reset(&mut self) {
        self.regs = [0; 32];
    }

    fn read(&mut self, reg: u8) -> u8 {
        self.regs[(reg & 0x1f) as usize]
    }

    fn write(&mut self, reg: u8, value: u8) {
        self.regs[(reg & 0x1f) as usize] = value;
    }
}

pub struct NullFactory;

impl ChipFactory for NullFactory {
    fn new_cpu(
        &self,
        _mem: Shared<dyn Addressable>,
        _io_port: Shared<IoPort>,
        _ba_line: Shared<Pin>,
        _irq_line: Shared<IrqLine>,
        _nmi_line: Shared<IrqLine>,
    ) -> Box<dyn Cpu> {
        Box::new(NullCpu::new())
    }

    fn new_drive_cpu(
        &self,
        _mem: Shared<dyn Addressable>,
        _irq_line: Shared<IrqLine>,
        _so_pin: Shared<Pin>,
    ) -> Box<dyn Cpu> {
        Box::new(NullCpu::new())
    }

    fn new_sid(&self, _model: &SystemModel) -> Shared<dyn Chip> {
        crate::core::new_shared(NullSid::new())
    }
}
