// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::{log_enabled, trace, Level};

use crate::core::{Chip, IrqLine, Shared, Snapshotable};
use crate::core::snapshot::{Reader, Result, Writer};

// Spec: MOS 6522 VERSATILE INTERFACE ADAPTER Datasheet
//
// Two of these live on the VC1541 logic board:
//   VIA1 ($1800): serial IEC interface and ATN handshake
//   VIA2 ($1c00): head data, stepper/motor/LED control, SYNC/WP sense

#[derive(Copy, Clone, PartialEq)]
pub enum Mode {
    Via1 = 0,
    Via2 = 1,
}

impl Mode {
    pub fn irq_source(self) -> usize {
        self as usize
    }
}

/// Interrupt flag register bits.
pub mod flag {
    pub const CA2: u8 = 0x01;
    pub const CA1: u8 = 0x02;
    pub const SR: u8 = 0x04;
    pub const CB2: u8 = 0x08;
    pub const CB1: u8 = 0x10;
    pub const T2: u8 = 0x20;
    pub const T1: u8 = 0x40;
}

pub mod reg {
    pub const ORB: u8 = 0x00;
    pub const ORA: u8 = 0x01;
    pub const DDRB: u8 = 0x02;
    pub const DDRA: u8 = 0x03;
    pub const T1CL: u8 = 0x04;
    pub const T1CH: u8 = 0x05;
    pub const T1LL: u8 = 0x06;
    pub const T1LH: u8 = 0x07;
    pub const T2CL: u8 = 0x08;
    pub const T2CH: u8 = 0x09;
    pub const SR: u8 = 0x0a;
    pub const ACR: u8 = 0x0b;
    pub const PCR: u8 = 0x0c;
    pub const IFR: u8 = 0x0d;
    pub const IER: u8 = 0x0e;
    pub const ORA_NO_HANDSHAKE: u8 = 0x0f;
}

pub struct Via {
    mode: Mode,
    // Ports
    ora: u8,
    orb: u8,
    ira: u8,
    ddra: u8,
    ddrb: u8,
    // External input levels, pushed in by the drive every cycle
    pa_in: u8,
    pb_in: u8,
    // Timers
    t1: u16,
    t2: u16,
    t1_latch: u16,
    t2_latch_lo: u8,
    t1_armed: bool,
    t2_armed: bool,
    // Control
    sr: u8,
    acr: u8,
    pcr: u8,
    ifr: u8,
    ier: u8,
    // I/O
    irq_line: Shared<IrqLine>,
}

impl Via {
    pub fn new(mode: Mode, irq_line: Shared<IrqLine>) -> Self {
        Self {
            mode,
            ora: 0,
            orb: 0,
            ira: 0,
            ddra: 0,
            ddrb: 0,
            pa_in: 0xff,
            pb_in: 0xff,
            t1: 0,
            t2: 0,
            t1_latch: 0,
            t2_latch_lo: 0,
            t1_armed: false,
            t2_armed: false,
            sr: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            irq_line,
        }
    }

    pub fn get_orb(&self) -> u8 {
        self.orb
    }

    pub fn get_ddrb(&self) -> u8 {
        self.ddrb
    }

    pub fn get_ora(&self) -> u8 {
        self.ora
    }

    /// Byte under the read head, latched on byte ready.
    pub fn set_ira(&mut self, value: u8) {
        self.ira = value;
    }

    pub fn set_pa_in(&mut self, value: u8) {
        self.pa_in = value;
    }

    pub fn set_pb_in(&mut self, value: u8) {
        self.pb_in = value;
    }

    /// Effective port B pin levels (outputs driven, inputs pulled up).
    pub fn pb_pins(&self) -> u8 {
        (self.orb & self.ddrb) | (self.pb_in & !self.ddrb)
    }

    /// CA2 output level; pulled low only in "low output" mode. The DOS
    /// uses it to silence the byte ready line while stepping.
    pub fn ca2_out(&self) -> bool {
        (self.pcr >> 1) & 0x07 != 0b110
    }

    /// CB2 output level selects between reading and writing for the
    /// head electronics; low means write.
    pub fn cb2_out(&self) -> bool {
        (self.pcr >> 5) & 0x07 != 0b110
    }

    /// Active transition on CA1 (the ATN line edge on VIA1).
    pub fn signal_ca1(&mut self) {
        self.set_flag(flag::CA1);
    }

    /// Active transition on CB1.
    pub fn signal_cb1(&mut self) {
        self.set_flag(flag::CB1);
    }

    pub fn interrupts_enabled(&self, mask: u8) -> bool {
        self.ier & mask != 0
    }

    fn set_flag(&mut self, mask: u8) {
        self.ifr |= mask;
        self.update_irq_line();
    }

    fn clear_flag(&mut self, mask: u8) {
        self.ifr &= !mask;
        self.update_irq_line();
    }

    fn update_irq_line(&mut self) {
        self.irq_line
            .borrow_mut()
            .set_low(self.mode.irq_source(), self.ifr & self.ier & 0x7f != 0);
    }
}

impl Chip for Via {
    fn clock(&mut self) {
        // Both timers decrement every cycle. Timer 1 reloads from its
        // latch in free run mode, timer 2 is strictly one shot.
        self.t1 = self.t1.wrapping_sub(1);
        if self.t1 == 0 && self.t1_armed {
            self.set_flag(flag::T1);
            if self.acr & 0x40 != 0 {
                self.t1 = self.t1_latch;
            } else {
                self.t1_armed = false;
            }
        }
        self.t2 = self.t2.wrapping_sub(1);
        if self.t2 == 0 && self.t2_armed {
            self.set_flag(flag::T2);
            self.t2_armed = false;
        }
    }

    fn clock_delta(&mut self, delta: u32) {
        for _ in 0..delta {
            self.clock();
        }
    }

    fn process_vsync(&mut self) {}

    fn reset(&mut self) {
        self.ora = 0;
        self.orb = 0;
        self.ira = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.pa_in = 0xff;
        self.pb_in = 0xff;
        self.t1 = 0;
        self.t2 = 0;
        self.t1_latch = 0;
        self.t2_latch_lo = 0;
        self.t1_armed = false;
        self.t2_armed = false;
        self.sr = 0;
        self.acr = 0;
        self.pcr = 0;
        self.ifr = 0;
        self.ier = 0;
        self.update_irq_line();
    }

    // I/O

    fn read(&mut self, reg: u8) -> u8 {
        let value = match reg {
            reg::ORB => {
                self.clear_flag(flag::CB1 | flag::CB2);
                let result = self.pb_pins();
                match self.mode {
                    // Bits 5/6 carry the device address, fixed at 8
                    Mode::Via1 => result & 0x9f,
                    Mode::Via2 => result,
                }
            }
            reg::ORA | reg::ORA_NO_HANDSHAKE => {
                if reg == reg::ORA {
                    self.clear_flag(flag::CA1 | flag::CA2);
                }
                (self.ora & self.ddra) | (self.ira & !self.ddra)
            }
            reg::DDRB => self.ddrb,
            reg::DDRA => self.ddra,
            reg::T1CL => {
                self.clear_flag(flag::T1);
                (self.t1 & 0x00ff) as u8
            }
            reg::T1CH => (self.t1 >> 8) as u8,
            reg::T1LL => (self.t1_latch & 0x00ff) as u8,
            reg::T1LH => (self.t1_latch >> 8) as u8,
            reg::T2CL => {
                self.clear_flag(flag::T2);
                (self.t2 & 0x00ff) as u8
            }
            reg::T2CH => (self.t2 >> 8) as u8,
            reg::SR => {
                self.clear_flag(flag::SR);
                self.sr
            }
            reg::ACR => self.acr,
            reg::PCR => self.pcr,
            reg::IFR => {
                let mut result = self.ifr;
                if self.ifr & self.ier & 0x7f != 0 {
                    result |= 0x80;
                }
                result
            }
            reg::IER => self.ier | 0x80,
            _ => {
                log::warn!(target: "via::reg", "Read of unknown register 0x{:02x}", reg);
                0
            }
        };
        if log_enabled!(target: "via::reg", Level::Trace) {
            trace!(target: "via::reg", "Read 0x{:02x} = 0x{:02x}", reg, value);
        }
        value
    }

    fn write(&mut self, reg: u8, value: u8) {
        if log_enabled!(target: "via::reg", Level::Trace) {
            trace!(target: "via::reg", "Write 0x{:02x} = 0x{:02x}", reg, value);
        }
        match reg {
            reg::ORB => {
                self.orb = value;
                self.clear_flag(flag::CB1 | flag::CB2);
            }
            reg::ORA | reg::ORA_NO_HANDSHAKE => {
                self.ora = value;
                if reg == reg::ORA {
                    self.clear_flag(flag::CA1 | flag::CA2);
                }
            }
            reg::DDRB => {
                self.ddrb = value;
            }
            reg::DDRA => {
                self.ddra = value;
            }
            reg::T1CL | reg::T1LL => {
                self.t1_latch = (self.t1_latch & 0xff00) | value as u16;
            }
            reg::T1CH => {
                self.t1_latch = (self.t1_latch & 0x00ff) | ((value as u16) << 8);
                self.t1 = self.t1_latch;
                self.t1_armed = true;
                self.clear_flag(flag::T1);
            }
            reg::T1LH => {
                self.t1_latch = (self.t1_latch & 0x00ff) | ((value as u16) << 8);
            }
            reg::T2CL => {
                self.t2_latch_lo = value;
            }
            reg::T2CH => {
                self.t2 = ((value as u16) << 8) | self.t2_latch_lo as u16;
                self.t2_armed = true;
                self.clear_flag(flag::T2);
            }
            reg::SR => {
                self.sr = value;
                self.clear_flag(flag::SR);
            }
            reg::ACR => {
                self.acr = value;
            }
            reg::PCR => {
                self.pcr = value;
            }
            reg::IFR => {
                // Writing ones clears the corresponding flags
                self.ifr &= !value;
                self.update_irq_line();
            }
            reg::IER => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7f;
                } else {
                    self.ier &= !value;
                }
                self.update_irq_line();
            }
            _ => {
                log::warn!(target: "via::reg", "Write of unknown register 0x{:02x}", reg);
            }
        }
    }
}

impl Snapshotable for Via {
    fn save(&self, writer: &mut Writer) {
        writer.write_u8(self.ora);
        writer.write_u8(self.orb);
        writer.write_u8(self.ira);
        writer.write_u8(self.ddra);
        writer.write_u8(self.ddrb);
        writer.write_u8(self.pa_in);
        writer.write_u8(self.pb_in);
        writer.write_u16(self.t1);
        writer.write_u16(self.t2);
        writer.write_u16(self.t1_latch);
        writer.write_u8(self.t2_latch_lo);
        writer.write_bool(self.t1_armed);
        writer.write_bool(self.t2_armed);
        writer.write_u8(self.sr);
        writer.write_u8(self.acr);
        writer.write_u8(self.pcr);
        writer.write_u8(self.ifr);
        writer.write_u8(self.ier);
    }

    fn restore(&mut self, reader: &mut Reader) -> Result<()> {
        self.ora = reader.read_u8()?;
        self.orb = reader.read_u8()?;
        self.ira = reader.read_u8()?;
        self.ddra = reader.read_u8()?;
        self.ddrb = reader.read_u8()?;
        self.pa_in = reader.read_u8()?;
        self.pb_in = reader.read_u8()?;
        self.t1 = reader.read_u16()?;
        self.t2 = reader.read_u16()?;
        self.t1_latch = reader.read_u16()?;
        self.t2_latch_lo = reader.read_u8()?;
        self.t1_armed = reader.read_bool()?;
        self.t2_armed = reader.read_bool()?;
        self.sr = reader.read_u8()?;
        self.acr = reader.read_u8()?;
        self.pcr = reader.read_u8()?;
        self.ifr = reader.read_u8()?;
        self.ier = reader.read_u8()?;
        self.update_irq_line();
        Ok(())
    }
}
