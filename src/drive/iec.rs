// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::{log_enabled, trace, Level};

use crate::core::Snapshotable;
use crate::core::snapshot::{Reader, Result, Writer};

// The serial bus consists of three open collector lines (ATN, CLK,
// DATA). The computed level of each line is the AND of every driver;
// any device can pull a line low but none can force it high.
//
// C64 side: CIA2 port A drives ATN/CLK/DATA out on bits 3..5 (through
// inverters) and reads CLK/DATA back on bits 6..7. Drive side: VIA1
// port B drives DATA out on bit 1 and CLK out on bit 3; bit 4 is the
// ATN acknowledge that pulls DATA low in hardware whenever it disagrees
// with the ATN line.

pub struct IecBus {
    // Raw driver state
    cia_pa_latch: u8,
    cia_ddra: u8,
    device_orb: u8,
    device_ddrb: u8,
    // Computed line levels, true = released (high)
    atn_line: bool,
    clock_line: bool,
    data_line: bool,
    // Deferred recomputation breaks the CIA/VIA update cycle
    dirty: bool,
}

impl IecBus {
    pub fn new() -> Self {
        Self {
            cia_pa_latch: 0,
            cia_ddra: 0,
            device_orb: 0,
            device_ddrb: 0,
            atn_line: true,
            clock_line: true,
            data_line: true,
            dirty: false,
        }
    }

    pub fn reset(&mut self) {
        self.cia_pa_latch = 0;
        self.cia_ddra = 0;
        self.device_orb = 0;
        self.device_ddrb = 0;
        self.atn_line = true;
        self.clock_line = true;
        self.data_line = true;
        self.dirty = true;
    }

    pub fn get_atn_line(&self) -> bool {
        self.atn_line
    }

    pub fn get_clock_line(&self) -> bool {
        self.clock_line
    }

    pub fn get_data_line(&self) -> bool {
        self.data_line
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn update_cia_pins(&mut self, pa_latch: u8, ddra: u8) {
        if self.cia_pa_latch != pa_latch || self.cia_ddra != ddra {
            self.cia_pa_latch = pa_latch;
            self.cia_ddra = ddra;
            self.dirty = true;
        }
    }

    pub fn update_device_pins(&mut self, orb: u8, ddrb: u8) {
        if self.device_orb != orb || self.device_ddrb != ddrb {
            self.device_orb = orb;
            self.device_ddrb = ddrb;
            self.dirty = true;
        }
    }

    /// Recompute the line levels from the stored driver state.
    pub fn update(&mut self) {
        self.dirty = false;
        let out = self.cia_pa_latch & self.cia_ddra;
        // The CIA outputs run through inverters; a one in the latch
        // pulls the line down
        let c64_atn = out & 0x08 == 0;
        let c64_clock = out & 0x10 == 0;
        let c64_data = out & 0x20 == 0;
        let dev_out = self.device_orb & self.device_ddrb;
        let dev_data = dev_out & 0x02 == 0;
        let dev_clock = dev_out & 0x08 == 0;
        let atna = dev_out & 0x10 != 0;
        self.atn_line = c64_atn;
        self.clock_line = c64_clock && dev_clock;
        // The ATN acknowledge gate pulls DATA low whenever ATNA and the
        // inverted ATN line disagree
        let atn_ack = !(atna ^ !self.atn_line);
        self.data_line = c64_data && dev_data && atn_ack;
        if log_enabled!(target: "iec", Level::Trace) {
            trace!(
                target: "iec", "ATN {} CLK {} DATA {}",
                self.atn_line as u8,
                self.clock_line as u8,
                self.data_line as u8
            );
        }
    }
}

impl Snapshotable for IecBus {
    fn save(&self, writer: &mut Writer) {
        writer.write_u8(self.cia_pa_latch);
        writer.write_u8(self.cia_ddra);
        writer.write_u8(self.device_orb);
        writer.write_u8(self.device_ddrb);
        writer.write_bool(self.atn_line);
        writer.write_bool(self.clock_line);
        writer.write_bool(self.data_line);
        writer.write_bool(self.dirty);
    }

    fn restore(&mut self, reader: &mut Reader) -> Result<()> {
        self.cia_pa_latch = reader.read_u8()?;
        self.cia_ddra = reader.read_u8()?;
        self.device_orb = reader.read_u8()?;
        self.device_ddrb = reader.read_u8()?;
        self.atn_line = reader.read_bool()?;
        self.clock_line = reader.read_bool()?;
        self.data_line = reader.read_bool()?;
        self.dirty = reader.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c64_pulls_atn() {
        let mut bus = IecBus::new();
        bus.update_cia_pins(0x08, 0x3f);
        assert!(bus.is_dirty());
        bus.update();
        assert_eq!(false, bus.get_atn_line());
    }

    #[test]
    fn lines_are_wired_and() {
        let mut bus = IecBus::new();
        // C64 releases CLK, drive pulls it
        bus.update_cia_pins(0x00, 0x3f);
        bus.update_device_pins(0x08, 0x1a);
        bus.update();
        assert_eq!(false, bus.get_clock_line());
        // Drive releases, line goes high
        bus.update_device_pins(0x10, 0x1a);
        bus.update();
        assert_eq!(true, bus.get_clock_line());
    }

    #[test]
    fn atn_ack_pulls_data() {
        let mut bus = IecBus::new();
        // ATN asserted by the C64, ATNA cleared on the drive side
        bus.update_cia_pins(0x08, 0x3f);
        bus.update_device_pins(0x00, 0x1a);
        bus.update();
        assert_eq!(false, bus.get_data_line());
        // Drive acknowledges by setting ATNA
        bus.update_device_pins(0x10, 0x1a);
        bus.update();
        assert_eq!(true, bus.get_data_line());
    }
}
