// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::{info, warn};

use crate::core::{Chip, Cpu, Pin, Shared, Snapshotable};
use crate::core::snapshot::{Reader, Result, Writer};
use crate::system::{Message, MessageQueue};

use super::disk::{zone_of_halftrack, Disk};
use super::iec::IecBus;
use super::via::Via;

// The VC1541 is a computer of its own: a 6502 with two VIAs, clocked at
// 1 MHz and only loosely synchronized with the host through the IEC
// bus. The read/write head shifts one bit per bit cell; the cell length
// depends on the speed zone the head is in.

/// Bit cell durations in sixteenths of a drive cycle per zone
/// (3.25, 3.5, 3.75 and 4.0 microseconds).
const CYCLES_PER_BIT: [i16; 4] = [52, 56, 60, 64];

/// One drive cycle in tenths of a nanosecond (1 MHz).
const CYCLE_DURATION: u64 = 10_000;

/// Cycles the write protect sensor reports a change after a disk has
/// been inserted or ejected (roughly 200 ms).
const DISK_CHANGE_CYCLES: u32 = 200_000;

pub struct Drive {
    // Dependencies
    cpu: Box<dyn Cpu>,
    via1: Shared<Via>,
    via2: Shared<Via>,
    iec: Shared<IecBus>,
    message_queue: Shared<MessageQueue>,
    // Configuration
    connected: bool,
    // Disk
    disk: Disk,
    disk_inserted: bool,
    disk_change_counter: u32,
    // Drive mechanics
    rotating: bool,
    red_led: bool,
    halftrack: u8,
    bitoffset: u16,
    zone: u8,
    // Read/write head
    read_shiftreg: u16,
    write_shiftreg: u8,
    sync: bool,
    byte_ready_counter: u8,
    bit_ready_timer: i16,
    // Clock integrator accumulating host time
    elapsed_time: u64,
    // Latched control state for edge detection
    last_pb: u8,
    last_atn_asserted: bool,
    // I/O
    so_pin: Shared<Pin>,
}

impl Drive {
    pub fn new(
        cpu: Box<dyn Cpu>,
        via1: Shared<Via>,
        via2: Shared<Via>,
        iec: Shared<IecBus>,
        message_queue: Shared<MessageQueue>,
        so_pin: Shared<Pin>,
    ) -> Self {
        Self {
            cpu,
            via1,
            via2,
            iec,
            message_queue,
            connected: false,
            disk: Disk::new(),
            disk_inserted: false,
            disk_change_counter: 0,
            rotating: false,
            red_led: false,
            halftrack: 41,
            bitoffset: 0,
            zone: 0,
            read_shiftreg: 0,
            write_shiftreg: 0,
            sync: false,
            byte_ready_counter: 0,
            bit_ready_timer: 0,
            elapsed_time: 0,
            last_pb: 0,
            last_atn_asserted: false,
            so_pin,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating
    }

    pub fn is_red_led_on(&self) -> bool {
        self.red_led
    }

    pub fn get_sync(&self) -> bool {
        self.sync
    }

    pub fn get_halftrack(&self) -> u8 {
        self.halftrack
    }

    pub fn get_cpu_mut(&mut self) -> &mut Box<dyn Cpu> {
        &mut self.cpu
    }

    pub fn get_disk(&self) -> &Disk {
        &self.disk
    }

    pub fn get_disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    /// The drive is a separate computer and resets on its own schedule,
    /// independent of the host.
    pub fn reset(&mut self) {
        info!(target: "drive", "Resetting drive");
        self.cpu.reset();
        self.via1.borrow_mut().reset();
        self.via2.borrow_mut().reset();
        self.rotating = false;
        self.red_led = false;
        self.halftrack = 41;
        self.bitoffset = 0;
        self.zone = zone_of_halftrack(41) as u8;
        self.read_shiftreg = 0;
        self.write_shiftreg = 0;
        self.sync = false;
        self.byte_ready_counter = 0;
        self.bit_ready_timer = 0;
        self.elapsed_time = 0;
        self.last_pb = 0;
        self.last_atn_asserted = false;
    }

    // -- Disk handling

    pub fn insert_d64(&mut self, image: &[u8]) -> std::result::Result<(), String> {
        self.disk.encode_d64(image)?;
        self.disk_inserted = true;
        self.disk.set_write_protected(false);
        self.disk_change_counter = DISK_CHANGE_CYCLES;
        self.message_queue.borrow_mut().put(Message::DiskInserted);
        Ok(())
    }

    pub fn insert_disk(&mut self, disk: Disk) {
        self.disk = disk;
        self.disk_inserted = true;
        self.disk_change_counter = DISK_CHANGE_CYCLES;
        self.message_queue.borrow_mut().put(Message::DiskInserted);
    }

    pub fn eject_disk(&mut self) {
        if self.disk_inserted {
            self.disk_inserted = false;
            self.disk_change_counter = DISK_CHANGE_CYCLES;
            self.message_queue.borrow_mut().put(Message::DiskEjected);
        }
    }

    pub fn has_disk(&self) -> bool {
        self.disk_inserted
    }

    pub fn export_d64(&self) -> std::result::Result<Vec<u8>, String> {
        self.disk.export_d64()
    }

    // -- Execution

    /// Advance the drive by the given amount of host time (in tenths of
    /// a nanosecond). Fractional cycles accumulate in the integrator;
    /// the drive clock is slightly faster than the host clock.
    pub fn execute(&mut self, duration: u64) {
        if !self.connected {
            return;
        }
        self.elapsed_time += duration;
        while self.elapsed_time >= CYCLE_DURATION {
            self.execute_cycle();
            self.elapsed_time -= CYCLE_DURATION;
        }
    }

    fn execute_cycle(&mut self) {
        self.via1.borrow_mut().clock();
        self.via2.borrow_mut().clock();
        if self.rotating && self.disk_inserted {
            self.bit_ready_timer -= 16;
            if self.bit_ready_timer <= 0 {
                self.execute_bit_ready();
            }
        }
        self.cpu.clock();
        self.update_via_inputs();
        self.update_control_lines();
        if self.disk_change_counter > 0 {
            self.disk_change_counter -= 1;
        }
    }

    fn read_mode(&self) -> bool {
        self.via2.borrow().cb2_out()
    }

    fn execute_bit_ready(&mut self) {
        self.read_shiftreg <<= 1;
        if self.read_mode() {
            self.read_shiftreg |= self.disk.read_bit(self.halftrack as usize, self.bitoffset) as u16;
            // SYNC is ten or more one bits in a row
            if self.read_shiftreg & 0x03ff == 0x03ff {
                self.sync = true;
            } else {
                if self.sync {
                    // Cleared on the falling edge of SYNC
                    self.byte_ready_counter = 0;
                }
                self.sync = false;
            }
        } else {
            if !self.disk.is_write_protected() {
                let bit = self.write_shiftreg & 0x80 != 0;
                self.disk.write_bit(self.halftrack as usize, self.bitoffset, bit);
            }
            self.sync = false;
        }
        self.write_shiftreg <<= 1;
        self.rotate_disk();
        if self.byte_ready_counter == 7 {
            self.execute_byte_ready();
            self.byte_ready_counter = 0;
        } else {
            self.byte_ready_counter += 1;
        }
        self.bit_ready_timer += CYCLES_PER_BIT[self.zone as usize];
    }

    fn execute_byte_ready(&mut self) {
        if self.read_mode() {
            if !self.sync {
                self.byte_ready(self.read_shiftreg as u8);
            }
        } else {
            self.write_shiftreg = self.via2.borrow().get_ora();
            self.signal_byte_ready();
        }
    }

    /*
    On the VC1541 logic board, the byte ready signal is computed by a
    NAND gate with three inputs. Two of them are clock lines ensuring
    that a signal is generated every eighth bit. The third is hard wired
    to pin CA2 of VIA2; by pulling CA2 low, the CPU can silence the byte
    ready line, e.g. while moving the head to a different track.
    */
    fn byte_ready(&mut self, byte: u8) {
        let gate_open = self.via2.borrow().ca2_out();
        if gate_open {
            self.via2.borrow_mut().set_ira(byte);
            self.signal_byte_ready();
        }
    }

    /// Byte ready is wired to the drive CPU's SO pin, setting the
    /// overflow flag.
    fn signal_byte_ready(&mut self) {
        if self.via2.borrow().ca2_out() {
            let mut pin = self.so_pin.borrow_mut();
            pin.set_active(false);
            pin.set_active(true);
        }
    }

    fn rotate_disk(&mut self) {
        let length = self.disk.len(self.halftrack as usize);
        self.bitoffset += 1;
        if self.bitoffset >= length {
            self.bitoffset = 0;
        }
    }

    // -- Pin sampling

    fn update_via_inputs(&mut self) {
        // VIA1 port B reflects the serial bus; the receivers invert
        let iec = self.iec.borrow();
        let mut pb = 0x7au8;
        if !iec.get_data_line() {
            pb |= 0x01;
        }
        if !iec.get_clock_line() {
            pb |= 0x04;
        }
        if !iec.get_atn_line() {
            pb |= 0x80;
        }
        let atn_asserted = !iec.get_atn_line();
        drop(iec);
        self.via1.borrow_mut().set_pb_in(pb);
        if atn_asserted && !self.last_atn_asserted {
            self.via1.borrow_mut().signal_ca1();
        }
        self.last_atn_asserted = atn_asserted;
        // VIA2 port B: bit 4 write protect sense (0 = protected), bit 7
        // SYNC sense (0 = sync found). The sensor reports "protected"
        // for a while after a disk change.
        let mut pb2 = 0xffu8;
        let protected = self.disk_change_counter > 0
            || (self.disk_inserted && self.disk.is_write_protected());
        if protected {
            pb2 &= !0x10;
        }
        if self.sync && self.read_mode() {
            pb2 &= !0x80;
        }
        self.via2.borrow_mut().set_pb_in(pb2);
    }

    fn update_control_lines(&mut self) {
        let pb = self.via2.borrow().get_orb() & self.via2.borrow().get_ddrb();
        if pb != self.last_pb {
            let old = self.last_pb;
            /*
            Bits 0/1 drive the two phase stepper motor. Increasing the
            value steps the head up one half track, decreasing it steps
            down; any other transition moves nothing.
            */
            if (pb ^ old) & 0x03 != 0 {
                if pb & 0x03 == old.wrapping_add(1) & 0x03 {
                    self.move_head_up();
                } else if pb & 0x03 == old.wrapping_sub(1) & 0x03 {
                    self.move_head_down();
                } else {
                    warn!(target: "drive", "Unexpected stepper motor control sequence");
                }
            }
            if (pb ^ old) & 0x04 != 0 {
                self.set_rotating(pb & 0x04 != 0);
            }
            if (pb ^ old) & 0x08 != 0 {
                self.set_red_led(pb & 0x08 != 0);
            }
            // Bits 5/6 select the recording density
            if (pb ^ old) & 0x60 != 0 {
                self.zone = 3 - ((pb >> 5) & 0x03);
            }
            self.last_pb = pb;
        }
        // VIA1 port B drives the bus
        let orb = self.via1.borrow().get_orb();
        let ddrb = self.via1.borrow().get_ddrb();
        self.iec.borrow_mut().update_device_pins(orb, ddrb);
    }

    fn set_rotating(&mut self, rotating: bool) {
        if self.rotating != rotating {
            self.rotating = rotating;
            self.message_queue
                .borrow_mut()
                .put(Message::DriveMotor(rotating));
        }
    }

    fn set_red_led(&mut self, on: bool) {
        if self.red_led != on {
            self.red_led = on;
            self.message_queue.borrow_mut().put(Message::DriveLed(on));
        }
    }

    fn move_head_up(&mut self) {
        if self.halftrack < 84 {
            let old_length = self.disk.len(self.halftrack as usize) as f32;
            let position = self.bitoffset as f32 / old_length;
            self.halftrack += 1;
            let new_length = self.disk.len(self.halftrack as usize) as f32;
            // Byte align the offset to keep fast loaders happy
            self.bitoffset = (position * new_length) as u16 & 0xfff8;
            self.byte_ready_counter = 0;
        }
        self.message_queue
            .borrow_mut()
            .put(Message::DriveHead(self.halftrack));
    }

    fn move_head_down(&mut self) {
        if self.halftrack > 1 {
            let old_length = self.disk.len(self.halftrack as usize) as f32;
            let position = self.bitoffset as f32 / old_length;
            self.halftrack -= 1;
            let new_length = self.disk.len(self.halftrack as usize) as f32;
            self.bitoffset = (position * new_length) as u16 & 0xfff8;
            self.byte_ready_counter = 0;
        }
        self.message_queue
            .borrow_mut()
            .put(Message::DriveHead(self.halftrack));
    }
}

impl Snapshotable for Drive {
    fn save(&self, writer: &mut Writer) {
        self.disk.save(writer);
        writer.write_bool(self.connected);
        writer.write_bool(self.disk_inserted);
        writer.write_u32(self.disk_change_counter);
        writer.write_bool(self.rotating);
        writer.write_bool(self.red_led);
        writer.write_u8(self.halftrack);
        writer.write_u16(self.bitoffset);
        writer.write_u8(self.zone);
        writer.write_u16(self.read_shiftreg);
        writer.write_u8(self.write_shiftreg);
        writer.write_bool(self.sync);
        writer.write_u8(self.byte_ready_counter);
        writer.write_i16(self.bit_ready_timer);
        writer.write_u64(self.elapsed_time);
        writer.write_u8(self.last_pb);
        writer.write_bool(self.last_atn_asserted);
        self.via1.borrow().save(writer);
        self.via2.borrow().save(writer);
        self.cpu.save_state(writer);
    }

    fn restore(&mut self, reader: &mut Reader) -> Result<()> {
        self.disk.restore(reader)?;
        self.connected = reader.read_bool()?;
        self.disk_inserted = reader.read_bool()?;
        self.disk_change_counter = reader.read_u32()?;
        self.rotating = reader.read_bool()?;
        self.red_led = reader.read_bool()?;
        self.halftrack = reader.read_u8()?;
        self.bitoffset = reader.read_u16()?;
        self.zone = reader.read_u8()?;
        self.read_shiftreg = reader.read_u16()?;
        self.write_shiftreg = reader.read_u8()?;
        self.sync = reader.read_bool()?;
        self.byte_ready_counter = reader.read_u8()?;
        self.bit_ready_timer = reader.read_i16()?;
        self.elapsed_time = reader.read_u64()?;
        self.last_pb = reader.read_u8()?;
        self.last_atn_asserted = reader.read_bool()?;
        self.via1.borrow_mut().restore(reader)?;
        self.via2.borrow_mut().restore(reader)?;
        self.cpu.restore_state(reader)?;
        // Keep the invariant 0 <= bitoffset < track length
        let length = self.disk.len(self.halftrack as usize);
        if length > 0 && self.bitoffset >= length {
            warn!(target: "drive", "Clamping head position {}", self.bitoffset);
            self.bitoffset %= length;
        }
        Ok(())
    }
}
