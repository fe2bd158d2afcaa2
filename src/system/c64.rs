// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::Cell;
use std::rc::Rc;

use log::info;

use crate::core::{
    new_shared, Addressable, Chip, Clock, Cpu, IoPort, IrqLine, Pin, Ram, Rom, Shared,
    Snapshotable,
};
use crate::core::snapshot::{Reader, Writer};
use crate::drive::{Drive, DriveMemory, IecBus, Via};
use crate::drive::via::Mode as ViaMode;
use crate::io::cia::Mode as CiaMode;
use crate::io::Cia;
use crate::mem::{Cartridge, ExpansionPort, Memory};
use crate::video::{FrameBuffer, Vic, VicMemory};

use super::config::{Config, Roms};
use super::factory::ChipFactory;
use super::frame_pacer::FramePacer;
use super::message_queue::{Message, MessageQueue};
use super::snapshot::{flags, record, Screenshot, Snapshot};

// Design:
//   C64 represents the machine itself and all of its components.
//   Connections between components are managed as shared leaf cells
//   (pins, ports, lines, buffers); no chip holds a reference back to
//   the machine.
//
// One system cycle is split in two phases:
//
//  <---------- phi1 (VIC owns the bus) ------->|<-- phi2 (CPU) -->|
//
//   VIC -> CIA1 -> CIA2 -> IEC update          | CPU -> drive
//
// The CIAs are skipped while asleep; the arbiter counts the skipped
// cycles so they can catch up lazily.

pub struct C64 {
    // Dependencies
    config: Rc<Config>,
    // Chipset
    cpu: Box<dyn Cpu>,
    cia_1: Shared<Cia>,
    cia_2: Shared<Cia>,
    sid: Shared<dyn Chip>,
    vic: Shared<Vic>,
    // Memory
    color_ram: Shared<Ram>,
    mem: Shared<Memory>,
    ram: Shared<Ram>,
    // Peripherals
    drive: Shared<Drive>,
    expansion_port: Shared<ExpansionPort>,
    iec: Shared<IecBus>,
    keyboard_matrix: Shared<[u8; 16]>,
    // Buffers
    frame_buffer: Shared<FrameBuffer>,
    message_queue: Shared<MessageQueue>,
    // I/O Lines
    ba_line: Shared<Pin>,
    cassette_pin: Shared<Pin>,
    cia_2_port_a: Shared<IoPort>,
    cpu_io_port: Shared<IoPort>,
    irq_line: Shared<IrqLine>,
    nmi_line: Shared<IrqLine>,
    // Runtime State
    clock: Rc<Clock>,
    pacer: FramePacer,
    ba_low_cycles: u32,
    cycle_duration: u64,
    frame_count: u32,
}

impl C64 {
    pub fn new(
        config: Rc<Config>,
        roms: &Roms,
        factory: &dyn ChipFactory,
    ) -> Result<C64, String> {
        info!(target: "c64", "Initializing system");
        if roms.basic.len() != 0x2000
            || roms.charset.len() != 0x1000
            || roms.kernal.len() != 0x2000
            || roms.drive.len() != 0x4000
        {
            return Err("unexpected ROM image size".to_string());
        }

        // Buffers
        let clock = Rc::new(Clock::default());
        let frame_buffer = new_shared(FrameBuffer::new(
            config.model.frame_buffer_size.0,
            config.model.frame_buffer_size.1,
        ));
        let keyboard_matrix = new_shared([0xff; 16]);
        let message_queue = new_shared(MessageQueue::new());

        // I/O Lines
        let ba_line = new_shared(Pin::new_high());
        let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_flag_pin = new_shared(Pin::new_low());
        let cia_1_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_port_b = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_flag_pin = new_shared(Pin::new_low());
        let cia_2_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_port_b = new_shared(IoPort::new(0x00, 0xff));
        let exp_io_line = new_shared(IoPort::new(0xff, 0xff));
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));

        // Memory
        let color_ram = new_shared(Ram::new(config.model.color_ram));
        let ram = new_shared(Ram::new(config.model.memory_size));
        let rom_basic = new_shared(Rom::new_with_data(&roms.basic, 0xa000));
        let rom_charset = new_shared(Rom::new_with_data(&roms.charset, 0));
        let rom_kernal = new_shared(Rom::new_with_data(&roms.kernal, 0xe000));

        // Chipset
        let cia_1 = new_shared(Cia::new(
            CiaMode::Cia1,
            clock.clone(),
            None,
            None,
            Some(keyboard_matrix.clone()),
            cia_1_port_a.clone(),
            cia_1_port_b.clone(),
            cia_1_flag_pin.clone(),
            irq_line.clone(),
        ));
        let cia_2 = new_shared(Cia::new(
            CiaMode::Cia2,
            clock.clone(),
            None,
            None,
            None,
            cia_2_port_a.clone(),
            cia_2_port_b.clone(),
            cia_2_flag_pin.clone(),
            nmi_line.clone(),
        ));
        let sid = factory.new_sid(&config.model);
        let vic_mem = VicMemory::new(rom_charset.clone(), cia_2_port_a.clone(), ram.clone());
        let vic = new_shared(Vic::new(
            config.model.vic_model,
            ba_line.clone(),
            color_ram.clone(),
            irq_line.clone(),
            frame_buffer.clone(),
            vic_mem,
        ));

        // Memory Controller and Processor
        let expansion_port = new_shared(ExpansionPort::new(exp_io_line.clone()));
        let mem = new_shared(Memory::new(
            cia_1.clone(),
            cia_2.clone(),
            color_ram.clone(),
            expansion_port.clone(),
            ram.clone(),
            rom_basic,
            rom_charset,
            rom_kernal,
            sid.clone(),
            vic.clone(),
        ));
        let mem_addressable: Shared<dyn Addressable> = mem.clone();
        let cpu = factory.new_cpu(
            mem_addressable,
            cpu_io_port.clone(),
            ba_line.clone(),
            irq_line.clone(),
            nmi_line.clone(),
        );

        // Drive
        let iec = new_shared(IecBus::new());
        let drive_irq = new_shared(IrqLine::new("drive irq"));
        let drive_so_pin = new_shared(Pin::new_high());
        let via1 = new_shared(Via::new(ViaMode::Via1, drive_irq.clone()));
        let via2 = new_shared(Via::new(ViaMode::Via2, drive_irq.clone()));
        let drive_ram = new_shared(Ram::new(0x0800));
        let drive_rom = new_shared(Rom::new_with_data(&roms.drive, 0xc000));
        let drive_mem = new_shared(DriveMemory::new(
            drive_ram,
            drive_rom,
            via1.clone(),
            via2.clone(),
        ));
        let drive_mem_addressable: Shared<dyn Addressable> = drive_mem;
        let drive_cpu =
            factory.new_drive_cpu(drive_mem_addressable, drive_irq, drive_so_pin.clone());
        let drive = new_shared(Drive::new(
            drive_cpu,
            via1,
            via2,
            iec.clone(),
            message_queue.clone(),
            drive_so_pin,
        ));

        // Observers: processor port and expansion port lines recompute
        // the memory banking
        let exp_io_line_clone = exp_io_line.clone();
        let mem_clone = mem.clone();
        cpu_io_port
            .borrow_mut()
            .set_observer(Box::new(move |cpu_port| {
                let expansion_port_io = exp_io_line_clone.borrow().get_value();
                let mode = cpu_port & 0x07 | expansion_port_io & 0x18;
                mem_clone.borrow_mut().switch_banks(mode);
            }));
        let cpu_io_port_clone = cpu_io_port.clone();
        let mem_clone = mem.clone();
        exp_io_line
            .borrow_mut()
            .set_observer(Box::new(move |expansion_port_io| {
                let cpu_port_io = cpu_io_port_clone.borrow().get_value();
                let mode = cpu_port_io & 0x07 | expansion_port_io & 0x18;
                mem_clone.borrow_mut().switch_banks(mode);
            }));

        // CIA1 port B bit 4 feeds the light pen input
        let vic_clone = vic.clone();
        let lp_state = Rc::new(Cell::new(true));
        cia_1_port_b
            .borrow_mut()
            .set_observer(Box::new(move |value| {
                let lp = value & 0x10 != 0;
                if !lp && lp_state.get() {
                    vic_clone.borrow_mut().trigger_lightpen();
                }
                lp_state.set(lp);
            }));

        let pacer = FramePacer::new(config.model.frame_duration_ns());
        let cycle_duration = config.model.cycle_duration();
        Ok(C64 {
            config,
            cpu,
            cia_1,
            cia_2,
            sid,
            vic,
            color_ram,
            mem,
            ram,
            drive,
            expansion_port,
            iec,
            keyboard_matrix,
            frame_buffer,
            message_queue,
            ba_line,
            cassette_pin: cia_1_flag_pin,
            cia_2_port_a,
            cpu_io_port,
            irq_line,
            nmi_line,
            clock,
            pacer,
            ba_low_cycles: 0,
            cycle_duration,
            frame_count: 0,
        })
    }

    // -- Accessors

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_clock(&self) -> Rc<Clock> {
        self.clock.clone()
    }

    pub fn get_cycles(&self) -> u64 {
        self.clock.get()
    }

    pub fn get_cpu_mut(&mut self) -> &mut Box<dyn Cpu> {
        &mut self.cpu
    }

    pub fn get_cia_1(&self) -> Shared<Cia> {
        self.cia_1.clone()
    }

    pub fn get_cia_2(&self) -> Shared<Cia> {
        self.cia_2.clone()
    }

    pub fn get_vic(&self) -> Shared<Vic> {
        self.vic.clone()
    }

    pub fn get_mem(&self) -> Shared<Memory> {
        self.mem.clone()
    }

    pub fn get_drive(&self) -> Shared<Drive> {
        self.drive.clone()
    }

    pub fn get_iec(&self) -> Shared<IecBus> {
        self.iec.clone()
    }

    pub fn get_frame_buffer(&self) -> Shared<FrameBuffer> {
        self.frame_buffer.clone()
    }

    pub fn get_frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn get_keyboard_matrix(&self) -> Shared<[u8; 16]> {
        self.keyboard_matrix.clone()
    }

    /// The CIA1 FLAG input, driven by the datassette read line.
    pub fn get_cassette_pin(&self) -> Shared<Pin> {
        self.cassette_pin.clone()
    }

    pub fn get_message_queue(&self) -> Shared<MessageQueue> {
        self.message_queue.clone()
    }

    pub fn is_warp(&self) -> bool {
        self.pacer.is_warp()
    }

    pub fn set_warp(&mut self, warp: bool) {
        if self.pacer.is_warp() != warp {
            self.pacer.set_warp(warp);
            self.message_queue
                .borrow_mut()
                .put(if warp { Message::WarpOn } else { Message::WarpOff });
        }
    }

    // -- Control

    pub fn load(&mut self, data: &[u8], offset: u16) {
        let mut ram = self.ram.borrow_mut();
        let mut address = offset;
        for byte in data {
            ram.write(address, *byte);
            address = address.wrapping_add(1);
        }
    }

    /// Reset the host side of the machine. The drive is a separate
    /// computer and resets on its own via `get_drive()`; the IEC bus is
    /// reset independently as well.
    pub fn reset(&mut self, hard: bool) {
        info!(target: "c64", "Resetting system");
        if hard {
            self.ram.borrow_mut().fill(0x00);
            self.color_ram.borrow_mut().fill(0x00);
        }
        self.cpu.reset();
        self.cia_1.borrow_mut().reset();
        self.cia_2.borrow_mut().reset();
        self.sid.borrow_mut().reset();
        self.vic.borrow_mut().reset();
        self.expansion_port.borrow_mut().reset();
        self.frame_buffer.borrow_mut().reset();
        self.irq_line.borrow_mut().reset();
        self.nmi_line.borrow_mut().reset();
        self.ba_low_cycles = 0;
        self.frame_count = 0;
    }

    pub fn reset_iec(&mut self) {
        self.iec.borrow_mut().reset();
    }

    /// Advance the whole machine by one system cycle.
    pub fn execute_one_cycle(&mut self) {
        // First clock phase (phi1, bus owned by the VIC)
        self.vic.borrow_mut().clock();
        let now = self.clock.get();
        let wake_up = self.cia_1.borrow().wake_up_cycle();
        if now >= wake_up {
            self.cia_1.borrow_mut().clock();
        } else {
            self.cia_1.borrow_mut().count_idle();
        }
        let wake_up = self.cia_2.borrow().wake_up_cycle();
        if now >= wake_up {
            self.cia_2.borrow_mut().clock();
        } else {
            self.cia_2.borrow_mut().count_idle();
        }
        self.update_iec();

        // Second clock phase (phi2, bus owned by the CPU). After three
        // consecutive cycles with BA low the CPU yields completely.
        let ba_low = self.ba_line.borrow().is_low();
        let stalled = ba_low && self.ba_low_cycles >= 3;
        if !stalled {
            self.cpu.clock();
        }
        if ba_low {
            self.ba_low_cycles += 1;
        } else {
            self.ba_low_cycles = 0;
        }
        let drive_connected = self.drive.borrow().is_connected();
        if drive_connected {
            self.drive.borrow_mut().execute(self.cycle_duration);
        }
        self.clock.tick();
    }

    /// Run until the end of the current frame, then handle the frame
    /// boundary chores and pace against the wall clock.
    pub fn run_frame(&mut self) {
        loop {
            self.execute_one_cycle();
            if self.frame_buffer.borrow().get_sync() {
                break;
            }
        }
        self.end_frame();
    }

    /// Run the machine until the CPU sits at a clean instruction fetch
    /// boundary, used before suspension.
    pub fn step_into(&mut self) {
        // Finish the current instruction
        while !self.cpu.is_fetch_cycle() {
            self.execute_one_cycle();
        }
        // Execute the fetch cycle and stop there
        self.execute_one_cycle();
    }

    fn end_frame(&mut self) {
        self.frame_count = self.frame_count.wrapping_add(1);
        // The TOD clocks tick with the mains reference
        self.cia_1.borrow_mut().process_vsync();
        self.cia_2.borrow_mut().process_vsync();
        self.sid.borrow_mut().process_vsync();
        {
            let mut frame_buffer = self.frame_buffer.borrow_mut();
            frame_buffer.swap();
            frame_buffer.set_sync(false);
        }
        self.message_queue.borrow_mut().put(Message::Vsync);
        self.pacer.synchronize();
    }

    /// Recompute the serial bus when flagged dirty. This runs in phi1
    /// of the cycle after the register write, breaking the cyclic
    /// CIA/VIA update.
    fn update_iec(&mut self) {
        let (latch, direction) = {
            let port = self.cia_2_port_a.borrow();
            (port.get_output(), port.get_direction())
        };
        let mut iec = self.iec.borrow_mut();
        iec.update_cia_pins(latch, direction);
        if iec.is_dirty() {
            iec.update();
            let clock_line = iec.get_clock_line();
            let data_line = iec.get_data_line();
            drop(iec);
            let mut port = self.cia_2_port_a.borrow_mut();
            port.set_input_bit(6, clock_line);
            port.set_input_bit(7, data_line);
        }
    }

    // -- Peripherals

    pub fn attach_cartridge(&mut self, cartridge: Box<dyn Cartridge>) {
        self.expansion_port.borrow_mut().attach(cartridge);
    }

    pub fn detach_cartridge(&mut self) {
        self.expansion_port.borrow_mut().detach();
        self.reset(false);
    }

    // -- Snapshots

    pub fn save_snapshot(&self) -> Snapshot {
        let screenshot = {
            let frame_buffer = self.frame_buffer.borrow();
            let (width, height) = frame_buffer.get_dimension();
            Screenshot {
                width: width as u16,
                height: height as u16,
                pixels: frame_buffer.stable().to_vec(),
            }
        };
        let mut snapshot = Snapshot::new(screenshot);

        let mut writer = Writer::new();
        writer.write_u64(self.clock.get());
        writer.write_u32(self.frame_count);
        writer.write_u32(self.ba_low_cycles);
        let port = self.cpu_io_port.borrow();
        writer.write_u8(port.get_direction());
        writer.write_u8(port.get_output());
        drop(port);
        snapshot.add_record(record::FRAME_STATE, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        writer.write_bytes(self.ram.borrow().as_bytes());
        snapshot.add_record(record::RAM, flags::KEEP_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        writer.write_bytes(self.color_ram.borrow().as_bytes());
        snapshot.add_record(record::COLOR_RAM, flags::KEEP_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.cpu.save_state(&mut writer);
        snapshot.add_record(record::CPU, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.cia_1.borrow().save(&mut writer);
        snapshot.add_record(record::CIA_1, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.cia_2.borrow().save(&mut writer);
        snapshot.add_record(record::CIA_2, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.vic.borrow().save(&mut writer);
        snapshot.add_record(record::VIC, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.iec.borrow().save(&mut writer);
        snapshot.add_record(record::IEC, flags::CLEAR_ON_RESET, writer.into_bytes());

        let mut writer = Writer::new();
        self.drive.borrow().save(&mut writer);
        snapshot.add_record(record::DRIVE, flags::KEEP_ON_RESET, writer.into_bytes());

        snapshot
    }

    /// Atomic restore: on any failure the previous state is put back
    /// and the error reported.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), String> {
        let backup = self.save_snapshot();
        match self.apply_snapshot(snapshot) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.apply_snapshot(&backup)
                    .expect("backup snapshot must apply");
                Err(error)
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), String> {
        fn payload(snapshot: &Snapshot, tag: u8) -> Result<&[u8], String> {
            snapshot
                .record(tag)
                .ok_or_else(|| format!("snapshot record 0x{:02x} missing", tag))
        }
        // Check that every record is present before touching anything
        for tag in &[
            record::FRAME_STATE,
            record::RAM,
            record::COLOR_RAM,
            record::CPU,
            record::CIA_1,
            record::CIA_2,
            record::VIC,
            record::IEC,
            record::DRIVE,
        ] {
            payload(snapshot, *tag)?;
        }

        let mut reader = Reader::new(payload(snapshot, record::FRAME_STATE)?);
        self.clock.set(reader.read_u64()?);
        self.frame_count = reader.read_u32()?;
        self.ba_low_cycles = reader.read_u32()?;
        let direction = reader.read_u8()?;
        let output = reader.read_u8()?;
        {
            let mut port = self.cpu_io_port.borrow_mut();
            port.set_direction(direction);
            port.set_value(output);
        }

        let data = payload(snapshot, record::RAM)?;
        if data.len() != self.ram.borrow().capacity() {
            return Err("ram record has wrong size".to_string());
        }
        self.ram.borrow_mut().set_bytes(data);

        let data = payload(snapshot, record::COLOR_RAM)?;
        if data.len() != self.color_ram.borrow().capacity() {
            return Err("color ram record has wrong size".to_string());
        }
        self.color_ram.borrow_mut().set_bytes(data);

        let mut reader = Reader::new(payload(snapshot, record::CPU)?);
        self.cpu.restore_state(&mut reader)?;
        let mut reader = Reader::new(payload(snapshot, record::CIA_1)?);
        self.cia_1.borrow_mut().restore(&mut reader)?;
        let mut reader = Reader::new(payload(snapshot, record::CIA_2)?);
        self.cia_2.borrow_mut().restore(&mut reader)?;
        let mut reader = Reader::new(payload(snapshot, record::VIC)?);
        self.vic.borrow_mut().restore(&mut reader)?;
        let mut reader = Reader::new(payload(snapshot, record::IEC)?);
        self.iec.borrow_mut().restore(&mut reader)?;
        let mut reader = Reader::new(payload(snapshot, record::DRIVE)?);
        self.drive.borrow_mut().restore(&mut reader)?;
        Ok(())
    }
}
