// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use ferro64::core::{new_shared, Chip, IrqLine, Pin, Shared};
use ferro64::drive::via::{reg, Mode as ViaMode};
use ferro64::drive::{disk, Drive, IecBus, Via};
use ferro64::system::{MessageQueue, NullCpu};

struct TestBench {
    drive: Drive,
    via1: Shared<Via>,
    via2: Shared<Via>,
    iec: Shared<IecBus>,
}

fn setup_drive() -> TestBench {
    let iec = new_shared(IecBus::new());
    let message_queue = new_shared(MessageQueue::new());
    let drive_irq = new_shared(IrqLine::new("drive irq"));
    let so_pin = new_shared(Pin::new_high());
    let via1 = new_shared(Via::new(ViaMode::Via1, drive_irq.clone()));
    let via2 = new_shared(Via::new(ViaMode::Via2, drive_irq));
    let mut drive = Drive::new(
        Box::new(NullCpu::new()),
        via1.clone(),
        via2.clone(),
        iec.clone(),
        message_queue,
        so_pin,
    );
    drive.reset();
    drive.set_connected(true);
    TestBench {
        drive,
        via1,
        via2,
        iec,
    }
}

fn run_cycles(bench: &mut TestBench, cycles: u64) {
    // One drive cycle lasts 10000 tenths of a nanosecond
    bench.drive.execute(cycles * 10_000);
}

fn test_image() -> Vec<u8> {
    let mut image = vec![0u8; 174_848];
    for (i, byte) in image.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    // Disk id in the BAM
    let bam: usize = (0..17).map(|t| disk::sectors_in_track(t + 1) * 256).sum();
    image[bam + 0xa2] = b'F';
    image[bam + 0xa3] = b'6';
    image
}

fn spin_up(bench: &mut TestBench) {
    let mut via2 = bench.via2.borrow_mut();
    via2.write(reg::DDRB, 0x6f);
    via2.write(reg::ORB, 0x04); // motor on
    drop(via2);
    run_cycles(bench, 1);
}

#[test]
fn stepper_moves_head_in_halftracks() {
    let mut bench = setup_drive();
    assert_eq!(41, bench.drive.get_halftrack());
    {
        let mut via2 = bench.via2.borrow_mut();
        via2.write(reg::DDRB, 0x6f);
        via2.write(reg::ORB, 0x01);
    }
    run_cycles(&mut bench, 1);
    assert_eq!(42, bench.drive.get_halftrack());
    bench.via2.borrow_mut().write(reg::ORB, 0x02);
    run_cycles(&mut bench, 1);
    assert_eq!(43, bench.drive.get_halftrack());
    bench.via2.borrow_mut().write(reg::ORB, 0x01);
    run_cycles(&mut bench, 1);
    assert_eq!(42, bench.drive.get_halftrack());
}

#[test]
fn unexpected_stepper_sequence_is_ignored() {
    let mut bench = setup_drive();
    {
        let mut via2 = bench.via2.borrow_mut();
        via2.write(reg::DDRB, 0x6f);
        via2.write(reg::ORB, 0x02); // two phases at once
    }
    run_cycles(&mut bench, 1);
    assert_eq!(41, bench.drive.get_halftrack());
}

#[test]
fn disk_rotates_only_with_motor_on() {
    let mut bench = setup_drive();
    bench.drive.insert_d64(&test_image()).unwrap();
    run_cycles(&mut bench, 100);
    assert_eq!(false, bench.drive.is_rotating());
    assert_eq!(false, bench.drive.get_sync());
    spin_up(&mut bench);
    assert_eq!(true, bench.drive.is_rotating());
}

#[test]
fn sync_is_detected_from_the_bit_stream() {
    let mut bench = setup_drive();
    bench.drive.insert_d64(&test_image()).unwrap();
    spin_up(&mut bench);
    // The encoded track starts with a sync run; ten bit cells at zone 1
    // speed are well under 100 drive cycles
    let mut seen = false;
    for _ in 0..200 {
        run_cycles(&mut bench, 1);
        if bench.drive.get_sync() {
            seen = true;
            break;
        }
    }
    assert!(seen, "sync mark never detected");
    // The sense bit on VIA2 port B reads low while under the mark
    assert_eq!(0x00, bench.via2.borrow_mut().read(reg::ORB) & 0x80);
}

#[test]
fn byte_ready_latches_header_byte() {
    let mut bench = setup_drive();
    bench.drive.insert_d64(&test_image()).unwrap();
    spin_up(&mut bench);
    // The first byte behind the first sync is the header block id 0x08,
    // which encodes to GCR 0x52. Partial sync bytes latch 0xff first.
    let mut latched = 0;
    for _ in 0..2000 {
        run_cycles(&mut bench, 1);
        let value = bench.via2.borrow_mut().read(reg::ORA);
        if value != 0 && value != 0xff {
            latched = value;
            break;
        }
    }
    assert_eq!(0x52, latched);
}

#[test]
fn write_protect_sense_pulses_on_disk_change() {
    let mut bench = setup_drive();
    bench.drive.insert_d64(&test_image()).unwrap();
    run_cycles(&mut bench, 2);
    // Right after insertion the sensor reports a protected disk
    assert_eq!(0x00, bench.via2.borrow_mut().read(reg::ORB) & 0x10);
    // The light barrier settles after roughly 200 ms
    run_cycles(&mut bench, 200_001);
    assert_eq!(0x10, bench.via2.borrow_mut().read(reg::ORB) & 0x10);
}

#[test]
fn d64_round_trip_through_the_drive() {
    let mut bench = setup_drive();
    let image = test_image();
    bench.drive.insert_d64(&image).unwrap();
    let exported = bench.drive.export_d64().unwrap();
    assert!(image == exported);
}

#[test]
fn device_pins_drive_the_bus() {
    let mut bench = setup_drive();
    {
        let mut via1 = bench.via1.borrow_mut();
        via1.write(reg::DDRB, 0x1a);
        via1.write(reg::ORB, 0x08); // pull clock
    }
    run_cycles(&mut bench, 1);
    {
        let mut iec = bench.iec.borrow_mut();
        if iec.is_dirty() {
            iec.update();
        }
    }
    assert_eq!(false, bench.iec.borrow().get_clock_line());
    assert_eq!(true, bench.iec.borrow().get_atn_line());
}

#[test]
fn atn_edge_interrupts_the_drive_cpu() {
    let mut bench = setup_drive();
    bench.via1.borrow_mut().write(reg::IER, 0x80 | 0x02); // CA1
    // The computer asserts ATN
    {
        let mut iec = bench.iec.borrow_mut();
        iec.update_cia_pins(0x08, 0x3f);
        iec.update();
    }
    run_cycles(&mut bench, 1);
    assert_eq!(0x02, bench.via1.borrow_mut().read(reg::IFR) & 0x02);
}
