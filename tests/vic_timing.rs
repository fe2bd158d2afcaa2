// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use ferro64::core::{new_shared, Chip, IoPort, IrqLine, Pin, Ram, Rom, Shared, VicModel};
use ferro64::video::{FrameBuffer, Vic, VicMemory};

struct TestBench {
    vic: Vic,
    ba_line: Shared<Pin>,
    irq_line: Shared<IrqLine>,
    frame_buffer: Shared<FrameBuffer>,
    ram: Shared<Ram>,
}

fn setup_vic() -> TestBench {
    let ba_line = new_shared(Pin::new_high());
    let irq_line = new_shared(IrqLine::new("irq"));
    let frame_buffer = new_shared(FrameBuffer::new(504, 312));
    let ram = new_shared(Ram::new(0x10000));
    let color_ram = new_shared(Ram::new(1024));
    let charset = new_shared(Rom::new(0x1000, 0, 0x00));
    let cia_2_port_a = new_shared(IoPort::new(0x00, 0xff));
    let mem = VicMemory::new(charset, cia_2_port_a, ram.clone());
    let mut vic = Vic::new(
        VicModel::Mos6569,
        ba_line.clone(),
        color_ram,
        irq_line.clone(),
        frame_buffer.clone(),
        mem,
    );
    vic.reset();
    TestBench {
        vic,
        ba_line,
        irq_line,
        frame_buffer,
        ram,
    }
}

fn run_to(vic: &mut Vic, y: u16, cycle: u16) {
    let mut guard = 0u32;
    while vic.raster_position() != (y, cycle) {
        vic.clock();
        guard += 1;
        assert!(guard < 2 * 63 * 312, "raster position never reached");
    }
}

/// Advancing exactly one frame worth of cycles produces one vsync.
#[test]
fn cycles_per_frame() {
    let mut bench = setup_vic();
    let cycles = 63 * 312;
    for _ in 0..cycles - 1 {
        bench.vic.clock();
        assert_eq!(false, bench.frame_buffer.borrow().get_sync());
    }
    bench.vic.clock();
    assert_eq!(true, bench.frame_buffer.borrow().get_sync());
    assert_eq!((0, 1), bench.vic.raster_position());
}

/// On a bad line BA goes low in cycles 12..54; with the three cycle
/// grace period the CPU loses exactly 40 cycles.
#[test]
fn bad_line_ba_window() {
    let mut bench = setup_vic();
    // y scroll is 3 after reset, so line 0x33 meets the condition
    run_to(&mut bench.vic, 0x33, 1);
    let mut ba_low_cycles = Vec::new();
    let mut stalled = 0;
    let mut low_run = 0u32;
    for cycle in 1..=63 {
        bench.vic.clock();
        if bench.ba_line.borrow().is_low() {
            ba_low_cycles.push(cycle);
            if low_run >= 3 {
                stalled += 1;
            }
            low_run += 1;
        } else {
            low_run = 0;
        }
    }
    let expected: Vec<u16> = (12..=54).collect();
    assert_eq!(expected, ba_low_cycles);
    assert_eq!(40, stalled);
}

/// A line with a different y scroll is not a bad line.
#[test]
fn no_bad_line_without_yscroll_match() {
    let mut bench = setup_vic();
    run_to(&mut bench.vic, 0x34, 1);
    for _ in 1..=63 {
        bench.vic.clock();
        assert_eq!(false, bench.ba_line.borrow().is_low());
    }
}

/// Raster compare interrupt fires in cycle 1 and is acknowledged by
/// writing the interrupt register.
#[test]
fn raster_interrupt() {
    let mut bench = setup_vic();
    bench.vic.write(0x12, 100);
    bench.vic.write(0x1a, 0x01);
    run_to(&mut bench.vic, 100, 1);
    assert_eq!(false, bench.irq_line.borrow().is_low());
    bench.vic.clock(); // line 100, cycle 1
    assert_eq!(true, bench.irq_line.borrow().is_low());
    assert_eq!(0x01, bench.vic.read(0x19) & 0x0f);
    bench.vic.write(0x19, 0x01);
    assert_eq!(false, bench.irq_line.borrow().is_low());
}

/// Suppressing the vertical flip flop comparison in the last cycle of
/// the bottom line keeps the lower border open.
#[test]
fn open_border_trick() {
    let mut bench = setup_vic();
    // Control run: with RSEL untouched the flop closes the border at
    // line 251 and line 252 shows the border color
    run_to(&mut bench.vic, 253, 1);
    assert_eq!(0x0e, bench.frame_buffer.borrow().read(200, 252));

    // Second frame: flip RSEL to 24 rows just before line 251 is
    // checked, so neither 247 nor 251 ever matched
    let mut bench = setup_vic();
    run_to(&mut bench.vic, 250, 1);
    bench.vic.write(0x11, 0x13); // RSEL=0, DEN=1, YSCROLL=3
    run_to(&mut bench.vic, 253, 1);
    // The display window stays open; idle graphics render background
    assert_eq!(0x06, bench.frame_buffer.borrow().read(200, 252));
}

/// Sprite DMA switches on at the matching raster line and stays on for
/// the 21 data rows.
#[test]
fn sprite_dma_window() {
    let mut bench = setup_vic();
    bench.vic.write(0x00, 80); // sprite 0 x
    bench.vic.write(0x01, 100); // sprite 0 y
    bench.vic.write(0x15, 0x01); // enable
    // One line above nothing happens
    run_to(&mut bench.vic, 99, 55);
    bench.vic.clock(); // cycle 55
    assert_eq!(false, bench.ba_line.borrow().is_low());
    // On line 100, DMA turns on in cycle 55 and BA drops for the fetch
    run_to(&mut bench.vic, 100, 55);
    bench.vic.clock(); // cycle 55
    assert_eq!(true, bench.ba_line.borrow().is_low());
    // 21 lines later the DMA window is still active
    run_to(&mut bench.vic, 120, 55);
    bench.vic.clock();
    assert_eq!(true, bench.ba_line.borrow().is_low());
    // After the last data row the DMA is gone
    run_to(&mut bench.vic, 121, 55);
    bench.vic.clock();
    assert_eq!(false, bench.ba_line.borrow().is_low());
}

/// Two overlapping sprites latch a sprite-sprite collision, raise the
/// interrupt once, and the register clears on read.
#[test]
fn sprite_sprite_collision() {
    let mut bench = setup_vic();
    // Both sprite pointers at 0x80 -> data at 0x2000
    bench.ram.borrow_mut().write(0x07f8, 0x80);
    bench.ram.borrow_mut().write(0x07f9, 0x80);
    for offset in 0..63 {
        bench.ram.borrow_mut().write(0x2000 + offset, 0xff);
    }
    bench.vic.write(0x00, 80);
    bench.vic.write(0x01, 100);
    bench.vic.write(0x02, 80);
    bench.vic.write(0x03, 100);
    bench.vic.write(0x15, 0x03);
    bench.vic.write(0x1a, 0x04); // enable sprite-sprite irq
    // Run a full frame so the sprites render
    for _ in 0..63 * 312 {
        bench.vic.clock();
    }
    assert_eq!(true, bench.irq_line.borrow().is_low());
    assert_eq!(0x04, bench.vic.read(0x19) & 0x04);
    assert_eq!(0x03, bench.vic.read(0x1e));
    // Cleared on read
    assert_eq!(0x00, bench.vic.read(0x1e));
    bench.vic.write(0x19, 0x04);
    assert_eq!(false, bench.irq_line.borrow().is_low());
}

/// A sprite alone over background graphics reports no collision.
#[test]
fn single_sprite_has_no_collision() {
    let mut bench = setup_vic();
    bench.ram.borrow_mut().write(0x07f8, 0x80);
    for offset in 0..63 {
        bench.ram.borrow_mut().write(0x2000 + offset, 0xff);
    }
    bench.vic.write(0x00, 80);
    bench.vic.write(0x01, 100);
    bench.vic.write(0x15, 0x01);
    for _ in 0..63 * 312 {
        bench.vic.clock();
    }
    assert_eq!(0x00, bench.vic.read(0x1e));
    assert_eq!(0x00, bench.vic.read(0x1f));
}
