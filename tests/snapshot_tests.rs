// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use ferro64::core::{Addressable, SystemModel};
use ferro64::system::snapshot::record;
use ferro64::system::{Config, NullFactory, Roms, Snapshot, C64};

fn setup_c64() -> C64 {
    let config = Rc::new(Config::new(SystemModel::c64_pal()));
    let roms = Roms::empty();
    let mut c64 = C64::new(config, &roms, &NullFactory).unwrap();
    c64.reset(true);
    c64.set_warp(true);
    c64
}

fn poke_some_state(c64: &mut C64) {
    // A running CIA timer, a raster compare, some memory
    let mem = c64.get_mem();
    let mut mem = mem.borrow_mut();
    mem.write(0xdc04, 0x25);
    mem.write(0xdc05, 0x40);
    mem.write(0xdc0d, 0x81);
    mem.write(0xdc0e, 0x11);
    mem.write(0xd012, 0x40);
    mem.write(0xd01a, 0x01);
    mem.write(0x0400, 0x20);
    mem.write(0xd800, 0x0e);
    drop(mem);
    c64.load(&[0xde, 0xad, 0xbe, 0xef], 0xc000);
}

#[test]
fn snapshot_survives_byte_stream_round_trip() {
    let mut c64 = setup_c64();
    poke_some_state(&mut c64);
    for _ in 0..3 {
        c64.run_frame();
    }
    let snapshot = c64.save_snapshot();
    let bytes = snapshot.to_bytes();
    let parsed = Snapshot::from_bytes(&bytes).unwrap();
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
        assert_eq!(snapshot.record(*tag), parsed.record(*tag));
    }
}

/// Restoring a snapshot into a second machine reproduces the saved
/// state byte for byte.
#[test]
fn restore_reproduces_state() {
    let mut c64 = setup_c64();
    poke_some_state(&mut c64);
    for _ in 0..2 {
        c64.run_frame();
    }
    let snapshot = c64.save_snapshot();

    let mut other = setup_c64();
    other.restore_snapshot(&snapshot).unwrap();
    let replica = other.save_snapshot();
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
        assert_eq!(snapshot.record(*tag), replica.record(*tag));
    }
}

/// After a save/load round trip both machines produce identical
/// frames.
#[test]
fn restored_machine_runs_identically() {
    let mut c64 = setup_c64();
    poke_some_state(&mut c64);
    for _ in 0..2 {
        c64.run_frame();
    }
    let snapshot = c64.save_snapshot();

    let mut other = setup_c64();
    other.restore_snapshot(&snapshot).unwrap();

    for _ in 0..3 {
        c64.run_frame();
        other.run_frame();
        assert_eq!(c64.get_cycles(), other.get_cycles());
        let fb_a = c64.get_frame_buffer();
        let fb_b = other.get_frame_buffer();
        assert!(fb_a.borrow().stable() == fb_b.borrow().stable());
    }
    // The interleaved chip state still matches
    let a = c64.save_snapshot();
    let b = other.save_snapshot();
    assert_eq!(a.record(record::CIA_1), b.record(record::CIA_1));
    assert_eq!(a.record(record::VIC), b.record(record::VIC));
}

/// A damaged snapshot is rejected and the machine keeps its state.
#[test]
fn bad_snapshot_leaves_state_untouched() {
    let mut c64 = setup_c64();
    poke_some_state(&mut c64);
    c64.run_frame();
    let cycles = c64.get_cycles();

    // Truncated container fails to parse
    let mut bytes = c64.save_snapshot().to_bytes();
    bytes.truncate(bytes.len() / 2);
    assert!(Snapshot::from_bytes(&bytes).is_err());

    // A structurally valid snapshot with missing records is refused
    // atomically
    let empty = Snapshot::new(ferro64::system::snapshot::Screenshot {
        width: 0,
        height: 0,
        pixels: Vec::new(),
    });
    assert!(c64.restore_snapshot(&empty).is_err());
    assert_eq!(cycles, c64.get_cycles());
    let mem = c64.get_mem();
    assert_eq!(0x20, mem.borrow().read(0x0400));
}

#[test]
fn vsync_message_once_per_frame() {
    use ferro64::system::Message;
    let mut c64 = setup_c64();
    let queue = c64.get_message_queue();
    while queue.borrow_mut().get().is_some() {}
    let start = c64.get_cycles();
    c64.run_frame();
    assert_eq!(19656, c64.get_cycles() - start);
    let mut vsyncs = 0;
    while let Some(message) = queue.borrow_mut().get() {
        if message == Message::Vsync {
            vsyncs += 1;
        }
    }
    assert_eq!(1, vsyncs);
}
