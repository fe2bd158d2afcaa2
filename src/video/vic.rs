// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::{info, log_enabled, trace, Level};

use crate::core::{Chip, IrqControl, IrqLine, Pin, Ram, Shared, Snapshotable, VicModel};
use crate::core::snapshot::{Reader, Result, Writer};

use super::border_unit::BorderUnit;
use super::frame_buffer::FrameBuffer;
use super::gfx_sequencer::{GfxSequencer, Mode};
use super::mux_unit::MuxUnit;
use super::spec::Spec;
use super::sprite_sequencer::{Mode as SpriteMode, SpriteSequencer};
use super::vic_memory::VicMemory;

// SPEC: The MOS 6567/6569 video controller (VIC-II) and its application
//       in the Commodore 64 (Christian Bauer)

/*
6569, Bad Line, no sprites:

Cycl-# 6                   1 1 1 1 1 1 1 1 1 1 2 2 2 2 2 2 2 2 2 2 3 3 3 3 3 3 3 3 3 3 4 4 4 4 4 4 4 4 4 4 5 5 5 5 5 5 5 5 5 5 6 6 6 6
       3 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 1
       __
   IRQ   ________________________________________________________________________________________________________________________________
       ________________________                                                                                      ____________________
    BA                         ______________________________________________________________________________________
        _ _ _ _ _ _ _ _ _ _ _ _ _ _ _                                                                                 _ _ _ _ _ _ _ _ _ _
   AEC _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _________________________________________________________________________________ _ _ _ _ _ _ _ _ _

   VIC i 3 i 4 i 5 i 6 i 7 i r r r r rcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcgcg i i 0 i 1 i 2 i 3
  6510  x x x x x x x x x x x x X X X                                                                                 x x x x x x x x x x
*/

#[derive(Copy, Clone)]
pub enum IrqSource {
    Vic = 2,
}

impl IrqSource {
    pub fn value(self) -> usize {
        self as usize
    }
}

pub struct Vic {
    // Dependencies
    spec: Spec,
    ba_line: Shared<Pin>,
    color_ram: Shared<Ram>,
    frame_buffer: Shared<FrameBuffer>,
    irq_line: Shared<IrqLine>,
    mem: VicMemory,
    // Functional Units
    border_unit: BorderUnit,
    gfx_seq: GfxSequencer,
    interrupt_control: IrqControl,
    mux_unit: MuxUnit,
    sprites: [SpriteSequencer; 8],
    // Configuration
    char_base: u16,
    den: bool,
    raster_compare: u16,
    video_matrix: u16,
    x_scroll: u8,
    y_scroll: u8,
    // Light pen latch, armed once per frame
    lp_triggered: bool,
    lp_x: u8,
    lp_y: u8,
    // Registers
    mc: [u8; 8],
    mc_base: [u8; 8],
    raster_cycle: u16,
    raster_y: u16,
    rc: u8,
    refresh_counter: u8,
    vc: u16,
    vc_base: u16,
    vmli: usize,
    // Runtime State
    den_set_in_30: bool,
    display_state: bool,
    is_bad_line: bool,
    sprite_ptrs: [u16; 8],
    vm_color_line: [u8; 40],
    vm_data_line: [u8; 40],
}

impl Vic {
    pub fn new(
        chip_model: VicModel,
        ba_line: Shared<Pin>,
        color_ram: Shared<Ram>,
        irq_line: Shared<IrqLine>,
        frame_buffer: Shared<FrameBuffer>,
        mem: VicMemory,
    ) -> Vic {
        info!(target: "video", "Initializing VIC");
        let spec = Spec::new(chip_model);
        let sprites = [
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
            SpriteSequencer::new(),
        ];
        Vic {
            spec,
            ba_line,
            color_ram,
            frame_buffer,
            irq_line,
            mem,
            border_unit: BorderUnit::new(spec.x_offset()),
            gfx_seq: GfxSequencer::new(),
            interrupt_control: IrqControl::new(),
            mux_unit: MuxUnit::new(),
            sprites,
            char_base: 0,
            den: false,
            raster_compare: 0,
            video_matrix: 0,
            x_scroll: 0,
            y_scroll: 0,
            lp_triggered: false,
            lp_x: 0,
            lp_y: 0,
            mc: [0; 8],
            mc_base: [0; 8],
            raster_cycle: 1,
            raster_y: 0,
            rc: 0,
            refresh_counter: 0,
            vc: 0,
            vc_base: 0,
            vmli: 0,
            den_set_in_30: false,
            display_state: false,
            is_bad_line: false,
            sprite_ptrs: [0; 8],
            vm_color_line: [0; 40],
            vm_data_line: [0; 40],
        }
    }

    pub fn spec(&self) -> Spec {
        self.spec
    }

    pub fn raster_position(&self) -> (u16, u16) {
        (self.raster_y, self.raster_cycle)
    }

    /// Latch the light pen position. Only the first trigger per frame
    /// registers.
    pub fn trigger_lightpen(&mut self) {
        if !self.lp_triggered {
            self.lp_triggered = true;
            self.lp_x = (((self.raster_cycle - 1) << 3) >> 1) as u8;
            self.lp_y = (self.raster_y & 0xff) as u8;
            self.trigger_irq(3);
        }
    }

    #[inline]
    fn trigger_irq(&mut self, source: usize) {
        self.interrupt_control.set_event(source);
        if self.interrupt_control.is_triggered() {
            if log_enabled!(target: "vic::reg", Level::Trace) {
                trace!(target: "vic::reg", "Irq data = {:02x}, mask = {:02x}, source: {}",
                       self.interrupt_control.get_data(),
                       self.interrupt_control.get_mask(),
                       source
                );
            }
            self.irq_line
                .borrow_mut()
                .set_low(IrqSource::Vic.value(), true);
        }
    }

    /*
    Section: 3.10. Display Enable
    A Bad Line Condition can only occur if the DEN bit has been set for
    at least one cycle somewhere in raster line $30.
    */
    #[inline]
    fn update_display_on(&mut self) {
        if self.raster_y == 0x30 && self.den {
            self.den_set_in_30 = true;
        }
    }

    /*
    Section: 3.5. Bad Lines
    A Bad Line Condition is given at any arbitrary clock cycle, if at the
    negative edge of phi0 at the beginning of the cycle RASTER >= $30 and
    RASTER <= $f7 and the lower three bits of RASTER are equal to YSCROLL
    and if the DEN bit was set during an arbitrary cycle of raster line
    $30.
    */
    #[inline]
    fn update_bad_line(&mut self) {
        self.is_bad_line = self.den_set_in_30
            && self.raster_y >= 0x30
            && self.raster_y <= 0xf7
            && (self.raster_y & 0x07) as u8 == self.y_scroll;
    }

    /// Sprite pointer and data fetch schedule. The eight sprites occupy
    /// two cycle slots each, starting five cycles before the end of the
    /// line and wrapping into cycles 1..10 of the next one.
    #[inline]
    fn sprite_slot(&self, cycle: u16) -> Option<(usize, bool)> {
        let base = self.spec.cycles_per_raster - 5;
        let idx = if cycle >= base {
            cycle - base
        } else {
            cycle + 5
        };
        if idx < 16 {
            Some(((idx >> 1) as usize, idx & 1 == 0))
        } else {
            None
        }
    }

    /// BA goes low three cycles before a sprite's pointer fetch and
    /// stays low through its data fetches.
    fn sprite_ba(&self, cycle: u16) -> bool {
        let base = (self.spec.cycles_per_raster - 5) as i16;
        let mut idx = cycle as i16 - base;
        if idx < -3 {
            idx += self.spec.cycles_per_raster as i16;
        }
        for (n, sprite) in self.sprites.iter().enumerate() {
            if sprite.dma {
                let p = (2 * n) as i16;
                if idx >= p - 3 && idx <= p + 1 {
                    return true;
                }
            }
        }
        false
    }

    /*
    Section: 3.8. Sprites
    3. In the first phases of cycle 55 and 56, the VIC checks for every
       sprite if the corresponding MxE bit in register $d015 is set and
       the Y coordinate of the sprite matches the lower 8 bits of
       RASTER. If this is the case and the DMA for the sprite is still
       off, the DMA is switched on, MCBASE is cleared, and if the MxYE
       bit is set the expansion flip flop is reset.
    */
    fn update_sprite_dma_on(&mut self) {
        for n in 0..8 {
            let sprite = &mut self.sprites[n];
            if sprite.config.enabled
                && sprite.config.y == (self.raster_y & 0xff) as u8
                && !sprite.dma
            {
                sprite.dma = true;
                self.mc_base[n] = 0;
                if sprite.config.expand_y {
                    sprite.expansion_flop = false;
                }
            }
        }
    }

    // -- Memory Ops

    #[inline]
    fn c_access(&mut self) {
        if self.is_bad_line {
            let address = self.video_matrix | self.vc;
            self.vm_data_line[self.vmli] = self.mem.read(address);
            self.vm_color_line[self.vmli] = self.color_ram.borrow().read(self.vc) & 0x0f;
        }
    }

    #[inline]
    fn g_access(&mut self) {
        if self.display_state {
            let g_data = match self.gfx_seq.config.mode {
                Mode::Text | Mode::McText => {
                    let address = self.char_base
                        | ((self.vm_data_line[self.vmli] as u16) << 3)
                        | self.rc as u16;
                    self.mem.read(address)
                }
                Mode::EcmText | Mode::InvalidText => {
                    let address = self.char_base
                        | (((self.vm_data_line[self.vmli] & 0x3f) as u16) << 3)
                        | self.rc as u16;
                    self.mem.read(address)
                }
                Mode::Bitmap | Mode::McBitmap => {
                    let address = (self.char_base & 0x2000) | (self.vc << 3) | self.rc as u16;
                    self.mem.read(address)
                }
                Mode::InvalidBitmap1 | Mode::InvalidBitmap2 => {
                    let address =
                        ((self.char_base & 0x2000) | (self.vc << 3) | self.rc as u16) & 0x39ff;
                    self.mem.read(address)
                }
            };
            let c_data = self.vm_data_line[self.vmli];
            let c_color = self.vm_color_line[self.vmli];
            self.gfx_seq.set_data(c_data, c_color, g_data);
            /*
            Section: 3.7.2. VC and RC
            4. VC and VMLI are incremented after each g-access in display
               state.
            */
            self.vc = (self.vc + 1) & 0x03ff;
            self.vmli = (self.vmli + 1) & 0x3f;
        } else {
            // Idle access to $3fff ($39ff with ECM set)
            let address = if self.gfx_seq.config.mode.value() & 0x04 != 0 {
                0x39ff
            } else {
                0x3fff
            };
            let g_data = self.mem.read(address);
            self.gfx_seq.set_data(0, 0, g_data);
        }
    }

    #[inline]
    fn p_access(&mut self, n: usize) {
        let address = self.video_matrix | 0x03f8 | n as u16;
        self.sprite_ptrs[n] = (self.mem.read(address) as u16) << 6;
    }

    /*
    Section: 3.8. Sprites
    5. If the DMA for a sprite is turned on, three s-accesses are done in
       sequence in the corresponding cycles assigned to the sprite. The
       p-accesses are always done, even if the sprite is turned off. The
       read data of the first access is stored in the upper 8 bits of the
       shift register, that of the second one in the middle 8 bits and
       that of the third one in the lower 8 bits. MC is incremented by
       one after each s-access.
    */
    #[inline]
    fn s_access(&mut self, n: usize, byte: usize) {
        let address = self.sprite_ptrs[n] | self.mc[n] as u16;
        let data = self.mem.read(address);
        self.sprites[n].set_data(byte, data);
        self.mc[n] = (self.mc[n] + 1) & 0x3f;
    }

    // -- Pixel pipeline

    fn draw_cycle(&mut self) {
        let x_start = (self.raster_cycle - 1) << 3;
        let y = self.raster_y;
        let in_gfx_window = self.raster_cycle >= 16 && self.raster_cycle <= 55;
        for i in 0..8u16 {
            let x = x_start + i;
            self.border_unit.update_main_flop(x, y, self.den);
            if in_gfx_window && i == self.x_scroll as u16 {
                self.gfx_seq.load_data();
            }
            let mut sprite_output = [None; 8];
            for (n, sprite) in self.sprites.iter_mut().enumerate() {
                sprite.clock(x);
                sprite_output[n] = sprite.output();
            }
            if !self.border_unit.is_enabled() {
                self.gfx_seq.clock();
                self.mux_unit.feed_graphics(self.gfx_seq.output());
                self.mux_unit.compute_collisions(&sprite_output);
                self.mux_unit.feed_sprites(&sprite_output);
                let pixel = self.mux_unit.output();
                self.frame_buffer.borrow_mut().write(x, y, pixel);
            } else {
                // Sprites are hidden by the border but still collide
                self.mux_unit.feed_border(self.border_unit.output());
                self.mux_unit.compute_collisions(&sprite_output);
                self.frame_buffer
                    .borrow_mut()
                    .write(x, y, self.border_unit.output());
            }
            if self.mux_unit.mm_interrupt {
                self.mux_unit.mm_interrupt = false;
                self.trigger_irq(2);
            }
            if self.mux_unit.mb_interrupt {
                self.mux_unit.mb_interrupt = false;
                self.trigger_irq(1);
            }
        }
    }
}

impl Chip for Vic {
    fn clock(&mut self) {
        self.update_display_on();
        self.update_bad_line();
        if self.is_bad_line {
            self.display_state = true;
        }
        let cycle = self.raster_cycle;

        // Raster compare fires in cycle 1, except for line 0 where it
        // fires in cycle 2
        if cycle == 1 && self.raster_y != 0 && self.raster_y == self.raster_compare {
            self.trigger_irq(0);
        }
        if cycle == 2 && self.raster_y == 0 && self.raster_compare == 0 {
            self.trigger_irq(0);
        }

        // Structural per-cycle actions
        match cycle {
            11..=15 => {
                // r-access
                self.refresh_counter = self.refresh_counter.wrapping_sub(1);
            }
            _ => {}
        }
        if cycle == 14 {
            /*
            Section: 3.7.2. VC and RC
            2. In the first phase of cycle 14 of each line, VC is loaded
               from VCBASE and VMLI is cleared. If there is a Bad Line
               Condition in this phase, RC is also reset to zero.
            */
            self.vc = self.vc_base;
            self.vmli = 0;
            if self.is_bad_line {
                self.rc = 0;
            }
        }
        if cycle == 15 {
            for i in 0..8 {
                if self.sprites[i].expansion_flop {
                    self.mc_base[i] = (self.mc_base[i] + 2) & 0x3f;
                }
            }
        }
        if cycle == 16 {
            /*
            Section: 3.8. Sprites
            8. In the first phase of cycle 16, it is checked if the
               expansion flip flop is set. If so, MCBASE is incremented
               by 1. After that, the VIC checks if MCBASE is equal to 63
               and turns off the DMA and the display of the sprite if it
               is.
            */
            for i in 0..8 {
                if self.sprites[i].expansion_flop {
                    self.mc_base[i] = (self.mc_base[i] + 1) & 0x3f;
                }
                if self.mc_base[i] == 63 {
                    let sprite = &mut self.sprites[i];
                    sprite.dma = false;
                    sprite.display = false;
                }
            }
        }
        if cycle == 55 {
            /*
            2. If the MxYE bit is set in the first phase of cycle 55, the
               expansion flip flop is inverted.
            */
            for sprite in self.sprites.iter_mut() {
                if sprite.config.expand_y {
                    sprite.expansion_flop = !sprite.expansion_flop;
                }
            }
            self.update_sprite_dma_on();
        }
        if cycle == 56 {
            self.update_sprite_dma_on();
        }
        if cycle == 58 {
            /*
            Section: 3.7.2. VC and RC
            5. In the first phase of cycle 58, the VIC checks if RC=7. If
               so, the video logic goes to idle state and VCBASE is
               loaded from VC. If the video logic is in display state
               afterwards, RC is incremented.
            */
            if self.rc == 7 {
                self.display_state = false;
                self.vc_base = self.vc;
            }
            if self.is_bad_line {
                self.display_state = true;
            }
            if self.display_state {
                self.rc = (self.rc + 1) & 0x07;
            }
            /*
            4. In the first phase of cycle 58, the MC of every sprite is
               loaded from its belonging MCBASE and it is checked if the
               DMA for the sprite is turned on and the Y coordinate of
               the sprite matches the lower 8 bits of RASTER. If this is
               the case, the display of the sprite is turned on.
            */
            for i in 0..8 {
                self.mc[i] = self.mc_base[i];
                let sprite = &mut self.sprites[i];
                if sprite.dma && sprite.config.y == (self.raster_y & 0xff) as u8 {
                    sprite.display = true;
                }
            }
        }

        // Memory accesses: g before c, so the g-access consumes the
        // matrix data fetched in the previous cycle
        if let Some((n, first)) = self.sprite_slot(cycle) {
            if first {
                self.p_access(n);
                if self.sprites[n].dma {
                    self.s_access(n, 0);
                }
            } else if self.sprites[n].dma {
                self.s_access(n, 1);
                self.s_access(n, 2);
            }
        }
        if cycle >= 16 && cycle <= 55 {
            self.g_access();
        }
        if cycle >= 15 && cycle <= 54 {
            self.c_access();
        }

        // BA line
        let ba_low = self.sprite_ba(cycle) || (self.is_bad_line && cycle >= 12 && cycle <= 54);
        self.ba_line.borrow_mut().set_active(!ba_low);

        // Pixels
        self.draw_cycle();

        // Vertical border flip flop is checked in the last cycle of the
        // line
        if cycle == self.spec.cycles_per_raster {
            self.border_unit.update_vertical_flop(self.raster_y, self.den);
        }

        // Update counters/vsync
        self.raster_cycle += 1;
        if self.raster_cycle > self.spec.cycles_per_raster {
            self.raster_cycle = 1;
            self.raster_y += 1;
            if self.raster_y >= self.spec.raster_lines {
                self.raster_y = 0;
                /*
                Section: 3.7.2. VC and RC
                1. Once somewhere outside of the range of raster lines
                   $30-$f7, VCBASE is reset to zero. This is presumably
                   done in raster line 0.
                */
                self.vc_base = 0;
                self.den_set_in_30 = false;
                self.lp_triggered = false;
                let mut rt = self.frame_buffer.borrow_mut();
                rt.set_sync(true);
            }
        }
    }

    fn clock_delta(&mut self, delta: u32) {
        for _ in 0..delta {
            self.clock();
        }
    }

    fn process_vsync(&mut self) {}

    fn reset(&mut self) {
        self.border_unit.reset();
        self.gfx_seq.reset();
        self.interrupt_control.reset();
        self.mux_unit.reset();
        for sprite in self.sprites.iter_mut() {
            sprite.reset();
        }
        self.char_base = 0x1000;
        self.den = true;
        self.raster_compare = 0;
        self.video_matrix = 0x0400;
        self.x_scroll = 0;
        self.y_scroll = 3;
        self.lp_triggered = false;
        self.lp_x = 0;
        self.lp_y = 0;
        self.mc = [0; 8];
        self.mc_base = [0; 8];
        self.raster_cycle = 1;
        self.raster_y = 0;
        self.rc = 0;
        self.refresh_counter = 0xff;
        self.vc = 0;
        self.vc_base = 0;
        self.vmli = 0;
        self.den_set_in_30 = false;
        self.display_state = false;
        self.is_bad_line = false;
        self.sprite_ptrs = [0; 8];
        self.vm_color_line = [0; 40];
        self.vm_data_line = [0; 40];
    }

    // I/O

    fn read(&mut self, reg: u8) -> u8 {
        let value = match reg {
            // Reg::M0X - Reg::M7X
            0x00 | 0x02 | 0x04 | 0x06 | 0x08 | 0x0a | 0x0c | 0x0e => {
                (self.sprites[(reg >> 1) as usize].config.x & 0x00ff) as u8
            }
            // Reg::M0Y - Reg::M7Y
            0x01 | 0x03 | 0x05 | 0x07 | 0x09 | 0x0b | 0x0d | 0x0f => {
                self.sprites[((reg - 1) >> 1) as usize].config.y
            }
            // Reg::MX8
            0x10 => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.sprites[i].config.x.get_bit(8));
                }
                result
            }
            // Reg::CR1
            0x11 => {
                let mut result = 0u8;
                result
                    .set_bit(7, self.raster_y.get_bit(8))
                    .set_bit(6, self.gfx_seq.config.mode.value().get_bit(2))
                    .set_bit(5, self.gfx_seq.config.mode.value().get_bit(1))
                    .set_bit(4, self.den)
                    .set_bit(3, self.border_unit.config.rsel);
                result | (self.y_scroll & 0x07)
            }
            // Reg::RASTER
            0x12 => (self.raster_y & 0x00ff) as u8,
            // Reg::LPX
            0x13 => self.lp_x,
            // Reg::LPY
            0x14 => self.lp_y,
            // Reg::ME
            0x15 => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.sprites[i].config.enabled);
                }
                result
            }
            // Reg::CR2
            0x16 => {
                let mut result = 0u8;
                result
                    .set_bit(4, self.gfx_seq.config.mode.value().get_bit(0))
                    .set_bit(3, self.border_unit.config.csel);
                result | (self.x_scroll & 0x07) | 0xc0 | 0x20
            }
            // Reg::MYE
            0x17 => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.sprites[i].config.expand_y);
                }
                result
            }
            // Reg::MEMPTR
            0x18 => {
                let vm = (((self.video_matrix & 0x3c00) >> 10) as u8) << 4;
                let cb = (((self.char_base & 0x3800) >> 11) as u8) << 1;
                vm | cb | 0x01
            }
            // Reg::IRR
            0x19 => self.interrupt_control.get_data() | 0x70,
            // Reg::IMR
            0x1a => self.interrupt_control.get_mask() | 0xf0,
            // Reg::MDP
            0x1b => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.mux_unit.config.data_priority[i]);
                }
                result
            }
            // Reg::MMC
            0x1c => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.sprites[i].config.mode == SpriteMode::Multicolor);
                }
                result
            }
            // Reg::MXE
            0x1d => {
                let mut result = 0u8;
                for i in 0..8 {
                    result.set_bit(i, self.sprites[i].config.expand_x);
                }
                result
            }
            // Reg::MM, cleared on read
            0x1e => self.mux_unit.take_mm_collision(),
            // Reg::MD, cleared on read
            0x1f => self.mux_unit.take_mb_collision(),
            // Reg::EC
            0x20 => self.border_unit.config.border_color | 0xf0,
            // Reg::B0C - Reg::B3C
            0x21..=0x24 => self.gfx_seq.config.bg_color[(reg - 0x21) as usize] | 0xf0,
            // Reg::MM0 - Reg::MM1
            0x25..=0x26 => self.sprites[0].config.multicolor[(reg - 0x25) as usize] | 0xf0,
            // Reg::M0C - Reg::M7C
            0x27..=0x2e => self.sprites[(reg - 0x27) as usize].config.color | 0xf0,
            _ => 0xff,
        };
        if log_enabled!(target: "vic::reg", Level::Trace) {
            trace!(target: "vic::reg", "Read 0x{:02x} = 0x{:02x}", reg, value);
        }
        value
    }

    fn write(&mut self, reg: u8, value: u8) {
        if log_enabled!(target: "vic::reg", Level::Trace) {
            trace!(target: "vic::reg", "Write 0x{:02x} = 0x{:02x}", reg, value);
        }
        match reg {
            // Reg::M0X - Reg::M7X
            0x00 | 0x02 | 0x04 | 0x06 | 0x08 | 0x0a | 0x0c | 0x0e => {
                let n = (reg >> 1) as usize;
                self.sprites[n].config.x = (self.sprites[n].config.x & 0xff00) | value as u16;
                self.sprites[n].config.x_screen = self.spec.map_x(self.sprites[n].config.x);
            }
            // Reg::M0Y - Reg::M7Y
            0x01 | 0x03 | 0x05 | 0x07 | 0x09 | 0x0b | 0x0d | 0x0f => {
                let n = ((reg - 1) >> 1) as usize;
                self.sprites[n].config.y = value;
            }
            // Reg::MX8
            0x10 => {
                for i in 0..8 {
                    self.sprites[i].config.x.set_bit(8, value.get_bit(i));
                    self.sprites[i].config.x_screen = self.spec.map_x(self.sprites[i].config.x);
                }
            }
            // Reg::CR1
            0x11 => {
                let mut new_compare = self.raster_compare;
                new_compare.set_bit(8, value.get_bit(7));
                if self.raster_compare != new_compare && self.raster_y == new_compare {
                    self.trigger_irq(0);
                }
                self.raster_compare = new_compare;
                let mut mode = self.gfx_seq.config.mode.value();
                mode.set_bit(2, value.get_bit(6)).set_bit(1, value.get_bit(5));
                self.gfx_seq.config.mode = Mode::from(mode);
                self.den = value.get_bit(4);
                self.border_unit.config.rsel = value.get_bit(3);
                self.y_scroll = value & 0x07;
                self.update_bad_line();
                if self.is_bad_line {
                    self.display_state = true;
                }
            }
            // Reg::RASTER
            0x12 => {
                let new_value = (self.raster_compare & 0xff00) | value as u16;
                if self.raster_compare != new_value && self.raster_y == new_value {
                    self.trigger_irq(0);
                }
                self.raster_compare = new_value;
            }
            // Reg::LPX/LPY are read only
            0x13 | 0x14 => {}
            // Reg::ME
            0x15 => {
                for i in 0..8 {
                    self.sprites[i].config.enabled = value.get_bit(i);
                }
            }
            // Reg::CR2
            0x16 => {
                let mut mode = self.gfx_seq.config.mode.value();
                mode.set_bit(0, value.get_bit(4));
                self.gfx_seq.config.mode = Mode::from(mode);
                self.border_unit.config.csel = value.get_bit(3);
                self.x_scroll = value & 0x07;
            }
            // Reg::MYE
            0x17 => {
                for i in 0..8 {
                    self.sprites[i].config.expand_y = value.get_bit(i);
                    /*
                    Section: 3.8. Sprites
                    1. The expansion flip flop is set as long as the bit
                       in MxYE in register $d017 corresponding to the
                       sprite is cleared.
                    */
                    if !self.sprites[i].config.expand_y {
                        self.sprites[i].expansion_flop = true;
                    }
                }
            }
            // Reg::MEMPTR
            0x18 => {
                self.video_matrix = (((value & 0xf0) >> 4) as u16) << 10;
                self.char_base = (((value & 0x0e) >> 1) as u16) << 11;
            }
            // Reg::IRR, writing ones acknowledges interrupt sources
            0x19 => {
                self.interrupt_control.clear_events(value & 0x0f);
                if !self.interrupt_control.is_triggered() {
                    self.irq_line
                        .borrow_mut()
                        .set_low(IrqSource::Vic.value(), false);
                }
            }
            // Reg::IMR
            0x1a => {
                self.interrupt_control.set_mask(value & 0x0f);
                self.irq_line.borrow_mut().set_low(
                    IrqSource::Vic.value(),
                    self.interrupt_control.is_triggered(),
                );
            }
            // Reg::MDP
            0x1b => {
                for i in 0..8 {
                    self.mux_unit.config.data_priority[i] = value.get_bit(i);
                }
            }
            // Reg::MMC
            0x1c => {
                for i in 0..8 {
                    self.sprites[i].config.mode = if value.get_bit(i) {
                        SpriteMode::Multicolor
                    } else {
                        SpriteMode::Standard
                    };
                }
            }
            // Reg::MXE
            0x1d => {
                for i in 0..8 {
                    self.sprites[i].config.expand_x = value.get_bit(i);
                }
            }
            // Reg::MM/MD are read only
            0x1e | 0x1f => {}
            // Reg::EC
            0x20 => self.border_unit.config.border_color = value & 0x0f,
            // Reg::B0C - Reg::B3C
            0x21..=0x24 => self.gfx_seq.config.bg_color[reg as usize - 0x21] = value & 0x0f,
            // Reg::MM0 - Reg::MM1
            0x25..=0x26 => {
                for i in 0..8 {
                    self.sprites[i].config.multicolor[reg as usize - 0x25] = value & 0x0f;
                }
            }
            // Reg::M0C - Reg::M7C
            0x27..=0x2e => self.sprites[reg as usize - 0x27].config.color = value & 0x0f,
            _ => {}
        }
    }
}

impl Snapshotable for Vic {
    fn save(&self, writer: &mut Writer) {
        writer.write_u16(self.char_base);
        writer.write_bool(self.den);
        writer.write_u16(self.raster_compare);
        writer.write_u16(self.video_matrix);
        writer.write_u8(self.x_scroll);
        writer.write_u8(self.y_scroll);
        writer.write_bool(self.lp_triggered);
        writer.write_u8(self.lp_x);
        writer.write_u8(self.lp_y);
        writer.write_bytes(&self.mc);
        writer.write_bytes(&self.mc_base);
        writer.write_u16(self.raster_cycle);
        writer.write_u16(self.raster_y);
        writer.write_u8(self.rc);
        writer.write_u8(self.refresh_counter);
        writer.write_u16(self.vc);
        writer.write_u16(self.vc_base);
        writer.write_u8(self.vmli as u8);
        writer.write_bool(self.den_set_in_30);
        writer.write_bool(self.display_state);
        writer.write_bool(self.is_bad_line);
        for ptr in &self.sprite_ptrs {
            writer.write_u16(*ptr);
        }
        writer.write_bytes(&self.vm_color_line);
        writer.write_bytes(&self.vm_data_line);
        // Border unit
        writer.write_u8(self.border_unit.config.border_color);
        writer.write_bool(self.border_unit.config.csel);
        writer.write_bool(self.border_unit.config.rsel);
        let (main_flop, vertical_flop) = self.border_unit.snapshot_state();
        writer.write_bool(main_flop);
        writer.write_bool(vertical_flop);
        // Graphics sequencer
        writer.write_u8(self.gfx_seq.config.mode.value());
        writer.write_bytes(&self.gfx_seq.config.bg_color);
        let (c_data, c_color, g_data, data, mc_flop) = self.gfx_seq.snapshot_state();
        writer.write_u8(c_data);
        writer.write_u8(c_color);
        writer.write_u8(g_data);
        writer.write_u8(data);
        writer.write_bool(mc_flop);
        // Interrupt control
        writer.write_u8(self.interrupt_control.get_raw_data());
        writer.write_u8(self.interrupt_control.get_mask());
        // Mux unit
        writer.write_u8(self.mux_unit.mb_collision);
        writer.write_u8(self.mux_unit.mm_collision);
        for i in 0..8 {
            writer.write_bool(self.mux_unit.config.data_priority[i]);
        }
        // Sprites
        for sprite in &self.sprites {
            writer.write_u8(sprite.config.mode as u8);
            writer.write_u8(sprite.config.color);
            writer.write_bool(sprite.config.enabled);
            writer.write_bool(sprite.config.expand_x);
            writer.write_bool(sprite.config.expand_y);
            writer.write_bytes(&sprite.config.multicolor);
            writer.write_u16(sprite.config.x);
            writer.write_u16(sprite.config.x_screen);
            writer.write_u8(sprite.config.y);
            let (counter, data, delay_cycles, display, dma, expansion_flop) =
                sprite.snapshot_state();
            writer.write_u32(counter);
            writer.write_u32(data);
            writer.write_u8(delay_cycles);
            writer.write_bool(display);
            writer.write_bool(dma);
            writer.write_bool(expansion_flop);
        }
    }

    fn restore(&mut self, reader: &mut Reader) -> Result<()> {
        self.char_base = reader.read_u16()?;
        self.den = reader.read_bool()?;
        self.raster_compare = reader.read_u16()?;
        self.video_matrix = reader.read_u16()?;
        self.x_scroll = reader.read_u8()?;
        self.y_scroll = reader.read_u8()?;
        self.lp_triggered = reader.read_bool()?;
        self.lp_x = reader.read_u8()?;
        self.lp_y = reader.read_u8()?;
        reader.read_bytes(&mut self.mc)?;
        reader.read_bytes(&mut self.mc_base)?;
        self.raster_cycle = reader.read_u16()?;
        self.raster_y = reader.read_u16()?;
        self.rc = reader.read_u8()?;
        self.refresh_counter = reader.read_u8()?;
        self.vc = reader.read_u16()?;
        self.vc_base = reader.read_u16()?;
        self.vmli = reader.read_u8()? as usize;
        self.den_set_in_30 = reader.read_bool()?;
        self.display_state = reader.read_bool()?;
        self.is_bad_line = reader.read_bool()?;
        for i in 0..8 {
            self.sprite_ptrs[i] = reader.read_u16()?;
        }
        reader.read_bytes(&mut self.vm_color_line)?;
        reader.read_bytes(&mut self.vm_data_line)?;
        self.border_unit.config.border_color = reader.read_u8()?;
        self.border_unit.config.csel = reader.read_bool()?;
        self.border_unit.config.rsel = reader.read_bool()?;
        let main_flop = reader.read_bool()?;
        let vertical_flop = reader.read_bool()?;
        self.border_unit.restore_state(main_flop, vertical_flop);
        self.gfx_seq.config.mode = Mode::from(reader.read_u8()?);
        reader.read_bytes(&mut self.gfx_seq.config.bg_color)?;
        let c_data = reader.read_u8()?;
        let c_color = reader.read_u8()?;
        let g_data = reader.read_u8()?;
        let data = reader.read_u8()?;
        let mc_flop = reader.read_bool()?;
        self.gfx_seq.restore_state((c_data, c_color, g_data, data, mc_flop));
        let irr = reader.read_u8()?;
        let imr = reader.read_u8()?;
        self.interrupt_control.set_raw_data(irr);
        self.interrupt_control.set_mask(imr);
        self.mux_unit.mb_collision = reader.read_u8()?;
        self.mux_unit.mm_collision = reader.read_u8()?;
        for i in 0..8 {
            self.mux_unit.config.data_priority[i] = reader.read_bool()?;
        }
        for sprite in self.sprites.iter_mut() {
            sprite.config.mode = if reader.read_u8()? != 0 {
                SpriteMode::Multicolor
            } else {
                SpriteMode::Standard
            };
            sprite.config.color = reader.read_u8()?;
            sprite.config.enabled = reader.read_bool()?;
            sprite.config.expand_x = reader.read_bool()?;
            sprite.config.expand_y = reader.read_bool()?;
            reader.read_bytes(&mut sprite.config.multicolor)?;
            sprite.config.x = reader.read_u16()?;
            sprite.config.x_screen = reader.read_u16()?;
            sprite.config.y = reader.read_u8()?;
            let counter = reader.read_u32()?;
            let data = reader.read_u32()?;
            let delay_cycles = reader.read_u8()?;
            let display = reader.read_bool()?;
            let dma = reader.read_bool()?;
            let expansion_flop = reader.read_bool()?;
            sprite.restore_state((counter, data, delay_cycles, display, dma, expansion_flop));
        }
        self.irq_line.borrow_mut().set_low(
            IrqSource::Vic.value(),
            self.interrupt_control.is_triggered(),
        );
        Ok(())
    }
}
