// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::core::{Addressable, Chip, Cpu, IoPort, IrqLine, Pin, Shared, SystemModel};

/// Construction hooks for the external collaborators: the two CPU cores
/// and the SID. The system wires up pins and memory and hands them to
/// the factory.
pub trait ChipFactory {
    /// Host 6510. `io_port` is the processor port at $0001, `ba_line`
    /// the bus availability signal from the VIC.
    fn new_cpu(
        &self,
        mem: Shared<dyn Addressable>,
        io_port: Shared<IoPort>,
        ba_line: Shared<Pin>,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
    ) -> Box<dyn Cpu>;

    /// Drive 6502. `so_pin` carries the byte ready signal into the
    /// overflow flag.
    fn new_drive_cpu(
        &self,
        mem: Shared<dyn Addressable>,
        irq_line: Shared<IrqLine>,
        so_pin: Shared<Pin>,
    ) -> Box<dyn Cpu>;

    /// Sound chip, mapped at $d400.
    fn new_sid(&self, model: &SystemModel) -> Shared<dyn Chip>;
}
