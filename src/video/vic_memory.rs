// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::core::{IoPort, Ram, Rom, Shared};

/// The VIC sees 16 KiB of memory selected by the inverted lower two
/// bits of CIA2 port A. The character ROM shadows RAM at $1000 and
/// $9000 in the VIC address space.
pub struct VicMemory {
    charset: Shared<Rom>,
    cia_2_port_a: Shared<IoPort>,
    ram: Shared<Ram>,
}

impl VicMemory {
    pub fn new(charset: Shared<Rom>, cia_2_port_a: Shared<IoPort>, ram: Shared<Ram>) -> VicMemory {
        VicMemory {
            charset,
            cia_2_port_a,
            ram,
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        let bank = ((!self.cia_2_port_a.borrow().get_value() & 0x03) as u16) << 14;
        let full_address = bank | address;
        match full_address & 0xf000 {
            0x1000 => self.charset.borrow().read(full_address - 0x1000),
            0x9000 => self.charset.borrow().read(full_address - 0x9000),
            _ => self.ram.borrow().read(full_address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::new_shared;

    #[test]
    fn charset_shadows_bank_0() {
        let charset = new_shared(Rom::new(0x1000, 0, 0xaa));
        let port = new_shared(IoPort::new(0x00, 0xff));
        let ram = new_shared(Ram::new(0x10000));
        let mem = VicMemory::new(charset, port, ram.clone());
        ram.borrow_mut().write(0x1400, 0x55);
        assert_eq!(0xaa, mem.read(0x1400));
        ram.borrow_mut().write(0x0400, 0x55);
        assert_eq!(0x55, mem.read(0x0400));
    }
}
