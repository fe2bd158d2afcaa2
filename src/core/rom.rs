// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

pub struct Rom {
    data: Vec<u8>,
    offset: u16,
}

impl Rom {
    pub fn new(capacity: usize, offset: u16, pattern: u8) -> Self {
        Self {
            data: vec![pattern; capacity],
            offset,
        }
    }

    pub fn new_with_data(data: &[u8], offset: u16) -> Self {
        Self {
            data: data.to_vec(),
            offset,
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.data[(address - self.offset) as usize]
    }
}
