use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u8,
    pub data: Vec<u8>,
}

/// Initial contents of data memory, the puc8 `.data` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataImage {
    pub segments: Vec<Segment>,
}

impl DataImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, start_addr: u8, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }

    /// Places `text` at `addr` followed by its zero terminator.
    pub fn add_cstr(&mut self, addr: u8, text: &[u8]) {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text);
        data.push(0);
        self.add_segment(addr, data);
    }
}

/// A simple flat memory storage
#[derive(Debug)]
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u8,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u8) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
        }
    }

    pub fn contains(&self, addr: u8) -> bool {
        let addr = addr as usize;
        let base = self.base_addr as usize;
        addr >= base && addr < base + self.data.len()
    }

    /// One past the last mapped address, which may be 256.
    pub fn end(&self) -> usize {
        self.base_addr as usize + self.data.len()
    }

    pub fn read_u8(&self, addr: u8) -> Option<u8> {
        if self.contains(addr) {
            Some(self.data[(addr - self.base_addr) as usize])
        } else {
            None
        }
    }

    pub fn write_u8(&mut self, addr: u8, value: u8) -> bool {
        if self.contains(addr) {
            self.data[(addr - self.base_addr) as usize] = value;
            true
        } else {
            false
        }
    }

    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        let start = segment.start_addr as usize;
        let end_addr = start + segment.data.len();

        if start >= self.base_addr as usize && end_addr <= self.end() {
            let offset = start - self.base_addr as usize;
            self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
            return true;
        }
        false
    }
}
