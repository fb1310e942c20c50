//! In-memory ELF image builder for tests.
//!
//! Depends only on `std` so the integration tests can include this file
//! with `#[path]` and share the builder.

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

#[derive(Clone, Copy)]
enum Class {
    Elf32,
    Elf64,
}

impl Class {
    fn header_size(self) -> usize {
        match self {
            Class::Elf32 => 52,
            Class::Elf64 => 64,
        }
    }

    fn phdr_size(self) -> usize {
        match self {
            Class::Elf32 => 32,
            Class::Elf64 => 56,
        }
    }
}

/// Kernel-half offset applied to virtual addresses, so tests notice when
/// the physical address is not the one being used.
const KERNBASE: u64 = 0xf000_0000;

struct Header {
    p_type: u32,
    paddr: u64,
    data: Vec<u8>,
    mem_size: u64,
}

pub struct ElfBuilder {
    class: Class,
    entry: u64,
    headers: Vec<Header>,
}

impl ElfBuilder {
    pub fn elf32(entry: u64) -> Self {
        Self {
            class: Class::Elf32,
            entry,
            headers: Vec::new(),
        }
    }

    pub fn elf64(entry: u64) -> Self {
        Self {
            class: Class::Elf64,
            entry,
            headers: Vec::new(),
        }
    }

    pub fn load(self, paddr: u64, data: &[u8], mem_size: u64) -> Self {
        self.header(PT_LOAD, paddr, data, mem_size)
    }

    pub fn header(mut self, p_type: u32, paddr: u64, data: &[u8], mem_size: u64) -> Self {
        self.headers.push(Header {
            p_type,
            paddr,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let ehsize = self.class.header_size();
        let phentsize = self.class.phdr_size();
        let phoff = ehsize;
        let mut data_off = phoff + phentsize * self.headers.len();

        let mut out = vec![0u8; data_off];
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = match self.class {
            Class::Elf32 => 1,
            Class::Elf64 => 2,
        };
        out[5] = 1;
        out[6] = 1;
        put(&mut out, 0x10, 2, 2);
        match self.class {
            Class::Elf32 => {
                put(&mut out, 0x12, 2, 3);
                put(&mut out, 0x14, 4, 1);
                put(&mut out, 0x18, 4, self.entry);
                put(&mut out, 0x1c, 4, phoff as u64);
                put(&mut out, 0x28, 2, ehsize as u64);
                put(&mut out, 0x2a, 2, phentsize as u64);
                put(&mut out, 0x2c, 2, self.headers.len() as u64);
            }
            Class::Elf64 => {
                put(&mut out, 0x12, 2, 0x3e);
                put(&mut out, 0x14, 4, 1);
                put(&mut out, 0x18, 8, self.entry);
                put(&mut out, 0x20, 8, phoff as u64);
                put(&mut out, 0x34, 2, ehsize as u64);
                put(&mut out, 0x36, 2, phentsize as u64);
                put(&mut out, 0x38, 2, self.headers.len() as u64);
            }
        }

        let mut payload = Vec::new();
        for (i, h) in self.headers.iter().enumerate() {
            let ph = phoff + i * phentsize;
            let file_size = h.data.len() as u64;
            let vaddr = h.paddr + KERNBASE;
            match self.class {
                Class::Elf32 => {
                    put(&mut out, ph, 4, h.p_type as u64);
                    put(&mut out, ph + 0x04, 4, data_off as u64);
                    put(&mut out, ph + 0x08, 4, vaddr);
                    put(&mut out, ph + 0x0c, 4, h.paddr);
                    put(&mut out, ph + 0x10, 4, file_size);
                    put(&mut out, ph + 0x14, 4, h.mem_size);
                    put(&mut out, ph + 0x18, 4, 7);
                    put(&mut out, ph + 0x1c, 4, 0x1000);
                }
                Class::Elf64 => {
                    put(&mut out, ph, 4, h.p_type as u64);
                    put(&mut out, ph + 0x04, 4, 7);
                    put(&mut out, ph + 0x08, 8, data_off as u64);
                    put(&mut out, ph + 0x10, 8, vaddr);
                    put(&mut out, ph + 0x18, 8, h.paddr);
                    put(&mut out, ph + 0x20, 8, file_size);
                    put(&mut out, ph + 0x28, 8, h.mem_size);
                    put(&mut out, ph + 0x30, 8, 0x1000);
                }
            }
            payload.extend_from_slice(&h.data);
            data_off += h.data.len();
        }
        out.extend_from_slice(&payload);
        out
    }
}

fn put(buf: &mut [u8], off: usize, width: usize, value: u64) {
    buf[off..off + width].copy_from_slice(&value.to_le_bytes()[..width]);
}

/// Deterministic non-zero byte pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}
