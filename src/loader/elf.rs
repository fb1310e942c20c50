//! ELF program header table parsing.
//!
//! Only the main header and the program header table are read; section
//! headers are ignored. Both little-endian ELF32 and ELF64 images are
//! accepted.
//!
//! ## Header layout
//!
//! ```text
//!              ELF32   ELF64
//! e_entry      0x18    0x18   (4 / 8 bytes)
//! e_phoff      0x1c    0x20   (4 / 8 bytes)
//! e_phentsize  0x2a    0x36
//! e_phnum      0x2c    0x38
//! ```

use std::io::{Read, Seek};

use crate::error::{Error, Result};
use crate::loader::image::ImageSource;
use crate::memory::{is_page_aligned, GuestPhysicalRange};

/// ELF magic: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// Program header type of a loadable segment.
pub const PT_LOAD: u32 = 1;

const EI_NIDENT: usize = 16;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;

const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

/// ELF file class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn from_ident(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(ElfClass::Elf32),
            2 => Some(ElfClass::Elf64),
            _ => None,
        }
    }

    /// Size of the main ELF header.
    pub const fn header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    /// Minimum size of one program header entry.
    pub const fn phdr_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }
}

/// A loadable segment described by one `PT_LOAD` program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Guest physical load address
    pub guest_paddr: u64,
    /// Offset of the segment's bytes in the image
    pub file_offset: u64,
    /// Bytes backed by the image
    pub file_size: u64,
    /// Bytes occupied in guest memory; `[file_size, mem_size)` is zeroed
    pub mem_size: u64,
}

impl Segment {
    /// Guest physical range occupied by the segment.
    pub fn range(&self) -> GuestPhysicalRange {
        GuestPhysicalRange::new(self.guest_paddr, self.mem_size)
    }
}

/// Parsed ELF image: entry point and loadable segments in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    pub class: ElfClass,
    pub entry: u64,
    pub segments: Vec<Segment>,
}

/// Program header table reader.
pub struct ElfProgramTable;

impl ElfProgramTable {
    /// Parse the ELF header and program header table of `source`.
    ///
    /// Any structural problem is reported as [`Error::InvalidFormat`]
    /// before the caller allocates anything.
    pub fn parse<R: Read + Seek>(source: &mut ImageSource<R>) -> Result<ElfImage> {
        let mut ident = [0u8; EI_NIDENT];
        source
            .read_exact_at(0, &mut ident)
            .map_err(|e| truncated(e, "ELF identification"))?;

        if ident[0..4] != ELF_MAGIC {
            return Err(Error::invalid_format("bad ELF magic"));
        }
        let class = ElfClass::from_ident(ident[EI_CLASS]).ok_or_else(|| {
            Error::invalid_format(format!("unknown ELF class {}", ident[EI_CLASS]))
        })?;
        if ident[EI_DATA] != ELFDATA2LSB {
            return Err(Error::invalid_format("not a little-endian ELF file"));
        }
        if ident[EI_VERSION] != EV_CURRENT {
            return Err(Error::invalid_format(format!(
                "unsupported ELF version {}",
                ident[EI_VERSION]
            )));
        }

        let mut header = vec![0u8; class.header_size()];
        header[..EI_NIDENT].copy_from_slice(&ident);
        source
            .read_exact(&mut header[EI_NIDENT..])
            .map_err(|e| truncated(e, "ELF header"))?;

        let (entry, phoff, phentsize, phnum) = match class {
            ElfClass::Elf32 => (
                le_u32(&header, 0x18) as u64,
                le_u32(&header, 0x1c) as u64,
                le_u16(&header, 0x2a) as usize,
                le_u16(&header, 0x2c) as usize,
            ),
            ElfClass::Elf64 => (
                le_u64(&header, 0x18),
                le_u64(&header, 0x20),
                le_u16(&header, 0x36) as usize,
                le_u16(&header, 0x38) as usize,
            ),
        };

        log::debug!(
            target: "elf",
            "{:?} image: entry 0x{:x}, {} program headers at 0x{:x}",
            class,
            entry,
            phnum,
            phoff
        );

        let mut segments = Vec::new();
        if phnum > 0 {
            if phentsize < class.phdr_size() {
                return Err(Error::invalid_format(format!(
                    "program header entry size {} too small",
                    phentsize
                )));
            }

            let table_len = (phnum * phentsize) as u64;
            match phoff.checked_add(table_len) {
                Some(end) if end <= source.len() => {}
                _ => {
                    return Err(Error::invalid_format(format!(
                        "program header table at 0x{:x} (0x{:x} bytes) lies outside the image",
                        phoff, table_len
                    )))
                }
            }

            let mut table = vec![0u8; phnum * phentsize];
            source
                .read_exact_at(phoff, &mut table)
                .map_err(|e| truncated(e, "program header table"))?;

            for (index, ph) in table.chunks_exact(phentsize).enumerate() {
                if le_u32(ph, 0) != PT_LOAD {
                    continue;
                }
                let segment = parse_segment(class, ph);
                validate_segment(index, &segment)?;
                log::debug!(
                    target: "elf",
                    "segment {}: paddr 0x{:x} offset 0x{:x} filesz 0x{:x} memsz 0x{:x}",
                    index,
                    segment.guest_paddr,
                    segment.file_offset,
                    segment.file_size,
                    segment.mem_size
                );
                segments.push(segment);
            }
        }

        check_overlaps(&segments)?;

        Ok(ElfImage {
            class,
            entry,
            segments,
        })
    }
}

fn parse_segment(class: ElfClass, ph: &[u8]) -> Segment {
    // ELF32: type, offset, vaddr, paddr, filesz, memsz (all 4 bytes)
    // ELF64: type, flags, offset, vaddr, paddr, filesz, memsz
    match class {
        ElfClass::Elf32 => Segment {
            file_offset: le_u32(ph, 0x04) as u64,
            guest_paddr: le_u32(ph, 0x0c) as u64,
            file_size: le_u32(ph, 0x10) as u64,
            mem_size: le_u32(ph, 0x14) as u64,
        },
        ElfClass::Elf64 => Segment {
            file_offset: le_u64(ph, 0x08),
            guest_paddr: le_u64(ph, 0x18),
            file_size: le_u64(ph, 0x20),
            mem_size: le_u64(ph, 0x28),
        },
    }
}

fn validate_segment(index: usize, segment: &Segment) -> Result<()> {
    if !is_page_aligned(segment.guest_paddr) {
        return Err(Error::UnalignedGuestAddress(segment.guest_paddr));
    }
    if segment.file_size > segment.mem_size {
        return Err(Error::invalid_format(format!(
            "segment {}: file size 0x{:x} exceeds memory size 0x{:x}",
            index, segment.file_size, segment.mem_size
        )));
    }
    if segment.file_offset.checked_add(segment.file_size).is_none() {
        return Err(Error::invalid_format(format!(
            "segment {}: file range overflows",
            index
        )));
    }
    if segment.range().end().is_none() {
        return Err(Error::invalid_format(format!(
            "segment {}: guest range overflows",
            index
        )));
    }
    Ok(())
}

fn check_overlaps(segments: &[Segment]) -> Result<()> {
    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            if a.range().overlaps_pages(&b.range()) {
                return Err(Error::invalid_format(format!(
                    "segments at 0x{:x} and 0x{:x} share guest pages",
                    a.guest_paddr, b.guest_paddr
                )));
            }
        }
    }
    Ok(())
}

fn truncated(err: Error, what: &str) -> Error {
    match err {
        Error::ShortRead { .. } => Error::invalid_format(format!("truncated {}", what)),
        other => other,
    }
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[off..off + 2]);
    u16::from_le_bytes(bytes)
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(bytes)
}

fn le_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}
