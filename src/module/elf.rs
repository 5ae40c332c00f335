//! Minimal ELF reader for kernel module images.
//!
//! Only what metadata extraction needs: validate the identification bytes,
//! walk the section header table and hand out section contents by name.
//! Both ELF classes and both byte orders are accepted because module trees
//! for foreign architectures are cached on the build host.
//!
//! Reference: https://refspecs.linuxfoundation.org/elf/gabi4+/ch4.eheader.html

use thiserror::Error;

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;

/// `e_shstrndx` escape: the real index lives in section 0's `sh_link`.
const SHN_XINDEX: u32 = 0xffff;

/// Section types
pub mod section_type {
    pub const SHT_NULL: u32 = 0;
    pub const SHT_PROGBITS: u32 = 1;
    pub const SHT_STRTAB: u32 = 3;
    pub const SHT_NOBITS: u32 = 8;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElfError {
    #[error("file too short for an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("unsupported ELF class {0}")]
    BadClass(u8),
    #[error("unsupported ELF data encoding {0}")]
    BadEncoding(u8),
    #[error("section header entry size {0} is too small")]
    BadEntrySize(u16),
    #[error("{0} lies outside the file")]
    OutOfBounds(&'static str),
    #[error("section name string table index {0} is out of range")]
    BadStrtabIndex(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The section header fields we care about, widened to 64 bits.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub name: u32,
    pub kind: u32,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
}

/// A borrowed, validated view over an ELF image.
#[derive(Debug)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    class: Class,
    endian: Endian,
    shoff: u64,
    shentsize: u16,
    shnum: u32,
    shstrndx: u32,
}

impl<'a> ElfFile<'a> {
    /// Validate the header and locate the section header table.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < 16 {
            return Err(ElfError::TooShort);
        }
        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        let class = match data[EI_CLASS] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(ElfError::BadClass(other)),
        };
        let endian = match data[EI_DATA] {
            1 => Endian::Little,
            2 => Endian::Big,
            other => return Err(ElfError::BadEncoding(other)),
        };

        let header_len = match class {
            Class::Elf32 => 52,
            Class::Elf64 => 64,
        };
        if data.len() < header_len {
            return Err(ElfError::TooShort);
        }

        let mut elf = ElfFile {
            data,
            class,
            endian,
            shoff: 0,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        };

        let (shoff, shentsize, shnum, shstrndx) = match class {
            Class::Elf32 => (elf.u32_at(32)? as u64, elf.u16_at(46)?, elf.u16_at(48)?, elf.u16_at(50)?),
            Class::Elf64 => (elf.u64_at(40)?, elf.u16_at(58)?, elf.u16_at(60)?, elf.u16_at(62)?),
        };
        elf.shoff = shoff;
        elf.shentsize = shentsize;
        elf.shnum = shnum as u32;
        elf.shstrndx = shstrndx as u32;

        if shoff == 0 {
            // No section header table at all.
            elf.shnum = 0;
            return Ok(elf);
        }

        let min_entsize = match class {
            Class::Elf32 => 40,
            Class::Elf64 => 64,
        };
        if shentsize < min_entsize {
            return Err(ElfError::BadEntrySize(shentsize));
        }

        // Extended numbering: counts that overflow 16 bits spill into section 0.
        if elf.shnum == 0 || elf.shstrndx == SHN_XINDEX {
            elf.shnum = elf.shnum.max(1);
            let first = elf.section_header(0)?;
            if shnum == 0 {
                elf.shnum = u32::try_from(first.size).map_err(|_| ElfError::OutOfBounds("section count"))?;
            }
            if elf.shstrndx == SHN_XINDEX {
                elf.shstrndx = first.link;
            }
        }

        let table_len = (elf.shnum as u64)
            .checked_mul(shentsize as u64)
            .and_then(|len| len.checked_add(shoff))
            .ok_or(ElfError::OutOfBounds("section header table"))?;
        if table_len > data.len() as u64 {
            return Err(ElfError::OutOfBounds("section header table"));
        }

        Ok(elf)
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Read the section header at `index`.
    pub fn section_header(&self, index: u32) -> Result<SectionHeader, ElfError> {
        let base = (index as u64)
            .checked_mul(self.shentsize as u64)
            .and_then(|off| off.checked_add(self.shoff))
            .ok_or(ElfError::OutOfBounds("section header"))?;
        let base = usize::try_from(base).map_err(|_| ElfError::OutOfBounds("section header"))?;

        match self.class {
            Class::Elf32 => Ok(SectionHeader {
                name: self.u32_at(base)?,
                kind: self.u32_at(base + 4)?,
                offset: self.u32_at(base + 16)? as u64,
                size: self.u32_at(base + 20)? as u64,
                link: self.u32_at(base + 24)?,
            }),
            Class::Elf64 => Ok(SectionHeader {
                name: self.u32_at(base)?,
                kind: self.u32_at(base + 4)?,
                offset: self.u64_at(base + 24)?,
                size: self.u64_at(base + 32)?,
                link: self.u32_at(base + 40)?,
            }),
        }
    }

    /// Contents of a section. `SHT_NOBITS` occupies no file space.
    pub fn section_data(&self, header: &SectionHeader) -> Result<&'a [u8], ElfError> {
        if header.kind == section_type::SHT_NOBITS || header.size == 0 {
            return Ok(&[]);
        }
        let end = header
            .offset
            .checked_add(header.size)
            .ok_or(ElfError::OutOfBounds("section data"))?;
        if end > self.data.len() as u64 {
            return Err(ElfError::OutOfBounds("section data"));
        }
        Ok(&self.data[header.offset as usize..end as usize])
    }

    /// Find a section by name and return its contents.
    pub fn section_by_name(&self, name: &str) -> Result<Option<&'a [u8]>, ElfError> {
        if self.shnum == 0 {
            return Ok(None);
        }
        if self.shstrndx >= self.shnum {
            return Err(ElfError::BadStrtabIndex(self.shstrndx));
        }
        let strtab_header = self.section_header(self.shstrndx)?;
        let strtab = self.section_data(&strtab_header)?;

        for index in 0..self.shnum {
            let header = self.section_header(index)?;
            if header.kind == section_type::SHT_NULL {
                continue;
            }
            if section_name(strtab, header.name) == Some(name.as_bytes()) {
                return self.section_data(&header).map(Some);
            }
        }
        Ok(None)
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], ElfError> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|slice| slice.try_into().ok())
            .ok_or(ElfError::OutOfBounds("header field"))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, ElfError> {
        let raw = self.bytes::<2>(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, ElfError> {
        let raw = self.bytes::<4>(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    fn u64_at(&self, offset: usize) -> Result<u64, ElfError> {
        let raw = self.bytes::<8>(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }
}

/// NUL-terminated name at `offset` in a string table.
fn section_name(strtab: &[u8], offset: u32) -> Option<&[u8]> {
    let tail = strtab.get(offset as usize..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    Some(&tail[..end])
}
