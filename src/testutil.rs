//! Test fixtures: synthetic module images and a recording kernel.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::module::elf::section_type::{SHT_NULL, SHT_PROGBITS, SHT_STRTAB};
use crate::module::loader::{KernelModules, UnloadFlags};
use crate::module::modinfo;

/// Relocatable ELF64 little-endian image containing the given sections.
pub fn elf_image(sections: &[(&str, &[u8])]) -> Vec<u8> {
    build_image(sections, true, true)
}

/// Relocatable ELF32 big-endian image containing the given sections.
pub fn elf32_be_image(sections: &[(&str, &[u8])]) -> Vec<u8> {
    build_image(sections, false, false)
}

/// A module image whose `.modinfo` holds the given `key=value` entries.
pub fn module_image(entries: &[&str]) -> Vec<u8> {
    let mut modinfo = Vec::new();
    for entry in entries {
        modinfo.extend_from_slice(entry.as_bytes());
        modinfo.push(0);
    }
    elf_image(&[(".text", b"\xc3"), (".modinfo", &modinfo)])
}

/// Write `<dir>/<name>.ko` declaring `name` and `depends`.
pub fn write_module(dir: &Path, name: &str, depends: &[&str], aliases: &[&str]) -> PathBuf {
    let name_entry = format!("name={}", name);
    let depends_entry = format!("depends={}", depends.join(","));
    let alias_entries: Vec<String> = aliases.iter().map(|a| format!("alias={}", a)).collect();

    let mut entries = vec!["license=GPL", name_entry.as_str(), depends_entry.as_str()];
    entries.extend(alias_entries.iter().map(String::as_str));

    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{}.ko", name));
    fs::write(&path, module_image(&entries)).unwrap();
    path
}

fn build_image(sections: &[(&str, &[u8])], is_64: bool, little: bool) -> Vec<u8> {
    let put16 = |out: &mut Vec<u8>, v: u16| {
        out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() })
    };
    let put32 = |out: &mut Vec<u8>, v: u32| {
        out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() })
    };
    let put_word = |out: &mut Vec<u8>, v: u64| {
        if is_64 {
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() })
        } else {
            let v = v as u32;
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() })
        }
    };

    let header_len: usize = if is_64 { 64 } else { 52 };
    let shentsize: usize = if is_64 { 64 } else { 40 };

    // Section name string table: "\0" + each name + ".shstrtab".
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    // Body: section contents back to back after the header.
    let mut body = Vec::new();
    let mut placements = Vec::new();
    for (_, data) in sections {
        placements.push(((header_len + body.len()) as u64, data.len() as u64));
        body.extend_from_slice(data);
    }
    let shstrtab_offset = (header_len + body.len()) as u64;
    body.extend_from_slice(&shstrtab);
    while (header_len + body.len()) % 8 != 0 {
        body.push(0);
    }
    let shoff = (header_len + body.len()) as u64;
    let shnum = sections.len() as u16 + 2;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    out.push(if is_64 { 2 } else { 1 });
    out.push(if little { 1 } else { 2 });
    out.push(1);
    out.resize(16, 0);
    put16(&mut out, 1); // ET_REL
    put16(&mut out, if is_64 { 62 } else { 20 });
    put32(&mut out, 1);
    put_word(&mut out, 0); // e_entry
    put_word(&mut out, 0); // e_phoff
    put_word(&mut out, shoff);
    put32(&mut out, 0);
    put16(&mut out, header_len as u16);
    put16(&mut out, 0);
    put16(&mut out, 0);
    put16(&mut out, shentsize as u16);
    put16(&mut out, shnum);
    put16(&mut out, shnum - 1);
    assert_eq!(out.len(), header_len);
    out.extend_from_slice(&body);

    let write_header = |out: &mut Vec<u8>, name: u32, kind: u32, offset: u64, size: u64| {
        let start = out.len();
        put32(out, name);
        put32(out, kind);
        put_word(out, 0); // flags
        put_word(out, 0); // addr
        put_word(out, offset);
        put_word(out, size);
        put32(out, 0); // link
        put32(out, 0); // info
        put_word(out, 1); // addralign
        put_word(out, 0); // entsize
        assert_eq!(out.len() - start, shentsize);
    };

    write_header(&mut out, 0, SHT_NULL, 0, 0);
    for (i, (offset, size)) in placements.iter().enumerate() {
        write_header(&mut out, name_offsets[i], SHT_PROGBITS, *offset, *size);
    }
    write_header(&mut out, shstrtab_name, SHT_STRTAB, shstrtab_offset, shstrtab.len() as u64);

    out
}

/// Kernel stand-in that records the module name of every inserted image.
#[derive(Default)]
pub struct RecordingKernel {
    inserted: Mutex<Vec<String>>,
    removed: Mutex<Vec<(String, u32)>>,
    reject: Mutex<HashMap<String, i32>>,
}

impl RecordingKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert of `name` fail with `errno`.
    pub fn reject(&self, name: &str, errno: i32) {
        self.reject.lock().unwrap().insert(name.to_string(), errno);
    }

    pub fn inserted(&self) -> Vec<String> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(String, u32)> {
        self.removed.lock().unwrap().clone()
    }
}

impl KernelModules for RecordingKernel {
    fn init_module(&self, image: &[u8], _params: &CStr) -> io::Result<()> {
        let name = modinfo::image_name(image).unwrap_or_default();
        if let Some(errno) = self.reject.lock().unwrap().get(&name) {
            return Err(io::Error::from_raw_os_error(*errno));
        }
        self.inserted.lock().unwrap().push(name);
        Ok(())
    }

    fn delete_module(&self, name: &CStr, flags: UnloadFlags) -> io::Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push((name.to_string_lossy().into_owned(), flags.bits()));
        Ok(())
    }
}
