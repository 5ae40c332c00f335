//! `.modinfo` extraction.
//!
//! A module's `.modinfo` section is a run of NUL-terminated `key=value`
//! strings emitted by `MODULE_LICENSE`, `MODULE_ALIAS` and friends.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::elf::ElfFile;
use crate::error::{Error, Result};

pub const MODINFO_SECTION: &str = ".modinfo";

/// Metadata of one kernel module, as stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub license: String,
    /// Glob patterns matched against device modaliases, in declaration order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub aliases: Vec<String>,
    /// Module names (not paths) that must be loaded first.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub depends: Vec<String>,
    /// Absolute when freshly parsed, install-root relative once cached.
    pub path: String,
}

/// Older caches encode empty lists as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ModuleDescriptor {
    /// Apply `.modinfo` section bytes on top of an empty descriptor.
    ///
    /// `name`, `license` and `depends` keep their last occurrence; every
    /// `alias` is appended. Unknown keys and entries without `=` are ignored.
    pub fn from_modinfo(section: &[u8], path: impl Into<String>) -> Self {
        let mut desc = ModuleDescriptor {
            path: path.into(),
            ..Default::default()
        };

        for entry in section.split(|&b| b == 0).filter(|e| !e.is_empty()) {
            let entry = String::from_utf8_lossy(entry);
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            match key {
                "license" => desc.license = value.to_string(),
                "name" => desc.name = value.to_string(),
                "alias" => desc.aliases.push(value.to_string()),
                "depends" => {
                    desc.depends = value
                        .split(',')
                        .filter(|dep| !dep.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }

        desc
    }
}

/// Parse the descriptor of the module image at `path`.
pub fn parse(path: &Path) -> Result<ModuleDescriptor> {
    let image = fs::read(path).map_err(|e| Error::io(path, e))?;
    parse_image(path, &image)
}

/// Parse a descriptor from an image already in memory.
pub fn parse_image(path: &Path, image: &[u8]) -> Result<ModuleDescriptor> {
    let parse_err = |source| Error::Parse {
        path: path.to_path_buf(),
        source,
    };

    let elf = ElfFile::parse(image).map_err(parse_err)?;
    let section = elf
        .section_by_name(MODINFO_SECTION)
        .map_err(parse_err)?
        .ok_or_else(|| Error::not_found(format!("{} in {}", MODINFO_SECTION, path.display())))?;

    Ok(ModuleDescriptor::from_modinfo(section, path.to_string_lossy()))
}

/// Declared module name of an in-memory image, if it has one.
pub fn image_name(image: &[u8]) -> Option<String> {
    let desc = parse_image(Path::new(""), image).ok()?;
    Some(desc.name).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{elf_image, module_image};
    use tempfile::tempdir;

    #[test]
    fn test_extracts_all_recognized_keys() {
        let section = b"name=foo\0license=GPL\0alias=usb:v1*\0alias=usb:v2*\0depends=bar,baz\0";
        let image = elf_image(&[(".modinfo", section)]);
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.ko");
        fs::write(&path, &image).unwrap();

        let desc = parse(&path).unwrap();
        assert_eq!(desc.name, "foo");
        assert_eq!(desc.license, "GPL");
        assert_eq!(desc.aliases, vec!["usb:v1*", "usb:v2*"]);
        assert_eq!(desc.depends, vec!["bar", "baz"]);
        assert_eq!(desc.path, path.to_string_lossy());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let desc = ModuleDescriptor::from_modinfo(
            b"name=a\0license=MIT\0depends=x\0name=b\0license=GPL\0depends=y,z\0",
            "/m.ko",
        );
        assert_eq!(desc.name, "b");
        assert_eq!(desc.license, "GPL");
        assert_eq!(desc.depends, vec!["y", "z"]);
    }

    #[test]
    fn test_empty_depends_and_noise() {
        let desc = ModuleDescriptor::from_modinfo(
            b"depends=\0vermagic=6.12.0 SMP\0garbage\0srcversion=ABC\0\0\0",
            "/m.ko",
        );
        assert!(desc.depends.is_empty());
        assert!(desc.aliases.is_empty());
        assert_eq!(desc.name, "");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let desc = ModuleDescriptor::from_modinfo(b"alias=of:N*T*Cvendor,part=x\0", "/m.ko");
        assert_eq!(desc.aliases, vec!["of:N*T*Cvendor,part=x"]);
    }

    #[test]
    fn test_missing_modinfo_is_not_found() {
        let image = elf_image(&[(".text", b"\xc3")]);
        let err = parse_image(Path::new("/x.ko"), &image).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_malformed_image_is_parse_error() {
        let err = parse_image(Path::new("/x.ko"), b"definitely not an elf file").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = parse(&dir.path().join("absent.ko")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_image_name() {
        assert_eq!(image_name(&module_image(&["name=snd"])), Some("snd".to_string()));
        assert_eq!(image_name(&module_image(&["license=GPL"])), None);
    }

    #[test]
    fn test_decodes_null_lists() {
        let json = r#"{"name":"a","license":"GPL","aliases":null,"depends":null,"path":"lib/a.ko"}"#;
        let desc: ModuleDescriptor = serde_json::from_str(json).unwrap();
        assert!(desc.aliases.is_empty());
        assert!(desc.depends.is_empty());
    }
}
