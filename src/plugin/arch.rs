//! Machine type detection for native modules
//!
//! Reads the executable header of a module (ELF, PE/COFF or Mach-O, including
//! universal binaries) so a module built for another processor is rejected
//! with a distinct error before the OS loader sees it.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Processor architecture of a module or of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Machine {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Other(u32),
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Machine::X86 => write!(f, "x86 (32-bit)"),
            Machine::X86_64 => write!(f, "x86_64 (64-bit)"),
            Machine::Arm => write!(f, "arm (32-bit)"),
            Machine::Aarch64 => write!(f, "aarch64 (64-bit)"),
            Machine::Other(code) => write!(f, "unknown machine {:#x}", code),
        }
    }
}

/// The architecture this host was compiled for
pub const fn host_machine() -> Machine {
    if cfg!(target_arch = "x86_64") {
        Machine::X86_64
    } else if cfg!(target_arch = "x86") {
        Machine::X86
    } else if cfg!(target_arch = "aarch64") {
        Machine::Aarch64
    } else if cfg!(target_arch = "arm") {
        Machine::Arm
    } else {
        Machine::Other(0)
    }
}

// ELF e_machine
const EM_386: u16 = 3;
const EM_ARM: u16 = 40;
const EM_X86_64: u16 = 62;
const EM_AARCH64: u16 = 183;

// PE IMAGE_FILE_MACHINE_*
const PE_I386: u16 = 0x014c;
const PE_ARMNT: u16 = 0x01c4;
const PE_AMD64: u16 = 0x8664;
const PE_ARM64: u16 = 0xaa64;

// Mach-O cputype
const CPU_ARCH_ABI64: u32 = 0x0100_0000;
const CPU_TYPE_X86: u32 = 7;
const CPU_TYPE_ARM: u32 = 12;

const HEADER_PROBE_LEN: u64 = 4096;

fn elf_machine(code: u16) -> Machine {
    match code {
        EM_386 => Machine::X86,
        EM_X86_64 => Machine::X86_64,
        EM_ARM => Machine::Arm,
        EM_AARCH64 => Machine::Aarch64,
        other => Machine::Other(u32::from(other)),
    }
}

fn pe_machine(code: u16) -> Machine {
    match code {
        PE_I386 => Machine::X86,
        PE_AMD64 => Machine::X86_64,
        PE_ARMNT => Machine::Arm,
        PE_ARM64 => Machine::Aarch64,
        other => Machine::Other(u32::from(other)),
    }
}

fn macho_machine(cputype: u32) -> Machine {
    match cputype {
        CPU_TYPE_X86 => Machine::X86,
        t if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => Machine::X86_64,
        CPU_TYPE_ARM => Machine::Arm,
        t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => Machine::Aarch64,
        other => Machine::Other(other),
    }
}

fn u16_at(bytes: &[u8], offset: usize, big_endian: bool) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(if big_endian {
        u16::from_be_bytes(raw)
    } else {
        u16::from_le_bytes(raw)
    })
}

fn u32_at(bytes: &[u8], offset: usize, big_endian: bool) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if big_endian {
        u32::from_be_bytes(raw)
    } else {
        u32::from_le_bytes(raw)
    })
}

/// Offset of the PE header named by a DOS stub, if `bytes` starts with one
fn pe_header_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.get(..2)? != b"MZ" {
        return None;
    }
    usize::try_from(u32_at(bytes, 0x3c, false)?).ok()
}

/// Architectures contained in an executable header
///
/// Returns an empty list when the header is not recognised (or is truncated);
/// the OS loader then has the final word.
pub fn architectures(bytes: &[u8]) -> Vec<Machine> {
    // ELF
    if bytes.starts_with(b"\x7fELF") {
        let big_endian = bytes.get(5) == Some(&2);
        return u16_at(bytes, 18, big_endian)
            .map(|code| vec![elf_machine(code)])
            .unwrap_or_default();
    }

    // PE/COFF behind a DOS stub
    if let Some(offset) = pe_header_offset(bytes) {
        if bytes.get(offset..offset + 4) == Some(b"PE\0\0") {
            return u16_at(bytes, offset + 4, false)
                .map(|code| vec![pe_machine(code)])
                .unwrap_or_default();
        }
        return Vec::new();
    }

    // Mach-O, thin
    match bytes.get(..4) {
        Some([0xce, 0xfa, 0xed, 0xfe]) | Some([0xcf, 0xfa, 0xed, 0xfe]) => {
            return u32_at(bytes, 4, false)
                .map(|cputype| vec![macho_machine(cputype)])
                .unwrap_or_default();
        }
        Some([0xfe, 0xed, 0xfa, 0xce]) | Some([0xfe, 0xed, 0xfa, 0xcf]) => {
            return u32_at(bytes, 4, true)
                .map(|cputype| vec![macho_machine(cputype)])
                .unwrap_or_default();
        }
        _ => {}
    }

    // Mach-O universal: big-endian fat_header followed by 20-byte fat_arch records
    if bytes.get(..4) == Some(&[0xca, 0xfe, 0xba, 0xbe]) {
        let count = u32_at(bytes, 4, true).unwrap_or(0) as usize;
        // Java class files share this magic; real universal binaries hold few slices
        if count == 0 || count > 16 {
            return Vec::new();
        }
        return (0..count)
            .filter_map(|i| u32_at(bytes, 8 + i * 20, true))
            .map(macho_machine)
            .collect();
    }

    Vec::new()
}

/// Read enough of a module file to determine its architectures
pub fn module_architectures(path: &Path) -> io::Result<Vec<Machine>> {
    let mut file = File::open(path)?;
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN as usize);
    (&mut file).take(HEADER_PROBE_LEN).read_to_end(&mut header)?;

    // The PE header can sit beyond the probe window
    if let Some(offset) = pe_header_offset(&header) {
        if offset + 6 > header.len() {
            let mut pe = [0u8; 6];
            file.seek(SeekFrom::Start(offset as u64))?;
            if file.read_exact(&mut pe).is_ok() {
                header.resize(offset, 0);
                header.extend_from_slice(&pe);
            }
        }
    }

    Ok(architectures(&header))
}

/// The module's architecture if it is known and cannot run in this process
pub fn incompatible_machine(path: &Path) -> io::Result<Option<Machine>> {
    let host = host_machine();
    let found = module_architectures(path)?;
    if found.is_empty() || found.contains(&host) {
        Ok(None)
    } else {
        Ok(Some(found[0]))
    }
}

/// Whether an OS loader message describes an architecture problem
pub fn is_architecture_message(message: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "wrong ELF class",
        "ELF file's phentsize",
        "incompatible architecture",
        "not a valid Win32 application",
        "os error 193",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}
