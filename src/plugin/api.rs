//! VST 2.x C ABI types
//!
//! Mirrors the `AEffect` descriptor and the opcode tables byte for byte.
//! Function pointer fields are `Option<extern "C" fn>`, which has the same
//! layout as a nullable C function pointer.

use std::ffi::c_void;
use std::fmt;
use std::mem;

/// `'VstP'`, the descriptor magic
pub const MAGIC: FourCc = FourCc::from_bytes(*b"VstP");

/// Version reported to plugins asking for the host's API version
pub const HOST_API_VERSION: isize = 2400;

/// Maximum lengths (including the terminating NUL) the ABI defines for
/// strings the host writes into plugin-supplied buffers
pub const MAX_VENDOR_STR_LEN: usize = 64;
pub const MAX_PRODUCT_STR_LEN: usize = 64;

/// Host callback ("audioMaster")
pub type HostCallbackProc = extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

/// Plugin entry point (`VSTPluginMain` / `main`)
pub type PluginMain = unsafe extern "C" fn(callback: HostCallbackProc) -> *mut AEffect;

pub type DispatcherProc = unsafe extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type ProcessProc = unsafe extern "C" fn(
    effect: *mut AEffect,
    inputs: *const *const f32,
    outputs: *mut *mut f32,
    sample_frames: i32,
);

pub type ProcessProcF64 = unsafe extern "C" fn(
    effect: *mut AEffect,
    inputs: *const *const f64,
    outputs: *mut *mut f64,
    sample_frames: i32,
);

pub type SetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32, value: f32);

pub type GetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32) -> f32;

/// Plugin descriptor
#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    /// Accumulating process call (deprecated, adds into outputs)
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    /// Reserved for the host; carries the `HostContext` pointer
    pub reserved1: isize,
    pub reserved2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_replacing_f64: Option<ProcessProcF64>,
    pub future: [u8; 56],
}

impl AEffect {
    /// A zeroed descriptor carrying only the magic tag
    pub fn new() -> Self {
        Self {
            magic: MAGIC.0 as i32,
            dispatcher: None,
            process: None,
            set_parameter: None,
            get_parameter: None,
            num_programs: 0,
            num_params: 0,
            num_inputs: 0,
            num_outputs: 0,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
            initial_delay: 0,
            real_qualities: 0,
            off_qualities: 0,
            io_ratio: 1.0,
            object: std::ptr::null_mut(),
            user: std::ptr::null_mut(),
            unique_id: 0,
            version: 0,
            process_replacing: None,
            process_replacing_f64: None,
            future: [0; 56],
        }
    }
}

impl Default for AEffect {
    fn default() -> Self {
        Self::new()
    }
}

// The ABI is fixed-offset; catch accidental field reordering at compile time.
const _: () = {
    let ptr = mem::size_of::<usize>();
    assert!(mem::size_of::<Option<DispatcherProc>>() == ptr);
    assert!(mem::size_of::<AEffect>() == 4 * 12 + ptr * 10 + 56 + if ptr == 8 { 8 } else { 0 });
};

/// Four-character identity tag, stored as a big-endian `u32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        FourCc(u32::from_be_bytes(bytes))
    }

    /// Reinterpret a signed ABI field
    pub const fn from_raw(raw: i32) -> Self {
        FourCc(raw as u32)
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Encode a four-character string; every character must fit in one byte
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 4];
        let mut chars = s.chars();
        for byte in bytes.iter_mut() {
            let c = chars.next()?;
            *byte = u8::try_from(u32::from(c)).ok()?;
        }
        if chars.next().is_some() {
            return None;
        }
        Some(Self::from_bytes(bytes))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

/// `effFlags*` bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectFlags(pub u32);

impl EffectFlags {
    pub const HAS_EDITOR: Self = Self(1 << 0);
    pub const HAS_CLIP: Self = Self(1 << 1);
    pub const HAS_VU: Self = Self(1 << 2);
    pub const CAN_MONO: Self = Self(1 << 3);
    pub const CAN_REPLACING: Self = Self(1 << 4);
    pub const PROGRAM_CHUNKS: Self = Self(1 << 5);
    pub const IS_SYNTH: Self = Self(1 << 8);
    pub const NO_SOUND_IN_STOP: Self = Self(1 << 9);
    pub const CAN_DOUBLE_REPLACING: Self = Self(1 << 12);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::HAS_EDITOR, "editor"),
        (Self::HAS_CLIP, "clip"),
        (Self::HAS_VU, "vu"),
        (Self::CAN_MONO, "mono"),
        (Self::CAN_REPLACING, "replacing"),
        (Self::PROGRAM_CHUNKS, "chunks"),
        (Self::IS_SYNTH, "synth"),
        (Self::NO_SOUND_IN_STOP, "silent-in-stop"),
        (Self::CAN_DOUBLE_REPLACING, "f64"),
    ];

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw as u32)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the set flags, in bit order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Host → plugin opcodes routed through `AEffect::dispatcher`
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Open = 0,
    Close = 1,

    SetProgram = 2,
    GetProgram = 3,
    SetProgramName = 4,
    GetProgramName = 5,

    GetParamLabel = 6,
    GetParamDisplay = 7,
    GetParamName = 8,
    GetVu = 9,

    SetSampleRate = 10,
    SetBlockSize = 11,
    MainsChanged = 12,

    EditGetRect = 13,
    EditOpen = 14,
    EditClose = 15,
    EditDraw = 16,
    EditMouse = 17,
    EditKey = 18,
    EditIdle = 19,
    EditTop = 20,
    EditSleep = 21,

    Identify = 22,
    GetChunk = 23,
    SetChunk = 24,

    CanBeAutomated = 26,
    GetProgramNameIndexed = 29,
    GetPlugCategory = 35,
    SetBypass = 44,
    GetEffectName = 45,
    GetVendorString = 47,
    GetProductString = 48,
    GetVendorVersion = 49,
    VendorSpecific = 50,
    CanDo = 51,
    GetTailSize = 52,
    GetVstVersion = 58,
    StartProcess = 71,
    StopProcess = 72,
}

impl OpCode {
    /// Opcodes whose result is text written into the pointer argument
    pub const fn writes_text(self) -> bool {
        matches!(
            self,
            OpCode::GetProgramName
                | OpCode::GetParamLabel
                | OpCode::GetParamDisplay
                | OpCode::GetParamName
                | OpCode::GetProgramNameIndexed
                | OpCode::GetEffectName
                | OpCode::GetVendorString
                | OpCode::GetProductString
        )
    }
}

/// Plugin → host opcodes received by the host callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOpCode {
    Automate,
    Version,
    CurrentId,
    Idle,
    IoChanged,
    SizeWindow,
    GetSampleRate,
    GetBlockSize,
    GetCurrentProcessLevel,
    GetAutomationState,
    GetVendorString,
    GetProductString,
    GetVendorVersion,
    CanDo,
    GetLanguage,
    UpdateDisplay,
    BeginEdit,
    EndEdit,
}

impl HostOpCode {
    pub fn from_raw(opcode: i32) -> Option<Self> {
        Some(match opcode {
            0 => HostOpCode::Automate,
            1 => HostOpCode::Version,
            2 => HostOpCode::CurrentId,
            3 => HostOpCode::Idle,
            13 => HostOpCode::IoChanged,
            15 => HostOpCode::SizeWindow,
            16 => HostOpCode::GetSampleRate,
            17 => HostOpCode::GetBlockSize,
            23 => HostOpCode::GetCurrentProcessLevel,
            24 => HostOpCode::GetAutomationState,
            32 => HostOpCode::GetVendorString,
            33 => HostOpCode::GetProductString,
            34 => HostOpCode::GetVendorVersion,
            37 => HostOpCode::CanDo,
            38 => HostOpCode::GetLanguage,
            42 => HostOpCode::UpdateDisplay,
            43 => HostOpCode::BeginEdit,
            44 => HostOpCode::EndEdit,
            _ => return None,
        })
    }
}

/// Process levels reported through `GetCurrentProcessLevel`
pub const PROCESS_LEVEL_USER: isize = 1;
pub const PROCESS_LEVEL_REALTIME: isize = 2;
