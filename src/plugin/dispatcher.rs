//! Opcode call surface over `AEffect::dispatcher`

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use tracing::trace;

use super::api::{AEffect, DispatcherProc, OpCode};

/// Capacity of the text buffer handed to text-result opcodes
pub const TEXT_CAPACITY: usize = 256;

/// Zeroed, fixed-size output buffer for text-result opcodes
pub struct TextBuffer {
    bytes: [u8; TEXT_CAPACITY],
}

impl TextBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; TEXT_CAPACITY],
        }
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }

    /// Text up to the first NUL, truncated at capacity if the plugin wrote none
    pub fn to_string_lossy(&self) -> String {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TEXT_CAPACITY);
        String::from_utf8_lossy(&self.bytes[..end])
            .trim_end()
            .to_string()
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The `ptr` argument of a dispatch call
///
/// Text output and opaque in/out pointers are distinct roles in the ABI and
/// are kept apart here.
pub enum DispatchPtr<'a> {
    None,
    /// Output buffer for text-result opcodes
    Text(&'a mut TextBuffer),
    /// Opaque pointer whose meaning is defined by the opcode
    Raw(*mut c_void),
}

impl DispatchPtr<'_> {
    fn as_raw(&mut self) -> *mut c_void {
        match self {
            DispatchPtr::None => ptr::null_mut(),
            DispatchPtr::Text(buffer) => buffer.as_mut_ptr(),
            DispatchPtr::Raw(raw) => *raw,
        }
    }
}

/// Dispatch surface of one plugin
///
/// Borrowed from an `EffectDescriptor`; callers are responsible for never
/// overlapping two calls into the same plugin (`EffectInstance` does this).
#[derive(Clone, Copy)]
pub struct Dispatcher<'a> {
    effect: NonNull<AEffect>,
    proc_: DispatcherProc,
    _descriptor: PhantomData<&'a AEffect>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(effect: NonNull<AEffect>, proc_: DispatcherProc) -> Self {
        Self {
            effect,
            proc_,
            _descriptor: PhantomData,
        }
    }

    /// Issue one opcode; the result is passed through uninterpreted
    pub fn dispatch(
        &self,
        opcode: OpCode,
        index: i32,
        value: isize,
        mut ptr: DispatchPtr<'_>,
        opt: f32,
    ) -> isize {
        trace!("dispatch {:?} index={} value={} opt={}", opcode, index, value, opt);
        // SAFETY: the descriptor was validated and outlives 'a; ptr is either
        // null, a TEXT_CAPACITY buffer, or a pointer whose contract the
        // caller took on when building DispatchPtr::Raw.
        unsafe {
            (self.proc_)(
                self.effect.as_ptr(),
                opcode as i32,
                index,
                value,
                ptr.as_raw(),
                opt,
            )
        }
    }

    /// Dispatch without a pointer argument
    pub fn call(&self, opcode: OpCode, index: i32, value: isize, opt: f32) -> isize {
        self.dispatch(opcode, index, value, DispatchPtr::None, opt)
    }

    /// Dispatch a text-result opcode and read back its string
    pub fn text(&self, opcode: OpCode, index: i32) -> String {
        let mut buffer = TextBuffer::new();
        self.dispatch(opcode, index, 0, DispatchPtr::Text(&mut buffer), 0.0);
        buffer.to_string_lossy()
    }

    /// Pass a NUL-terminated string in (e.g. `SetProgramName`, `CanDo`)
    pub fn with_str(&self, opcode: OpCode, index: i32, text: &str) -> isize {
        let mut buffer = TextBuffer::new();
        let len = text.len().min(TEXT_CAPACITY - 1);
        buffer.bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        self.dispatch(opcode, index, 0, DispatchPtr::Text(&mut buffer), 0.0)
    }

    /// Copy the plugin's state chunk out (`GetChunk`)
    ///
    /// `preset` selects the current program only instead of the whole bank.
    /// Returns `None` when the plugin reports no chunk.
    pub fn get_chunk(&self, preset: bool) -> Option<Vec<u8>> {
        let mut data: *mut c_void = ptr::null_mut();
        let size = self.dispatch(
            OpCode::GetChunk,
            preset as i32,
            0,
            DispatchPtr::Raw(&mut data as *mut *mut c_void as *mut c_void),
            0.0,
        );
        if size <= 0 || data.is_null() {
            return None;
        }
        // SAFETY: the plugin owns `size` bytes at `data` until its next call.
        let chunk = unsafe { std::slice::from_raw_parts(data as *const u8, size as usize) };
        Some(chunk.to_vec())
    }

    /// Hand a state chunk to the plugin (`SetChunk`)
    pub fn set_chunk(&self, preset: bool, data: &[u8]) -> isize {
        self.dispatch(
            OpCode::SetChunk,
            preset as i32,
            data.len() as isize,
            DispatchPtr::Raw(data.as_ptr() as *mut c_void),
            0.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_buffer_stops_at_nul() {
        let mut buffer = TextBuffer::new();
        buffer.bytes[..6].copy_from_slice(b"Gain\0x");
        assert_eq!(buffer.to_string_lossy(), "Gain");
    }

    #[test]
    fn test_text_buffer_truncates_without_nul() {
        let mut buffer = TextBuffer::new();
        buffer.bytes.fill(b'a');
        let text = buffer.to_string_lossy();
        assert_eq!(text.len(), TEXT_CAPACITY);
    }

    #[test]
    fn test_text_buffer_trims_padding() {
        let mut buffer = TextBuffer::new();
        buffer.bytes[..5].copy_from_slice(b"dB   ");
        assert_eq!(buffer.to_string_lossy(), "dB");
    }

    #[test]
    fn test_dispatch_ptr_roles() {
        let mut buffer = TextBuffer::new();
        let text_ptr = buffer.as_mut_ptr();
        assert_eq!(DispatchPtr::Text(&mut buffer).as_raw(), text_ptr);
        assert!(DispatchPtr::None.as_raw().is_null());

        let mut slot = 0u64;
        let raw = &mut slot as *mut u64 as *mut c_void;
        assert_eq!(DispatchPtr::Raw(raw).as_raw(), raw);
    }
}
