//! Host callback ("audioMaster")
//!
//! Plugins call back into the host synchronously, both while the entry point
//! is running and from inside later dispatch/process calls. The callback must
//! therefore never take the instance lock held by the outer call: everything
//! it needs lives in [`HostContext`], which uses atomics plus a small
//! automation queue with its own lock.

use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, trace, warn};

use super::api::{
    AEffect, HostOpCode, HOST_API_VERSION, MAX_PRODUCT_STR_LEN, MAX_VENDOR_STR_LEN,
    PROCESS_LEVEL_REALTIME, PROCESS_LEVEL_USER,
};

const HOST_VENDOR: &str = "vstbridge";
const HOST_PRODUCT: &str = "vstbridge host";
const HOST_VENDOR_VERSION: isize = 1;

/// Automation events buffered between two drains
const AUTOMATION_CAPACITY: usize = 1024;

/// `canDo` strings this host answers "yes" to
const HOST_CAN_DO: [&str; 3] = ["startStopProcess", "sizeWindow", "supplyIdle"];

/// A parameter change reported by the plugin (`audioMasterAutomate`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChange {
    pub index: i32,
    pub value: f32,
}

/// Host state visible to the plugin through the callback
pub struct HostContext {
    sample_rate: AtomicU32,
    block_size: AtomicUsize,
    unique_id: AtomicI32,
    processing: AtomicBool,
    dropped_automation: AtomicUsize,
    automation_tx: Mutex<HeapProd<ParameterChange>>,
    automation_rx: Mutex<HeapCons<ParameterChange>>,
}

impl HostContext {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        let (tx, rx) = HeapRb::<ParameterChange>::new(AUTOMATION_CAPACITY).split();
        Self {
            sample_rate: AtomicU32::new(sample_rate.to_bits()),
            block_size: AtomicUsize::new(block_size),
            unique_id: AtomicI32::new(0),
            processing: AtomicBool::new(false),
            dropped_automation: AtomicUsize::new(0),
            automation_tx: Mutex::new(tx),
            automation_rx: Mutex::new(rx),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate.load(Ordering::Relaxed))
    }

    pub fn set_sample_rate(&self, rate: f32) {
        self.sample_rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Relaxed)
    }

    pub fn set_block_size(&self, frames: usize) {
        self.block_size.store(frames, Ordering::Relaxed);
    }

    pub(crate) fn set_unique_id(&self, id: i32) {
        self.unique_id.store(id, Ordering::Relaxed);
    }

    /// Mark the span of a process call (answers `GetCurrentProcessLevel`)
    pub(crate) fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::Release);
    }

    fn push_automation(&self, change: ParameterChange) {
        if self.automation_tx.lock().try_push(change).is_err() {
            self.dropped_automation.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every queued automation event, oldest first
    pub fn drain_automation(&self) -> Vec<ParameterChange> {
        let dropped = self.dropped_automation.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!("Dropped {} automation events (queue full)", dropped);
        }
        let mut rx = self.automation_rx.lock();
        std::iter::from_fn(|| rx.try_pop()).collect()
    }

    /// Answer one callback opcode
    pub fn handle(&self, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
        let Some(op) = HostOpCode::from_raw(opcode) else {
            trace!("Unhandled host opcode {} (index {}, value {})", opcode, index, value);
            return 0;
        };

        match op {
            HostOpCode::Automate => {
                self.push_automation(ParameterChange { index, value: opt });
                0
            }
            HostOpCode::Version => HOST_API_VERSION,
            HostOpCode::CurrentId => self.unique_id.load(Ordering::Relaxed) as isize,
            HostOpCode::Idle => 0,
            HostOpCode::IoChanged => 0,
            HostOpCode::SizeWindow => {
                debug!("Plugin requested window size {}x{}", index, value);
                1
            }
            HostOpCode::GetSampleRate => self.sample_rate() as isize,
            HostOpCode::GetBlockSize => self.block_size() as isize,
            HostOpCode::GetCurrentProcessLevel => {
                if self.processing.load(Ordering::Acquire) {
                    PROCESS_LEVEL_REALTIME
                } else {
                    PROCESS_LEVEL_USER
                }
            }
            HostOpCode::GetAutomationState => 1,
            HostOpCode::GetVendorString => {
                // SAFETY: the ABI sizes this buffer to MAX_VENDOR_STR_LEN.
                unsafe { write_c_string(ptr, HOST_VENDOR, MAX_VENDOR_STR_LEN) }
            }
            HostOpCode::GetProductString => {
                // SAFETY: the ABI sizes this buffer to MAX_PRODUCT_STR_LEN.
                unsafe { write_c_string(ptr, HOST_PRODUCT, MAX_PRODUCT_STR_LEN) }
            }
            HostOpCode::GetVendorVersion => HOST_VENDOR_VERSION,
            HostOpCode::CanDo => {
                if ptr.is_null() {
                    return 0;
                }
                // SAFETY: canDo passes a NUL-terminated string.
                let query = unsafe { CStr::from_ptr(ptr as *const c_char) }.to_string_lossy();
                let supported = HOST_CAN_DO.iter().any(|can_do| query == *can_do);
                trace!("Plugin asked canDo {:?}: {}", query, supported);
                if supported {
                    1
                } else {
                    -1
                }
            }
            HostOpCode::GetLanguage => 1,
            HostOpCode::UpdateDisplay => 1,
            HostOpCode::BeginEdit | HostOpCode::EndEdit => {
                trace!("Plugin {:?} on parameter {}", op, index);
                1
            }
        }
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new(44100.0, 512)
    }
}

/// Copy `text` into a plugin-owned buffer of `capacity` bytes, NUL terminated
unsafe fn write_c_string(dst: *mut c_void, text: &str, capacity: usize) -> isize {
    if dst.is_null() || capacity == 0 {
        return 0;
    }
    let len = text.len().min(capacity - 1);
    ptr::copy_nonoverlapping(text.as_ptr(), dst as *mut u8, len);
    *(dst as *mut u8).add(len) = 0;
    1
}

thread_local! {
    /// Context for callbacks issued while an entry point is still running
    static PENDING: Cell<*const HostContext> = const { Cell::new(ptr::null()) };
}

/// Run `f` with `context` answering callbacks that cannot yet be routed
/// through a descriptor (the entry point has not returned).
pub(crate) fn with_pending_context<R>(context: &HostContext, f: impl FnOnce() -> R) -> R {
    struct Reset(*const HostContext);
    impl Drop for Reset {
        fn drop(&mut self) {
            PENDING.with(|cell| cell.set(self.0));
        }
    }

    let previous = PENDING.with(|cell| cell.replace(context as *const HostContext));
    let _reset = Reset(previous);
    f()
}

/// Store the context pointer in the descriptor's host-reserved slot
///
/// # Safety
/// `effect` must be a live descriptor and `context` must outlive every
/// callback the plugin issues until [`detach_context`] is called.
pub(crate) unsafe fn attach_context(effect: *mut AEffect, context: *const HostContext) {
    (*effect).reserved1 = context as isize;
}

/// # Safety
/// `effect` must be a live descriptor.
pub(crate) unsafe fn detach_context(effect: *mut AEffect) {
    (*effect).reserved1 = 0;
}

fn context_for(effect: *mut AEffect) -> Option<*const HostContext> {
    if !effect.is_null() {
        // SAFETY: a non-null effect passed to the callback is the plugin's
        // own descriptor; reserved1 is either 0 or set by attach_context.
        let stored = unsafe { (*effect).reserved1 } as *const HostContext;
        if !stored.is_null() {
            return Some(stored);
        }
    }
    let pending = PENDING.with(|cell| cell.get());
    (!pending.is_null()).then_some(pending)
}

/// The callback handed to every plugin entry point
pub extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    match context_for(effect) {
        // SAFETY: see attach_context / with_pending_context.
        Some(context) => unsafe { &*context }.handle(opcode, index, value, ptr, opt),
        None => match HostOpCode::from_raw(opcode) {
            // Plugins probe the version before any context exists
            Some(HostOpCode::Version) => HOST_API_VERSION,
            _ => 0,
        },
    }
}
