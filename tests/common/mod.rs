//! In-process stub plugin shared by the integration tests
//!
//! Implements the plugin side of the ABI with plain `extern "C"` functions:
//! a 2-in/2-out gain effect with ID "TEST", three parameters and two
//! programs. The entry points below differ only in how they break the
//! descriptor.

#![allow(dead_code)]

use std::ffi::c_void;
use std::ptr;

use vstbridge::plugin::{AEffect, DispatchPtr, EffectInstance, FourCc, HostCallbackProc, HostSettings, OpCode};

pub const NUM_PARAMS: usize = 3;
pub const PARAM_NAMES: [&str; NUM_PARAMS] = ["Gain", "Pan", "Mix"];
pub const PARAM_LABELS: [&str; NUM_PARAMS] = ["dB", "%", "%"];
pub const NUM_PROGRAMS: usize = 2;

pub const EFFECT_NAME: &str = "Stub Gain";
pub const VENDOR: &str = "vstbridge tests";

/// Private `VendorSpecific` queries answered by the stub
pub const QUERY_PROCESS_CALLS: i32 = 0x5043;
pub const QUERY_SAMPLE_RATE: i32 = 0x5352;
pub const QUERY_BLOCK_SIZE: i32 = 0x4253;
pub const QUERY_MAINS: i32 = 0x4d41;
pub const QUERY_ENTRY_SAMPLE_RATE: i32 = 0x4553;
/// Asks the host for its block size from inside a dispatch call
pub const QUERY_HOST_BLOCK_SIZE: i32 = 0x4842;

#[repr(C)]
struct Stub {
    effect: AEffect,
    callback: HostCallbackProc,
    params: [f32; NUM_PARAMS],
    program: i32,
    program_names: Vec<String>,
    chunk: Vec<u8>,
    sample_rate: f32,
    block_size: isize,
    mains: bool,
    process_calls: isize,
    entry_sample_rate: isize,
}

unsafe fn stub<'a>(effect: *mut AEffect) -> &'a mut Stub {
    &mut *(effect as *mut Stub)
}

unsafe fn write_text(ptr: *mut c_void, text: &str) {
    if ptr.is_null() {
        return;
    }
    let dst = ptr as *mut u8;
    ptr::copy_nonoverlapping(text.as_ptr(), dst, text.len());
    *dst.add(text.len()) = 0;
}

unsafe fn read_text(ptr: *mut c_void) -> String {
    std::ffi::CStr::from_ptr(ptr as *const std::ffi::c_char)
        .to_string_lossy()
        .into_owned()
}

unsafe extern "C" fn dispatch(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    match opcode {
        // Open
        0 => 0,
        // Close: the plugin frees itself
        1 => {
            drop(Box::from_raw(effect as *mut Stub));
            1
        }
        2 => {
            stub(effect).program = value as i32;
            0
        }
        3 => stub(effect).program as isize,
        4 => {
            let name = read_text(ptr);
            let s = stub(effect);
            let program = s.program as usize;
            s.program_names[program] = name;
            0
        }
        5 => {
            let s = stub(effect);
            write_text(ptr, &s.program_names[s.program as usize]);
            0
        }
        6 => {
            write_text(ptr, PARAM_LABELS[index as usize]);
            0
        }
        7 => {
            let value = stub(effect).params[index as usize];
            write_text(ptr, &format!("{:.2}", value));
            0
        }
        8 => {
            write_text(ptr, PARAM_NAMES[index as usize]);
            0
        }
        10 => {
            stub(effect).sample_rate = opt;
            0
        }
        11 => {
            stub(effect).block_size = value;
            0
        }
        12 => {
            stub(effect).mains = value != 0;
            0
        }
        23 => {
            let s = stub(effect);
            *(ptr as *mut *mut u8) = s.chunk.as_mut_ptr();
            s.chunk.len() as isize
        }
        24 => {
            let data = std::slice::from_raw_parts(ptr as *const u8, value as usize);
            stub(effect).chunk = data.to_vec();
            1
        }
        // Pan is not automatable
        26 => ((index as usize) < NUM_PARAMS && index != 1) as isize,
        29 => {
            let s = stub(effect);
            match s.program_names.get(index as usize) {
                Some(name) => {
                    write_text(ptr, name);
                    1
                }
                None => 0,
            }
        }
        45 => {
            write_text(ptr, EFFECT_NAME);
            1
        }
        47 => {
            write_text(ptr, VENDOR);
            1
        }
        48 => {
            write_text(ptr, "Stub");
            1
        }
        49 => 1000,
        50 => match index {
            QUERY_PROCESS_CALLS => stub(effect).process_calls,
            QUERY_SAMPLE_RATE => stub(effect).sample_rate as isize,
            QUERY_BLOCK_SIZE => stub(effect).block_size,
            QUERY_MAINS => stub(effect).mains as isize,
            QUERY_ENTRY_SAMPLE_RATE => stub(effect).entry_sample_rate,
            QUERY_HOST_BLOCK_SIZE => {
                let callback = stub(effect).callback;
                callback(effect, 17, 0, 0, ptr::null_mut(), 0.0)
            }
            _ => 0,
        },
        51 => {
            if read_text(ptr) == "bypass" {
                1
            } else {
                -1
            }
        }
        58 => 2400,
        _ => 0,
    }
}

unsafe extern "C" fn set_parameter(effect: *mut AEffect, index: i32, value: f32) {
    let callback = {
        let s = stub(effect);
        s.params[index as usize] = value;
        s.callback
    };
    // Report the change back, as plugins do when their own GUI moves a knob
    callback(effect, 0, index, 0, ptr::null_mut(), value);
}

unsafe extern "C" fn get_parameter(effect: *mut AEffect, index: i32) -> f32 {
    stub(effect).params[index as usize]
}

/// Gain of `2 * Gain`: unity at the default of 0.5
unsafe extern "C" fn process_replacing(
    effect: *mut AEffect,
    inputs: *const *const f32,
    outputs: *mut *mut f32,
    frames: i32,
) {
    let s = stub(effect);
    s.process_calls += 1;
    let gain = s.params[0] * 2.0;
    let channels = s.effect.num_outputs as usize;
    for channel in 0..channels {
        let input = *inputs.add(channel);
        let output = *outputs.add(channel);
        for frame in 0..frames as usize {
            *output.add(frame) = *input.add(frame) * gain;
        }
    }
}

/// Legacy accumulating form: adds `2 * Gain` times the input into the outputs
unsafe extern "C" fn process_accumulating(
    effect: *mut AEffect,
    inputs: *const *const f32,
    outputs: *mut *mut f32,
    frames: i32,
) {
    let s = stub(effect);
    s.process_calls += 1;
    let gain = s.params[0] * 2.0;
    let channels = s.effect.num_outputs as usize;
    for channel in 0..channels {
        let input = *inputs.add(channel);
        let output = *outputs.add(channel);
        for frame in 0..frames as usize {
            *output.add(frame) += *input.add(frame) * gain;
        }
    }
}

/// Which way the descriptor is built
#[derive(Clone, Copy)]
enum Variant {
    Stereo,
    Mono,
    BadMagic,
    NoGetParameter,
    NoProcess,
    AccumulateOnly,
}

unsafe fn build(callback: HostCallbackProc, variant: Variant) -> *mut AEffect {
    // Plugins commonly ask for the host version and sample rate before
    // their descriptor exists
    let version = callback(ptr::null_mut(), 1, 0, 0, ptr::null_mut(), 0.0);
    let entry_sample_rate = callback(ptr::null_mut(), 16, 0, 0, ptr::null_mut(), 0.0);

    let channels = match variant {
        Variant::Mono => 1,
        _ => 2,
    };
    let mut effect = AEffect {
        dispatcher: Some(dispatch),
        set_parameter: Some(set_parameter),
        get_parameter: Some(get_parameter),
        process_replacing: Some(process_replacing),
        num_programs: NUM_PROGRAMS as i32,
        num_params: NUM_PARAMS as i32,
        num_inputs: channels,
        num_outputs: channels,
        flags: 1 << 4 | 1 << 5,
        unique_id: FourCc::from_bytes(*b"TEST").0 as i32,
        version: version as i32,
        ..AEffect::new()
    };
    match variant {
        Variant::BadMagic => effect.magic = FourCc::from_bytes(*b"NvEf").0 as i32,
        Variant::NoGetParameter => effect.get_parameter = None,
        Variant::NoProcess => effect.process_replacing = None,
        Variant::AccumulateOnly => {
            effect.process_replacing = None;
            effect.process = Some(process_accumulating);
        }
        Variant::Stereo | Variant::Mono => {}
    }

    let stub = Box::new(Stub {
        effect,
        callback,
        params: [0.5; NUM_PARAMS],
        program: 0,
        program_names: vec!["Init".to_string(), "Loud".to_string()],
        chunk: b"stub-state-v1".to_vec(),
        sample_rate: 0.0,
        block_size: 0,
        mains: false,
        process_calls: 0,
        entry_sample_rate,
    });
    Box::into_raw(stub) as *mut AEffect
}

pub unsafe extern "C" fn stub_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::Stereo)
}

pub unsafe extern "C" fn mono_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::Mono)
}

pub unsafe extern "C" fn bad_magic_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::BadMagic)
}

pub unsafe extern "C" fn no_get_parameter_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::NoGetParameter)
}

pub unsafe extern "C" fn no_process_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::NoProcess)
}

pub unsafe extern "C" fn accumulate_main(callback: HostCallbackProc) -> *mut AEffect {
    build(callback, Variant::AccumulateOnly)
}

pub unsafe extern "C" fn null_main(_callback: HostCallbackProc) -> *mut AEffect {
    ptr::null_mut()
}

pub fn settings() -> HostSettings {
    HostSettings {
        sample_rate: 48000.0,
        max_block_size: 256,
    }
}

/// A fresh stereo stub in the Loaded state
pub fn load_stub() -> EffectInstance {
    unsafe { EffectInstance::from_entry(stub_main, &settings()) }.expect("stub loads")
}

/// A fresh stereo stub, opened
pub fn open_stub() -> EffectInstance {
    let instance = load_stub();
    instance.open().expect("stub opens");
    instance
}

pub fn query(instance: &EffectInstance, what: i32) -> isize {
    instance
        .dispatch(OpCode::VendorSpecific, what, 0, DispatchPtr::None, 0.0)
        .expect("vendor query")
}
