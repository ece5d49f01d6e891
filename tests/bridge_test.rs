//! Plugin bridge tests
//!
//! Drives the in-process stub plugin through the public instance API:
//! descriptor validation, parameters, programs, state, processing and the
//! lifecycle rules.

mod common;

use std::io::Write;
use std::sync::Arc;
use std::thread;

use common::*;
use vstbridge::plugin::{
    host_machine, AudioBlock, ConfigError, DispatchPtr, EffectInstance, FourCc, LifecycleState,
    LoadError, Machine, OpCode, ParameterChange, PluginError, ValidationError, TEXT_CAPACITY,
};

fn stereo_ramp(frames: usize) -> AudioBlock {
    let left = (0..frames).map(|i| i as f32 / frames as f32).collect();
    let right = (0..frames).map(|i| -(i as f32) / frames as f32).collect();
    AudioBlock::from_channels(vec![left, right]).unwrap()
}

/// Test: Identity tags decode and encode symmetrically
/// Given four-character tags
/// When each is encoded and decoded
/// Then the original text comes back
#[test]
fn test_identity_tag_round_trip() {
    for tag in ["TEST", "VstP", "Ab12", "zzzz"] {
        let id = FourCc::parse(tag).unwrap();
        assert_eq!(id.to_string(), tag);
        assert_eq!(FourCc::from_raw(id.0 as i32), id);
    }
    assert_eq!(FourCc::parse("TEST").unwrap().0, 0x5445_5354);
}

/// Test: Stub plugin is created and usable
/// Given the stub with ID "TEST" and 3 parameters
/// When an instance is created, opened through dispatch and given audio
/// Then each step succeeds
#[test]
fn test_stub_create_open_process() {
    let instance = load_stub();
    assert_eq!(instance.info().unique_id.to_string(), "TEST");
    assert_eq!(instance.info().num_params, 3);
    assert_eq!(instance.info().version, 2400);
    assert_eq!(instance.state(), LifecycleState::Loaded);

    let name = instance.parameter_name(0).unwrap();
    assert!(!name.is_empty());
    assert!(name.len() <= TEXT_CAPACITY);
    assert_eq!(name, "Gain");

    instance
        .dispatch(OpCode::Open, 0, 0, DispatchPtr::None, 0.0)
        .unwrap();
    assert_eq!(instance.state(), LifecycleState::Opened);

    let input = stereo_ramp(64);
    let mut output = AudioBlock::new(2, 64);
    instance.process_replacing(&input, &mut output, 64).unwrap();
    assert_eq!(output, input);
}

/// Test: Bad magic is rejected without calling into the plugin
/// Given an entry point returning a descriptor tagged "NvEf"
/// When an instance is created
/// Then creation fails with NotAPlugin naming the tag
#[test]
fn test_bad_magic_rejected() {
    let err = unsafe { EffectInstance::from_entry(bad_magic_main, &settings()) }.unwrap_err();
    match err {
        PluginError::Validation(ValidationError::NotAPlugin { magic }) => {
            assert_eq!(magic, "NvEf")
        }
        other => panic!("expected NotAPlugin, got {other}"),
    }
}

/// Test: Missing function pointers are named
/// Given a descriptor without getParameter
/// When an instance is created
/// Then creation fails with IncompleteInterface for that field
#[test]
fn test_incomplete_interface_rejected() {
    let err =
        unsafe { EffectInstance::from_entry(no_get_parameter_main, &settings()) }.unwrap_err();
    assert!(matches!(
        err,
        PluginError::Validation(ValidationError::IncompleteInterface {
            field: "getParameter"
        })
    ));
}

#[test]
fn test_null_descriptor_rejected() {
    let err = unsafe { EffectInstance::from_entry(null_main, &settings()) }.unwrap_err();
    assert!(matches!(
        err,
        PluginError::Validation(ValidationError::NullDescriptor)
    ));
}

/// Test: Zero frames never reaches the plugin
/// Given an opened instance
/// When zero frames are processed
/// Then the plugin's process function is not called
#[test]
fn test_zero_frames_is_a_no_op() {
    let instance = open_stub();
    let input = AudioBlock::new(2, 16);
    let mut output = AudioBlock::new(2, 16);

    instance.process_replacing(&input, &mut output, 0).unwrap();
    assert_eq!(query(&instance, QUERY_PROCESS_CALLS), 0);

    instance.process_replacing(&input, &mut output, 16).unwrap();
    assert_eq!(query(&instance, QUERY_PROCESS_CALLS), 1);
}

/// Test: Output has the requested frame count on every channel
/// Given a 2-in/2-out plugin with its gain raised
/// When a 2-channel block of N frames is processed
/// Then every output channel holds N processed frames and nothing beyond
#[test]
fn test_process_writes_requested_frames() {
    let instance = open_stub();
    instance.set_parameter(0, 1.0).unwrap();

    let input = stereo_ramp(128);
    let mut output = AudioBlock::new(2, 128);
    output.fill(7.0);
    instance.process_replacing(&input, &mut output, 100).unwrap();

    for channel in 0..2 {
        for frame in 0..100 {
            assert_eq!(output.channel(channel)[frame], input.channel(channel)[frame] * 2.0);
        }
        assert!(output.channel(channel)[100..].iter().all(|&s| s == 7.0));
    }
}

/// Test: Samples are not clipped
#[test]
fn test_process_does_not_clip() {
    let instance = open_stub();
    instance.set_parameter(0, 1.0).unwrap();

    let input = AudioBlock::from_channels(vec![vec![0.9; 8], vec![-0.9; 8]]).unwrap();
    let mut output = AudioBlock::new(2, 8);
    instance.process_replacing(&input, &mut output, 8).unwrap();
    assert_eq!(output.channel(0)[0], 1.8);
    assert_eq!(output.channel(1)[0], -1.8);
}

#[test]
fn test_process_slices() {
    let instance = open_stub();
    let left = [0.25f32; 32];
    let right = [-0.25f32; 32];
    let mut out_left = [0.0f32; 32];
    let mut out_right = [0.0f32; 32];

    let inputs: [&[f32]; 2] = [&left, &right];
    let mut outputs: [&mut [f32]; 2] = [&mut out_left, &mut out_right];
    instance.process(&inputs, &mut outputs).unwrap();
    assert_eq!(out_left, left);
    assert_eq!(out_right, right);
}

/// Test: Parameter values round-trip through a mirroring plugin
/// Given an opened instance
/// When a parameter is set
/// Then reading it back returns the same value and the plugin's report of
/// the change is queued
#[test]
fn test_parameter_round_trip() {
    let instance = open_stub();
    instance.set_parameter(2, 0.8).unwrap();
    assert_eq!(instance.get_parameter(2).unwrap(), 0.8);
    assert_eq!(instance.parameter_display(2).unwrap(), "0.80");
    assert_eq!(instance.parameter_label(2).unwrap(), "%");

    assert_eq!(
        instance.take_automation(),
        vec![ParameterChange {
            index: 2,
            value: 0.8
        }]
    );
    assert!(instance.take_automation().is_empty());
}

#[test]
fn test_parameter_out_of_range() {
    let instance = open_stub();
    let err = instance.set_parameter(3, 0.5).unwrap_err();
    assert!(matches!(
        err,
        PluginError::Config(ConfigError::ParameterOutOfRange { index: 3, count: 3 })
    ));
    assert!(instance.parameter_name(99).is_err());
}

#[test]
fn test_parameter_snapshot() {
    let instance = load_stub();
    let described = instance.parameters().unwrap();
    let names: Vec<_> = described.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, PARAM_NAMES);

    instance.open().unwrap();
    instance.set_parameter(1, 0.25).unwrap();
    let params = instance.parameters().unwrap();
    assert_eq!(params[1].value, 0.25);
    assert_eq!(params[1].display, "0.25");

    assert!(instance.can_be_automated(0).unwrap());
    assert!(!instance.can_be_automated(1).unwrap());
}

/// Test: Values and audio need an opened plugin; text does not
/// Given a loaded but unopened instance
/// When parameter values or audio are requested
/// Then the call fails with InvalidState, while names still resolve
#[test]
fn test_loaded_state_rules() {
    let instance = load_stub();
    assert!(matches!(
        instance.get_parameter(0),
        Err(PluginError::InvalidState {
            state: LifecycleState::Loaded,
            ..
        })
    ));

    let input = AudioBlock::new(2, 8);
    let mut output = AudioBlock::new(2, 8);
    assert!(instance.process_replacing(&input, &mut output, 8).is_err());

    assert_eq!(instance.parameter_name(1).unwrap(), "Pan");
    assert_eq!(instance.effect_name().unwrap(), EFFECT_NAME);
}

/// Test: Opening configures the plugin
/// When an instance is opened
/// Then the plugin has the host sample rate, block size and mains on
#[test]
fn test_open_sequence() {
    let instance = open_stub();
    assert_eq!(query(&instance, QUERY_SAMPLE_RATE), 48000);
    assert_eq!(query(&instance, QUERY_BLOCK_SIZE), 256);
    assert_eq!(query(&instance, QUERY_MAINS), 1);
}

/// Test: Closed instances accept nothing but unload
/// Given an opened instance
/// When it is closed
/// Then parameters, audio and reopening fail, and unload is idempotent
#[test]
fn test_close_and_unload() {
    let instance = open_stub();
    instance.close().unwrap();
    assert_eq!(instance.state(), LifecycleState::Closed);
    instance.close().unwrap();

    assert!(matches!(
        instance.set_parameter(0, 0.1),
        Err(PluginError::InvalidState {
            state: LifecycleState::Closed,
            ..
        })
    ));
    assert!(matches!(
        instance.open(),
        Err(PluginError::InvalidState { .. })
    ));
    assert!(instance.parameter_name(0).is_err());

    instance.unload();
    instance.unload();
    assert_eq!(instance.state(), LifecycleState::Unloaded);
    assert!(instance
        .dispatch(OpCode::GetProgram, 0, 0, DispatchPtr::None, 0.0)
        .is_err());
}

#[test]
fn test_dispatch_close_transitions() {
    let instance = open_stub();
    let result = instance
        .dispatch(OpCode::Close, 0, 0, DispatchPtr::None, 0.0)
        .unwrap();
    assert_eq!(result, 1);
    assert_eq!(instance.state(), LifecycleState::Closed);
}

#[test]
fn test_unload_open_instance() {
    let instance = open_stub();
    instance.unload();
    assert_eq!(instance.state(), LifecycleState::Unloaded);
}

/// Test: Callbacks reach the host context
/// Given a plugin that queries the host during its entry point and during
/// a dispatch call
/// Then both queries see this instance's settings
#[test]
fn test_callback_sees_host_settings() {
    let instance = load_stub();
    assert_eq!(query(&instance, QUERY_ENTRY_SAMPLE_RATE), 48000);
    assert_eq!(query(&instance, QUERY_HOST_BLOCK_SIZE), 256);

    instance.set_block_size(128).unwrap();
    assert_eq!(query(&instance, QUERY_HOST_BLOCK_SIZE), 128);
}

#[test]
fn test_block_size_limits() {
    let instance = open_stub();
    instance.set_block_size(64).unwrap();
    assert_eq!(query(&instance, QUERY_BLOCK_SIZE), 64);
    assert_eq!(query(&instance, QUERY_MAINS), 1);

    assert!(matches!(
        instance.set_block_size(1024),
        Err(PluginError::Config(ConfigError::BlockTooLarge { .. }))
    ));

    let input = AudioBlock::new(2, 512);
    let mut output = AudioBlock::new(2, 512);
    assert!(matches!(
        instance.process_replacing(&input, &mut output, 512),
        Err(PluginError::Config(ConfigError::BlockTooLarge {
            frames: 512,
            max: 256
        }))
    ));
}

/// Test: A non-positive block size sent through dispatch is refused
/// Given an opened plugin running with 256-frame blocks
/// When SetBlockSize is dispatched with 0 and with -1
/// Then both are rejected and the host still reports 256 frames
#[test]
fn test_dispatch_rejects_empty_block_size() {
    let instance = open_stub();
    for value in [0, -1] {
        assert!(matches!(
            instance.dispatch(OpCode::SetBlockSize, 0, value, DispatchPtr::None, 0.0),
            Err(PluginError::Config(ConfigError::BlockTooLarge { frames: 0, .. }))
        ));
    }
    assert_eq!(query(&instance, QUERY_HOST_BLOCK_SIZE), 256);
    assert_eq!(instance.block_size(), 256);
}

/// Test: Plugins with only the accumulating process call are supported
/// Given a plugin that adds its output into the host buffers
/// When two blocks are processed into outputs holding stale samples
/// Then each output equals a single pass over its input
#[test]
fn test_accumulating_process_replaces_output() {
    let instance = unsafe { EffectInstance::from_entry(accumulate_main, &settings()) }.unwrap();
    instance.open().unwrap();
    assert!(instance.info().can_process);

    let input = stereo_ramp(128);
    for _ in 0..2 {
        let mut output =
            AudioBlock::from_channels(vec![vec![9.0; 128], vec![9.0; 128]]).unwrap();
        instance.process_replacing(&input, &mut output, 128).unwrap();
        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }
    assert_eq!(query(&instance, QUERY_PROCESS_CALLS), 2);
}

#[test]
fn test_sample_rate_change() {
    let instance = open_stub();
    instance.set_sample_rate(96000.0).unwrap();
    assert_eq!(instance.sample_rate(), 96000.0);
    assert_eq!(query(&instance, QUERY_SAMPLE_RATE), 96000);
    assert!(instance.set_sample_rate(0.0).is_err());
}

#[test]
fn test_channel_mismatch() {
    let instance = open_stub();
    assert!(instance.check_io(2, 2).is_ok());
    assert!(matches!(
        instance.check_io(1, 2),
        Err(PluginError::Config(ConfigError::ChannelMismatch {
            direction: "input",
            ..
        }))
    ));

    let input = AudioBlock::new(1, 16);
    let mut output = AudioBlock::new(2, 16);
    assert!(instance.process_replacing(&input, &mut output, 16).is_err());
    assert_eq!(query(&instance, QUERY_PROCESS_CALLS), 0);
}

#[test]
fn test_frames_beyond_block() {
    let instance = open_stub();
    let input = AudioBlock::new(2, 16);
    let mut output = AudioBlock::new(2, 8);
    assert!(matches!(
        instance.process_replacing(&input, &mut output, 16),
        Err(PluginError::Config(ConfigError::FrameCountMismatch {
            direction: "output",
            frames: 16,
            available: 8
        }))
    ));
}

#[test]
fn test_programs() {
    let instance = load_stub();
    assert_eq!(instance.program().unwrap(), 0);
    assert_eq!(instance.program_name().unwrap(), "Init");

    instance.set_program(1).unwrap();
    assert_eq!(instance.program().unwrap(), 1);
    instance.set_program_name("Bright").unwrap();
    assert_eq!(instance.program_name().unwrap(), "Bright");

    assert_eq!(
        instance.program_name_indexed(0).unwrap(),
        Some("Init".to_string())
    );
    assert_eq!(
        instance.program_name_indexed(1).unwrap(),
        Some("Bright".to_string())
    );
    assert_eq!(instance.program_name_indexed(5).unwrap(), None);
}

#[test]
fn test_state_chunk_round_trip() {
    let instance = open_stub();
    assert_eq!(instance.get_chunk(false).unwrap(), b"stub-state-v1");

    instance.set_chunk(false, b"restored").unwrap();
    assert_eq!(instance.get_chunk(true).unwrap(), b"restored");
}

#[test]
fn test_informational_opcodes() {
    let instance = load_stub();
    assert_eq!(instance.vendor().unwrap(), VENDOR);
    assert_eq!(instance.product().unwrap(), "Stub");
    assert_eq!(instance.vendor_version().unwrap(), 1000);
    assert_eq!(instance.vst_version().unwrap(), 2400);
    assert_eq!(instance.can_do("bypass").unwrap(), Some(true));
    assert_eq!(instance.can_do("receiveVstMidiEvent").unwrap(), Some(false));
}

/// Test: A plugin without a process function still exposes parameters
#[test]
fn test_no_process_function() {
    let instance = unsafe { EffectInstance::from_entry(no_process_main, &settings()) }.unwrap();
    assert!(!instance.info().can_process);
    instance.open().unwrap();
    instance.set_parameter(0, 0.3).unwrap();

    let input = AudioBlock::new(2, 8);
    let mut output = AudioBlock::new(2, 8);
    assert!(matches!(
        instance.process_replacing(&input, &mut output, 8),
        Err(PluginError::Unsupported(_))
    ));
}

/// Test: An instance can be shared between an audio and a control thread
/// Given an opened instance behind an Arc
/// When one thread processes while another moves a parameter
/// Then every call succeeds
#[test]
fn test_shared_between_threads() {
    let instance = Arc::new(open_stub());

    let audio = {
        let instance = Arc::clone(&instance);
        thread::spawn(move || {
            let input = stereo_ramp(64);
            let mut output = AudioBlock::new(2, 64);
            let mut processed: isize = 0;
            for _ in 0..200 {
                if instance
                    .try_process_replacing(&input, &mut output, 64)
                    .unwrap()
                {
                    processed += 1;
                }
            }
            processed
        })
    };

    for i in 0..200 {
        instance.set_parameter(2, (i % 10) as f32 / 10.0).unwrap();
    }

    let processed = audio.join().unwrap();
    assert!(processed <= 200);
    assert_eq!(query(&instance, QUERY_PROCESS_CALLS), processed);
    assert_eq!(instance.take_automation().len(), 200);
}

#[test]
fn test_missing_module() {
    let err = EffectInstance::load("/no/such/plugin.so", &settings()).unwrap_err();
    assert!(matches!(err, PluginError::Load(LoadError::NotFound { .. })));
}

/// Test: A module for another processor is reported as such
/// Given an ELF file built for an architecture other than the host's
/// When it is loaded
/// Then loading fails with ArchitectureMismatch
#[test]
fn test_architecture_mismatch() {
    let (machine, code): (Machine, u16) = if host_machine() == Machine::Aarch64 {
        (Machine::X86_64, 62)
    } else {
        (Machine::Aarch64, 183)
    };
    let mut header = vec![0u8; 64];
    header[..4].copy_from_slice(b"\x7fELF");
    header[4] = 2;
    header[5] = 1;
    header[6] = 1;
    header[16..18].copy_from_slice(&3u16.to_le_bytes());
    header[18..20].copy_from_slice(&code.to_le_bytes());

    let mut file = tempfile::Builder::new().suffix(".so").tempfile().unwrap();
    file.write_all(&header).unwrap();

    match EffectInstance::load(file.path(), &settings()) {
        Err(PluginError::Load(LoadError::ArchitectureMismatch { module, host, .. })) => {
            assert_eq!(module, machine);
            assert_eq!(host, host_machine());
        }
        Err(other) => panic!("expected architecture mismatch, got {other}"),
        Ok(_) => panic!("foreign module loaded"),
    }
}
