//! Plugin instance lifecycle
//!
//! [`EffectInstance`] owns everything needed to talk to one loaded plugin: the
//! module handle, the validated descriptor, pre-allocated process buffers and
//! the host context the plugin's callbacks are answered from. All foreign
//! calls go through a single lock, so an `Arc<EffectInstance>` can be shared
//! between a device callback and a control thread.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::api::{OpCode, PluginMain};
use super::buffers::{AudioBlock, ChannelSink, ChannelSource};
use super::callback::{
    attach_context, detach_context, host_callback, with_pending_context, HostContext,
    ParameterChange,
};
use super::descriptor::{EffectDescriptor, EffectInfo};
use super::dispatcher::{DispatchPtr, Dispatcher, TextBuffer};
use super::error::{ConfigError, PluginError, Result};
use super::loader::PluginModule;
use super::params::ParameterInfo;
use super::processor::AudioProcessor;

/// Largest block size a host may configure
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Where an instance is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Descriptor validated, not yet opened
    Loaded,
    /// Open and ready to process
    Opened,
    /// Closed by the host; only unload remains
    Closed,
    /// Module released
    Unloaded,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Loaded => "loaded",
            LifecycleState::Opened => "opened",
            LifecycleState::Closed => "closed",
            LifecycleState::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

/// Host-side processing settings fixed at instance creation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSettings {
    pub sample_rate: f32,
    /// Upper bound for frames per process call; buffers are sized to this
    pub max_block_size: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            max_block_size: 512,
        }
    }
}

impl HostSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSettings(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidSettings(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, self.max_block_size
            )));
        }
        Ok(())
    }
}

struct Inner {
    state: LifecycleState,
    /// `None` once the plugin has been closed or unloaded
    descriptor: Option<EffectDescriptor>,
    processor: AudioProcessor,
    module: Option<PluginModule>,
}

// SAFETY: the descriptor and scratch pointers are only dereferenced while the
// owning EffectInstance's lock is held.
unsafe impl Send for Inner {}

impl Inner {
    /// Descriptor for calls valid in Loaded and Opened
    fn active(&self, operation: &'static str) -> Result<&EffectDescriptor> {
        match (self.state, &self.descriptor) {
            (LifecycleState::Loaded | LifecycleState::Opened, Some(descriptor)) => Ok(descriptor),
            (state, _) => Err(PluginError::InvalidState { operation, state }),
        }
    }

    /// Descriptor for calls valid only in Opened
    fn running(&self, operation: &'static str) -> Result<&EffectDescriptor> {
        match (self.state, &self.descriptor) {
            (LifecycleState::Opened, Some(descriptor)) => Ok(descriptor),
            (state, _) => Err(PluginError::InvalidState { operation, state }),
        }
    }

    fn open_sequence(&mut self, context: &HostContext) -> Result<()> {
        let dispatcher = self.active("open")?.dispatcher();
        dispatcher.call(OpCode::Open, 0, 0, 0.0);
        dispatcher.call(OpCode::SetSampleRate, 0, 0, context.sample_rate());
        dispatcher.call(OpCode::SetBlockSize, 0, context.block_size() as isize, 0.0);
        dispatcher.call(OpCode::MainsChanged, 0, 1, 0.0);
        dispatcher.call(OpCode::StartProcess, 0, 0, 0.0);
        self.state = LifecycleState::Opened;
        Ok(())
    }

    /// Stop processing and close; the descriptor is gone afterwards
    fn close_sequence(&mut self) {
        let Some(descriptor) = self.descriptor.take() else {
            self.state = LifecycleState::Closed;
            return;
        };
        let dispatcher = descriptor.dispatcher();
        dispatcher.call(OpCode::StopProcess, 0, 0, 0.0);
        dispatcher.call(OpCode::MainsChanged, 0, 0, 0.0);
        send_close(&descriptor, DispatchPtr::None);
        self.state = LifecycleState::Closed;
    }

    fn shutdown(&mut self) {
        if self.state == LifecycleState::Unloaded {
            return;
        }
        if self.state == LifecycleState::Opened {
            self.close_sequence();
        }
        if let Some(descriptor) = self.descriptor.take() {
            // Never opened: no Close, but stop routing callbacks to us
            // SAFETY: the module is still loaded.
            unsafe { detach_context(descriptor.as_ptr()) };
        }
        if let Some(mut module) = self.module.take() {
            module.unload();
        }
        self.state = LifecycleState::Unloaded;
    }

    fn process<I, O>(
        &mut self,
        context: &HostContext,
        inputs: &I,
        outputs: &mut O,
        frames: usize,
    ) -> Result<()>
    where
        I: ChannelSource + ?Sized,
        O: ChannelSink + ?Sized,
    {
        let Inner {
            state,
            descriptor,
            processor,
            ..
        } = self;
        let descriptor = match (*state, descriptor.as_ref()) {
            (LifecycleState::Opened, Some(descriptor)) => descriptor,
            (state, _) => {
                return Err(PluginError::InvalidState {
                    operation: "process audio",
                    state,
                })
            }
        };
        processor.process(descriptor, context, inputs, outputs, frames)
    }
}

/// Detach the host context, then issue Close
///
/// The plugin may free its descriptor inside Close, so nothing may read the
/// descriptor after this returns.
fn send_close(descriptor: &EffectDescriptor, ptr: DispatchPtr<'_>) -> isize {
    // SAFETY: the descriptor is live until Close returns.
    unsafe { detach_context(descriptor.as_ptr()) };
    descriptor.dispatcher().dispatch(OpCode::Close, 0, 0, ptr, 0.0)
}

/// One plugin instance
pub struct EffectInstance {
    inner: Mutex<Inner>,
    context: Arc<HostContext>,
    info: EffectInfo,
    path: Option<PathBuf>,
    max_block_size: usize,
}

impl EffectInstance {
    /// Load a plugin module from disk and create its instance
    pub fn load(path: impl AsRef<Path>, settings: &HostSettings) -> Result<Self> {
        settings.validate()?;
        let module = PluginModule::load(path)?;
        let entry = module.entry_point()?;
        let path = module.path().to_path_buf();
        // SAFETY: `entry` comes from `module`, which the instance keeps loaded.
        unsafe { Self::create(entry, settings, Some(module), Some(path)) }
    }

    /// Create an instance from an entry point that is already in memory
    ///
    /// # Safety
    /// `entry` must be a plugin entry point that stays callable, along with
    /// the descriptor it returns, for the life of the instance.
    pub unsafe fn from_entry(entry: PluginMain, settings: &HostSettings) -> Result<Self> {
        settings.validate()?;
        Self::create(entry, settings, None, None)
    }

    unsafe fn create(
        entry: PluginMain,
        settings: &HostSettings,
        module: Option<PluginModule>,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let context = Arc::new(HostContext::new(
            settings.sample_rate,
            settings.max_block_size,
        ));

        let descriptor = with_pending_context(&context, || {
            EffectDescriptor::create(entry, host_callback)
        })
        .map_err(|source| match &path {
            Some(path) => PluginError::invalid(path.clone(), source),
            None => source.into(),
        })?;

        attach_context(descriptor.as_ptr(), Arc::as_ptr(&context));
        let info = descriptor.info().clone();
        context.set_unique_id(info.unique_id.0 as i32);

        info!(
            "Loaded plugin {} ({} params, {} in / {} out){}",
            info.unique_id,
            info.num_params,
            info.num_inputs,
            info.num_outputs,
            path.as_ref()
                .map(|p| format!(" from {}", p.display()))
                .unwrap_or_default()
        );

        let processor = AudioProcessor::new(
            info.num_inputs,
            info.num_outputs,
            settings.max_block_size,
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Loaded,
                descriptor: Some(descriptor),
                processor,
                module,
            }),
            context,
            info,
            path,
            max_block_size: settings.max_block_size,
        })
    }

    /// Facts captured from the descriptor at creation
    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    /// Module path, when loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn sample_rate(&self) -> f32 {
        self.context.sample_rate()
    }

    pub fn block_size(&self) -> usize {
        self.context.block_size()
    }

    /// Open the plugin and start processing
    ///
    /// Sends Open, the sample rate and block size, switches mains on and
    /// starts processing. Opening an open instance does nothing.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            LifecycleState::Loaded => {}
            LifecycleState::Opened => return Ok(()),
            state => {
                return Err(PluginError::InvalidState {
                    operation: "open",
                    state,
                })
            }
        }
        inner.open_sequence(&self.context)?;
        info!("Opened plugin {}", self.info.unique_id);
        Ok(())
    }

    /// Stop processing and close; closing twice does nothing
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            LifecycleState::Opened => {
                inner.close_sequence();
                info!("Closed plugin {}", self.info.unique_id);
                Ok(())
            }
            LifecycleState::Closed => Ok(()),
            state => Err(PluginError::InvalidState {
                operation: "close",
                state,
            }),
        }
    }

    /// Release the module, closing first if needed. Safe to call repeatedly.
    pub fn unload(&self) {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Unloaded {
            inner.shutdown();
            info!("Unloaded plugin {}", self.info.unique_id);
        }
    }

    /// Issue a raw opcode
    ///
    /// The result is passed through. Dispatching `Open` moves the instance
    /// to Opened and `Close` moves it to Closed; sample rate and block size
    /// changes are mirrored into the host context.
    pub fn dispatch(
        &self,
        opcode: OpCode,
        index: i32,
        value: isize,
        ptr: DispatchPtr<'_>,
        opt: f32,
    ) -> Result<isize> {
        let mut inner = self.inner.lock();
        let descriptor = inner.active("dispatch")?;

        match opcode {
            OpCode::Close => {
                debug!("dispatch Close to {}", self.info.unique_id);
                let result = match inner.descriptor.take() {
                    Some(descriptor) => send_close(&descriptor, ptr),
                    None => 0,
                };
                inner.state = LifecycleState::Closed;
                return Ok(result);
            }
            OpCode::SetBlockSize => {
                let frames = usize::try_from(value).unwrap_or(0);
                if frames == 0 || frames > self.max_block_size {
                    return Err(ConfigError::BlockTooLarge {
                        frames,
                        max: self.max_block_size,
                    }
                    .into());
                }
                self.context.set_block_size(frames);
            }
            OpCode::SetSampleRate => self.context.set_sample_rate(opt),
            _ => {}
        }

        let result = descriptor
            .dispatcher()
            .dispatch(opcode, index, value, ptr, opt);
        if opcode == OpCode::Open && inner.state == LifecycleState::Loaded {
            debug!("dispatch Open to {}", self.info.unique_id);
            inner.state = LifecycleState::Opened;
        }
        Ok(result)
    }

    fn with_active<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&EffectDescriptor) -> Result<R>,
    ) -> Result<R> {
        let inner = self.inner.lock();
        f(inner.active(operation)?)
    }

    fn with_running<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&EffectDescriptor) -> Result<R>,
    ) -> Result<R> {
        let inner = self.inner.lock();
        f(inner.running(operation)?)
    }

    fn text(&self, operation: &'static str, opcode: OpCode, index: i32) -> Result<String> {
        self.with_active(operation, |d| Ok(d.dispatcher().text(opcode, index)))
    }

    fn query(&self, operation: &'static str, opcode: OpCode, index: i32) -> Result<isize> {
        self.with_active(operation, |d| Ok(d.dispatcher().call(opcode, index, 0, 0.0)))
    }

    // Parameters

    pub fn set_parameter(&self, index: usize, value: f32) -> Result<()> {
        self.with_running("set a parameter", |d| {
            Ok(d.parameters().set(index, value)?)
        })
    }

    pub fn get_parameter(&self, index: usize) -> Result<f32> {
        self.with_running("read a parameter", |d| Ok(d.parameters().get(index)?))
    }

    pub fn parameter_name(&self, index: usize) -> Result<String> {
        self.with_active("read a parameter name", |d| {
            Ok(d.parameters().name(index)?)
        })
    }

    pub fn parameter_label(&self, index: usize) -> Result<String> {
        self.with_active("read a parameter label", |d| {
            Ok(d.parameters().label(index)?)
        })
    }

    pub fn parameter_display(&self, index: usize) -> Result<String> {
        self.with_active("read a parameter display", |d| {
            Ok(d.parameters().display(index)?)
        })
    }

    pub fn can_be_automated(&self, index: usize) -> Result<bool> {
        self.with_active("query automation", |d| {
            Ok(d.parameters().can_be_automated(index)?)
        })
    }

    /// Snapshot of every parameter; values are only read once opened
    pub fn parameters(&self) -> Result<Vec<ParameterInfo>> {
        let inner = self.inner.lock();
        let opened = inner.state == LifecycleState::Opened;
        let params = inner.active("list parameters")?.parameters();
        (0..params.count())
            .map(|index| {
                let info = if opened {
                    params.info(index)
                } else {
                    params.describe(index)
                };
                info.map_err(PluginError::from)
            })
            .collect()
    }

    /// Parameter changes the plugin reported since the last call
    pub fn take_automation(&self) -> Vec<ParameterChange> {
        self.context.drain_automation()
    }

    // Programs

    pub fn program(&self) -> Result<i32> {
        Ok(self.query("read the program", OpCode::GetProgram, 0)? as i32)
    }

    pub fn set_program(&self, program: i32) -> Result<()> {
        self.with_active("change program", |d| {
            d.dispatcher()
                .call(OpCode::SetProgram, 0, program as isize, 0.0);
            Ok(())
        })
    }

    pub fn program_name(&self) -> Result<String> {
        self.text("read the program name", OpCode::GetProgramName, 0)
    }

    pub fn set_program_name(&self, name: &str) -> Result<()> {
        self.with_active("rename the program", |d| {
            d.dispatcher().with_str(OpCode::SetProgramName, 0, name);
            Ok(())
        })
    }

    /// Name of any program without switching to it, if the plugin supports it
    pub fn program_name_indexed(&self, program: i32) -> Result<Option<String>> {
        self.with_active("read a program name", |d| {
            let mut buffer = TextBuffer::new();
            let supported = d.dispatcher().dispatch(
                OpCode::GetProgramNameIndexed,
                program,
                -1,
                DispatchPtr::Text(&mut buffer),
                0.0,
            );
            Ok((supported != 0).then(|| buffer.to_string_lossy()))
        })
    }

    // State chunks

    /// Plugin state as an opaque chunk; `preset` selects the current program
    /// instead of the whole bank
    pub fn get_chunk(&self, preset: bool) -> Result<Vec<u8>> {
        self.with_active("read state", |d| {
            d.dispatcher()
                .get_chunk(preset)
                .ok_or(PluginError::CallFailed {
                    opcode: OpCode::GetChunk,
                    result: 0,
                })
        })
    }

    pub fn set_chunk(&self, preset: bool, data: &[u8]) -> Result<isize> {
        self.with_active("restore state", |d| Ok(d.dispatcher().set_chunk(preset, data)))
    }

    // Informational

    pub fn effect_name(&self) -> Result<String> {
        self.text("read the effect name", OpCode::GetEffectName, 0)
    }

    pub fn vendor(&self) -> Result<String> {
        self.text("read the vendor", OpCode::GetVendorString, 0)
    }

    pub fn product(&self) -> Result<String> {
        self.text("read the product", OpCode::GetProductString, 0)
    }

    pub fn vendor_version(&self) -> Result<isize> {
        self.query("read the vendor version", OpCode::GetVendorVersion, 0)
    }

    pub fn vst_version(&self) -> Result<isize> {
        self.query("read the API version", OpCode::GetVstVersion, 0)
    }

    pub fn category(&self) -> Result<isize> {
        self.query("read the category", OpCode::GetPlugCategory, 0)
    }

    pub fn tail_size(&self) -> Result<isize> {
        self.query("read the tail size", OpCode::GetTailSize, 0)
    }

    /// `Some(true)`/`Some(false)` for a definite answer, `None` if unknown
    pub fn can_do(&self, feature: &str) -> Result<Option<bool>> {
        self.with_active("query capabilities", |d| {
            Ok(match d.dispatcher().with_str(OpCode::CanDo, 0, feature) {
                0 => None,
                answer => Some(answer > 0),
            })
        })
    }

    /// Ask the plugin to bypass itself; `false` if it cannot
    pub fn set_bypass(&self, bypass: bool) -> Result<bool> {
        self.with_running("bypass", |d| {
            Ok(d.dispatcher().call(OpCode::SetBypass, 0, bypass as isize, 0.0) != 0)
        })
    }

    // Host settings

    /// Change the sample rate, cycling mains if the plugin is running
    pub fn set_sample_rate(&self, rate: f32) -> Result<()> {
        HostSettings {
            sample_rate: rate,
            max_block_size: self.max_block_size,
        }
        .validate()?;
        let inner = self.inner.lock();
        self.context.set_sample_rate(rate);
        if let Ok(descriptor) = inner.running("change sample rate") {
            let dispatcher = descriptor.dispatcher();
            with_mains_off(dispatcher, || {
                dispatcher.call(OpCode::SetSampleRate, 0, 0, rate);
            });
        }
        Ok(())
    }

    /// Change the nominal block size; it may not exceed the maximum the
    /// instance was created with
    pub fn set_block_size(&self, frames: usize) -> Result<()> {
        if frames == 0 || frames > self.max_block_size {
            return Err(ConfigError::BlockTooLarge {
                frames,
                max: self.max_block_size,
            }
            .into());
        }
        let inner = self.inner.lock();
        self.context.set_block_size(frames);
        if let Ok(descriptor) = inner.running("change block size") {
            let dispatcher = descriptor.dispatcher();
            with_mains_off(dispatcher, || {
                dispatcher.call(OpCode::SetBlockSize, 0, frames as isize, 0.0);
            });
        }
        Ok(())
    }

    // Audio

    /// Check a host channel layout against the plugin's
    pub fn check_io(&self, inputs: usize, outputs: usize) -> Result<()> {
        self.inner.lock().processor.check_io(inputs, outputs)?;
        Ok(())
    }

    /// Process `frames` samples from `input` into `output`
    pub fn process_replacing(
        &self,
        input: &AudioBlock,
        output: &mut AudioBlock,
        frames: usize,
    ) -> Result<()> {
        self.inner
            .lock()
            .process(&self.context, input, output, frames)
    }

    /// Like [`process_replacing`](Self::process_replacing), but returns
    /// `Ok(false)` instead of waiting when a control call holds the instance
    pub fn try_process_replacing(
        &self,
        input: &AudioBlock,
        output: &mut AudioBlock,
        frames: usize,
    ) -> Result<bool> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Ok(false);
        };
        inner.process(&self.context, input, output, frames)?;
        Ok(true)
    }

    /// Slice form; processes as many frames as the shortest channel holds
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> Result<()> {
        let frames = match (inputs.is_empty(), outputs.is_empty()) {
            (true, true) => 0,
            (true, false) => ChannelSink::frames(&*outputs),
            (false, true) => ChannelSource::frames(inputs),
            (false, false) => ChannelSource::frames(inputs).min(ChannelSink::frames(&*outputs)),
        };
        self.inner
            .lock()
            .process(&self.context, inputs, outputs, frames)
    }
}

fn with_mains_off(dispatcher: Dispatcher<'_>, f: impl FnOnce()) {
    dispatcher.call(OpCode::MainsChanged, 0, 0, 0.0);
    f();
    dispatcher.call(OpCode::MainsChanged, 0, 1, 0.0);
}

impl Drop for EffectInstance {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != LifecycleState::Unloaded {
            if inner.state == LifecycleState::Opened {
                warn!(
                    "Plugin {} dropped while open; closing",
                    self.info.unique_id
                );
            }
            inner.shutdown();
        }
    }
}

impl fmt::Debug for EffectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectInstance")
            .field("unique_id", &self.info.unique_id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}
