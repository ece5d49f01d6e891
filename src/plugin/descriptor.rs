//! Validated view over a plugin's `AEffect`

use std::ptr::{self, NonNull};

use super::api::{
    AEffect, DispatcherProc, EffectFlags, FourCc, GetParameterProc, HostCallbackProc, PluginMain,
    ProcessProc, SetParameterProc, MAGIC,
};
use super::dispatcher::Dispatcher;
use super::error::ValidationError;
use super::params::Parameters;

/// Static facts read from the descriptor once, at creation
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInfo {
    pub unique_id: FourCc,
    pub version: i32,
    pub num_programs: usize,
    pub num_params: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub flags: EffectFlags,
    pub initial_delay: usize,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    /// Whether either process entry point is present
    pub can_process: bool,
}

/// How the plugin's process entry point treats its outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// `processReplacing`: outputs are overwritten
    Replacing,
    /// legacy `process`: results are added into the outputs
    Accumulating,
}

/// A descriptor that passed validation
///
/// Holds the required function pointers unwrapped, so presence is checked
/// once here instead of at every call. The pointee is owned by the plugin
/// module and must outlive this value.
pub struct EffectDescriptor {
    effect: NonNull<AEffect>,
    dispatcher: DispatcherProc,
    set_parameter: SetParameterProc,
    get_parameter: GetParameterProc,
    process: Option<(ProcessProc, ProcessMode)>,
    info: EffectInfo,
}

fn count(field: &'static str, value: i32) -> Result<usize, ValidationError> {
    usize::try_from(value).map_err(|_| ValidationError::InvalidCount { field, value })
}

impl EffectDescriptor {
    /// Call a plugin entry point and validate the descriptor it returns
    ///
    /// # Safety
    /// `entry` must be a plugin entry point whose module stays loaded for the
    /// lifetime of the returned descriptor.
    pub unsafe fn create(
        entry: PluginMain,
        callback: HostCallbackProc,
    ) -> Result<Self, ValidationError> {
        let raw = entry(callback);
        Self::from_raw(raw)
    }

    /// Validate a descriptor pointer
    ///
    /// The magic tag is checked before any function pointer field is read,
    /// so a foreign or corrupt struct is never dispatched into.
    ///
    /// # Safety
    /// `raw` must be null or point to readable memory at least the size of
    /// the magic field, and to a full `AEffect` when the magic matches.
    pub unsafe fn from_raw(raw: *mut AEffect) -> Result<Self, ValidationError> {
        let effect = NonNull::new(raw).ok_or(ValidationError::NullDescriptor)?;

        let magic = FourCc::from_raw(ptr::addr_of!((*raw).magic).read());
        if magic != MAGIC {
            return Err(ValidationError::NotAPlugin {
                magic: magic.to_string(),
            });
        }

        let aeffect = effect.as_ref();
        let dispatcher = aeffect
            .dispatcher
            .ok_or(ValidationError::IncompleteInterface { field: "dispatcher" })?;
        let set_parameter = aeffect
            .set_parameter
            .ok_or(ValidationError::IncompleteInterface {
                field: "setParameter",
            })?;
        let get_parameter = aeffect
            .get_parameter
            .ok_or(ValidationError::IncompleteInterface {
                field: "getParameter",
            })?;

        let process = match (aeffect.process_replacing, aeffect.process) {
            (Some(f), _) => Some((f, ProcessMode::Replacing)),
            (None, Some(f)) => Some((f, ProcessMode::Accumulating)),
            (None, None) => None,
        };

        let info = EffectInfo {
            unique_id: FourCc::from_raw(aeffect.unique_id),
            version: aeffect.version,
            num_programs: count("numPrograms", aeffect.num_programs)?,
            num_params: count("numParams", aeffect.num_params)?,
            num_inputs: count("numInputs", aeffect.num_inputs)?,
            num_outputs: count("numOutputs", aeffect.num_outputs)?,
            flags: EffectFlags::from_raw(aeffect.flags),
            // A latency hint only; negative values read as none
            initial_delay: aeffect.initial_delay.max(0) as usize,
            real_qualities: aeffect.real_qualities,
            off_qualities: aeffect.off_qualities,
            io_ratio: aeffect.io_ratio,
            can_process: process.is_some(),
        };

        Ok(Self {
            effect,
            dispatcher,
            set_parameter,
            get_parameter,
            process,
            info,
        })
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn unique_id(&self) -> FourCc {
        self.info.unique_id
    }

    /// Raw descriptor pointer, for passing back into the plugin
    pub fn as_ptr(&self) -> *mut AEffect {
        self.effect.as_ptr()
    }

    /// Opcode call surface
    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(self.effect, self.dispatcher)
    }

    /// Parameter call surface
    pub fn parameters(&self) -> Parameters<'_> {
        Parameters::new(
            self.effect,
            self.set_parameter,
            self.get_parameter,
            self.dispatcher(),
            self.info.num_params,
        )
    }

    /// The process entry point to use, preferring `processReplacing`
    pub fn process_fn(&self) -> Option<(ProcessProc, ProcessMode)> {
        self.process
    }
}

impl std::fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("effect", &self.effect)
            .field("info", &self.info)
            .finish()
    }
}
