//! Block processing through the plugin's process entry point

use tracing::trace;

use super::buffers::{ChannelSink, ChannelSource, ScratchBuffers};
use super::callback::HostContext;
use super::descriptor::{EffectDescriptor, ProcessMode};
use super::error::{ConfigError, PluginError};

/// Marshals host channels into the ABI layout and runs the process call
pub struct AudioProcessor {
    scratch: ScratchBuffers,
}

impl AudioProcessor {
    /// Pre-allocate buffers for the plugin's channel counts and `max_frames`
    pub fn new(num_inputs: usize, num_outputs: usize, max_frames: usize) -> Self {
        Self {
            scratch: ScratchBuffers::new(num_inputs, num_outputs, max_frames),
        }
    }

    pub fn max_frames(&self) -> usize {
        self.scratch.max_frames()
    }

    /// Check a host channel layout against the plugin's, once, up front
    pub fn check_io(&self, inputs: usize, outputs: usize) -> Result<(), ConfigError> {
        if inputs != self.scratch.num_inputs() {
            return Err(ConfigError::ChannelMismatch {
                direction: "input",
                expected: self.scratch.num_inputs(),
                actual: inputs,
            });
        }
        if outputs != self.scratch.num_outputs() {
            return Err(ConfigError::ChannelMismatch {
                direction: "output",
                expected: self.scratch.num_outputs(),
                actual: outputs,
            });
        }
        Ok(())
    }

    /// Check a whole call's shape: channel counts, block size, and that
    /// every channel holds at least `frames` samples
    pub fn check_block<I, O>(&self, inputs: &I, outputs: &O, frames: usize) -> Result<(), ConfigError>
    where
        I: ChannelSource + ?Sized,
        O: ChannelSink + ?Sized,
    {
        self.check_io(inputs.channel_count(), outputs.channel_count())?;
        if frames > self.max_frames() {
            return Err(ConfigError::BlockTooLarge {
                frames,
                max: self.max_frames(),
            });
        }
        let available = [
            ("input", inputs.channel_count(), inputs.frames()),
            ("output", outputs.channel_count(), outputs.frames()),
        ];
        for (direction, channels, available) in available {
            if channels > 0 && available < frames {
                return Err(ConfigError::FrameCountMismatch {
                    direction,
                    frames,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Process `frames` samples from `inputs` into `outputs`
    ///
    /// Channel counts must match the plugin's. `frames == 0` returns
    /// immediately without calling the plugin. Samples are not clipped.
    pub fn process<I, O>(
        &mut self,
        descriptor: &EffectDescriptor,
        context: &HostContext,
        inputs: &I,
        outputs: &mut O,
        frames: usize,
    ) -> Result<(), PluginError>
    where
        I: ChannelSource + ?Sized,
        O: ChannelSink + ?Sized,
    {
        self.check_io(inputs.channel_count(), outputs.channel_count())?;
        if frames == 0 {
            return Ok(());
        }
        self.check_block(inputs, outputs, frames)?;

        let (process_fn, mode) = descriptor
            .process_fn()
            .ok_or(PluginError::Unsupported("audio processing"))?;

        self.scratch.load_inputs(inputs, frames);
        if mode == ProcessMode::Accumulating {
            self.scratch.clear_outputs(frames);
        }

        trace!("process {} frames ({:?})", frames, mode);
        {
            let view = self.scratch.pointers(frames);
            context.set_processing(true);
            // SAFETY: the pointer arrays address scratch channels of at least
            // `frames` samples, sized to the plugin's declared channel counts.
            unsafe { process_fn(descriptor.as_ptr(), view.inputs, view.outputs, view.frames) };
            context.set_processing(false);
        }

        self.scratch.store_outputs(outputs, frames);
        Ok(())
    }
}
