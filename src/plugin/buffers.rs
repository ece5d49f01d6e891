//! Audio blocks and the ABI's pointer-array view
//!
//! The host owns every sample it hands to a plugin ([`AudioBlock`]). The ABI
//! wants `float**`: an array of per-channel base addresses. [`ScratchBuffers`]
//! owns native-layout channel storage sized once for the maximum block, and
//! [`ChannelPointers`] is the disposable projection over it built for a
//! single call. Nothing here allocates after construction.

use std::marker::PhantomData;

use super::error::ConfigError;

/// Host-owned multichannel audio, one contiguous buffer per channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBlock {
    /// Silent block
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels],
            frames,
        }
    }

    /// Wrap existing channel buffers, which must all have the same length
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Result<Self, ConfigError> {
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(ConfigError::RaggedBlock);
        }
        Ok(Self { channels, frames })
    }

    /// Deinterleave `samples` (frame-major) into a block
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        let mut block = Self::new(channels, samples.len() / channels.max(1));
        block.read_interleaved(samples);
        block
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Fill from interleaved samples; frames beyond `samples` are left alone
    pub fn read_interleaved(&mut self, samples: &[f32]) {
        let count = self.channels.len();
        if count == 0 {
            return;
        }
        for (frame, chunk) in samples.chunks_exact(count).take(self.frames).enumerate() {
            for (channel, &sample) in self.channels.iter_mut().zip(chunk) {
                channel[frame] = sample;
            }
        }
    }

    /// Write the first frames of the block, interleaved, into `samples`
    pub fn write_interleaved(&self, samples: &mut [f32]) {
        let count = self.channels.len();
        if count == 0 {
            return;
        }
        for (frame, chunk) in samples.chunks_exact_mut(count).take(self.frames).enumerate() {
            for (slot, channel) in chunk.iter_mut().zip(&self.channels) {
                *slot = channel[frame];
            }
        }
    }

    pub fn fill(&mut self, value: f32) {
        for channel in &mut self.channels {
            channel.fill(value);
        }
    }
}

/// Read access to host input channels
pub trait ChannelSource {
    fn channel_count(&self) -> usize;
    /// Length of the shortest channel
    fn frames(&self) -> usize;
    fn channel(&self, index: usize) -> &[f32];
}

/// Write access to host output channels
pub trait ChannelSink {
    fn channel_count(&self) -> usize;
    /// Length of the shortest channel
    fn frames(&self) -> usize;
    fn channel_mut(&mut self, index: usize) -> &mut [f32];
}

impl ChannelSource for AudioBlock {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }
}

impl ChannelSink for AudioBlock {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }
}

impl ChannelSource for [&[f32]] {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn frames(&self) -> usize {
        self.iter().map(|c| c.len()).min().unwrap_or(0)
    }

    fn channel(&self, index: usize) -> &[f32] {
        self[index]
    }
}

impl ChannelSink for [&mut [f32]] {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn frames(&self) -> usize {
        self.iter().map(|c| c.len()).min().unwrap_or(0)
    }

    fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut *self[index]
    }
}

/// Plugin-facing channel storage, pre-sized to the maximum block
pub struct ScratchBuffers {
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
    input_ptrs: Vec<*const f32>,
    output_ptrs: Vec<*mut f32>,
    max_frames: usize,
}

// SAFETY: the pointer arrays only ever point into this struct's own
// buffers and are rebuilt before each use.
unsafe impl Send for ScratchBuffers {}

impl ScratchBuffers {
    pub fn new(num_inputs: usize, num_outputs: usize, max_frames: usize) -> Self {
        Self {
            inputs: vec![vec![0.0; max_frames]; num_inputs],
            outputs: vec![vec![0.0; max_frames]; num_outputs],
            input_ptrs: vec![std::ptr::null(); num_inputs],
            output_ptrs: vec![std::ptr::null_mut(); num_outputs],
            max_frames,
        }
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Copy the first `frames` samples of each host channel into scratch
    pub fn load_inputs<S: ChannelSource + ?Sized>(&mut self, source: &S, frames: usize) {
        for (index, dst) in self.inputs.iter_mut().enumerate() {
            dst[..frames].copy_from_slice(&source.channel(index)[..frames]);
        }
    }

    /// Silence the first `frames` of every output channel
    pub fn clear_outputs(&mut self, frames: usize) {
        for channel in &mut self.outputs {
            channel[..frames].fill(0.0);
        }
    }

    /// Copy `frames` processed samples back into host channels
    pub fn store_outputs<S: ChannelSink + ?Sized>(&self, sink: &mut S, frames: usize) {
        for (index, src) in self.outputs.iter().enumerate() {
            sink.channel_mut(index)[..frames].copy_from_slice(&src[..frames]);
        }
    }

    /// Build the `float**` view for one call
    pub fn pointers(&mut self, frames: usize) -> ChannelPointers<'_> {
        debug_assert!(frames <= self.max_frames);
        for (slot, channel) in self.input_ptrs.iter_mut().zip(&self.inputs) {
            *slot = channel.as_ptr();
        }
        for (slot, channel) in self.output_ptrs.iter_mut().zip(&mut self.outputs) {
            *slot = channel.as_mut_ptr();
        }
        ChannelPointers {
            inputs: self.input_ptrs.as_ptr(),
            outputs: self.output_ptrs.as_mut_ptr(),
            frames: frames as i32,
            _scratch: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn output(&self, index: usize) -> &[f32] {
        &self.outputs[index]
    }
}

/// Per-call `float**` projection; valid only while the scratch is borrowed
pub struct ChannelPointers<'a> {
    pub inputs: *const *const f32,
    pub outputs: *mut *mut f32,
    pub frames: i32,
    _scratch: PhantomData<&'a mut ScratchBuffers>,
}
