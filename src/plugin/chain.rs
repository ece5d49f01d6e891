//! Serial effect chains
//!
//! Runs a block through several opened instances in order, alternating
//! between the caller's block and one scratch block so nothing is allocated
//! per call.

use std::sync::Arc;

use tracing::debug;

use super::buffers::AudioBlock;
use super::error::{ConfigError, PluginError, Result};
use super::instance::{EffectInstance, LifecycleState};

/// Opened instances applied one after another
pub struct EffectChain {
    channels: usize,
    max_frames: usize,
    effects: Vec<Arc<EffectInstance>>,
    scratch: AudioBlock,
    /// Deinterleaved staging for interleaved callers
    staging: AudioBlock,
}

impl EffectChain {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            channels,
            max_frames,
            effects: Vec::new(),
            scratch: AudioBlock::new(channels, max_frames),
            staging: AudioBlock::new(channels, max_frames),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Append an opened instance whose inputs and outputs both match the
    /// chain's channel count
    pub fn push(&mut self, effect: Arc<EffectInstance>) -> Result<()> {
        let info = effect.info();
        for (direction, actual) in [("input", info.num_inputs), ("output", info.num_outputs)] {
            if actual != self.channels {
                return Err(ConfigError::ChannelMismatch {
                    direction,
                    expected: self.channels,
                    actual,
                }
                .into());
            }
        }
        if effect.max_block_size() < self.max_frames {
            return Err(ConfigError::BlockTooLarge {
                frames: self.max_frames,
                max: effect.max_block_size(),
            }
            .into());
        }
        let state = effect.state();
        if state != LifecycleState::Opened {
            return Err(PluginError::InvalidState {
                operation: "add to a chain",
                state,
            });
        }

        debug!("Chain slot {}: {}", self.effects.len(), info.unique_id);
        self.effects.push(effect);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[Arc<EffectInstance>] {
        &self.effects
    }

    /// Process the first `frames` of `block` in place
    pub fn process(&mut self, block: &mut AudioBlock, frames: usize) -> Result<()> {
        run(
            &self.effects,
            &mut self.scratch,
            self.channels,
            self.max_frames,
            block,
            frames,
        )
    }

    /// Process interleaved samples in place, in chunks of at most
    /// `max_frames`; a trailing partial frame is left untouched
    pub fn process_interleaved(&mut self, samples: &mut [f32]) -> Result<()> {
        if self.channels == 0 || self.effects.is_empty() {
            return Ok(());
        }
        let chunk_len = self.channels * self.max_frames;
        for chunk in samples.chunks_mut(chunk_len) {
            let frames = chunk.len() / self.channels;
            self.staging.read_interleaved(chunk);
            run(
                &self.effects,
                &mut self.scratch,
                self.channels,
                self.max_frames,
                &mut self.staging,
                frames,
            )?;
            self.staging.write_interleaved(&mut chunk[..frames * self.channels]);
        }
        Ok(())
    }

    /// Unload every instance and empty the chain
    pub fn unload_all(&mut self) {
        for effect in self.effects.drain(..) {
            effect.unload();
        }
    }
}

fn run(
    effects: &[Arc<EffectInstance>],
    scratch: &mut AudioBlock,
    channels: usize,
    max_frames: usize,
    block: &mut AudioBlock,
    frames: usize,
) -> Result<()> {
    if block.channel_count() != channels {
        return Err(ConfigError::ChannelMismatch {
            direction: "input",
            expected: channels,
            actual: block.channel_count(),
        }
        .into());
    }
    if frames > max_frames {
        return Err(ConfigError::BlockTooLarge {
            frames,
            max: max_frames,
        }
        .into());
    }
    if frames > block.frames() {
        return Err(ConfigError::FrameCountMismatch {
            direction: "input",
            frames,
            available: block.frames(),
        }
        .into());
    }
    if frames == 0 {
        return Ok(());
    }

    // Ping-pong: even slots read the caller's block, odd slots read scratch
    let mut in_scratch = false;
    for effect in effects {
        if in_scratch {
            effect.process_replacing(scratch, block, frames)?;
        } else {
            effect.process_replacing(block, scratch, frames)?;
        }
        in_scratch = !in_scratch;
    }

    if in_scratch {
        for channel in 0..channels {
            block.channel_mut(channel)[..frames].copy_from_slice(&scratch.channel(channel)[..frames]);
        }
    }
    Ok(())
}
