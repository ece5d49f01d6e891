//! Parameter access
//!
//! Values go through the `setParameter`/`getParameter` function pointers;
//! names, labels and display strings go through the dispatcher. Indices are
//! bounds-checked here because a plugin's own behaviour for an out-of-range
//! index is unspecified and frequently unsafe.

use std::marker::PhantomData;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use super::api::{AEffect, GetParameterProc, OpCode, SetParameterProc};
use super::dispatcher::Dispatcher;
use super::error::ConfigError;

/// Snapshot of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub index: usize,
    pub name: String,
    pub label: String,
    pub display: String,
    pub value: f32,
}

/// Parameter surface of one plugin
#[derive(Clone, Copy)]
pub struct Parameters<'a> {
    effect: NonNull<AEffect>,
    set_parameter: SetParameterProc,
    get_parameter: GetParameterProc,
    dispatcher: Dispatcher<'a>,
    count: usize,
    _descriptor: PhantomData<&'a AEffect>,
}

impl<'a> Parameters<'a> {
    pub(crate) fn new(
        effect: NonNull<AEffect>,
        set_parameter: SetParameterProc,
        get_parameter: GetParameterProc,
        dispatcher: Dispatcher<'a>,
        count: usize,
    ) -> Self {
        Self {
            effect,
            set_parameter,
            get_parameter,
            dispatcher,
            count,
            _descriptor: PhantomData,
        }
    }

    /// Number of parameters the plugin declared
    pub fn count(&self) -> usize {
        self.count
    }

    fn check(&self, index: usize) -> Result<i32, ConfigError> {
        if index >= self.count {
            return Err(ConfigError::ParameterOutOfRange {
                index,
                count: self.count,
            });
        }
        // count came from an i32, so any in-range index fits
        Ok(index as i32)
    }

    /// Set a parameter, usually normalised to 0.0..=1.0
    pub fn set(&self, index: usize, value: f32) -> Result<(), ConfigError> {
        let index = self.check(index)?;
        // SAFETY: validated descriptor, in-range index.
        unsafe { (self.set_parameter)(self.effect.as_ptr(), index, value) };
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<f32, ConfigError> {
        let index = self.check(index)?;
        // SAFETY: validated descriptor, in-range index.
        Ok(unsafe { (self.get_parameter)(self.effect.as_ptr(), index) })
    }

    /// Parameter name (e.g. "Gain")
    pub fn name(&self, index: usize) -> Result<String, ConfigError> {
        let index = self.check(index)?;
        Ok(self.dispatcher.text(OpCode::GetParamName, index))
    }

    /// Unit label (e.g. "dB")
    pub fn label(&self, index: usize) -> Result<String, ConfigError> {
        let index = self.check(index)?;
        Ok(self.dispatcher.text(OpCode::GetParamLabel, index))
    }

    /// Current value as the plugin displays it (e.g. "-6.0")
    pub fn display(&self, index: usize) -> Result<String, ConfigError> {
        let index = self.check(index)?;
        Ok(self.dispatcher.text(OpCode::GetParamDisplay, index))
    }

    /// Whether the plugin accepts automation of this parameter
    pub fn can_be_automated(&self, index: usize) -> Result<bool, ConfigError> {
        let index = self.check(index)?;
        Ok(self.dispatcher.call(OpCode::CanBeAutomated, index, 0, 0.0) != 0)
    }

    /// Text metadata only; safe before the plugin is opened
    pub fn describe(&self, index: usize) -> Result<ParameterInfo, ConfigError> {
        Ok(ParameterInfo {
            index,
            name: self.name(index)?,
            label: self.label(index)?,
            display: self.display(index)?,
            value: 0.0,
        })
    }

    /// Full snapshot including the current value
    pub fn info(&self, index: usize) -> Result<ParameterInfo, ConfigError> {
        let mut info = self.describe(index)?;
        info.value = self.get(index)?;
        Ok(info)
    }
}
