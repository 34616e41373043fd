//! Reassembly of configuration blobs delivered in fragments.
//!
//! The first fragment carries the total blob size in its offset field;
//! every later fragment carries the byte position it starts at. A
//! single-fragment blob carries its own size.

use crate::error::{ComponentError, Result};

/// Largest blob accepted.
pub const MAX_CONFIG_BYTES: usize = 256 * 1024;

/// Where a fragment sits in its blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPosition {
    /// The whole blob in one fragment.
    Single,
    /// First of several.
    First,
    /// Neither first nor last.
    Middle,
    /// Last of several.
    Last,
}

impl FragmentPosition {
    /// Classify from the first/last flags.
    pub const fn from_flags(first: bool, last: bool) -> Self {
        match (first, last) {
            (true, true) => Self::Single,
            (true, false) => Self::First,
            (false, false) => Self::Middle,
            (false, true) => Self::Last,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ConfigAssembly {
    param_id: u32,
    expected: usize,
    data: Vec<u8>,
    open: bool,
}

impl ConfigAssembly {
    /// Feed one fragment; returns the complete blob once the last fragment
    /// arrives.
    pub(crate) fn push(
        &mut self,
        param_id: u32,
        first: bool,
        last: bool,
        offset: usize,
        fragment: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        match FragmentPosition::from_flags(first, last) {
            FragmentPosition::Single => {
                self.clear();
                if offset != fragment.len() {
                    return Err(ComponentError::invalid(format!(
                        "single fragment declares {offset} bytes, carries {}",
                        fragment.len()
                    )));
                }
                Ok(Some(fragment.to_vec()))
            }
            FragmentPosition::First => {
                self.clear();
                if offset > MAX_CONFIG_BYTES {
                    return Err(ComponentError::NoMemory(format!("config blob of {offset} bytes")));
                }
                self.data
                    .try_reserve_exact(offset)
                    .map_err(|_| ComponentError::NoMemory(format!("config blob of {offset} bytes")))?;
                self.param_id = param_id;
                self.expected = offset;
                self.open = true;
                self.append(fragment)?;
                Ok(None)
            }
            pos @ (FragmentPosition::Middle | FragmentPosition::Last) => {
                if !self.open || param_id != self.param_id {
                    self.clear();
                    return Err(ComponentError::invalid(format!(
                        "fragment for param {param_id} without a first block"
                    )));
                }
                if offset != self.data.len() {
                    let have = self.data.len();
                    self.clear();
                    return Err(ComponentError::invalid(format!(
                        "fragment at offset {offset}, expected {have}"
                    )));
                }
                self.append(fragment)?;
                if pos == FragmentPosition::Middle {
                    return Ok(None);
                }
                if self.data.len() != self.expected {
                    let (have, want) = (self.data.len(), self.expected);
                    self.clear();
                    return Err(ComponentError::invalid(format!("blob ended at {have} of {want} bytes")));
                }
                self.open = false;
                Ok(Some(std::mem::take(&mut self.data)))
            }
        }
    }

    fn append(&mut self, fragment: &[u8]) -> Result<()> {
        if self.data.len() + fragment.len() > self.expected {
            let want = self.expected;
            self.clear();
            return Err(ComponentError::invalid(format!("fragments overflow the declared {want} bytes")));
        }
        self.data.extend_from_slice(fragment);
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.expected = 0;
        self.open = false;
    }
}
