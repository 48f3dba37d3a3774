//! Sliding-window liveness counter
//!
//! A [`LivenessWindow`] records the outcome of the last `width` discovery
//! rounds for one address. The most significant bit of the window is the most
//! recent round: [`observe`](LivenessWindow::observe) sets it when a probe
//! found the address reachable, and [`decay`](LivenessWindow::decay) shifts the
//! whole window right once per scheduling cycle. An address whose window
//! reaches zero has not answered for `width` consecutive rounds and is dropped.
//!
//! # Bands
//!
//! | Band     | Condition                         | width 8      | width 4   |
//! |----------|-----------------------------------|--------------|-----------|
//! | `Stable` | upper half of the window all set  | `>= 0b11110000` | `>= 0b1100` |
//! | `New`    | top bit set                       | `0b1xxxxxxx` | `0b1xxx`  |
//! | `Loss`   | top bit clear, window non-zero    | `<= 0b01111111` | `<= 0b0111` |

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default window width, matching the one-byte `lastresult` column
pub const DEFAULT_WIDTH: u8 = 8;

/// Widest window that fits the stored representation
pub const MAX_WIDTH: u8 = 8;

/// Fixed-width sliding window of reachability observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LivenessWindow {
    bits: u8,
    width: u8,
}

/// Classification of a live window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessBand {
    /// Reachable in every round of the upper half of the window
    Stable,
    /// Reachable in the most recent round
    New,
    /// Not reachable in the most recent round, but still inside the window
    Loss,
}

impl LivenessWindow {
    /// Create an empty window
    pub fn new(width: u8) -> Result<Self> {
        validate_width(width)?;
        Ok(Self { bits: 0, width })
    }

    /// Rebuild a window from its stored bits; bits above `width` are discarded
    pub fn from_bits(bits: u8, width: u8) -> Result<Self> {
        validate_width(width)?;
        Ok(Self {
            bits: bits & full_mask(width),
            width,
        })
    }

    /// Window of a freshly discovered address
    pub fn discovered(width: u8) -> Result<Self> {
        let mut window = Self::new(width)?;
        window.observe();
        Ok(window)
    }

    /// Bit set by [`observe`](Self::observe)
    pub fn top_bit(&self) -> u8 {
        top_bit(self.width)
    }

    /// Record a successful probe in the current round
    pub fn observe(&mut self) {
        self.bits |= self.top_bit();
    }

    /// Advance one round without confirmation
    pub fn decay(&mut self) {
        self.bits >>= 1;
    }

    pub fn is_alive(&self) -> bool {
        self.bits != 0
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Band of the window, `None` once it has decayed to zero
    pub fn band(&self) -> Option<LivenessBand> {
        if !self.is_alive() {
            return None;
        }

        let stable = stable_mask(self.width);
        if self.bits & stable == stable {
            Some(LivenessBand::Stable)
        } else if self.bits & self.top_bit() != 0 {
            Some(LivenessBand::New)
        } else {
            Some(LivenessBand::Loss)
        }
    }
}

fn validate_width(width: u8) -> Result<()> {
    if width == 0 || width > MAX_WIDTH {
        return Err(Error::config(format!(
            "liveness window width must be between 1 and {MAX_WIDTH}, got {width}"
        )));
    }
    Ok(())
}

fn top_bit(width: u8) -> u8 {
    1 << (width - 1)
}

fn full_mask(width: u8) -> u8 {
    if width >= 8 {
        u8::MAX
    } else {
        (1u8 << width) - 1
    }
}

fn stable_mask(width: u8) -> u8 {
    let half = (width / 2).max(1);
    let ones = full_mask(half);
    ones << (width - half)
}
