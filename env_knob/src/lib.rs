//! Process-wide tunables backed by environment variables.
//!
//! An [`EnvKnob`] couples the name of an environment variable with a default
//! value rendered as a string. The knob is resolved exactly once, on first
//! access; later changes to the environment are ignored. This is meant for
//! switches that tune or trace the engine without being part of its API
//! (logging toggles, sampling round sizes, ...).
//!
//! ```
//! use env_knob::EnvKnob;
//! static ROUND: EnvKnob<u64> = EnvKnob::new("GRAVEL_STAT_ROUND", "50");
//!
//! assert_eq!(ROUND.get(), 50);
//! ```

use once_cell::sync::OnceCell;
use std::str::FromStr;

pub struct EnvKnob<T> {
    slot: OnceCell<T>,
    var: &'static str,
    fallback: &'static str,
}

impl<T> EnvKnob<T> {
    pub const fn new(var: &'static str, fallback: &'static str) -> EnvKnob<T> {
        EnvKnob {
            slot: OnceCell::new(),
            var,
            fallback,
        }
    }

    /// Name of the backing environment variable.
    pub fn var(&self) -> &'static str {
        self.var
    }
}

impl<T: FromStr> EnvKnob<T> {
    fn fallback_value(&self) -> T {
        match T::from_str(self.fallback) {
            Ok(v) => v,
            Err(_) => panic!("env_knob {}: unparseable fallback {:?}", self.var, self.fallback),
        }
    }

    /// Resolved value of the knob, copied out.
    ///
    /// The first call reads the environment variable; a set but unparseable
    /// value falls back to the default with a warning on stderr.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        *self.get_ref()
    }

    /// Resolved value of the knob, by reference.
    pub fn get_ref(&self) -> &T {
        self.slot.get_or_init(|| match std::env::var(self.var) {
            Ok(raw) => T::from_str(&raw).unwrap_or_else(|_| {
                eprintln!(
                    "[env_knob] {}={:?} does not parse, using default {:?}",
                    self.var, raw, self.fallback
                );
                self.fallback_value()
            }),
            Err(_) => self.fallback_value(),
        })
    }

    /// Pin the knob to `value` before anyone reads it.
    ///
    /// # Panics
    /// Panics if the knob was already resolved.
    pub fn force(&self, value: T) {
        if self.slot.set(value).is_err() {
            panic!("env_knob {}: already resolved", self.var);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static UNSET: EnvKnob<u32> = EnvKnob::new("ENV_KNOB_TEST_UNSET", "17");
    static FORCED: EnvKnob<bool> = EnvKnob::new("ENV_KNOB_TEST_FORCED", "false");

    #[test]
    fn fallback_when_unset() {
        assert_eq!(UNSET.get(), 17);
    }

    #[test]
    fn force_wins_over_fallback() {
        FORCED.force(true);
        assert!(FORCED.get());
    }
}
