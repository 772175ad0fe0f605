//! The power/reset collaborator (spec.md §1): this crate does not own
//! the system management controller bus, it only consumes one through
//! this trait, mirroring `smc_shutdown`/`smc_reset`/`smc_power_off`
//! (`examples/original_source/stage2/smc.h`), each declared
//! `__attribute__((__noreturn__))` in the original since they issue a
//! register write that removes the co-processor's own power.
//!
//! A Rust trait method cannot itself be `-> !` and still be usable as a
//! trait object, so [`PowerController::shutdown`] returns `()`: on real
//! hardware the call never returns control to its caller, and
//! [`loader`](crate::loader) treats it as the end of the road regardless
//! of whether it formally returns.

/// `smc_shutdown(reset)`'s `reset` argument: power the system off
/// entirely, or reset back to the bootloader handoff point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    PowerOff,
    Reset,
}

pub trait PowerController {
    /// Mirrors `smc_shutdown(bool reset)`. Does not return on real
    /// hardware.
    fn shutdown(&mut self, mode: ShutdownMode);

    /// Mirrors `smc_reset(void)`, equivalent to `shutdown(Reset)`.
    fn reset(&mut self) {
        self.shutdown(ShutdownMode::Reset);
    }

    /// Mirrors `smc_power_off(void)`, equivalent to `shutdown(PowerOff)`.
    fn power_off(&mut self) {
        self.shutdown(ShutdownMode::PowerOff);
    }
}

#[cfg(any(test, not(feature = "no_std")))]
pub mod test_support {
    use super::{PowerController, ShutdownMode};

    /// A recording power controller for tests: remembers whether it was
    /// asked to shut down and in which mode, rather than halting.
    #[derive(Default)]
    pub struct RecordingPower {
        pub calls: alloc::vec::Vec<ShutdownMode>,
    }

    impl RecordingPower {
        pub fn new() -> Self {
            RecordingPower { calls: alloc::vec::Vec::new() }
        }

        pub fn was_shut_down(&self) -> bool {
            !self.calls.is_empty()
        }
    }

    impl PowerController for RecordingPower {
        fn shutdown(&mut self, mode: ShutdownMode) {
            self.calls.push(mode);
        }
    }
}
