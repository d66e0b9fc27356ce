//! Reference skill implementations.
//!
//! Skills beyond these are explicitly out of scope; `calculator` and
//! `system_command` exist to exercise the registry end to end and to
//! give the scheduler and automation engine (§4.5, §4.7) a concrete
//! skill to invoke in tests.

pub mod calculator;
pub mod system_command;

pub use calculator::CalculatorSkill;
pub use system_command::SystemCommandSkill;
