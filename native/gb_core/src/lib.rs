/// Implement all part of the gameboy device, like cpu, ppu, memory...
pub mod core;
/// Logger and debug probes
pub mod tools;
/// C entry points for the host platform
pub mod api;

pub use crate::core::config::MachineConfig;
pub use crate::core::convention::HardwareMode;
pub use crate::core::cpu::Step;
pub use crate::core::error::GbError;
pub use crate::core::joypad::JoypadKey;
pub use crate::core::system_clock::SystemClock;
