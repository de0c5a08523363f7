pub mod cartridge;
pub mod clock;
pub mod config;
pub mod convention;
pub mod cpu;
pub mod dma;
pub mod error;
pub mod intf;
pub mod joypad;
pub mod memory;
pub mod mmunit;
pub mod ppu;
pub mod register;
pub mod speed;
pub mod system_clock;
pub mod timer;
pub mod wram;
