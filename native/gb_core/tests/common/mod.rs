#![allow(dead_code)]

use gb_core::core::cartridge::header_checksum;
use gb_core::{MachineConfig, SystemClock};

/// 组装测试用的卡带镜像，程序从0x0100开始
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    /// 32KB的ROM-only卡带
    pub fn new() -> Self {
        Self { rom: vec![0x00; 0x8000] }
    }

    /// 设置卡带类型以及ROM/RAM大小编码，ROM按编码扩展为32KB << rom_size
    pub fn cartridge(mut self, kind: u8, rom_size: u8, ram_size: u8) -> Self {
        self.rom.resize(0x8000 << rom_size, 0x00);
        self.rom[0x0147] = kind;
        self.rom[0x0148] = rom_size;
        self.rom[0x0149] = ram_size;
        self
    }

    pub fn cgb(mut self) -> Self {
        self.rom[0x0143] = 0x80;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.rom[0x0134..0x0134 + title.len()].copy_from_slice(title.as_bytes());
        self
    }

    pub fn program(self, code: &[u8]) -> Self {
        self.at(0x0100, code)
    }

    pub fn at(mut self, a: usize, bytes: &[u8]) -> Self {
        self.rom[a..a + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x014d] = header_checksum(&self.rom);
        self.rom
    }
}

pub fn machine(rom: Vec<u8>) -> SystemClock {
    SystemClock::power_up(rom, MachineConfig::default()).unwrap()
}

/// 执行n步，返回经过的T-cycle
pub fn run(gb: &mut SystemClock, n: usize) -> u64 {
    (0..n).map(|_| u64::from(gb.tick())).sum()
}
