use crate::core::clock::Clock;
use crate::core::convention::{HardwareMode, CPU_FREQ};
use crate::core::error::GbError;
use crate::core::memory::Memory;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

/// 卡带中的ROM，按0x4000字节分成若干bank，bank编号超出实际数量时取模
struct Rom {
    data: Vec<u8>,
}

impl Rom {
    fn banks(&self) -> usize {
        (self.data.len() / ROM_BANK_SIZE).max(1)
    }

    /// 读取第bank个ROM bank中偏移为offset的数据
    fn read(&self, bank: usize, offset: usize) -> u8 {
        let i = (bank % self.banks()) * ROM_BANK_SIZE + offset;
        self.data.get(i).copied().unwrap_or(0xff)
    }
}

/// 卡带中的外部RAM，可能不存在
struct Ram {
    data: Vec<u8>,
}

impl Ram {
    fn banks(&self) -> usize {
        (self.data.len() / RAM_BANK_SIZE).max(1)
    }

    fn index(&self, bank: usize, offset: usize) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }
        let i = (bank % self.banks()) * RAM_BANK_SIZE + offset;
        if i < self.data.len() {
            Some(i)
        } else {
            None
        }
    }

    fn read(&self, bank: usize, offset: usize) -> u8 {
        self.index(bank, offset).map_or(0xff, |i| self.data[i])
    }

    fn write(&mut self, bank: usize, offset: usize, v: u8) {
        if let Some(i) = self.index(bank, offset) {
            self.data[i] = v;
        }
    }
}

/// 卡带：0x0000~0x7fff映射ROM，0xa000~0xbfff映射外部RAM
/// 对0x0000~0x7fff的写入永远不会修改ROM，只会被当作bank控制器的命令
pub trait Cartridge: Memory {
    /// 卡带的原始ROM数据
    fn rom(&self) -> &[u8];

    /// 电池供电的外部RAM，由外部负责持久化
    fn ram(&self) -> &[u8];

    fn ram_mut(&mut self) -> &mut [u8];

    /// 推进cycles个T-cycle，只有带实时时钟的卡带需要
    fn next(&mut self, _cycles: u32) {}

    /// 仅供测试直接修改ROM内容
    #[cfg(test)]
    fn rom_mut(&mut self) -> &mut [u8];

    // 获取卡带标题
    fn title(&self) -> String {
        let rom = self.rom();
        let end = if rom[0x0143] & 0x80 != 0 { 0x013f } else { 0x0144 };
        rom[0x0134..end]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }

    fn mode(&self) -> HardwareMode {
        HardwareMode::from_cgb_flag(self.rom()[0x0143])
    }
}

pub struct RomOnly {
    rom: Rom,
    ram: Ram,
}

impl Memory for RomOnly {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x7fff => self.rom.read(0, a as usize),
            0xa000..=0xbfff => self.ram.read(0, a as usize - 0xa000),
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        // 没有bank控制器，写ROM区域的命令直接被忽略
        if let 0xa000..=0xbfff = a {
            self.ram.write(0, a as usize - 0xa000, v);
        }
    }
}

pub struct Mbc1 {
    rom: Rom,
    ram: Ram,
    ram_enable: bool,
    /// 0x2000~0x3fff写入的5位寄存器，写入0时等同于1
    bank_lo: u8,
    /// 0x4000~0x5fff写入的2位寄存器，作为ROM bank的第5~6位或RAM bank编号
    bank_hi: u8,
    /// 0x6000~0x7fff写入的模式，为true时bank_hi同时作用于0x0000~0x3fff和外部RAM
    advanced: bool,
}

impl Mbc1 {
    fn rom_bank(&self) -> usize {
        (usize::from(self.bank_hi) << 5) | usize::from(self.bank_lo)
    }

    fn rom_bank0(&self) -> usize {
        if self.advanced {
            usize::from(self.bank_hi) << 5
        } else {
            0
        }
    }

    fn ram_bank(&self) -> usize {
        if self.advanced {
            usize::from(self.bank_hi)
        } else {
            0
        }
    }
}

impl Memory for Mbc1 {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x3fff => self.rom.read(self.rom_bank0(), a as usize),
            0x4000..=0x7fff => self.rom.read(self.rom_bank(), a as usize - 0x4000),
            0xa000..=0xbfff if self.ram_enable => {
                self.ram.read(self.ram_bank(), a as usize - 0xa000)
            }
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x1fff => self.ram_enable = v & 0x0f == 0x0a,
            0x2000..=0x3fff => {
                self.bank_lo = match v & 0x1f {
                    0x00 => 0x01,
                    n => n,
                };
            }
            0x4000..=0x5fff => self.bank_hi = v & 0x03,
            0x6000..=0x7fff => self.advanced = v & 0x01 != 0,
            0xa000..=0xbfff if self.ram_enable => {
                let bank = self.ram_bank();
                self.ram.write(bank, a as usize - 0xa000, v);
            }
            _ => {}
        }
    }
}

pub struct Mbc2 {
    rom: Rom,
    /// 内置512个4位的RAM
    ram: Ram,
    rom_bank: usize,
    ram_enable: bool,
}

impl Memory for Mbc2 {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x3fff => self.rom.read(0, a as usize),
            0x4000..=0x7fff => self.rom.read(self.rom_bank, a as usize - 0x4000),
            // 只有低4位有效，0xa200~0xbfff是0xa000~0xa1ff的镜像
            0xa000..=0xbfff if self.ram_enable => {
                0xf0 | self.ram.read(0, (a as usize - 0xa000) & 0x01ff)
            }
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            // 地址的第8位决定写入的是RAM开关还是ROM bank
            0x0000..=0x3fff => {
                if a & 0x0100 == 0 {
                    self.ram_enable = v & 0x0f == 0x0a;
                } else {
                    self.rom_bank = match v & 0x0f {
                        0 => 1,
                        n => n as usize,
                    };
                }
            }
            0xa000..=0xbfff if self.ram_enable => {
                self.ram.write(0, (a as usize - 0xa000) & 0x01ff, v & 0x0f)
            }
            _ => {}
        }
    }
}

/// MBC3的实时时钟
/// 0x08: 秒, 0x09: 分, 0x0a: 时, 0x0b: 天数的低8位
/// 0x0c: 第0位是天数的第8位，第6位为1时暂停计时，第7位表示天数溢出
#[derive(Clone, Copy, Default)]
struct RealTimeClock {
    s: u8,
    m: u8,
    h: u8,
    dl: u8,
    dh: u8,
}

impl RealTimeClock {
    fn halted(&self) -> bool {
        self.dh & 0x40 != 0
    }

    /// 经过1秒
    fn tick(&mut self) {
        self.s = (self.s + 1) % 60;
        if self.s != 0 {
            return;
        }
        self.m = (self.m + 1) % 60;
        if self.m != 0 {
            return;
        }
        self.h = (self.h + 1) % 24;
        if self.h != 0 {
            return;
        }
        let days = ((u16::from(self.dh & 0x01) << 8) | u16::from(self.dl)) + 1;
        self.dl = days as u8;
        self.dh = (self.dh & 0xfe) | ((days >> 8) as u8 & 0x01);
        if days > 0x1ff {
            // 天数溢出，计数归零并设置溢出标志
            self.dl = 0;
            self.dh = (self.dh & 0xfe) | 0x80;
        }
    }

    fn get(&self, r: usize) -> u8 {
        match r {
            0x08 => self.s,
            0x09 => self.m,
            0x0a => self.h,
            0x0b => self.dl,
            0x0c => self.dh | 0x3e,
            _ => 0xff,
        }
    }

    fn set(&mut self, r: usize, v: u8) {
        match r {
            0x08 => self.s = v % 60,
            0x09 => self.m = v % 60,
            0x0a => self.h = v % 24,
            0x0b => self.dl = v,
            0x0c => self.dh = v & 0xc1,
            _ => {}
        }
    }
}

pub struct Mbc3 {
    rom: Rom,
    ram: Ram,
    /// 7位的ROM bank寄存器，写入0时等同于1
    rom_bank: usize,
    /// 0x00~0x03选择RAM bank，0x08~0x0c选择时钟寄存器
    ram_bank: usize,
    ram_enable: bool,
    rtc: RealTimeClock,
    /// 锁存后供程序读取的时钟寄存器
    latched: RealTimeClock,
    /// 上一次写入0x6000~0x7fff的值，从0变为1时锁存
    latch_prev: u8,
    /// 以秒为单位推进时钟
    second: Clock,
}

impl Memory for Mbc3 {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x3fff => self.rom.read(0, a as usize),
            0x4000..=0x7fff => self.rom.read(self.rom_bank, a as usize - 0x4000),
            0xa000..=0xbfff if self.ram_enable => match self.ram_bank {
                0x00..=0x03 => self.ram.read(self.ram_bank, a as usize - 0xa000),
                r => self.latched.get(r),
            },
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x1fff => self.ram_enable = v & 0x0f == 0x0a,
            0x2000..=0x3fff => {
                self.rom_bank = match v & 0x7f {
                    0 => 1,
                    n => n as usize,
                };
            }
            0x4000..=0x5fff => self.ram_bank = (v & 0x0f) as usize,
            0x6000..=0x7fff => {
                if self.latch_prev == 0x00 && v == 0x01 {
                    self.latched = self.rtc;
                }
                self.latch_prev = v;
            }
            0xa000..=0xbfff if self.ram_enable => match self.ram_bank {
                0x00..=0x03 => self.ram.write(self.ram_bank, a as usize - 0xa000, v),
                r => {
                    self.rtc.set(r, v);
                    self.latched.set(r, v);
                }
            },
            _ => {}
        }
    }
}

pub struct Mbc5 {
    rom: Rom,
    ram: Ram,
    /// 9位的ROM bank寄存器，低8位写入0x2000~0x2fff，第8位写入0x3000~0x3fff，可以选择bank 0
    rom_bank: usize,
    ram_bank: usize,
    ram_enable: bool,
}

impl Memory for Mbc5 {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x3fff => self.rom.read(0, a as usize),
            0x4000..=0x7fff => self.rom.read(self.rom_bank, a as usize - 0x4000),
            0xa000..=0xbfff if self.ram_enable => {
                self.ram.read(self.ram_bank, a as usize - 0xa000)
            }
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x1fff => self.ram_enable = v & 0x0f == 0x0a,
            0x2000..=0x2fff => self.rom_bank = (self.rom_bank & 0x0100) | v as usize,
            0x3000..=0x3fff => {
                self.rom_bank = (self.rom_bank & 0x00ff) | ((v as usize & 0x01) << 8)
            }
            0x4000..=0x5fff => self.ram_bank = v as usize & 0x0f,
            0xa000..=0xbfff if self.ram_enable => {
                self.ram.write(self.ram_bank, a as usize - 0xa000, v)
            }
            _ => {}
        }
    }
}

macro_rules! impl_cartridge {
    ($($t:ty),*) => {
        $(
            impl Cartridge for $t {
                fn rom(&self) -> &[u8] {
                    &self.rom.data
                }

                fn ram(&self) -> &[u8] {
                    &self.ram.data
                }

                fn ram_mut(&mut self) -> &mut [u8] {
                    &mut self.ram.data
                }

                #[cfg(test)]
                fn rom_mut(&mut self) -> &mut [u8] {
                    &mut self.rom.data
                }
            }
        )*
    };
}

impl_cartridge!(RomOnly, Mbc1, Mbc2, Mbc5);

impl Cartridge for Mbc3 {
    fn rom(&self) -> &[u8] {
        &self.rom.data
    }

    fn ram(&self) -> &[u8] {
        &self.ram.data
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram.data
    }

    fn next(&mut self, cycles: u32) {
        let seconds = self.second.next(cycles);
        if self.rtc.halted() {
            return;
        }
        for _ in 0..seconds {
            self.rtc.tick();
        }
    }

    #[cfg(test)]
    fn rom_mut(&mut self) -> &mut [u8] {
        &mut self.rom.data
    }
}

/// 根据卡带头部的信息创建卡带，头部位于0x0100~0x014f
/// 0x0147: 卡带类型，决定bank控制器
/// 0x0148: ROM容量
/// 0x0149: 外部RAM容量
pub fn power_up(mut data: Vec<u8>, verify_header: bool) -> Result<Box<dyn Cartridge>, GbError> {
    if data.len() < 0x0150 {
        return Err(GbError::HeaderTooShort { len: data.len() });
    }
    let rom_max = rom_size(data[0x0148])?;
    if data.len() > rom_max {
        return Err(GbError::RomTooLarge {
            len: data.len(),
            max: rom_max,
        });
    }
    let code = data[0x0147];
    let ram_code = data[0x0149];
    // 镜像文件可能比头部声明的容量小，不足的部分按未连接的总线处理
    data.resize(rom_max, 0xff);
    let ram_max = ram_size(ram_code)?;
    let rom = Rom { data };

    let cart: Box<dyn Cartridge> = match code {
        0x00 | 0x08 | 0x09 => Box::new(RomOnly {
            rom,
            ram: Ram { data: vec![0; ram_max] },
        }),
        0x01..=0x03 => Box::new(Mbc1 {
            rom,
            ram: Ram { data: vec![0; ram_max] },
            ram_enable: false,
            bank_lo: 0x01,
            bank_hi: 0x00,
            advanced: false,
        }),
        0x05 | 0x06 => Box::new(Mbc2 {
            rom,
            ram: Ram { data: vec![0; 512] },
            rom_bank: 1,
            ram_enable: false,
        }),
        0x0f..=0x13 => Box::new(Mbc3 {
            rom,
            ram: Ram { data: vec![0; ram_max] },
            rom_bank: 1,
            ram_bank: 0,
            ram_enable: false,
            rtc: RealTimeClock::default(),
            latched: RealTimeClock::default(),
            latch_prev: 0xff,
            second: Clock::power_up(CPU_FREQ),
        }),
        0x19..=0x1e => Box::new(Mbc5 {
            rom,
            ram: Ram { data: vec![0; ram_max] },
            rom_bank: 1,
            ram_bank: 0,
            ram_enable: false,
        }),
        code => return Err(GbError::UnsupportedCartridge { code }),
    };
    log::info!("Cartridge title: {}", cart.title());
    log::info!(
        "Cartridge type: {}, rom: {} KiB, ram: {} KiB",
        mbc_info(code).unwrap_or("UNKNOWN"),
        rom_max / 1024,
        ram_max / 1024
    );
    if verify_header {
        if !header_checksum_ok(cart.rom()) {
            log::warn!("Cartridge's header checksum is incorrect");
        }
        if !logo_ok(cart.rom()) {
            log::warn!("Nintendo logo is incorrect");
        }
    }
    Ok(cart)
}

/// 卡带类型的描述
pub fn mbc_info(code: u8) -> Option<&'static str> {
    Some(match code {
        0x00 => "ROM ONLY",
        0x01 => "MBC1",
        0x02 => "MBC1+RAM",
        0x03 => "MBC1+RAM+BATTERY",
        0x05 => "MBC2",
        0x06 => "MBC2+BATTERY",
        0x08 => "ROM+RAM",
        0x09 => "ROM+RAM+BATTERY",
        0x0f => "MBC3+TIMER+BATTERY",
        0x10 => "MBC3+TIMER+RAM+BATTERY",
        0x11 => "MBC3",
        0x12 => "MBC3+RAM",
        0x13 => "MBC3+RAM+BATTERY",
        0x19 => "MBC5",
        0x1a => "MBC5+RAM",
        0x1b => "MBC5+RAM+BATTERY",
        0x1c => "MBC5+RUMBLE",
        0x1d => "MBC5+RUMBLE+RAM",
        0x1e => "MBC5+RUMBLE+RAM+BATTERY",
        _ => return None,
    })
}

pub const NINTENDO_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83,
    0x00, 0x0C, 0x00, 0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E,
    0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63,
    0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

// 验证任天堂logo
pub fn logo_ok(rom: &[u8]) -> bool {
    rom[0x0104..0x0134] == NINTENDO_LOGO[..]
}

/// 头部校验和，保存在0x014d
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x0134..0x014d]
        .iter()
        .fold(0u8, |v, &b| v.wrapping_sub(b).wrapping_sub(1))
}

// 验证头部校验和
pub fn header_checksum_ok(rom: &[u8]) -> bool {
    rom[0x014d] == header_checksum(rom)
}

// 获取卡带中rom的容量
fn rom_size(b: u8) -> Result<usize, GbError> {
    let bank = ROM_BANK_SIZE;
    Ok(match b {
        0x00..=0x08 => bank * (2 << b),
        0x52 => bank * 72,
        0x53 => bank * 80,
        0x54 => bank * 96,
        code => return Err(GbError::UnsupportedRomSize { code }),
    })
}

// 获取卡带中ram的容量
fn ram_size(b: u8) -> Result<usize, GbError> {
    Ok(match b {
        0x00 => 0,
        0x01 => 1024 * 2,
        0x02 => 1024 * 8,
        0x03 => 1024 * 32,
        0x04 => 1024 * 128,
        0x05 => 1024 * 64,
        code => return Err(GbError::UnsupportedRamSize { code }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一个每个ROM bank的首字节都等于bank编号的镜像
    fn rom(code: u8, size_code: u8, ram_code: u8) -> Vec<u8> {
        let size = ROM_BANK_SIZE * (2 << size_code);
        let mut data = vec![0u8; size];
        for bank in 0..size / ROM_BANK_SIZE {
            data[bank * ROM_BANK_SIZE] = bank as u8;
            data[bank * ROM_BANK_SIZE + 1] = (bank >> 8) as u8;
        }
        data[0x0134..0x0138].copy_from_slice(b"TEST");
        data[0x0147] = code;
        data[0x0148] = size_code;
        data[0x0149] = ram_code;
        data[0x014d] = header_checksum(&data);
        data
    }

    fn bank_at_4000(cart: &dyn Cartridge) -> usize {
        usize::from(cart.get(0x4000)) | (usize::from(cart.get(0x4001)) << 8)
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(
            power_up(vec![0; 0x100], false).err(),
            Some(GbError::HeaderTooShort { len: 0x100 })
        );
        assert_eq!(
            power_up(rom(0xfc, 0, 0), false).err(),
            Some(GbError::UnsupportedCartridge { code: 0xfc })
        );
        let mut big = rom(0x00, 0, 0);
        big.resize(ROM_BANK_SIZE * 4, 0);
        assert!(matches!(power_up(big, false), Err(GbError::RomTooLarge { .. })));
    }

    #[test]
    fn test_title_and_checksum() {
        let cart = power_up(rom(0x00, 0, 0), true).unwrap();
        assert_eq!(cart.title(), "TEST");
        assert!(header_checksum_ok(cart.rom()));
        assert!(!logo_ok(cart.rom()));
        assert_eq!(cart.mode(), HardwareMode::Dmg);
    }

    #[test]
    fn test_rom_only_ignores_writes() {
        let mut cart = power_up(rom(0x00, 0, 0), false).unwrap();
        let before = cart.get(0x0134);
        cart.set(0x0134, 0x99);
        cart.set(0x2000, 0x05);
        assert_eq!(cart.get(0x0134), before);
        assert_eq!(bank_at_4000(cart.as_ref()), 1);
    }

    #[test]
    fn test_mbc1_bank_zero_aliases_one() {
        let mut cart = power_up(rom(0x01, 6, 0), false).unwrap();
        cart.set(0x2000, 0x00);
        assert_eq!(bank_at_4000(cart.as_ref()), 1);
        cart.set(0x2000, 0x1f);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x1f);
        // 高2位寄存器
        cart.set(0x4000, 0x01);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x3f);
        cart.set(0x2000, 0x20);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x21);
        // 模式1下0x0000~0x3fff也受高2位影响
        assert_eq!(cart.get(0x0000), 0x00);
        cart.set(0x6000, 0x01);
        assert_eq!(cart.get(0x0000), 0x20);
    }

    #[test]
    fn test_mbc1_ram_banking() {
        let mut cart = power_up(rom(0x03, 1, 0x03), false).unwrap();
        cart.set(0xa000, 0x12);
        assert_eq!(cart.get(0xa000), 0xff);
        cart.set(0x0000, 0x0a);
        cart.set(0x6000, 0x01);
        cart.set(0x4000, 0x02);
        cart.set(0xa000, 0x12);
        cart.set(0x4000, 0x00);
        assert_eq!(cart.get(0xa000), 0x00);
        cart.set(0x4000, 0x02);
        assert_eq!(cart.get(0xa000), 0x12);
        assert_eq!(cart.ram()[2 * RAM_BANK_SIZE], 0x12);
    }

    #[test]
    fn test_mbc2_address_bit8() {
        let mut cart = power_up(rom(0x05, 3, 0), false).unwrap();
        cart.set(0x2100, 0x03);
        assert_eq!(bank_at_4000(cart.as_ref()), 3);
        cart.set(0x0000, 0x0a);
        cart.set(0xa000, 0xab);
        assert_eq!(cart.get(0xa000), 0xfb);
        assert_eq!(cart.get(0xa200), 0xfb);
    }

    #[test]
    fn test_mbc3_seven_bit_bank() {
        let mut cart = power_up(rom(0x11, 6, 0), false).unwrap();
        cart.set(0x2000, 0x00);
        assert_eq!(bank_at_4000(cart.as_ref()), 1);
        cart.set(0x2000, 0x7f);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x7f);
        cart.set(0x2000, 0xc5);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x45);
    }

    #[test]
    fn test_mbc3_rtc_latch() {
        let mut cart = power_up(rom(0x10, 1, 0x02), false).unwrap();
        cart.set(0x0000, 0x0a);
        cart.next(CPU_FREQ * 61);
        cart.set(0x4000, 0x08);
        assert_eq!(cart.get(0xa000), 0x00);
        cart.set(0x6000, 0x00);
        cart.set(0x6000, 0x01);
        assert_eq!(cart.get(0xa000), 1);
        cart.set(0x4000, 0x09);
        assert_eq!(cart.get(0xa000), 1);
    }

    #[test]
    fn test_mbc5_nine_bit_bank() {
        let mut cart = power_up(rom(0x19, 8, 0), false).unwrap();
        cart.set(0x2000, 0x00);
        assert_eq!(bank_at_4000(cart.as_ref()), 0);
        cart.set(0x2000, 0x23);
        cart.set(0x3000, 0x01);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x123);
        cart.set(0x3000, 0x00);
        assert_eq!(bank_at_4000(cart.as_ref()), 0x23);
    }
}
