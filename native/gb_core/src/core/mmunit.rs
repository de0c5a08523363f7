use std::cell::RefCell;
use std::rc::Rc;

use crate::core::cartridge::Cartridge;
use crate::core::convention::{HardwareMode, SCREEN_H};
use crate::core::dma::{DMAMode, DMA};
use crate::core::intf::Intf;
use crate::core::joypad::Joypad;
use crate::core::memory::{Bus, Memory};
use crate::core::ppu::PPU;
use crate::core::speed::Speed;
use crate::core::timer::Timer;
use crate::core::wram::WRAM;

/// 开机引导程序结束后声音寄存器中的值
const POST_BOOT_IO: [(u16, u8); 18] = [
    (0xff10, 0x80),
    (0xff11, 0xbf),
    (0xff12, 0xf3),
    (0xff14, 0xbf),
    (0xff16, 0x3f),
    (0xff17, 0x00),
    (0xff19, 0xbf),
    (0xff1a, 0x7f),
    (0xff1b, 0xff),
    (0xff1c, 0x9f),
    (0xff1e, 0xbf),
    (0xff20, 0xff),
    (0xff21, 0x00),
    (0xff22, 0x00),
    (0xff23, 0xbf),
    (0xff24, 0x77),
    (0xff25, 0xf3),
    (0xff26, 0xf1),
];

// 内存管理单元，用于将所有外设的存储空间拼接成一段连续的内存空间，对外提供统一的内存访问接口
pub struct MMUnit {
    // 卡带
    pub cartridge: Box<dyn Cartridge>,
    // 视频处理器
    pub ppu: PPU,
    // 手柄控制器
    pub joypad: Joypad,
    // 定时器
    pub timer: Timer,
    // 单/双倍速，仅彩色模式
    pub speed: Speed,
    // GB型号
    pub mode: HardwareMode,
    // 是否允许特定类型的中断，8位全部保存，只有低5位参与中断分发
    inte: u8,
    // 是否发生特定类型的中断
    intf: Rc<RefCell<Intf>>,
    // 彩色模式下从ROM/RAM复制数据到VRAM
    hdma: DMA,
    // 最近一次OAM DMA的源地址高8位
    oam_dma: u8,
    wram: WRAM,
    hram: [u8; 0x7f],
    // 串口(0xff01~0xff02)以及声音(0xff10~0xff3f)寄存器，只保存写入的值
    io: [u8; 0x40],
}

impl MMUnit {
    pub fn power_up(cartridge: Box<dyn Cartridge>, mode: HardwareMode) -> Self {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut mmunit = Self {
            cartridge,
            ppu: PPU::power_up(mode, intf.clone()),
            joypad: Joypad::power_up(intf.clone()),
            timer: Timer::power_up(intf.clone()),
            speed: Speed::power_up(),
            mode,
            inte: 0x00,
            intf,
            hdma: DMA::power_up(),
            oam_dma: 0xff,
            wram: WRAM::power_up(mode),
            hram: [0x00; 0x7f],
            io: [0x00; 0x40],
        };
        for (a, v) in POST_BOOT_IO {
            mmunit.set(a, v);
        }
        mmunit
    }

    pub fn intf(&self) -> Rc<RefCell<Intf>> {
        self.intf.clone()
    }

    /// 只供测试使用，绕过bank控制器直接修改ROM
    #[cfg(test)]
    pub fn poke_rom(&mut self, a: u16, v: u8) {
        self.cartridge.rom_mut()[a as usize] = v;
    }
}

impl MMUnit {
    /// CPU执行完一条指令后调用，cycles是这条指令消耗的T-cycle
    /// 定时器与CPU同频，倍速模式下PPU和卡带时钟只得到一半的时钟周期
    /// 返回实际经过的T-cycle，包括DMA暂停CPU的时间
    pub fn next(&mut self, cycles: u32) -> u32 {
        let speed = self.speed.mode as u32;
        let dma_cost = self.run_dma();
        let cpu_cycles = cycles + dma_cost * speed;
        // 按单倍速换算的时间
        let real_cycles = cycles / speed + dma_cost;
        self.timer.next(cpu_cycles);
        self.ppu.next(real_cycles);
        self.cartridge.next(real_cycles);
        cpu_cycles
    }

    /// 执行VRAM DMA，返回消耗的PPU时钟周期
    fn run_dma(&mut self) -> u32 {
        if !self.hdma.active {
            return 0;
        }
        match self.hdma.mode {
            DMAMode::GDMA => {
                let len = u32::from(self.hdma.remain) + 1;
                for _ in 0..len {
                    self.copy_block();
                }
                len * 8
            }
            DMAMode::HDMA => {
                // 只在可见行的HBlank期间传输，每次0x10字节
                if !self.ppu.h_blank || self.ppu.ly() as usize >= SCREEN_H {
                    return 0;
                }
                self.copy_block();
                8
            }
        }
    }

    /// 复制一个0x10字节的数据块到VRAM
    fn copy_block(&mut self) {
        for i in 0..0x10 {
            let b = self.get(self.hdma.src.wrapping_add(i));
            self.ppu.set(self.hdma.dst.wrapping_add(i), b);
        }
        self.hdma.advance();
        if !self.hdma.active {
            log::debug!("DMA finished: {}", self.hdma);
        }
    }

    /// OAM DMA，立即把(page << 8)开始的160字节复制到OAM
    fn oam_dma(&mut self, page: u8) {
        self.oam_dma = page;
        let base = u16::from(page) << 8;
        for i in 0..0xa0 {
            let b = self.get(base + i);
            self.ppu.set(0xfe00 + i, b);
        }
    }

    fn is_cgb(&self) -> bool {
        self.mode == HardwareMode::Cgb
    }
}

impl Memory for MMUnit {
    fn get(&self, a: u16) -> u8 {
        match a {
            // 卡带
            0x0000..=0x7fff | 0xa000..=0xbfff => self.cartridge.get(a),
            // VRAM
            0x8000..=0x9fff => self.ppu.get(a),
            // WRAM以及镜像区域
            0xc000..=0xfdff => self.wram.get(a),
            // OAM
            0xfe00..=0xfe9f => self.ppu.get(a),
            // 手柄
            0xff00 => self.joypad.get(a),
            // 串口通信
            0xff01..=0xff02 => self.io[a as usize - 0xff00],
            // 定时器
            0xff04..=0xff07 => self.timer.get(a),
            // 中断
            0xff0f => self.intf.borrow().get(),
            // 音频
            0xff10..=0xff3f => self.io[a as usize - 0xff00],
            0xff46 => self.oam_dma,
            // PPU
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.get(a),
            // 以下寄存器只在彩色模式下存在
            0xff4d if self.is_cgb() => self.speed.get(a),
            0xff4f | 0xff68..=0xff6b if self.is_cgb() => self.ppu.get(a),
            0xff51..=0xff55 if self.is_cgb() => self.hdma.get(a),
            0xff70 if self.is_cgb() => self.wram.get(a),
            // HRAM
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            // 是否允许中断
            0xffff => self.inte,
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            // 对ROM区域的写入是发给bank控制器的命令
            0x0000..=0x7fff | 0xa000..=0xbfff => self.cartridge.set(a, v),
            0x8000..=0x9fff => self.ppu.set(a, v),
            0xc000..=0xfdff => self.wram.set(a, v),
            0xfe00..=0xfe9f => self.ppu.set(a, v),
            0xff00 => self.joypad.set(a, v),
            0xff01..=0xff02 => self.io[a as usize - 0xff00] = v,
            0xff04..=0xff07 => self.timer.set(a, v),
            // 只替换低5位
            0xff0f => self.intf.borrow_mut().set(v),
            0xff10..=0xff3f => self.io[a as usize - 0xff00] = v,
            // 写入此寄存器将触发OAM DMA
            0xff46 => self.oam_dma(v),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.set(a, v),
            0xff4d if self.is_cgb() => self.speed.set(a, v),
            0xff4f | 0xff68..=0xff6b if self.is_cgb() => self.ppu.set(a, v),
            0xff51..=0xff55 if self.is_cgb() => self.hdma.set(a, v),
            0xff70 if self.is_cgb() => self.wram.set(a, v),
            0xff80..=0xfffe => self.hram[a as usize - 0xff80] = v,
            0xffff => self.inte = v,
            _ => {}
        }
    }
}

impl Bus for MMUnit {
    fn switch_speed(&mut self) -> bool {
        match self.mode {
            HardwareMode::Dmg => false,
            HardwareMode::Cgb => self.speed.switch_speed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cartridge;
    use crate::core::convention::CPU_FREQ;

    fn mmunit(cart_type: u8, cgb_flag: u8) -> MMUnit {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0143] = cgb_flag;
        rom[0x0147] = cart_type;
        let cart = cartridge::power_up(rom, false).unwrap();
        let mode = cart.mode();
        MMUnit::power_up(cart, mode)
    }

    #[test]
    fn test_rom_writes_never_mutate_rom() {
        let mut m = mmunit(0x00, 0x00);
        m.poke_rom(0x0150, 0x42);
        m.set(0x0150, 0x99);
        assert_eq!(m.get(0x0150), 0x42);
    }

    #[test]
    fn test_unmapped_addresses() {
        let mut m = mmunit(0x00, 0x00);
        m.set(0xfea0, 0x12);
        assert_eq!(m.get(0xfea0), 0xff);
        assert_eq!(m.get(0xff03), 0xff);
        // 黑白模式下没有彩色模式的寄存器
        m.set(0xff70, 0x03);
        assert_eq!(m.get(0xff70), 0xff);
        assert_eq!(m.get(0xff4d), 0xff);
        // 没有外部RAM
        assert_eq!(m.get(0xa000), 0xff);
    }

    #[test]
    fn test_interrupt_registers() {
        let mut m = mmunit(0x00, 0x00);
        m.set(0xff0f, 0xff);
        assert_eq!(m.get(0xff0f), 0xff);
        m.set(0xff0f, 0x01);
        assert_eq!(m.get(0xff0f), 0xe1);
        m.set(0xffff, 0xff);
        assert_eq!(m.get(0xffff), 0xff);
    }

    #[test]
    fn test_oam_dma() {
        let mut m = mmunit(0x00, 0x00);
        for i in 0..0xa0u16 {
            m.set(0xc100 + i, i as u8 ^ 0x5a);
        }
        m.set(0xff46, 0xc1);
        for i in 0..0xa0u16 {
            assert_eq!(m.get(0xfe00 + i), i as u8 ^ 0x5a);
            assert_eq!(m.get(0xc100 + i), i as u8 ^ 0x5a);
        }
        assert_eq!(m.get(0xff46), 0xc1);
    }

    #[test]
    fn test_echo_ram_and_hram() {
        let mut m = mmunit(0x00, 0x00);
        m.set(0xc123, 0x77);
        assert_eq!(m.get(0xe123), 0x77);
        m.set(0xff80, 0x01);
        m.set(0xfffe, 0x02);
        assert_eq!(m.get(0xff80), 0x01);
        assert_eq!(m.get(0xfffe), 0x02);
    }

    #[test]
    fn test_post_boot_sound_latches() {
        let mut m = mmunit(0x00, 0x00);
        assert_eq!(m.get(0xff26), 0xf1);
        m.set(0xff01, 0x41);
        assert_eq!(m.get(0xff01), 0x41);
    }

    #[test]
    fn test_gdma_copies_to_vram() {
        let mut m = mmunit(0x00, 0x80);
        for i in 0..0x20u16 {
            m.set(0xc000 + i, i as u8 + 1);
        }
        m.set(0xff51, 0xc0);
        m.set(0xff52, 0x00);
        m.set(0xff53, 0x10);
        m.set(0xff54, 0x00);
        m.set(0xff55, 0x01);
        let cycles = m.next(4);
        assert_eq!(cycles, 4 + 16);
        assert_eq!(m.get(0x9000), 1);
        assert_eq!(m.get(0x901f), 0x20);
        assert_eq!(m.get(0xff55), 0xff);
    }

    #[test]
    fn test_hdma_waits_for_hblank() {
        let mut m = mmunit(0x00, 0x80);
        m.set(0xc000, 0xab);
        m.set(0xff51, 0xc0);
        m.set(0xff52, 0x00);
        m.set(0xff53, 0x00);
        m.set(0xff54, 0x00);
        m.set(0xff55, 0x81);
        m.next(4);
        assert_eq!(m.get(0x8000), 0x00);
        // 进入第0行的HBlank
        m.next(248);
        m.next(4);
        assert_eq!(m.get(0x8000), 0xab);
        assert_eq!(m.get(0xff55), 0x00);
    }

    #[test]
    fn test_double_speed_halves_ppu_cycles() {
        let mut m = mmunit(0x00, 0x80);
        m.set(0xff4d, 0x01);
        assert!(m.switch_speed());
        assert_eq!(m.get(0xff4d), 0xfe);
        m.next(160);
        assert_eq!(m.ppu.ppu_mode(), crate::core::ppu::PPUMode::Transfer);
        assert_eq!(m.timer.counter(), 160);
    }

    #[test]
    fn test_rtc_keeps_real_time_in_double_speed() {
        let mut m = mmunit(0x0f, 0x80);
        m.set(0xff4d, 0x01);
        assert!(m.switch_speed());
        // 倍速模式下1秒是2 * CPU_FREQ个T-cycle
        for _ in 0..(2 * CPU_FREQ / 0x10000) {
            m.next(0x10000);
        }
        m.set(0x0000, 0x0a);
        m.set(0x4000, 0x08);
        m.set(0x6000, 0x00);
        m.set(0x6000, 0x01);
        assert_eq!(m.get(0xa000), 1);
    }

    #[test]
    fn test_dmg_ignores_speed_switch() {
        let mut m = mmunit(0x00, 0x00);
        m.set(0xff4d, 0x01);
        assert!(!m.switch_speed());
    }
}
