use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::core::cartridge;
use crate::core::config::MachineConfig;
use crate::core::convention::{HardwareMode, CYCLES_PER_FRAME, T_CYCLES_PER_M_CYCLE};
use crate::core::cpu::{Cpu, Step};
use crate::core::error::GbError;
use crate::core::joypad::JoypadKey;
use crate::core::memory::{Bus, Memory};
use crate::core::mmunit::MMUnit;
#[cfg(feature = "probe")]
use crate::tools::probe::{Counters, Probe};

/// 整台机器：CPU执行一条指令后，把消耗的时钟周期交给MMU，由MMU推进定时器和PPU
pub struct SystemClock {
    pub cpu: Cpu,
    pub mmu: Rc<RefCell<MMUnit>>,
    pub mode: HardwareMode,
    /// 开机以来经过的T-cycle
    pub cycles: u64,
    #[cfg(feature = "probe")]
    pub probe: Box<dyn Probe>,
    /// 即将执行的指令地址、编码以及当时已完成的帧数
    #[cfg(feature = "probe")]
    probe_at: (u16, u8, u64),
}

impl SystemClock {
    pub fn power_up(rom: Vec<u8>, config: MachineConfig) -> Result<Self, GbError> {
        let cart = cartridge::power_up(rom, config.verify_header)?;
        let mode = config.mode.unwrap_or_else(|| cart.mode());
        log::info!("Hardware mode: {:?}", mode);
        let mmu = Rc::new(RefCell::new(MMUnit::power_up(cart, mode)));
        let bus: Rc<RefCell<dyn Bus>> = mmu.clone();
        Ok(Self {
            cpu: Cpu::power_up(mode, bus),
            mmu,
            mode,
            cycles: 0,
            #[cfg(feature = "probe")]
            probe: Box::new(Counters::default()),
            #[cfg(feature = "probe")]
            probe_at: (0, 0, 0),
        })
    }

    /// 执行一步，返回经过的T-cycle，始终大于0
    /// CPU报告0个机器周期(非法指令)或处于HALT时按1个机器周期推进，保证其他部件的时间继续向前
    pub fn tick(&mut self) -> u32 {
        crate::probe!(self.before_step());
        let step = self.cpu.step();
        crate::probe!(self.after_step(step));
        let m_cycles = match step {
            Step::Cycles(0) | Step::Halted => 1,
            Step::Cycles(n) => n,
        };
        let t = self.mmu.borrow_mut().next(m_cycles * T_CYCLES_PER_M_CYCLE);
        crate::probe!(self.after_tick());
        self.cycles += u64::from(t);
        t
    }

    /// 一直执行到新的一帧完成，或者经过了一帧的时间(LCD关闭时不会产生新帧)
    /// 返回是否有新的一帧，"新帧"标志仍需要通过take_frame取走
    pub fn run_frame(&mut self) -> bool {
        let limit = CYCLES_PER_FRAME * self.mmu.borrow().speed.mode as u32;
        let mut elapsed = 0;
        while elapsed < limit {
            elapsed += self.tick();
            if self.mmu.borrow().ppu.frame_ready() {
                return true;
            }
        }
        false
    }

    pub fn frame_ready(&self) -> bool {
        self.mmu.borrow().ppu.frame_ready()
    }

    /// 取走"新帧"标志，每一帧只会返回一次true
    pub fn take_frame(&mut self) -> bool {
        self.mmu.borrow_mut().ppu.take_frame()
    }

    /// 按下按键，i的取值范围是0~7: 右，左，上，下，A，B，Select，Start
    pub fn press_button(&mut self, i: u8) {
        match JoypadKey::from_index(i) {
            Some(key) => self.mmu.borrow_mut().joypad.keydown(key),
            None => log::debug!("Ignore unknown button {}", i),
        }
    }

    pub fn release_button(&mut self, i: u8) {
        match JoypadKey::from_index(i) {
            Some(key) => self.mmu.borrow_mut().joypad.keyup(key),
            None => log::debug!("Ignore unknown button {}", i),
        }
    }

    /// 最近一帧的颜色编号(0~3)，160*144，按行排列
    pub fn framebuffer(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mmu.borrow(), |m| m.ppu.framebuffer())
    }

    /// 使用这一帧的调色板，把颜色编号转换为灰度编号(0: 白 ~ 3: 黑)
    pub fn shades(&self) -> Vec<u8> {
        let mmu = self.mmu.borrow();
        let palettes = mmu.ppu.palettes();
        mmu.ppu
            .framebuffer()
            .iter()
            .zip(mmu.ppu.palette_sources())
            .map(|(&i, &src)| palettes.shade(src, i))
            .collect()
    }

    /// 通过MMU读取内存
    pub fn read(&self, a: u16) -> u8 {
        self.mmu.borrow().get(a)
    }

    /// 通过MMU写入内存
    pub fn write(&mut self, a: u16, v: u8) {
        self.mmu.borrow_mut().set(a, v);
    }

    /// 电池供电的外部RAM
    pub fn cartridge_ram(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mmu.borrow(), |m| m.cartridge.ram())
    }

    /// 载入之前保存的外部RAM，长度不一致时只复制重叠的部分
    pub fn load_cartridge_ram(&mut self, data: &[u8]) {
        let mut mmu = self.mmu.borrow_mut();
        let ram = mmu.cartridge.ram_mut();
        let n = ram.len().min(data.len());
        ram[..n].copy_from_slice(&data[..n]);
    }

    pub fn title(&self) -> String {
        self.mmu.borrow().cartridge.title()
    }
}

#[cfg(feature = "probe")]
impl SystemClock {
    fn before_step(&mut self) {
        let pc = self.cpu.reg.pc;
        let mmu = self.mmu.borrow();
        self.probe_at = (pc, mmu.get(pc), mmu.ppu.frames);
    }

    fn after_step(&mut self, step: Step) {
        if let Some(flag) = self.cpu.serviced {
            self.probe.on_interrupt(flag.vector());
        } else if step != Step::Halted {
            let (pc, opcode, _) = self.probe_at;
            self.probe.on_instruction(pc, opcode);
        }
    }

    fn after_tick(&mut self) {
        if self.mmu.borrow().ppu.frames != self.probe_at.2 {
            self.probe.on_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 只有NOP的32KB卡带，入口处是一个死循环: JR -2
    fn rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0100] = 0x18;
        rom[0x0101] = 0xfe;
        rom
    }

    #[test]
    fn test_power_up_detects_mode() {
        let gb = SystemClock::power_up(rom(), MachineConfig::default()).unwrap();
        assert_eq!(gb.mode, HardwareMode::Dmg);
        assert_eq!(gb.cpu.reg.a, 0x01);
        let mut cgb = rom();
        cgb[0x0143] = 0xc0;
        let gb = SystemClock::power_up(cgb, MachineConfig::default()).unwrap();
        assert_eq!(gb.mode, HardwareMode::Cgb);
        assert_eq!(gb.cpu.reg.a, 0x11);
        let gb = SystemClock::power_up(rom(), MachineConfig::with_mode(HardwareMode::Cgb)).unwrap();
        assert_eq!(gb.mode, HardwareMode::Cgb);
    }

    #[test]
    fn test_power_up_rejects_bad_rom() {
        let r = SystemClock::power_up(vec![0; 16], MachineConfig::default());
        assert_eq!(r.err(), Some(GbError::HeaderTooShort { len: 16 }));
    }

    #[test]
    fn test_tick_converts_m_cycles() {
        let mut gb = SystemClock::power_up(rom(), MachineConfig::default()).unwrap();
        assert_eq!(gb.tick(), 12);
        assert_eq!(gb.cycles, 12);
    }

    #[test]
    fn test_illegal_opcode_still_advances_time() {
        let mut r = rom();
        r[0x0100] = 0xdd;
        let mut gb = SystemClock::power_up(r, MachineConfig::default()).unwrap();
        assert_eq!(gb.tick(), 4);
        assert_eq!(gb.cpu.reg.pc, 0x0101);
    }

    #[test]
    fn test_run_frame_and_take_once() {
        let mut gb = SystemClock::power_up(rom(), MachineConfig::default()).unwrap();
        assert!(gb.run_frame());
        assert!(gb.take_frame());
        assert!(!gb.take_frame());
        assert_eq!(gb.framebuffer().len(), 160 * 144);
        assert!(gb.shades().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_run_frame_with_lcd_off() {
        let mut gb = SystemClock::power_up(rom(), MachineConfig::default()).unwrap();
        gb.write(0xff40, 0x00);
        assert!(!gb.run_frame());
        assert_eq!(gb.read(0xff44), 0);
    }

    #[test]
    fn test_buttons() {
        let mut gb = SystemClock::power_up(rom(), MachineConfig::default()).unwrap();
        gb.write(0xff00, 0x20);
        gb.press_button(0);
        assert_eq!(gb.read(0xff00) & 0x01, 0x00);
        assert_eq!(gb.read(0xff0f) & 0x10, 0x10);
        gb.release_button(0);
        assert_eq!(gb.read(0xff00) & 0x0f, 0x0f);
        gb.press_button(8);
        assert_eq!(gb.read(0xff00) & 0x0f, 0x0f);
    }
}
