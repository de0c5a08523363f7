use crate::core::convention::HardwareMode;
use crate::core::memory::Memory;

/// 工作内存，0xc000-0xcfff固定为Bank0，0xd000-0xdfff在彩色模式下可通过SVBK(0xff70)切换Bank1~7
/// 0xe000-0xfdff是0xc000-0xddff的镜像
pub struct WRAM {
    mode: HardwareMode,
    wram_bank: usize,
    wram: [u8; 0x8000],
}

impl WRAM {
    pub fn power_up(mode: HardwareMode) -> Self {
        Self {
            mode,
            wram: [0x00; 0x8000],
            wram_bank: 0x01,
        }
    }

    fn set_wram_bank(&mut self, v: u8) {
        match self.mode {
            // 黑白模式下只有一个可切换的bank
            HardwareMode::Dmg => {}
            // 写入0等同于写入1
            HardwareMode::Cgb => {
                self.wram_bank = match v & 0x07 {
                    0 => 1,
                    n => n as usize,
                }
            }
        }
    }

    fn index(&self, a: u16) -> usize {
        match a {
            0xc000..=0xcfff => a as usize - 0xc000,
            0xd000..=0xdfff => a as usize - 0xd000 + 0x1000 * self.wram_bank,
            0xe000..=0xefff => a as usize - 0xe000,
            0xf000..=0xfdff => a as usize - 0xf000 + 0x1000 * self.wram_bank,
            _ => unreachable!(),
        }
    }
}

impl Memory for WRAM {
    fn get(&self, a: u16) -> u8 {
        match a {
            0xff70 => 0xf8 | self.wram_bank as u8,
            _ => self.wram[self.index(a)],
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff70 => self.set_wram_bank(v),
            _ => {
                let i = self.index(a);
                self.wram[i] = v;
            }
        }
    }
}
