use crate::core::memory::Memory;

/// CPU运行速度，数值为PPU相对CPU的分频系数
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpeedMode {
    Normal = 0x01,
    Double = 0x02,
}

/// KEY1寄存器(0xff4d)，仅彩色模式可用
/// Bit 7: 当前速度，0表示正常速度，1表示倍速，只读
/// Bit 0: 是否准备切换速度，下一条STOP指令会执行切换
pub struct Speed {
    pub mode: SpeedMode,
    pub prepare_switch: bool,
}

impl Speed {
    pub fn power_up() -> Self {
        Self {
            mode: SpeedMode::Normal,
            prepare_switch: false,
        }
    }

    /// 执行STOP指令时调用，未准备切换时什么也不做，返回是否发生了切换
    pub fn switch_speed(&mut self) -> bool {
        if !self.prepare_switch {
            return false;
        }
        self.mode = match self.mode {
            SpeedMode::Normal => SpeedMode::Double,
            SpeedMode::Double => SpeedMode::Normal,
        };
        self.prepare_switch = false;
        log::debug!("Switch to {:?} speed", self.mode);
        true
    }
}

impl Memory for Speed {
    fn get(&self, a: u16) -> u8 {
        assert_eq!(a, 0xff4d);
        let a = if self.mode == SpeedMode::Double { 0x80 } else { 0x00 };
        let b = if self.prepare_switch { 0x01 } else { 0x00 };
        0x7e | a | b
    }

    fn set(&mut self, a: u16, v: u8) {
        assert_eq!(a, 0xff4d);
        self.prepare_switch = v & 0x01 != 0;
    }
}
