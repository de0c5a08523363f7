/// GB支持的中断类型，数值即IF/IE寄存器中对应的位，数值越小优先级越高
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum INTFlag {
    VBlank = 0,
    LCDStat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

impl INTFlag {
    /// 按优先级从高到低排列
    pub const ALL: [INTFlag; 5] = [
        INTFlag::VBlank,
        INTFlag::LCDStat,
        INTFlag::Timer,
        INTFlag::Serial,
        INTFlag::Joypad,
    ];

    /// 中断处理程序的地址: 0x40, 0x48, 0x50, 0x58, 0x60
    pub fn vector(self) -> u16 {
        0x0040 | (self as u16) << 3
    }

    pub fn mask(self) -> u8 {
        1 << self as u8
    }

    /// 返回pending中优先级最高的中断
    pub fn highest(pending: u8) -> Option<INTFlag> {
        INTFlag::ALL.into_iter().find(|f| pending & f.mask() != 0)
    }
}

/// IF寄存器，用于保存当前已产生的中断请求
/// 映射在内存地址：0xff0f，只有低5位有效，高3位读取时始终为1
pub struct Intf {
    data: u8,
}

impl Intf {
    pub fn power_up() -> Self {
        Intf { data: 0x00 }
    }

    /// 收到中断时置位
    pub fn hi(&mut self, flag: INTFlag) {
        self.data |= flag.mask();
    }

    /// 中断被处理后清除
    pub fn lo(&mut self, flag: INTFlag) {
        self.data &= !flag.mask();
    }

    pub fn get(&self) -> u8 {
        self.data | 0xe0
    }

    /// 写入只替换低5位
    pub fn set(&mut self, v: u8) {
        self.data = v & 0x1f;
    }

    /// 只返回低5位的中断请求
    pub fn pending(&self) -> u8 {
        self.data & 0x1f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_bits_read_as_one() {
        let mut intf = Intf::power_up();
        assert_eq!(intf.get(), 0xe0);
        intf.set(0xff);
        assert_eq!(intf.get(), 0xff);
        assert_eq!(intf.pending(), 0x1f);
        intf.set(0x04);
        assert_eq!(intf.get(), 0xe4);
    }

    #[test]
    fn test_priority_and_vectors() {
        assert_eq!(INTFlag::highest(0x05), Some(INTFlag::VBlank));
        assert_eq!(INTFlag::highest(0x18), Some(INTFlag::Serial));
        assert_eq!(INTFlag::highest(0x00), None);
        assert_eq!(INTFlag::VBlank.vector(), 0x40);
        assert_eq!(INTFlag::LCDStat.vector(), 0x48);
        assert_eq!(INTFlag::Timer.vector(), 0x50);
        assert_eq!(INTFlag::Serial.vector(), 0x58);
        assert_eq!(INTFlag::Joypad.vector(), 0x60);
    }
}
