use std::cell::RefCell;
use std::rc::Rc;

use crate::core::intf::{INTFlag, Intf};
use crate::core::memory::Memory;

/// 手柄按键，数值即按键的编号（0-7），方向键在低4位，标准按键在高4位
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoypadKey {
    Right = 0,
    Left = 1,
    Up = 2,
    Down = 3,
    A = 4,
    B = 5,
    Select = 6,
    Start = 7,
}

impl JoypadKey {
    pub const ALL: [JoypadKey; 8] = [
        JoypadKey::Right,
        JoypadKey::Left,
        JoypadKey::Up,
        JoypadKey::Down,
        JoypadKey::A,
        JoypadKey::B,
        JoypadKey::Select,
        JoypadKey::Start,
    ];

    /// 根据按键编号获取按键，超出0-7的编号返回None
    pub fn from_index(i: u8) -> Option<Self> {
        Self::ALL.get(i as usize).copied()
    }

    fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// 手柄一共有8个按键:
/// 4个方向键：右，左，上，下
/// 4个标准按钮: A, B, Select, Start
pub struct Joypad {
    /// 用于触发手柄中断事件
    intf: Rc<RefCell<Intf>>,
    /// 记录当前按下的键, 每一位对应一个按键的状态，0表示按下，1表示未按下
    signals: u8,
    /// P1寄存器的第4~5位，用于选择低4位反映方向键还是标准按键
    select: u8,
}

impl Joypad {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self {
            intf,
            signals: 0xff,
            select: 0x30,
        }
    }

    /// 按下某个按键，从松开变为按下时请求手柄中断
    pub fn keydown(&mut self, key: JoypadKey) {
        if self.signals & key.mask() != 0 {
            self.intf.borrow_mut().hi(INTFlag::Joypad);
        }
        self.signals &= !key.mask();
    }

    /// 松开某个按键
    pub fn keyup(&mut self, key: JoypadKey) {
        self.signals |= key.mask();
    }
}

/// 内存地址0xff00(P1)
/// Bit 7 ~ Bit 6: 未使用，始终读为1
/// Bit 5: 为0则表示低4位反映标准按键（A, B, Select, Start）
/// Bit 4: 为0则表示低4位反映方向键
/// Bit 3 ~ Bit 0: 选中的按键状态，0表示按下，只读
/// 同时选中两组时，低4位是两组状态的与运算结果；两组都未选中时低4位全为1
impl Memory for Joypad {
    fn get(&self, a: u16) -> u8 {
        assert_eq!(a, 0xff00);
        let mut low = 0x0f;
        if self.select & 0b0001_0000 == 0x00 {
            low &= self.signals & 0x0f;
        }
        if self.select & 0b0010_0000 == 0x00 {
            low &= self.signals >> 4;
        }
        0xc0 | self.select | low
    }

    fn set(&mut self, a: u16, v: u8) {
        assert_eq!(a, 0xff00);
        self.select = v & 0x30;
    }
}
