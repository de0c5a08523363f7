use std::cell::RefCell;
use std::rc::Rc;

use crate::core::clock::Clock;
use crate::core::intf::{INTFlag, Intf};
use crate::core::memory::Memory;

/// TAC低2位对应的TIMA自增周期（单位：T-cycle）
fn tima_period(tac: u8) -> u32 {
    match tac & 0x03 {
        0 => 1024,
        1 => 16,
        2 => 64,
        _ => 256,
    }
}

/// 定时器，直接与内存管理模块相连，定期中断CPU执行，使CPU以固定频率执行某些工作
pub struct Timer {
    intf: Rc<RefCell<Intf>>,
    /// 16位的内部计数器，每个T-cycle加1，DIV寄存器(0xff04)是它的高8位，所以DIV每256个T-cycle加1
    /// 任何写入DIV的行为都会将整个16位计数器清零
    div: u16,
    /// TIMA (Time counter)寄存器, 以TAC寄存器指定的频率递增，溢出时重置为TMA寄存器的值，并请求定时器中断
    tima: u8,
    /// TMA (Timer Modulo)寄存器
    tma: u8,
    /// TAC (Timer Control)寄存器
    /// Bit 2: 是否启用，1表示启用，0表示禁用
    /// Bit 1~0: 设定的定时器频率
    /// 0: CPU Clock / 1024 (4096 Hz)
    /// 1: CPU Clock / 16 (262144 Hz)
    /// 2: CPU Clock / 64 (65536 Hz)
    /// 3: CPU Clock / 256 (16384 Hz)
    tac: u8,
    /// TAC寄存器控制的时钟
    tima_clock: Clock,
}

impl Timer {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self {
            intf,
            div: 0x0000,
            tima: 0x00,
            tma: 0x00,
            tac: 0x00,
            tima_clock: Clock::power_up(tima_period(0x00)),
        }
    }

    /// 推进cycles个T-cycle，一次调用中可能发生多次溢出
    pub fn next(&mut self, cycles: u32) {
        self.div = self.div.wrapping_add(cycles as u16);
        if self.tac & 0x04 == 0 {
            // 未启用定时器
            return;
        }
        let n = self.tima_clock.next(cycles);
        for _ in 0..n {
            let (tima, overflow) = self.tima.overflowing_add(1);
            self.tima = tima;
            if overflow {
                // 将TIMA寄存器的值重置为TMA中的值，并请求中断
                self.tima = self.tma;
                self.intf.borrow_mut().hi(INTFlag::Timer);
            }
        }
    }

    /// 完整的16位内部计数器
    pub fn counter(&self) -> u16 {
        self.div
    }
}

impl Memory for Timer {
    fn get(&self, a: u16) -> u8 {
        match a {
            0xff04 => (self.div >> 8) as u8,
            0xff05 => self.tima,
            0xff06 => self.tma,
            // 高5位未使用，读取时为1
            0xff07 => self.tac | 0xf8,
            _ => unreachable!(),
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff04 => {
                self.div = 0x0000;
                // TIMA的相位也来自内部计数器，一并清零
                self.tima_clock.reset();
            }
            0xff05 => self.tima = v,
            0xff06 => self.tma = v,
            0xff07 => {
                let v = v & 0x07;
                if self.tac & 0x03 != v & 0x03 {
                    // 修改定时器时钟频率
                    self.tima_clock.period = tima_period(v);
                    self.tima_clock.reset();
                }
                self.tac = v;
            }
            _ => unreachable!(),
        }
    }
}
