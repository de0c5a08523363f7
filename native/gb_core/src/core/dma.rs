use std::fmt::{Display, Formatter};

use crate::core::memory::Memory;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DMAMode {
    /// General Purpose DMA, 一次性传输完毕，传输期间CPU暂停
    GDMA,
    /// HBlank DMA, 每次HBlank期间传输0x10个字节，LY在144~153时不传输
    HDMA,
}

impl Display for DMAMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DMAMode::GDMA => write!(f, "GDMA"),
            DMAMode::HDMA => write!(f, "HDMA"),
        }
    }
}

/// 彩色模式下的VRAM DMA（HDMA1~HDMA5: 0xff51~0xff55），从ROM/SRAM/WRAM复制数据到VRAM
/// OAM DMA(0xff46)不走这里，由MMU同步完成
pub struct DMA {
    /// 源地址，低4位被忽略
    pub src: u16,
    /// 目标地址，只有12~4位有效，最终落在0x8000~0x9ff0
    pub dst: u16,
    /// 传输是否正在进行，HDMA可以被程序中途终止
    pub active: bool,
    pub mode: DMAMode,
    /// 剩余要传输的数据块数量减1（数据块长度为0x10），只有低7位有效
    pub remain: u8,
}

impl DMA {
    pub fn power_up() -> Self {
        Self {
            src: 0x0000,
            dst: 0x8000,
            active: false,
            mode: DMAMode::GDMA,
            remain: 0x7f,
        }
    }

    /// 一个数据块传输完成后更新地址和剩余数量
    pub fn advance(&mut self) {
        self.src = self.src.wrapping_add(0x10);
        self.dst = 0x8000 | (self.dst.wrapping_add(0x10) & 0x1ff0);
        if self.remain == 0 {
            self.remain = 0x7f;
            self.active = false;
        } else {
            self.remain -= 1;
        }
    }
}

impl Display for DMA {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "src: {:#06x}, dest: {:#06x}, active: {}, mode: {}, remain: {}",
            self.src, self.dst, self.active, self.mode, self.remain
        )
    }
}

impl Memory for DMA {
    fn get(&self, a: u16) -> u8 {
        match a {
            // HDMA1~HDMA4只写
            0xff51..=0xff54 => 0xff,
            // HDMA5，读取时返回剩余数据块数量，传输结束或被终止时第7位为1
            0xff55 => {
                if self.active {
                    self.remain
                } else {
                    self.remain | 0x80
                }
            }
            _ => unreachable!(),
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff51 => self.src = (u16::from(v) << 8) | (self.src & 0x00ff),
            0xff52 => self.src = u16::from(v & 0xf0) | (self.src & 0xff00),
            0xff53 => self.dst = (u16::from(v & 0x1f) << 8) | (self.dst & 0x00ff) | 0x8000,
            0xff54 => self.dst = u16::from(v & 0xf0) | (self.dst & 0xff00),
            0xff55 => {
                if self.active && self.mode == DMAMode::HDMA {
                    if v & 0x80 == 0 {
                        // 终止正在进行的HDMA
                        self.active = false;
                        log::debug!("HDMA stopped: {}", self);
                    }
                    return;
                }
                self.active = true;
                self.remain = v & 0x7f;
                self.mode = if v & 0x80 == 0 { DMAMode::GDMA } else { DMAMode::HDMA };
                log::debug!("DMA started: {}", self);
            }
            _ => unreachable!(),
        }
    }
}
