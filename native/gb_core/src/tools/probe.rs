/// 调试探针，只在启用probe特性时由SystemClock调用
pub trait Probe {
    /// 即将执行位于pc的指令
    fn on_instruction(&mut self, _pc: u16, _opcode: u8) {}

    /// 响应了一个中断，vector为中断入口地址
    fn on_interrupt(&mut self, _vector: u16) {}

    /// 完成了一帧
    fn on_frame(&mut self) {}
}

/// 默认探针，只做计数
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub instructions: u64,
    pub interrupts: u64,
    pub frames: u64,
}

impl Probe for Counters {
    fn on_instruction(&mut self, pc: u16, opcode: u8) {
        self.instructions += 1;
        log::trace!("{:04x}: {:02x}", pc, opcode);
    }

    fn on_interrupt(&mut self, vector: u16) {
        self.interrupts += 1;
        log::trace!("Interrupt -> {:04x}", vector);
    }

    fn on_frame(&mut self) {
        self.frames += 1;
    }
}

/// 只在启用probe特性时执行表达式，未启用时不产生任何代码
#[macro_export]
macro_rules! probe {
    ($e:expr) => {
        #[cfg(feature = "probe")]
        {
            $e;
        }
    };
}
