/// 分频器：每累计period个原始时钟周期，输出一个新的时钟周期
pub struct Clock {
    /// 多少个原始时钟周期输出一个新的时钟周期
    pub period: u32,
    /// 累计的、尚未被消耗的原始时钟周期
    pub n: u32,
}

impl Clock {
    pub fn power_up(period: u32) -> Self {
        Self { period, n: 0x00 }
    }

    /// cycles为刚刚经历的原始时钟周期，返回这段时间内输出的新时钟周期数量
    pub fn next(&mut self, cycles: u32) -> u32 {
        self.n += cycles;
        let rs = self.n / self.period;
        // 除去已消耗的原始时钟周期，余数留到下一次
        self.n %= self.period;
        rs
    }

    /// 丢弃已累计的原始时钟周期
    pub fn reset(&mut self) {
        self.n = 0;
    }
}
