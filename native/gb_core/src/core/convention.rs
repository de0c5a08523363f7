/// 硬件型号，在创建机器时确定，运行期间不会改变
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HardwareMode {
    /// 原版的GameBoy
    Dmg,
    /// GameBoy Color
    Cgb,
}

impl HardwareMode {
    /// 根据卡带头部0x0143处的CGB标志判断型号，第7位为1表示支持彩色模式
    pub fn from_cgb_flag(flag: u8) -> Self {
        if flag & 0x80 != 0 {
            HardwareMode::Cgb
        } else {
            HardwareMode::Dmg
        }
    }
}

/// CPU频率（单位：T-cycle/秒）
pub const CPU_FREQ: u32 = 4_194_304;

/// 1个机器周期(M-cycle) = 4个时钟周期(T-cycle)
pub const T_CYCLES_PER_M_CYCLE: u32 = 4;

/// 每条扫描线占用的时钟周期
pub const DOTS_PER_LINE: u32 = 456;

/// 一帧共154条扫描线
pub const LINES_PER_FRAME: u8 = 154;

/// 一帧画面占用的时钟周期: 154 * 456
pub const CYCLES_PER_FRAME: u32 = DOTS_PER_LINE * LINES_PER_FRAME as u32;

///  屏幕的宽高
pub const SCREEN_W: usize = 160;
pub const SCREEN_H: usize = 144;
