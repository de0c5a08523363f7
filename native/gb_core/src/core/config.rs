use crate::core::convention::HardwareMode;

/// 创建机器时的配置
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MachineConfig {
    /// 硬件型号，为None时根据卡带头部的CGB标志决定
    pub mode: Option<HardwareMode>,
    /// 是否校验卡带头部的校验和以及任天堂logo，校验失败只输出警告
    pub verify_header: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mode: None,
            verify_header: true,
        }
    }
}

impl MachineConfig {
    pub fn with_mode(mode: HardwareMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }
}
