use thiserror::Error;

/// 创建机器时可能发生的错误，运行过程中不会产生任何错误
#[derive(Error, Debug, Eq, PartialEq)]
pub enum GbError {
    #[error("rom should contain the 0x0100-0x014f header, was {len} bytes")]
    HeaderTooShort { len: usize },
    #[error("unsupported cartridge type: {code:#04x}")]
    UnsupportedCartridge { code: u8 },
    #[error("unsupported rom size code: {code:#04x}")]
    UnsupportedRomSize { code: u8 },
    #[error("unsupported ram size code: {code:#04x}")]
    UnsupportedRamSize { code: u8 },
    #[error("rom is {len} bytes, more than the {max} bytes declared in its header")]
    RomTooLarge { len: usize, max: usize },
}
