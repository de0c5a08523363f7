use log::{Level, LevelFilter, Log, Metadata, Record};
use yansi::Paint;

lazy_static::lazy_static! {
    /// 日志级别，通过环境变量GB_CORE_LOG配置(error/warn/info/debug/trace/off)，默认info
    pub static ref LOG_LEVEL: LevelFilter = std::env::var("GB_CORE_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LevelFilter::Info);
}

/// 输出到标准错误的日志实现
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("{}", format_record(record));
    }

    fn flush(&self) {}
}

fn format_record(record: &Record) -> String {
    let header = match record.level() {
        Level::Error => Paint::red("ERROR").bold(),
        Level::Warn => Paint::yellow("WARN").bold(),
        Level::Info => Paint::green("INFO").bold(),
        Level::Debug => Paint::blue("DEBUG").bold(),
        Level::Trace => Paint::magenta("TRACE").bold(),
    };
    format!("{} {} > {}", header, Paint::new(record.target()), record.args())
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// 安装日志实现，重复调用时保持第一次的设置
pub fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(*LOG_LEVEL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_contains_target_and_message() {
        Paint::disable();
        let line = format_record(
            &Record::builder()
                .level(Level::Warn)
                .target("gb_core::ppu")
                .args(format_args!("LY={}", 144))
                .build(),
        );
        assert_eq!(line, "WARN gb_core::ppu > LY=144");
    }

    #[test]
    fn test_init_twice() {
        init_logger();
        init_logger();
        log::info!("logger ready");
    }
}
