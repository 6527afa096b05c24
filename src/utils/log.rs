use crate::utils::config::Config;
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::process;

pub fn parse_level(level: &str) -> LevelFilter {
    match level {
        level if level.eq_ignore_ascii_case("off") => LevelFilter::Off,
        level if level.eq_ignore_ascii_case("error") => LevelFilter::Error,
        level if level.eq_ignore_ascii_case("warn") => LevelFilter::Warn,
        level if level.eq_ignore_ascii_case("info") => LevelFilter::Info,
        level if level.eq_ignore_ascii_case("debug") => LevelFilter::Debug,
        level if level.eq_ignore_ascii_case("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 打开当天的日志文件；目录或文件不可写时返回 None，只在 stderr 提示一次
fn open_log_file(config: &Config) -> Option<File> {
    let date = Local::now().format("%Y-%m-%d");
    let log_file = config
        .logger_dir
        .join(format!("{}_{}.log", config.name, date));
    let opened = fs::create_dir_all(&config.logger_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
    });
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("{}: 无法打开日志文件 {}: {}", config.name, log_file.display(), err);
            None
        }
    }
}

/// 初始化日志：写入按日期命名的日志文件，`echo` 为真时同时输出到 stdout。
///
/// 交互式 shell 只写文件，避免日志和命令输出混在一起；服务端两者都写。
/// 日志文件打不开时仍然安装 logger，只是少了文件这一路。
pub fn init_logger(config: &Config, echo: bool) -> io::Result<()> {
    let level = parse_level(&config.logger_level);

    let mut writers: Vec<Box<dyn Write + Send + Sync>> = Vec::new();
    if let Some(file) = open_log_file(config) {
        writers.push(Box::new(file));
    }
    if echo {
        writers.push(Box::new(io::stdout()));
    }

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[PID:{}][{}] {} - {}",
                process::id(),
                record.level(),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(MultiWriter { writers })))
        .filter(Some(env!("CARGO_CRATE_NAME")), level)
        .filter(Some("egg"), level)
        .filter(Some("eggd"), level)
        .filter(None, LevelFilter::Warn)
        .try_init()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    log::debug!("日志级别设置为: {}", level);
    Ok(())
}

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
