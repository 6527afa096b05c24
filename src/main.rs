use eggshell::shell::Shell;
use eggshell::utils::config::Config;
use eggshell::utils::log::init_logger;
use log::debug;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    init_logger(&config, false)?;
    debug!("配置加载成功 {}", config.history_file.display());

    let mut shell = Shell::new(&config)?;
    shell.run()
}
