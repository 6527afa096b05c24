use std::env;
use std::error::Error;

use eggshell::remote::Server;
use eggshell::utils::config::Config;
use eggshell::utils::log::init_logger;
use log::{debug, error};

fn parse_port(arg: &str) -> Result<u16, String> {
    match arg.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("Invalid port number: {}", arg)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut config = Config::new();
    config.name = String::from("eggd");

    let port = match env::args().nth(1) {
        Some(arg) => parse_port(&arg)?,
        None => config.port,
    };

    init_logger(&config, true)?;
    debug!("shell: {}", config.shell_path.display());

    let mut server = Server::bind(&config, port).map_err(|err| {
        error!("服务器启动失败: {}", err);
        err
    })?;
    server.serve()?;
    Ok(())
}
