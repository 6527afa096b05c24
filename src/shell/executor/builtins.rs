use std::env;
use std::io::{self, Write};

use log::{debug, warn};

use super::ExecutionOutcome;
use crate::remote::client;
use crate::shell::context::ShellContext;
use crate::shell::parser::Command;
use crate::utils::path;

const BUILTINS: &[&str] = &[
    "exit", "cd", "pwd", "history", "prompt", "hostname", "help", "man", "connect",
];

pub fn is_builtin(program: &str) -> bool {
    BUILTINS.contains(&program)
}

/// 处理内建命令；不是内建命令时返回 `None`
pub(super) fn dispatch(command: &Command, context: &mut ShellContext) -> Option<ExecutionOutcome> {
    let program = command.program()?;
    if !is_builtin(program) {
        return None;
    }
    debug!("执行内建命令: {:?}", command.arguments);
    if command.has_redirections() {
        warn!("内建命令 {} 忽略重定向", program);
    }

    let args = &command.arguments[1..];
    let outcome = match program {
        "exit" => return Some(ExecutionOutcome::Exit),
        "cd" => builtin_cd(args),
        "pwd" => builtin_pwd(),
        "history" => builtin_history(context),
        "prompt" => builtin_prompt(args, context),
        "hostname" => builtin_hostname(args, context),
        "help" | "man" => builtin_help(),
        "connect" => builtin_connect(args, context),
        _ => return None,
    };

    context.last_status = match outcome {
        Ok(()) => 0,
        Err(message) => {
            eprintln!("{}", message);
            1
        }
    };
    Some(ExecutionOutcome::Builtin)
}

fn builtin_cd(args: &[String]) -> Result<(), String> {
    let target = match args.first() {
        Some(path) => shellexpand::tilde(path).into_owned(),
        None => env::var("HOME").map_err(|_| "cd: HOME not set".to_string())?,
    };
    env::set_current_dir(&target).map_err(|err| format!("cd: {}: {}", target, err))
}

fn builtin_pwd() -> Result<(), String> {
    let cwd = path::current_dir().map_err(|err| format!("pwd: {}", err))?;
    println!("{}", cwd);
    Ok(())
}

fn builtin_history(context: &ShellContext) -> Result<(), String> {
    let mut out = io::stdout().lock();
    for (number, command) in context.history.entries() {
        writeln!(out, "{} {}", number, command).map_err(|err| format!("history: {}", err))?;
    }
    Ok(())
}

fn builtin_prompt(args: &[String], context: &mut ShellContext) -> Result<(), String> {
    if args.is_empty() {
        return Err("Usage: prompt <new_prompt>".to_string());
    }
    context.prompt = args.join(" ");
    if !context.prompt.ends_with(' ') {
        context.prompt.push(' ');
    }
    Ok(())
}

fn builtin_hostname(args: &[String], context: &mut ShellContext) -> Result<(), String> {
    match args.first() {
        Some(name) if !name.is_empty() => {
            context.set_hostname(name);
            println!("Hostname has been changed.");
            Ok(())
        }
        _ => Err("Usage: hostname <name>".to_string()),
    }
}

fn builtin_help() -> Result<(), String> {
    println!(
        "egg shell builtins:\n\
         \x20 cd [dir]              change directory ($HOME when omitted)\n\
         \x20 pwd                   print the working directory\n\
         \x20 history               list numbered history; !n, !prefix and ! replay\n\
         \x20 prompt <text>         set the prompt\n\
         \x20 hostname <name>       set the prompt to [name] $\n\
         \x20 connect <host> [port] open a remote shell session\n\
         \x20 exit                  leave the shell\n\
         Commands may use |, <, >, >>, 2>, ; and a trailing &."
    );
    Ok(())
}

fn builtin_connect(args: &[String], context: &ShellContext) -> Result<(), String> {
    let host = args
        .first()
        .ok_or_else(|| "Usage: connect <host> [port]".to_string())?;
    let port = match args.get(1) {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| format!("connect: invalid port: {}", port))?,
        None => context.default_port,
    };
    client::connect(host, port).map_err(|err| format!("connect: {}", err))
}
