use std::borrow::Cow;
use std::env;
use std::fs::read_dir;
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;

use log::{debug, error};

pub fn basename(path: &str) -> Cow<'_, str> {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(p) if !p.is_empty() => p.into(),
        _ => path.into(),
    }
}

/// 在 PATH 中查找文件，找不到时返回空字符串
pub fn find_file_in_path(filename: &str, exec: bool) -> String {
    let env_path = match env::var("PATH") {
        Ok(x) => x,
        Err(e) => {
            error!("egg: error with env PATH: {:?}", e);
            return String::new();
        }
    };
    for p in env_path.split(':').filter(|p| !p.is_empty()) {
        match read_dir(p) {
            Ok(list) => {
                for entry in list.flatten() {
                    if entry.file_name().to_str() != Some(filename) {
                        continue;
                    }

                    if exec {
                        let metadata = match entry.metadata() {
                            Ok(x) => x,
                            Err(e) => {
                                error!("egg: metadata error: {:?}", e);
                                continue;
                            }
                        };
                        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
                            // not binary
                            continue;
                        }
                    }

                    return entry.path().to_string_lossy().to_string();
                }
            }
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    continue;
                }
                error!("egg: fs read_dir error: {}: {}", p, e);
            }
        }
    }
    String::new()
}

/// 解析要 exec 的程序路径：含 `/` 的名字原样使用，否则只在 PATH 中查找。
/// 不含 `/` 且 PATH 中找不到时返回 `None`，不会退回到当前目录。
pub fn resolve_program(program: &str) -> Option<String> {
    if program.contains('/') {
        return Some(program.to_string());
    }
    let found = find_file_in_path(program, true);
    if found.is_empty() {
        debug!("PATH 中找不到程序: {}", program);
        None
    } else {
        Some(found)
    }
}

pub fn current_dir() -> io::Result<String> {
    let current_dir = env::current_dir()?;
    match current_dir.to_str() {
        Some(x) => Ok(x.to_string()),
        None => Err(io::Error::new(
            ErrorKind::InvalidData,
            "current directory is not valid UTF-8",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/local/bin/egg"), "egg");
        assert_eq!(basename("egg"), "egg");
        assert_eq!(basename("/bin/sh/"), "sh");
    }

    #[test]
    fn test_find_sh_in_path() {
        let found = find_file_in_path("sh", true);
        assert!(found.ends_with("/sh"), "found: {}", found);
    }

    #[test]
    fn test_resolve_program() {
        assert_eq!(
            resolve_program("./local-script").as_deref(),
            Some("./local-script")
        );
        assert_eq!(resolve_program("definitely-not-a-real-program-xyz"), None);
        assert!(resolve_program("sh").is_some_and(|path| path.starts_with('/')));
    }
}
