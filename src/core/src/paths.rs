use std::ffi::OsString;
use std::path::PathBuf;

use directories::BaseDirs;

pub fn user_home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.home_dir().to_path_buf())
}

/// `$DELVE_HOME`, or `~/.delve`. Not created here; only read from.
pub fn delve_home_dir() -> Result<PathBuf, String> {
    resolve_home(std::env::var_os("DELVE_HOME"), user_home_dir())
}

pub fn delve_config_path() -> Result<PathBuf, String> {
    Ok(delve_home_dir()?.join("config.toml"))
}

fn resolve_home(override_dir: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(dir);
        if path.is_relative() {
            return Err("DELVE_HOME must be an absolute path".to_string());
        }
        return Ok(path);
    }
    home.map(|h| h.join(".delve"))
        .ok_or_else(|| "no home directory found; set DELVE_HOME".to_string())
}
