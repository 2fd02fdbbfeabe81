use std::path::{Path, PathBuf};
use tracing::{info_span, info, debug};
use std::env;
use std::borrow::Cow;
use regex::{Regex, Captures};

use crate::riveradmin::{Error, Result};
use crate::riveradmin::config::config;


/// Load configuration settings from riveradmin.yaml
/// Searching in order:
/// 1) config_path passed as first command line argument
/// 2) the RIVERADMIN_CONFIG environment variable
/// 3) Current directory, then each of its parents up to root
/// 4) ~/.config/riveradmin/
/// 5) ~/.{config_name}
/// 6) /etc/riveradmin/
///
/// This replaces ${ENV_VAR[:DEFAULT]} parameters in the yaml file with values from the environment
/// variable, if set, otherwise, optionally with the given default value after the :
/// A default starting with ? is an error message reported when the variable is not set.
pub fn load_config(config_name: &str) -> Result<&'static config::Settings> {
    let _span = info_span!("loading config file");
    let config_path = find_config_file(config_name)?;
    info!(config_path = %config_path.to_string_lossy().into_owned(), "found config file");
    let settings = load_config_from(config_path)?;
    Ok(Box::leak(Box::new(settings)))
}

/// Load and validate the config file at config_path.
pub fn load_config_from(config_path: PathBuf) -> Result<config::Settings> {
    let raw_yaml = std::fs::read_to_string(&config_path)?;
    let mut settings = parse_config(&raw_yaml)?;
    settings.load(config_path)?;
    Ok(settings)
}

fn parse_config(raw_yaml: &str) -> Result<config::Settings> {
    let yaml_text = replace_env_vars(raw_yaml)?;
    Ok(serde_yaml::from_str(&yaml_text)?)
}

fn find_config_file(config_name: &str) -> Result<PathBuf> {
    if let Some(path) = env::args().nth(1) {
        debug!("using config path passed on command line");
        return Ok(PathBuf::from(path));
    }
    if let Ok(path) = env::var("RIVERADMIN_CONFIG") {
        debug!("using config path from RIVERADMIN_CONFIG");
        return Ok(PathBuf::from(path));
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.extend(cwd.ancestors().map(|dir| dir.join(config_name)));
    }
    // HOME is required on POSIX, fall back to ~ so the lookup still fails with a useful path
    let home = PathBuf::from(env::var("HOME").unwrap_or_else(|_| "~".to_string()));
    candidates.push(home.join(".config/riveradmin").join(config_name));
    candidates.push(home.join(format!(".{}", config_name)));
    candidates.push(Path::new("/etc/riveradmin").join(config_name));

    for path in candidates {
        debug!(path = %path.to_string_lossy(), "checking for config file");
        if path.exists() {
            return Ok(path);
        }
    }
    Err(Error::new(format!("config file {} not found", config_name)))
}

fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    // We only call this function once and then never again, so don't keep the regex
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]+?))?\}")?;

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var.replace_all(raw_yaml, |caps: &Captures| {
        match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    let s = default.as_str();
                    if let Some(msg) = s.strip_prefix('?') {
                        errors.push(msg.to_string());
                        String::new()
                    } else {
                        s.to_string()
                    }
                } else {
                    errors.push(format!("environment variable {} is required but not defined", &caps[1]));
                    String::new()
                }
            }
        }
    });

    if errors.is_empty() {
        Ok(replaced_text)
    } else {
        Err(Error::new(errors.join("\n")))
    }
}
