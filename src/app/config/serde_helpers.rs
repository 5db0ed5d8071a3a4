use super::ConfigError;
use clap::ValueEnum;

/// Turns an application name into the environment variable prefix used for
/// app-specific overrides: `my-app` becomes `MY_APP`.
pub fn env_prefix(app_name: &str) -> String {
    app_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Reads `{APP}_{name}` first, then `name`. Empty values count as unset.
pub fn env_var(app_name: &str, name: &str) -> Option<String> {
    let prefix = env_prefix(app_name);
    if !prefix.is_empty()
        && let Ok(value) = std::env::var(format!("{prefix}_{name}"))
        && !value.is_empty()
    {
        return Some(value);
    }
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Helper function to load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
pub fn load_env_var<T>(app_name: &str, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_var(app_name, name) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

pub fn load_env_var_opt<T>(
    app_name: &str,
    name: &str,
    target: &mut Option<T>,
) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_var(app_name, name) {
        *target = Some(
            value
                .trim()
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?,
        );
    }
    Ok(())
}

/// Case-insensitive parse of a clap value enum.
pub fn load_env_enum<T>(app_name: &str, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: ValueEnum,
{
    if let Some(value) = env_var(app_name, name) {
        *target = T::from_str(value.trim(), true)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

pub fn load_env_string(app_name: &str, name: &str, target: &mut String) {
    if let Some(value) = env_var(app_name, name) {
        *target = value;
    }
}

pub fn load_env_path_opt(app_name: &str, name: &str, target: &mut Option<std::path::PathBuf>) {
    if let Some(value) = env_var(app_name, name) {
        *target = Some(std::path::PathBuf::from(value));
    }
}
