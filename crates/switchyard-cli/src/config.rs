//! Locating and loading the bridge configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use switchyard_types::{BridgeConfig, BridgeError};

/// Path used when no positional argument is given.
pub const CONFIG_ENV: &str = "SWITCHYARD_CONFIG";

/// The explicit `arg`, else `$SWITCHYARD_CONFIG`.
pub fn resolve_path(arg: Option<&str>) -> Option<PathBuf> {
    arg.map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Read and parse a TOML configuration file, then apply environment
/// overrides.
pub fn load_from(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: BridgeConfig = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `SWITCHYARD_*` overrides to the `[settings]` table.
///
/// | Variable | Setting |
/// |---|---|
/// | `SWITCHYARD_CALL_TIMEOUT_MS` | `call_timeout_ms` (`0` disables the timeout) |
/// | `SWITCHYARD_IDLE_SLEEP_MS` | `idle_sleep_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut BridgeConfig) {
    if let Ok(v) = std::env::var("SWITCHYARD_CALL_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.settings.call_timeout_ms = (ms > 0).then_some(ms);
    }
    if let Ok(v) = std::env::var("SWITCHYARD_IDLE_SLEEP_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.settings.idle_sleep_ms = ms;
    }
}

/// JSON Schema of the configuration file, pretty-printed.
pub fn schema_json() -> Result<String, BridgeError> {
    let schema = schemars::schema_for!(BridgeConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| BridgeError::Config(e.to_string()))
}
