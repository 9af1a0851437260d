//! Session configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LUAI_OPEN_LIBS` | `false` | Load the standard library when the session opens |
//! | `LUAI_CHUNK_NAME` | `=chunk` | Chunk name reported in diagnostics from `run_chunk` |
//! | `LUAI_VERIFY_FRAMES` | `true` | Check that a handle's slot still holds a table before each use |
//!
//! Boolean variables accept `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`
//! (case-insensitive). Anything else falls back to the default.

/// Default chunk name (`=` means "use verbatim" in runtime diagnostics)
pub const DEFAULT_CHUNK_NAME: &str = "=chunk";

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Load the standard library as part of `Session::with_config`
    pub open_libs: bool,
    /// Name given to chunks run through `run_chunk`
    pub chunk_name: String,
    /// Verify the slot kind of a handle's recorded position on every access
    pub verify_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_libs: false,
            chunk_name: DEFAULT_CHUNK_NAME.to_string(),
            verify_frames: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let open_libs = std::env::var("LUAI_OPEN_LIBS")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.open_libs);

        let chunk_name = std::env::var("LUAI_CHUNK_NAME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.chunk_name);

        let verify_frames = std::env::var("LUAI_VERIFY_FRAMES")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.verify_frames);

        Self {
            open_libs,
            chunk_name,
            verify_frames,
        }
    }

    pub fn with_open_libs(mut self, open_libs: bool) -> Self {
        self.open_libs = open_libs;
        self
    }

    pub fn with_chunk_name(mut self, name: impl Into<String>) -> Self {
        self.chunk_name = name.into();
        self
    }

    pub fn with_verify_frames(mut self, verify: bool) -> Self {
        self.verify_frames = verify;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 3] = ["LUAI_OPEN_LIBS", "LUAI_CHUNK_NAME", "LUAI_VERIFY_FRAMES"];

    fn save_env() -> Vec<(&'static str, Option<String>)> {
        VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect()
    }

    // SAFETY: callers are #[serial], so no concurrent env var access
    unsafe fn restore_env(saved: Vec<(&'static str, Option<String>)>) {
        for (key, value) in saved {
            unsafe {
                match value {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!(!config.open_libs);
        assert_eq!(config.chunk_name, "=chunk");
        assert!(config.verify_frames);
    }

    #[test]
    fn test_builder_methods() {
        let config = SessionConfig::default()
            .with_open_libs(true)
            .with_chunk_name("=init")
            .with_verify_frames(false);
        assert!(config.open_libs);
        assert_eq!(config.chunk_name, "=init");
        assert!(!config.verify_frames);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" YES "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_all_values() {
        let saved = save_env();

        // SAFETY: test is #[serial]
        unsafe {
            std::env::set_var("LUAI_OPEN_LIBS", "true");
            std::env::set_var("LUAI_CHUNK_NAME", "=config");
            std::env::set_var("LUAI_VERIFY_FRAMES", "0");
        }

        let config = SessionConfig::from_env();
        assert!(config.open_libs);
        assert_eq!(config.chunk_name, "=config");
        assert!(!config.verify_frames);

        // SAFETY: test is #[serial]
        unsafe { restore_env(saved) };
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values_use_defaults() {
        let saved = save_env();

        // SAFETY: test is #[serial]
        unsafe {
            std::env::set_var("LUAI_OPEN_LIBS", "sometimes");
            std::env::set_var("LUAI_CHUNK_NAME", "");
            std::env::remove_var("LUAI_VERIFY_FRAMES");
        }

        let config = SessionConfig::from_env();
        assert_eq!(config, SessionConfig::default());

        // SAFETY: test is #[serial]
        unsafe { restore_env(saved) };
    }
}
