//! Renderer configuration.

use std::path::PathBuf;
use std::str::FromStr;

use crate::shadow::{ShadowDebugView, LIGHT_MASK_CAPACITY};

/// Startup settings for the renderer and viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub startup_width: u32,
    pub startup_height: u32,
    /// Clamped to the light mask capacity.
    pub max_lights: usize,
    pub vsync: bool,
    pub enable_validation: bool,
    /// Directory holding the compiled `.spv` shaders.
    pub shader_dir: PathBuf,
    pub debug_view: ShadowDebugView,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            startup_width: 1920,
            startup_height: 1080,
            max_lights: LIGHT_MASK_CAPACITY,
            vsync: false,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            debug_view: ShadowDebugView::None,
        }
    }
}

impl RendererConfig {
    /// Defaults overlaid with `SUMIRE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `SUMIRE_*` key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(width) = parse_var(&lookup, "SUMIRE_WIDTH") {
            config.startup_width = width;
        }
        if let Some(height) = parse_var(&lookup, "SUMIRE_HEIGHT") {
            config.startup_height = height;
        }
        if let Some(max_lights) = parse_var::<usize, _>(&lookup, "SUMIRE_MAX_LIGHTS") {
            config.max_lights = max_lights;
        }
        if let Some(vsync) = parse_flag(&lookup, "SUMIRE_VSYNC") {
            config.vsync = vsync;
        }
        if let Some(validation) = parse_flag(&lookup, "SUMIRE_VALIDATION") {
            config.enable_validation = validation;
        }
        if let Some(dir) = lookup("SUMIRE_SHADER_DIR") {
            config.shader_dir = PathBuf::from(dir);
        }
        if let Some(view) = parse_var(&lookup, "SUMIRE_DEBUG_VIEW") {
            config.debug_view = view;
        }

        config.max_lights = config.max_lights.min(LIGHT_MASK_CAPACITY);
        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring {key}={raw:?}: {e}");
            None
        }
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => {
            log::warn!("Ignoring {key}={raw:?}: expected a boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RendererConfig::from_lookup(|_| None);
        assert_eq!(config, RendererConfig::default());
        assert_eq!((config.startup_width, config.startup_height), (1920, 1080));
        assert_eq!(config.max_lights, 1024);
        assert!(!config.vsync);
    }

    #[test]
    fn test_overrides() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            ("SUMIRE_WIDTH", "800"),
            ("SUMIRE_HEIGHT", " 600 "),
            ("SUMIRE_VSYNC", "on"),
            ("SUMIRE_VALIDATION", "0"),
            ("SUMIRE_SHADER_DIR", "/opt/sumire/spv"),
            ("SUMIRE_DEBUG_VIEW", "light_count"),
        ]));
        assert_eq!(config.startup_width, 800);
        assert_eq!(config.startup_height, 600);
        assert!(config.vsync);
        assert!(!config.enable_validation);
        assert_eq!(config.shader_dir, PathBuf::from("/opt/sumire/spv"));
        assert_eq!(config.debug_view, ShadowDebugView::LightCount);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            ("SUMIRE_WIDTH", "wide"),
            ("SUMIRE_VSYNC", "maybe"),
            ("SUMIRE_DEBUG_VIEW", "x-ray"),
        ]));
        assert_eq!(config.startup_width, 1920);
        assert!(!config.vsync);
        assert_eq!(config.debug_view, ShadowDebugView::None);
    }

    #[test]
    fn test_max_lights_clamped() {
        let config = RendererConfig::from_lookup(lookup_from(&[("SUMIRE_MAX_LIGHTS", "5000")]));
        assert_eq!(config.max_lights, LIGHT_MASK_CAPACITY);

        let config = RendererConfig::from_lookup(lookup_from(&[("SUMIRE_MAX_LIGHTS", "64")]));
        assert_eq!(config.max_lights, 64);
    }
}
