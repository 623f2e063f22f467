use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;
pub const MAX_TILE: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Frame pacing. A bare number in the file means a capped frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Pacing {
    #[default]
    Vsync,
    Immediate,
    Capped(f32),
}

impl Pacing {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "vsync" | "fifo" => Ok(Self::Vsync),
            "immediate" | "unlimited" | "off" => Ok(Self::Immediate),
            other => other
                .parse::<f32>()
                .map(Self::Capped)
                .map_err(|_| {
                    format!("invalid pacing '{raw}'; expected vsync, immediate or a frame rate")
                }),
        }
    }
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vsync => f.write_str("vsync"),
            Self::Immediate => f.write_str("immediate"),
            Self::Capped(fps) => write!(f, "{fps} fps"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, deserialize_with = "deserialize_pacing")]
    pub pacing: Pacing,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub keys: KeySection,
    #[serde(default)]
    pub life: LifeSection,
    #[serde(default)]
    pub mandelbrot: MandelbrotSection,
    #[serde(default)]
    pub waves: CanvasSection,
    #[serde(default)]
    pub raytrace: RaytraceSection,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            pacing: Pacing::default(),
            window: WindowSection::default(),
            dispatch: DispatchSection::default(),
            keys: KeySection::default(),
            life: LifeSection::default(),
            mandelbrot: MandelbrotSection::default(),
            waves: CanvasSection::default(),
            raytrace: RaytraceSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowSection {
    pub title: String,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            title: "compute demo".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Workgroup edge length; every kernel runs `tile x tile` invocations per
    /// group.
    pub tile: u32,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self { tile: 16 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeySection {
    pub quit: String,
    pub pause: String,
    pub reset: String,
}

impl Default for KeySection {
    fn default() -> Self {
        Self {
            quit: "escape".into(),
            pause: "space".into(),
            reset: "r".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LifeSection {
    pub grid: u32,
    pub cell_size: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub step_interval: Duration,
    pub max_catch_up: u32,
    pub density: f64,
    pub seed: Option<u64>,
}

impl Default for LifeSection {
    fn default() -> Self {
        Self {
            grid: 512,
            cell_size: 2,
            step_interval: Duration::from_millis(160),
            max_catch_up: 4,
            density: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MandelbrotSection {
    pub width: u32,
    pub height: u32,
    pub max_iterations: u32,
}

impl Default for MandelbrotSection {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            max_iterations: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CanvasSection {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasSection {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RaytraceSection {
    pub width: u32,
    pub height: u32,
    pub camera: [f32; 3],
}

impl Default for RaytraceSection {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            camera: [0.0; 3],
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_canvas_width() -> u32 {
    800
}

fn default_canvas_height() -> u32 {
    600
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || !v.is_finite() {
                return Err(E::custom("duration must be a non-negative number of seconds"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_pacing<'de, D>(deserializer: D) -> Result<Pacing, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Int(i64),
        Float(f64),
    }

    match Helper::deserialize(deserializer)? {
        Helper::Str(raw) => Pacing::parse(&raw).map_err(de::Error::custom),
        Helper::Int(fps) => Ok(Pacing::Capped(fps as f32)),
        Helper::Float(fps) => Ok(Pacing::Capped(fps as f32)),
    }
}

/// Canonical spelling of a key name, or `None` when it names no key.
fn normalize_key(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "esc" | "escape" => "escape",
        "space" => "space",
        "enter" | "return" => "enter",
        other => {
            let mut chars = other.chars();
            return match (chars.next(), chars.next()) {
                (Some(ch), None) => Some(ch.to_string()),
                _ if raw == " " => Some("space".into()),
                _ => None,
            };
        }
    };
    Some(canonical.into())
}

impl DemoConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: DemoConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        if let Pacing::Capped(fps) = self.pacing {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "pacing frame rate must be > 0, got {fps}"
                )));
            }
        }

        if !(1..=MAX_TILE).contains(&self.dispatch.tile) {
            return Err(ConfigError::Invalid(format!(
                "dispatch.tile must be within 1..={MAX_TILE}, got {}",
                self.dispatch.tile
            )));
        }

        let sizes = [
            ("life.grid", self.life.grid, self.life.grid),
            ("life.cell_size", self.life.cell_size, self.life.cell_size),
            ("mandelbrot", self.mandelbrot.width, self.mandelbrot.height),
            ("waves", self.waves.width, self.waves.height),
            ("raytrace", self.raytrace.width, self.raytrace.height),
        ];
        for (name, width, height) in sizes {
            if width == 0 || height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.mandelbrot.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "mandelbrot.max_iterations must be greater than zero".into(),
            ));
        }

        if self.life.step_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "life.step_interval must be greater than zero".into(),
            ));
        }

        if self.life.max_catch_up == 0 {
            return Err(ConfigError::Invalid(
                "life.max_catch_up must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.life.density) {
            return Err(ConfigError::Invalid(format!(
                "life.density must be within [0, 1], got {}",
                self.life.density
            )));
        }

        let bindings = [
            ("quit", &self.keys.quit),
            ("pause", &self.keys.pause),
            ("reset", &self.keys.reset),
        ];
        let mut seen: Vec<(&str, String)> = Vec::with_capacity(bindings.len());
        for (action, raw) in bindings {
            let key = normalize_key(raw).ok_or_else(|| {
                ConfigError::Invalid(format!("keys.{action}: unknown key '{raw}'"))
            })?;
            if let Some((other, _)) = seen.iter().find(|(_, existing)| *existing == key) {
                return Err(ConfigError::Invalid(format!(
                    "keys.{action} and keys.{other} are both bound to '{key}'"
                )));
            }
            seen.push((action, key));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = DemoConfig::from_toml_str("").expect("empty config");
        assert_eq!(config.version, 1);
        assert_eq!(config.pacing, Pacing::Vsync);
        assert_eq!(config.dispatch.tile, 16);
        assert_eq!(config.life.step_interval, Duration::from_millis(160));
        assert_eq!((config.life.grid, config.life.cell_size), (512, 2));
        assert_eq!((config.waves.width, config.waves.height), (800, 600));
        assert_eq!(config.keys, KeySection::default());
    }

    #[test]
    fn parses_full_document() {
        let input = r#"
version = 1
pacing = 30
[window]
title = "demo"
[dispatch]
tile = 8
[keys]
quit = "q"
pause = "p"
reset = "Return"
[life]
grid = 64
cell_size = 4
step_interval = "250ms"
max_catch_up = 2
density = 0.25
seed = 42
[mandelbrot]
width = 320
height = 200
max_iterations = 128
[waves]
width = 640
[raytrace]
camera = [0.0, 0.5, 1.0]
"#;
        let config = DemoConfig::from_toml_str(input).expect("config");
        assert_eq!(config.pacing, Pacing::Capped(30.0));
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.dispatch.tile, 8);
        assert_eq!(config.life.step_interval, Duration::from_millis(250));
        assert_eq!(config.life.seed, Some(42));
        assert_eq!(config.mandelbrot.max_iterations, 128);
        assert_eq!((config.waves.width, config.waves.height), (640, 600));
        assert_eq!(config.raytrace.camera, [0.0, 0.5, 1.0]);
    }

    #[test]
    fn pacing_accepts_names_and_rates() {
        let parse = |raw: &str| DemoConfig::from_toml_str(raw).map(|config| config.pacing);
        assert_eq!(parse(r#"pacing = "immediate""#).expect("name"), Pacing::Immediate);
        assert_eq!(parse("pacing = 59.5").expect("float"), Pacing::Capped(59.5));
        assert_eq!(parse(r#"pacing = "120""#).expect("string"), Pacing::Capped(120.0));
        assert!(parse(r#"pacing = "sometimes""#).is_err());
        assert!(matches!(parse("pacing = 0"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn step_interval_accepts_seconds() {
        let config = DemoConfig::from_toml_str("[life]\nstep_interval = 0.5").expect("config");
        assert_eq!(config.life.step_interval, Duration::from_millis(500));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for input in [
            "version = 2",
            "[dispatch]\ntile = 0",
            "[dispatch]\ntile = 64",
            "[life]\ngrid = 0",
            "[life]\nstep_interval = \"0s\"",
            "[life]\nmax_catch_up = 0",
            "[life]\ndensity = 1.5",
            "[mandelbrot]\nheight = 0",
            "[keys]\nreset = \"escape\"",
            "[keys]\npause = \"spacebar\"",
        ] {
            assert!(
                matches!(DemoConfig::from_toml_str(input), Err(ConfigError::Invalid(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn duplicate_bindings_compare_canonical_names() {
        let err = DemoConfig::from_toml_str("[keys]\nquit = \"Esc\"\npause = \"escape\"")
            .expect_err("duplicate");
        assert!(err.to_string().contains("keys.pause and keys.quit"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DemoConfig::load(&dir.path().join("config.toml")).expect("defaults");
        assert_eq!(config.dispatch.tile, 16);
    }

    #[test]
    fn load_reads_and_validates_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch]\ntile = 8\n").unwrap();
        assert_eq!(DemoConfig::load(&path).expect("config").dispatch.tile, 8);

        std::fs::write(&path, "[dispatch]\ntile = 0\n").unwrap();
        assert!(matches!(DemoConfig::load(&path), Err(ConfigError::Invalid(_))));
    }
}
