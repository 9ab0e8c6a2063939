// src/config.rs
//! Sensor configuration: one entry per monitored entity, loaded from TOML or JSON.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregator::HistoryMath;
use crate::history::HistoryStore;
use crate::period::{SharedExpr, WindowSpec};
use crate::stats::StatKind;
use crate::template::Template;

pub const ENV_CONFIG_PATH: &str = "HISTORY_MATH_CONFIG_PATH";
pub const DEFAULT_NAME: &str = "unnamed calculation";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "sensor")]
    pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub entity_id: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub duration: Option<DurationCfg>,
    #[serde(default, rename = "type")]
    pub stat: StatKind,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub update_interval_secs: Option<u64>,
}

/// `"HH:MM[:SS]"` or `{ days, hours, minutes, seconds }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationCfg {
    Text(String),
    Parts {
        #[serde(default)]
        days: f64,
        #[serde(default)]
        hours: f64,
        #[serde(default)]
        minutes: f64,
        #[serde(default)]
        seconds: f64,
    },
}

impl DurationCfg {
    pub fn to_duration(&self) -> Result<Duration> {
        let secs = match self {
            DurationCfg::Text(s) => parse_hms(s)?,
            DurationCfg::Parts {
                days,
                hours,
                minutes,
                seconds,
            } => days * 86_400.0 + hours * 3_600.0 + minutes * 60.0 + seconds,
        };
        if !secs.is_finite() || secs < 0.0 {
            bail!("duration must be a non-negative time span");
        }
        Duration::try_milliseconds((secs * 1000.0).round() as i64)
            .ok_or_else(|| anyhow!("duration out of range"))
    }
}

fn parse_hms(s: &str) -> Result<f64> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        bail!("duration {s:?} is not HH:MM or HH:MM:SS");
    }
    let mut total = 0.0;
    for (p, mult) in parts.iter().zip([3_600.0, 60.0, 1.0]) {
        let v: f64 = p
            .trim()
            .parse()
            .with_context(|| format!("duration {s:?}: bad component {p:?}"))?;
        total += v * mult;
    }
    Ok(total)
}

impl SensorConfig {
    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.update_interval_secs
                .filter(|&s| s > 0)
                .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS),
        )
    }

    pub fn window(&self) -> Result<WindowSpec> {
        let expr = |s: &Option<String>, what: &str| -> Result<Option<SharedExpr>> {
            s.as_deref()
                .map(|src| {
                    Template::parse(src)
                        .map(|t| Arc::new(t) as SharedExpr)
                        .with_context(|| format!("sensor {:?}: invalid {what}", self.name))
                })
                .transpose()
        };
        let start = expr(&self.start, "start")?;
        let end = expr(&self.end, "end")?;
        let duration = self
            .duration
            .as_ref()
            .map(DurationCfg::to_duration)
            .transpose()
            .with_context(|| format!("sensor {:?}: invalid duration", self.name))?;

        WindowSpec::from_parts(start, end, duration)
            .with_context(|| format!("sensor {:?}", self.name))
    }

    /// Build the aggregator for this sensor.
    pub fn build(&self, store: Arc<dyn HistoryStore>) -> Result<HistoryMath> {
        if self.entity_id.trim().is_empty() {
            bail!("sensor {:?}: entity_id must not be empty", self.name);
        }
        Ok(HistoryMath::new(
            self.name.clone(),
            self.entity_id.trim(),
            self.window()?,
            self.stat,
            store,
        ))
    }
}

/// Load config from an explicit path. Supports TOML or JSON.
pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sensor config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, &ext)
}

/// Load config using env var + fallbacks:
/// 1) $HISTORY_MATH_CONFIG_PATH
/// 2) config/history_math.toml
/// 3) config/history_math.json
pub fn load_default() -> Result<Config> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in ["config/history_math.toml", "config/history_math.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_from(&p);
        }
    }
    Ok(Config::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<Config> {
    let cfg: Config = if hint_ext == "json" {
        serde_json::from_str(s).context("parsing JSON sensor config")?
    } else {
        toml::from_str(s).context("parsing TOML sensor config")?
    };
    // Fail early on any sensor that can't be built.
    for sensor in &cfg.sensors {
        sensor.window()?;
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const TOML: &str = r#"
[[sensor]]
name = "Outdoor max today"
entity_id = "sensor.outdoor_temperature"
start = "today"
end = "now"

[[sensor]]
entity_id = "sensor.power"
end = "now"
duration = "01:30"
type = "mean"
update_interval_secs = 15

[[sensor]]
name = "Weekly range"
entity_id = "sensor.pressure"
start = "start_of_week"
duration = { days = 7 }
type = "range"
unique_id = "pressure_week"
"#;

    #[test]
    fn toml_sensors_parse_with_defaults() {
        let cfg = parse_config(TOML, "toml").unwrap();
        assert_eq!(cfg.sensors.len(), 3);

        let a = &cfg.sensors[0];
        assert_eq!(a.stat, StatKind::Max);
        assert_eq!(a.update_interval().as_secs(), DEFAULT_UPDATE_INTERVAL_SECS);

        let b = &cfg.sensors[1];
        assert_eq!(b.name, DEFAULT_NAME);
        assert_eq!(b.stat, StatKind::Mean);
        assert_eq!(b.update_interval().as_secs(), 15);
        assert_eq!(
            b.duration.as_ref().unwrap().to_duration().unwrap(),
            Duration::minutes(90)
        );
        assert!(matches!(b.window().unwrap(), WindowSpec::EndDuration { .. }));

        let c = &cfg.sensors[2];
        assert_eq!(
            c.duration.as_ref().unwrap().to_duration().unwrap(),
            Duration::days(7)
        );
        assert!(matches!(c.window().unwrap(), WindowSpec::StartDuration { .. }));
    }

    #[test]
    fn json_is_accepted() {
        let json = r#"{"sensor":[{"entity_id":"sensor.x","start":"now - 1h","end":"now","type":"median"}]}"#;
        let cfg = parse_config(json, "json").unwrap();
        assert_eq!(cfg.sensors[0].stat, StatKind::Median);
    }

    #[test]
    fn exactly_two_period_keys_required() {
        let one = r#"
[[sensor]]
entity_id = "sensor.x"
start = "today"
"#;
        let err = parse_config(one, "toml").unwrap_err();
        assert!(format!("{err:#}").contains("exactly 2"), "{err:#}");

        let three = r#"
[[sensor]]
entity_id = "sensor.x"
start = "today"
end = "now"
duration = "01:00:00"
"#;
        assert!(parse_config(three, "toml").is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        let bad_type = r#"
[[sensor]]
entity_id = "sensor.x"
start = "today"
end = "now"
type = "average"
"#;
        assert!(parse_config(bad_type, "toml").is_err());

        let bad_expr = r#"
[[sensor]]
entity_id = "sensor.x"
start = "whenever"
end = "now"
"#;
        assert!(parse_config(bad_expr, "toml").is_err());

        assert!(DurationCfg::Text("1:2:3:4".into()).to_duration().is_err());
        assert!(DurationCfg::Text("-01:00".into()).to_duration().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // No files in temp CWD → empty config
        let cfg = load_default().unwrap();
        assert!(cfg.sensors.is_empty());

        // Fallback file is picked up
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join("config/history_math.toml"), TOML).unwrap();
        assert_eq!(load_default().unwrap().sensors.len(), 3);

        // Env wins
        let p_json = tmp.path().join("sensors.json");
        fs::write(&p_json, r#"{"sensor":[{"entity_id":"sensor.x","end":"now","duration":{"hours":1}}]}"#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p_json.display().to_string());
        assert_eq!(load_default().unwrap().sensors.len(), 1);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
