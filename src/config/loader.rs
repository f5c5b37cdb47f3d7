use anyhow::{Context, Result, bail, ensure};
use schemars::{Schema, schema_for};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

use super::models::Config;
use crate::model::Script;

/// Load configuration from a string slice.
pub fn load_from_str(s: &str) -> Result<Config> {
    let cfg: Config =
        serde_json::from_str(s).context("Failed to parse JSON config string into Config")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load configuration from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Config> {
    let cfg: Config =
        serde_json::from_reader(reader).context("Failed to parse JSON config from reader")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load configuration from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open config file {}", path_ref.display()))?;
    let cfg = load_from_reader(file)?;
    debug!(target: "autoreplay::config", "Loaded config from {}", path_ref.display());
    Ok(cfg)
}

/// Load configuration from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Config> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read config file {}", path_ref.display()))?;
    let cfg: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON config from {}", path_ref.display()))?;
    validate_config(&cfg)?;
    debug!(target: "autoreplay::config", "Loaded config from {}", path_ref.display());
    Ok(cfg)
}

/// Generate the JSON Schema for the Config model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Config)
}

/// Write the JSON Schema for the Config model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Range checks that serde alone cannot express.
pub fn validate_config(cfg: &Config) -> Result<()> {
    let playback = &cfg.playback;
    ensure!(
        playback.speed.is_finite() && playback.speed > 0.0,
        "playback.speed must be greater than zero (got {})",
        playback.speed
    );
    ensure!(
        (0.0..=1.0).contains(&playback.jitter),
        "playback.jitter must be within [0, 1] (got {})",
        playback.jitter
    );
    ensure!(
        playback.scale_x > 0.0 && playback.scale_y > 0.0,
        "playback.scale_x and playback.scale_y must be greater than zero"
    );
    if playback.timeout_ms == Some(0) {
        bail!("playback.timeout_ms must be greater than zero when set");
    }
    ensure!(playback.max_depth >= 1, "playback.max_depth must be at least 1");

    let recognition = &cfg.recognition;
    ensure!(
        recognition.poll_interval_ms >= 10,
        "recognition.poll_interval_ms must be at least 10 (got {})",
        recognition.poll_interval_ms
    );
    ensure!(
        (0.0..=1.0).contains(&recognition.default_threshold),
        "recognition.default_threshold must be within [0, 1] (got {})",
        recognition.default_threshold
    );
    ensure!(recognition.max_matches >= 1, "recognition.max_matches must be at least 1");

    ensure!(
        cfg.capture.queue_capacity >= 16,
        "capture.queue_capacity must be at least 16 (got {})",
        cfg.capture.queue_capacity
    );
    Ok(())
}

/// Parse and validate a script document.
pub fn load_script_from_str(s: &str, max_depth: usize) -> Result<Script> {
    let script: Script = serde_json::from_str(s).context("Failed to parse script JSON")?;
    script
        .validate(max_depth)
        .with_context(|| format!("Script '{}' is invalid", script.name))?;
    Ok(script)
}

/// Load and validate a script file.
pub fn load_script_from_path<P: AsRef<Path>>(path: P, max_depth: usize) -> Result<Script> {
    let path_ref = path.as_ref();
    let mut content = String::new();
    File::open(path_ref)
        .and_then(|mut f| f.read_to_string(&mut content))
        .with_context(|| format!("Failed to read script file {}", path_ref.display()))?;
    let script = load_script_from_str(&content, max_depth)
        .with_context(|| format!("Failed to load script {}", path_ref.display()))?;
    debug!(
        target: "autoreplay::config",
        name = %script.name,
        actions = script.actions.len(),
        "Loaded script from {}",
        path_ref.display()
    );
    Ok(script)
}

/// Write a script as pretty-printed JSON.
pub fn save_script_to_path<P: AsRef<Path>>(script: &Script, path: P) -> Result<()> {
    let path_ref = path.as_ref();
    let file = File::create(path_ref)
        .with_context(|| format!("Failed to create script file {}", path_ref.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, script)
        .with_context(|| format!("Failed to serialize script '{}'", script.name))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write script file {}", path_ref.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionSequence, GameAction, Key};

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.playback.speed, 1.0);
        assert_eq!(cfg.recognition.poll_interval_ms, 100);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = load_from_str(
            r#"{ "playback": { "speed": 2.0, "continue_on_error": true },
                 "capture": { "ignored_keys": ["escape", { "function": 9 }] } }"#,
        )
        .unwrap();
        assert_eq!(cfg.playback.speed, 2.0);
        assert!(cfg.playback.continue_on_error);
        assert_eq!(cfg.playback.max_depth, 32);
        assert_eq!(cfg.capture.ignored_keys, vec![Key::Escape, Key::Function(9)]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(load_from_str(r#"{ "playback": { "speed": 0 } }"#).is_err());
        assert!(load_from_str(r#"{ "playback": { "jitter": 1.5 } }"#).is_err());
        assert!(load_from_str(r#"{ "recognition": { "poll_interval_ms": 1 } }"#).is_err());
        assert!(load_from_str(r#"{ "capture": { "queue_capacity": 2 } }"#).is_err());
    }

    #[test]
    fn schema_mentions_sections() {
        let mut out = Vec::new();
        write_schema_to_writer(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("playback"));
        assert!(text.contains("recognition"));
    }

    #[test]
    fn script_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let script = Script::new(
            "typing",
            ActionSequence::new(vec![
                GameAction::key_down(Key::Char('a'), 0),
                GameAction::key_up(Key::Char('a'), 50),
            ]),
        );
        save_script_to_path(&script, &path).unwrap();
        let loaded = load_script_from_path(&path, 8).unwrap();
        assert_eq!(loaded, script);
    }

    #[test]
    fn invalid_script_is_rejected_at_load() {
        let json = r#"{ "name": "bad", "actions": [
            { "kind": { "type": "loop", "body": [], "count": 0 } }
        ] }"#;
        assert!(load_script_from_str(json, 8).is_err());
    }

    #[test]
    fn overflowing_region_is_rejected_at_load() {
        let json = r#"{ "name": "far", "actions": [
            { "kind": { "type": "find_image", "template": "ok",
                        "region": { "x": 2147483600, "y": 0, "width": 100, "height": 10 } } }
        ] }"#;
        let err = load_script_from_str(json, 8).unwrap_err();
        assert!(format!("{err:#}").contains("region"), "{err:#}");
    }
}
