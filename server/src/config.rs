use anyhow::Context;
use serde_json::Value;
use spoolscale_firmware::EngineConfig;
use spoolscale_firmware::nfc::TagFamily;

/// Fast-path window for tags this server writes: TLV and record header take
/// 21 bytes, `{"sm_id":"` ten more, then a 36-character UUID and its closing
/// quote. 18 pages (72 bytes) hold all of it.
const SERVER_FAST_PATH_PAGES: u8 = 18;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    /// Family of the tag the simulated reader hands out by default.
    pub sim_tag_family: TagFamily,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let sim_tag_family = match std::env::var("SIM_TAG_FAMILY") {
            Ok(raw) => serde_json::from_value(Value::String(raw.to_uppercase()))
                .with_context(|| format!("SIM_TAG_FAMILY must be T213, T215 or T216, got {raw:?}"))?,
            Err(_) => TagFamily::T215,
        };
        let engine = engine_config(std::env::var("ENGINE_CONFIG").ok().as_deref())?;

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:spoolscale.db?mode=rwc".into()),
            sim_tag_family,
            engine,
        })
    }
}

fn server_defaults() -> EngineConfig {
    EngineConfig {
        fast_path_pages: SERVER_FAST_PATH_PAGES,
        ..EngineConfig::default()
    }
}

/// Server defaults with the keys of an `ENGINE_CONFIG` JSON object laid
/// over them.
fn engine_config(overrides: Option<&str>) -> anyhow::Result<EngineConfig> {
    let Some(raw) = overrides else {
        return Ok(server_defaults());
    };
    let overrides: Value = serde_json::from_str(raw).context("ENGINE_CONFIG is not valid JSON")?;
    let Value::Object(overrides) = overrides else {
        anyhow::bail!("ENGINE_CONFIG must be a JSON object");
    };
    let mut merged = serde_json::to_value(server_defaults())?;
    if let Value::Object(base) = &mut merged {
        base.extend(overrides);
    }
    serde_json::from_value(merged).context("ENGINE_CONFIG has an invalid field")
}

#[cfg(test)]
mod tests {
    use spoolscale_firmware::nfc::fast_path::scan_window;
    use spoolscale_firmware::nfc::layout::PAGE_SIZE;
    use spoolscale_firmware::nfc::ndef;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn default_window_holds_a_uuid_spool_id() {
        let id = Uuid::new_v4().to_string();
        let json = serde_json::json!({ "sm_id": id, "brand": "Acme", "name": "PLA Galaxy Black" });
        let tlv = ndef::encode(&json.to_string()).unwrap();

        let pages = usize::from(engine_config(None).unwrap().fast_path_pages);
        assert_eq!(scan_window(&tlv[..pages * PAGE_SIZE]), Some(id.clone()));

        let firmware_default = usize::from(EngineConfig::default().fast_path_pages);
        assert_eq!(scan_window(&tlv[..firmware_default * PAGE_SIZE]), None);
    }

    #[test]
    fn overrides_keep_unnamed_server_defaults() {
        let engine = engine_config(Some(r#"{"scan_interval_ms": 250}"#)).unwrap();
        assert_eq!(engine.scan_interval_ms, 250);
        assert_eq!(engine.fast_path_pages, SERVER_FAST_PATH_PAGES);

        let engine = engine_config(Some(r#"{"fast_path_pages": 4}"#)).unwrap();
        assert_eq!(engine.fast_path_pages, 4);
    }

    #[test]
    fn rejects_non_object_overrides() {
        assert!(engine_config(Some("[1, 2]")).is_err());
        assert!(engine_config(Some("{not json")).is_err());
    }
}
