//! Status sidecar files
//!
//! Each publisher drops `/tmp/gw-test/status_<component>.json` whenever its
//! state changes, for consumption by an external observer. This is advisory
//! telemetry; failures are logged and never touch the data path.

use std::fs;
use std::path::PathBuf;

use gauge_ring::ndm::timestamp_ns;
use gauge_ring::NormalizedRecord;
use serde_json::json;
use tracing::warn;

fn status_directory() -> PathBuf {
    PathBuf::from("/tmp/gw-test")
}

fn status_path_for(component: &str) -> PathBuf {
    status_directory().join(format!("status_{}.json", component))
}

/// Write the component status document.
///
/// `data` is the last accepted record, if any; `extra` carries the
/// component-specific block (config echo, counters).
pub fn write_component_status(
    component: &str,
    data: Option<&NormalizedRecord>,
    active: bool,
    extra: serde_json::Value,
) {
    if let Err(err) = fs::create_dir_all(status_directory()) {
        warn!(%err, "failed to create status directory");
        return;
    }

    let now_ns = timestamp_ns();
    let payload = data.map(|record| {
        json!({
            "sequence": record.sequence,
            "thickness_mm": record.thickness_mm,
            "status_flags": record.status,
            "timestamp_ns": record.timestamp_ns,
        })
    });

    let mut root = json!({
        "component": component,
        "active": active,
        "updated_ns": now_ns,
        "updated_ms": now_ns / 1_000_000,
        "data": payload,
    });
    if !extra.is_null() {
        root["extra"] = extra;
    }

    let text = match serde_json::to_string_pretty(&root) {
        Ok(text) => text,
        Err(err) => {
            warn!(%err, "failed to serialize status document");
            return;
        },
    };

    if let Err(err) = fs::write(status_path_for(component), text) {
        warn!(component, %err, "failed to write status file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_ring::status;

    #[test]
    fn test_status_document_shape() {
        let mut record = NormalizedRecord {
            timestamp_ns: 1_000,
            sequence: 9,
            thickness_mm: 1.5,
            status: status::ALL_OK,
            ..Default::default()
        };
        record.set_crc();

        write_component_status(
            "test_shape",
            Some(&record),
            true,
            json!({"active_protocol": "modbus"}),
        );

        let text = fs::read_to_string(status_path_for("test_shape")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["component"], "test_shape");
        assert_eq!(doc["active"], true);
        assert_eq!(doc["data"]["sequence"], 9);
        assert_eq!(doc["data"]["status_flags"], status::ALL_OK);
        assert_eq!(doc["extra"]["active_protocol"], "modbus");
        assert!(doc["updated_ns"].is_u64());

        let _ = fs::remove_file(status_path_for("test_shape"));
    }

    #[test]
    fn test_status_without_data_is_null() {
        write_component_status("test_nodata", None, false, serde_json::Value::Null);

        let text = fs::read_to_string(status_path_for("test_nodata")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(doc["data"].is_null());
        assert_eq!(doc["active"], false);

        let _ = fs::remove_file(status_path_for("test_nodata"));
    }
}
