use std::collections::HashMap;
use std::io::Write;

use crate::event_type::EventType;

/// Splits the `SIMPLEPERF_META_INFO` payload, `key\0value\0key\0value\0...`,
/// into a map.
///
/// Keys written by simpleperf include `simpleperf_version`, `timestamp`,
/// `event_type_info` and `clockid`. A trailing key without a value is
/// ignored.
pub fn parse_meta_info_map(bytes: &[u8]) -> Result<HashMap<&str, &str>, std::str::Utf8Error> {
    let mut map = HashMap::new();
    let mut fields = bytes.split(|c| *c == 0);
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        map.insert(std::str::from_utf8(key)?, std::str::from_utf8(value)?);
    }
    Ok(map)
}

/// Write (key, value) pairs as `key\0value\0...`.
pub fn write_meta_info_map<'a, W: Write>(
    mut writer: W,
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(), std::io::Error> {
    for (key, value) in entries {
        writer.write_all(key.as_bytes())?;
        writer.write_all(b"\0")?;
        writer.write_all(value.as_bytes())?;
        writer.write_all(b"\0")?;
    }
    Ok(())
}

/// Parse the `event_type_info` value: one `name,type,config` line per attr,
/// in attr section order.
pub fn get_event_types(meta_info_map: &HashMap<&str, &str>) -> Option<Vec<EventType>> {
    let event_type_info = meta_info_map.get("event_type_info")?;
    let mut event_types = Vec::new();
    for line in event_type_info.split('\n') {
        let mut parts = line.split(',');
        let name = parts.next()?.to_string();
        let type_ = parts.next()?.parse().ok()?;
        let config = parts.next()?.parse().ok()?;
        event_types.push(EventType::new(name, type_, config));
    }
    Some(event_types)
}

/// The inverse of [`get_event_types`].
pub fn format_event_type_info<'a>(event_types: impl IntoIterator<Item = &'a EventType>) -> String {
    event_types
        .into_iter()
        .map(|t| format!("{},{},{}", t.name, t.type_, t.config))
        .collect::<Vec<_>>()
        .join("\n")
}
