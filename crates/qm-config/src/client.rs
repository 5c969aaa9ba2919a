use std::collections::HashMap;
use std::path::Path;

/// Parses a Java `.properties`-style `key=value` file as used by TeamCity
/// build agents, and extracts `teamcity.build.id` if present.
///
/// When `TEAMCITY_BUILD_PROPERTIES_FILE` is set in the client's environment,
/// this is used to derive a default `used_for` of `Teamcity_ID=<id>` without
/// requiring `--reservation_message`.
pub fn read_teamcity_build_id(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let props = parse_properties(&text);
    props.get("teamcity.build.id").cloned()
}

fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Reads `TEAMCITY_BUILD_PROPERTIES_FILE` from the environment and, if set
/// and parseable, returns the `used_for` string it implies.
pub fn used_for_from_environment() -> Option<String> {
    let path = std::env::var("TEAMCITY_BUILD_PROPERTIES_FILE").ok()?;
    let build_id = read_teamcity_build_id(Path::new(&path))?;
    Some(format!("Teamcity_ID={build_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_id_from_properties_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut f,
            b"# comment\nteamcity.build.id=42\nother.key=value\n",
        )
        .unwrap();
        assert_eq!(
            read_teamcity_build_id(f.path()),
            Some("42".to_string())
        );
    }

    #[test]
    fn missing_file_returns_none() {
        assert_eq!(
            read_teamcity_build_id(Path::new("/nonexistent/file.properties")),
            None
        );
    }
}
