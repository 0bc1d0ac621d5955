//! Agent profiles: persona rendering and sibling awareness.
//!
//! Profile records come from a JSON or YAML document shaped as
//! `{"agents": [{"name": ..., "system_purpose": ..., <anything else>}]}`.
//! Everything besides `name` and `system_purpose` is opaque and rendered
//! as `Title Case: value` lines. Awareness is derived once, here, so agents
//! never hold references to each other.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Errors from loading profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profiles from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profiles JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid profiles YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate agent name: '{0}'")]
    DuplicateName(String),
}

/// One raw profile record as supplied by the profile file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    #[serde(default)]
    pub system_purpose: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ProfileRecord {
    pub fn new(name: &str, system_purpose: &str) -> Self {
        Self {
            name: name.to_string(),
            system_purpose: system_purpose.to_string(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    agents: Vec<ProfileRecord>,
}

/// Immutable description of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    name: String,
    persona_text: String,
    awareness_text: String,
}

impl AgentProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn awareness_text(&self) -> &str {
        &self.awareness_text
    }

    /// The persona turn: persona first, then awareness of siblings.
    pub fn system_text(&self) -> String {
        if self.awareness_text.is_empty() {
            self.persona_text.clone()
        } else {
            format!("{}\n\n{}", self.persona_text, self.awareness_text)
        }
    }
}

/// Load profile records from a `.json`, `.yaml` or `.yml` file.
pub fn load_records(path: &Path) -> Result<Vec<ProfileRecord>, ProfileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let doc: ProfileDocument = if is_yaml {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(doc.agents)
}

/// Two general-purpose agents used when no profile file is configured.
pub fn default_records() -> Vec<ProfileRecord> {
    vec![
        ProfileRecord::new(
            "Agent A",
            "You are Agent A, a careful analytical assistant. Answer accurately and show your reasoning.",
        ),
        ProfileRecord::new(
            "Agent B",
            "You are Agent B, a pragmatic assistant. Answer concisely and focus on practical consequences.",
        ),
    ]
}

/// Build immutable profiles, each aware of every other agent.
pub fn build_profiles(records: &[ProfileRecord]) -> Result<Vec<AgentProfile>, ProfileError> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.name.as_str()) {
            return Err(ProfileError::DuplicateName(record.name.clone()));
        }
    }

    let summaries: Vec<String> = records.iter().map(render_summary).collect();

    Ok(records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let others: Vec<&str> = summaries
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| s.as_str())
                .collect();
            let awareness_text = if others.is_empty() {
                String::new()
            } else {
                format!(
                    "You are aware of the following other agents:\n\n{}",
                    others.join("\n\n")
                )
            };
            AgentProfile {
                name: record.name.clone(),
                persona_text: render_persona(record),
                awareness_text,
            }
        })
        .collect())
}

/// `system_purpose` followed by every other attribute.
pub fn render_persona(record: &ProfileRecord) -> String {
    let mut text = record.system_purpose.clone();
    for (key, value) in &record.attributes {
        let title = title_case(key);
        match value {
            Value::Object(map) => {
                text.push_str(&format!("\n\n{title}:"));
                for (k, v) in map {
                    text.push_str(&format!("\n{}: {}", title_case(k), render_value(v)));
                }
            }
            other => text.push_str(&format!("\n\n{title}: {}", render_value(other))),
        }
    }
    text.trim_start().to_string()
}

/// What other agents are told about this one.
fn render_summary(record: &ProfileRecord) -> String {
    let mut text = format!(
        "Name: {}\nSystem Purpose: {}",
        record.name, record.system_purpose
    );
    for (key, value) in &record.attributes {
        let title = title_case(key);
        match value {
            Value::Object(map) => {
                text.push_str(&format!("\n{title}:"));
                for (k, v) in map {
                    text.push_str(&format!("\n{}: {}", title_case(k), render_value(v)));
                }
            }
            other => text.push_str(&format!("\n{title}: {}", render_value(other))),
        }
    }
    text
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// `communication_style` → `Communication Style`.
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn trio() -> Vec<ProfileRecord> {
        vec![
            ProfileRecord::new("Alpha", "You are Alpha.").with_attribute(
                "personality",
                json!({"tone": "formal", "risk_appetite": "low"}),
            ),
            ProfileRecord::new("Beta", "You are Beta.").with_attribute("focus_area", json!("economics")),
            ProfileRecord::new("Gamma", "You are Gamma."),
        ]
    }

    #[test]
    fn title_case_keys() {
        assert_eq!(title_case("communication_style"), "Communication Style");
        assert_eq!(title_case("TONE"), "Tone");
        assert_eq!(title_case("a__b"), "A B");
    }

    #[test]
    fn persona_renders_attributes() {
        let persona = render_persona(&trio()[0]);
        assert!(persona.starts_with("You are Alpha."));
        assert!(persona.contains("Personality:\nRisk Appetite: low\nTone: formal"));

        let persona = render_persona(&trio()[1]);
        assert!(persona.ends_with("Focus Area: economics"));
    }

    #[test]
    fn awareness_excludes_self() {
        let profiles = build_profiles(&trio()).unwrap();
        assert_eq!(profiles.len(), 3);

        let alpha = &profiles[0];
        assert!(!alpha.awareness_text().contains("Name: Alpha"));
        assert!(alpha.awareness_text().contains("Name: Beta"));
        assert!(alpha.awareness_text().contains("Name: Gamma"));
        assert!(alpha.awareness_text().contains("Focus Area: economics"));

        let gamma = &profiles[2];
        assert!(gamma.awareness_text().contains("Tone: formal"));
        assert!(!gamma.awareness_text().contains("Name: Gamma"));
    }

    #[test]
    fn system_text_puts_persona_first() {
        let profiles = build_profiles(&trio()).unwrap();
        let system = profiles[1].system_text();
        assert!(system.starts_with("You are Beta."));
        assert!(system.contains("You are aware of the following other agents:"));
    }

    #[test]
    fn lone_agent_has_empty_awareness() {
        let profiles = build_profiles(&[ProfileRecord::new("Solo", "You are Solo.")]).unwrap();
        assert_eq!(profiles[0].awareness_text(), "");
        assert_eq!(profiles[0].system_text(), "You are Solo.");
    }

    #[test]
    fn empty_set_is_not_an_error() {
        assert!(build_profiles(&[]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let records = vec![ProfileRecord::new("Dup", "x"), ProfileRecord::new("Dup", "y")];
        let err = build_profiles(&records).unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateName(ref n) if n == "Dup"));
    }

    #[test]
    fn load_json_profiles() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"agents": [
                {{"name": "Agent 47", "system_purpose": "Be precise.", "personality": {{"humor": "dry"}}}},
                {{"name": "Agent 74", "system_purpose": "Be creative.", "interaction_style": "playful"}}
            ]}}"#
        )
        .unwrap();

        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Agent 47");
        assert_eq!(records[1].attributes["interaction_style"], json!("playful"));
    }

    #[test]
    fn load_yaml_profiles() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "agents:\n  - name: Scout\n    system_purpose: Explore options.\n    traits:\n      curiosity: high"
        )
        .unwrap();

        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        let persona = render_persona(&records[0]);
        assert!(persona.contains("Traits:\nCuriosity: high"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_records(Path::new("/nonexistent/agents.json")).unwrap_err();
        assert!(matches!(err, ProfileError::Io { .. }));
    }

    #[test]
    fn defaults_have_two_agents() {
        let profiles = build_profiles(&default_records()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert!(profiles[0].awareness_text().contains("Agent B"));
    }
}
