use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

pub const SETUP_ATTENDANCE_KEY: &str = "setup.attendance";
pub const DEFAULT_PROFILE: &str = "period";
pub const PROFILE_NAMES: [&str; 2] = ["period", "daily"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    #[serde(alias = "halfDay", alias = "half-day")]
    HalfDay,
    Excused,
    Leave,
    Holiday,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::HalfDay => "half_day",
            Self::Excused => "excused",
            Self::Leave => "leave",
            Self::Holiday => "holiday",
        }
    }

    /// Accepts the wire spelling plus the `halfDay` / `half-day` forms the shell sends.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "half_day" | "halfday" => Some(Self::HalfDay),
            "excused" => Some(Self::Excused),
            "leave" => Some(Self::Leave),
            "holiday" => Some(Self::Holiday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Mark(AttendanceStatus),
    CursorDown,
    CursorUp,
}

impl KeyAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cursorDown" => Some(Self::CursorDown),
            "cursorUp" => Some(Self::CursorUp),
            other => AttendanceStatus::parse(other).map(Self::Mark),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mark(status) => status.as_str(),
            Self::CursorDown => "cursorDown",
            Self::CursorUp => "cursorUp",
        }
    }
}

impl Serialize for KeyAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyBinding {
    pub key: String,
    pub action: KeyAction,
}

/// Status set and key bindings of one marking screen variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusProfile {
    pub name: String,
    pub statuses: Vec<AttendanceStatus>,
    pub bindings: Vec<KeyBinding>,
}

/// Letter keys match case-insensitively; named keys (`ArrowDown`) must match exactly.
pub fn normalize_key(key: &str) -> Option<String> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphanumeric() => Some(c.to_lowercase().collect()),
        (Some(_), None) => None,
        _ if key == "ArrowDown" || key == "ArrowUp" => Some(key.to_string()),
        _ => None,
    }
}

fn binding(key: &str, action: KeyAction) -> KeyBinding {
    KeyBinding {
        key: key.to_string(),
        action,
    }
}

impl StatusProfile {
    pub fn builtin(name: &str) -> Option<Self> {
        use AttendanceStatus::{Absent, Excused, HalfDay, Holiday, Late, Leave, Present};
        let (statuses, marks) = match name {
            "period" => (
                vec![Present, Absent, Late, HalfDay, Excused],
                vec![("p", Present), ("a", Absent), ("l", Late), ("h", HalfDay), ("e", Excused)],
            ),
            "daily" => (
                vec![Present, Absent, Leave, HalfDay, Holiday],
                vec![("p", Present), ("a", Absent), ("l", Leave), ("h", HalfDay)],
            ),
            _ => return None,
        };
        let mut bindings: Vec<KeyBinding> = marks
            .into_iter()
            .map(|(k, s)| binding(k, KeyAction::Mark(s)))
            .collect();
        bindings.push(binding("ArrowDown", KeyAction::CursorDown));
        bindings.push(binding("ArrowUp", KeyAction::CursorUp));
        Some(Self {
            name: name.to_string(),
            statuses,
            bindings,
        })
    }

    pub fn allows(&self, status: AttendanceStatus) -> bool {
        self.statuses.contains(&status)
    }

    pub fn action_for(&self, key: &str) -> Option<KeyAction> {
        let key = normalize_key(key)?;
        self.bindings
            .iter()
            .find(|b| b.key == key)
            .map(|b| b.action)
    }

    /// Replaces the binding for `key`; `None` unbinds it.
    pub fn rebind(&mut self, key: &str, action: Option<KeyAction>) {
        self.bindings.retain(|b| b.key != key);
        if let Some(action) = action {
            self.bindings.push(binding(key, action));
        }
    }
}

pub fn default_attendance_setup() -> Value {
    json!({
        "defaultProfile": DEFAULT_PROFILE,
        "keyOverrides": {}
    })
}

/// Resolves a profile from the `setup.attendance` section. Overrides that no longer
/// validate against the profile are skipped so stale settings never block marking.
pub fn resolve_profile(setup: &Value, requested: Option<&str>) -> Result<StatusProfile, String> {
    let name = requested
        .or_else(|| setup.get("defaultProfile").and_then(|v| v.as_str()))
        .unwrap_or(DEFAULT_PROFILE);
    let mut profile =
        StatusProfile::builtin(name).ok_or_else(|| format!("unknown profile: {}", name))?;

    let overrides = setup
        .get("keyOverrides")
        .and_then(|v| v.get(name))
        .and_then(|v| v.as_object());
    if let Some(overrides) = overrides {
        for (key, action) in overrides {
            let Some(key) = normalize_key(key) else {
                continue;
            };
            match action.as_str() {
                Some("none") => profile.rebind(&key, None),
                Some(raw) => match KeyAction::parse(raw) {
                    Some(KeyAction::Mark(status)) if !profile.allows(status) => {}
                    Some(action) => profile.rebind(&key, Some(action)),
                    None => {}
                },
                None => {}
            }
        }
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_status_accepts_half_day_spellings() {
        for raw in ["\"half_day\"", "\"halfDay\"", "\"half-day\""] {
            let status: AttendanceStatus = serde_json::from_str(raw).expect("status");
            assert_eq!(status, AttendanceStatus::HalfDay);
        }
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::HalfDay).expect("json"),
            "\"half_day\""
        );
        assert!(serde_json::from_str::<AttendanceStatus>("\"tardy\"").is_err());
    }

    #[test]
    fn builtin_profiles_disagree_on_l() {
        let period = StatusProfile::builtin("period").expect("period");
        let daily = StatusProfile::builtin("daily").expect("daily");
        assert_eq!(
            period.action_for("l"),
            Some(KeyAction::Mark(AttendanceStatus::Late))
        );
        assert_eq!(
            daily.action_for("L"),
            Some(KeyAction::Mark(AttendanceStatus::Leave))
        );
        assert!(!daily.allows(AttendanceStatus::Late));
        assert_eq!(period.action_for("ArrowUp"), Some(KeyAction::CursorUp));
        assert_eq!(period.action_for("arrowup"), None);
        assert_eq!(period.action_for("z"), None);
    }

    #[test]
    fn overrides_apply_and_skip_disallowed_statuses() {
        let setup = json!({
            "defaultProfile": "daily",
            "keyOverrides": {
                "daily": { "o": "holiday", "h": "none", "x": "late" }
            }
        });
        let profile = resolve_profile(&setup, None).expect("resolve");
        assert_eq!(profile.name, "daily");
        assert_eq!(
            profile.action_for("o"),
            Some(KeyAction::Mark(AttendanceStatus::Holiday))
        );
        assert_eq!(profile.action_for("h"), None);
        assert_eq!(profile.action_for("x"), None);
    }

    #[test]
    fn requested_profile_wins_and_unknown_is_rejected() {
        let setup = default_attendance_setup();
        assert_eq!(
            resolve_profile(&setup, Some("daily")).expect("daily").name,
            "daily"
        );
        assert!(resolve_profile(&setup, Some("weekly")).is_err());
    }

    #[test]
    fn status_parse_accepts_shell_spellings() {
        assert_eq!(AttendanceStatus::parse("halfDay"), Some(AttendanceStatus::HalfDay));
        assert_eq!(AttendanceStatus::parse("half-day"), Some(AttendanceStatus::HalfDay));
        assert_eq!(AttendanceStatus::parse(" Present "), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse("tardy"), None);
    }
}
