use serde::Deserialize;

/// The built-in plan, probing the analysis backend.
pub const DEFAULT_PLAN: &str = include_str!("../probes/backend.toml");
pub const DEFAULT_PLAN_NAME: &str = "probes/backend.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct ProbePlan {
    pub setup: Setup,
    #[serde(default)]
    pub global: Global,
    pub probes: Vec<Probe>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Setup {
    pub base_url: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Global {
    pub headers: Option<toml::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Probe {
    pub name: String,
    pub method: String,
    pub url: String,
    pub headers: Option<toml::Value>,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub on_status: Vec<StatusRule>,
    pub mock_flag: Option<FieldMatch>,
    #[serde(default)]
    pub notes: Vec<FieldNote>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StatusRule {
    pub code: i64,
    pub verdict: String,
    pub note: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FieldMatch {
    pub pointer: String,
    pub equals: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FieldNote {
    pub pointer: String,
    pub equals: serde_json::Value,
    pub note: String,
}
