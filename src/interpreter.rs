use core::fmt;
use std::fmt::Display;

use reqwest::StatusCode;
use serde_json::Value;

use crate::runner::CapturedResponse;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

/// Maps one status code to what it means for a particular probe.
#[derive(Debug, Clone)]
pub struct StatusRule {
    pub code: StatusCode,
    pub verdict: Verdict,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct FieldMatch {
    pub pointer: String,
    pub equals: Value,
}

#[derive(Debug, Clone)]
pub struct FieldNote {
    pub field: FieldMatch,
    pub note: String,
}

/// How a probe reads its response. Anything not covered here falls back to
/// "2xx with a JSON body is a success".
#[derive(Debug, Clone, Default)]
pub struct Interpretation {
    pub on_status: Vec<StatusRule>,
    pub mock_flag: Option<FieldMatch>,
    pub notes: Vec<FieldNote>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Provenance {
    Mock,
    Real,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        status: StatusCode,
        body: Value,
        provenance: Option<Provenance>,
        notes: Vec<String>,
    },
    Reclassified {
        status: StatusCode,
        verdict: Verdict,
        note: String,
        body: Option<Value>,
    },
    UnexpectedStatus {
        status: StatusCode,
        body: Option<Value>,
        body_text: String,
    },
    DecodeError {
        status: StatusCode,
        error: String,
        body_text: String,
    },
    TransportError {
        error: String,
    },
}

impl FieldMatch {
    pub fn matches(&self, body: &Value) -> bool {
        body.pointer(&self.pointer) == Some(&self.equals)
    }
}

impl Interpretation {
    fn rule_for(&self, status: StatusCode) -> Option<&StatusRule> {
        self.on_status.iter().find(|rule| rule.code == status)
    }
}

impl Outcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            Outcome::Success { .. } => Verdict::Pass,
            Outcome::Reclassified { verdict, .. } => *verdict,
            Outcome::UnexpectedStatus { .. } => Verdict::Warn,
            Outcome::DecodeError { .. } | Outcome::TransportError { .. } => Verdict::Fail,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Success { status, .. }
            | Outcome::Reclassified { status, .. }
            | Outcome::UnexpectedStatus { status, .. }
            | Outcome::DecodeError { status, .. } => Some(*status),
            Outcome::TransportError { .. } => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Warn => write!(f, "WARN"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Mock => write!(f, "MOCK DATA (fallback, not computed from input)"),
            Provenance::Real => write!(f, "REAL DATA"),
        }
    }
}

pub trait Interpret {
    fn interpret(&self, rules: &Interpretation) -> Outcome;
}

impl Interpret for CapturedResponse {
    fn interpret(&self, rules: &Interpretation) -> Outcome {
        let status = self.status;
        let decoded = serde_json::from_str::<Value>(&self.body_text);

        // Declared statuses win over the generic 2xx/non-2xx split.
        if let Some(rule) = rules.rule_for(status) {
            return Outcome::Reclassified {
                status,
                verdict: rule.verdict,
                note: rule.note.clone(),
                body: decoded.ok(),
            };
        }

        if !status.is_success() {
            return Outcome::UnexpectedStatus {
                status,
                body: decoded.ok(),
                body_text: self.body_text.clone(),
            };
        }

        match decoded {
            Ok(body) => {
                let provenance = rules.mock_flag.as_ref().map(|flag| {
                    if flag.matches(&body) {
                        Provenance::Mock
                    } else {
                        Provenance::Real
                    }
                });

                let notes = rules
                    .notes
                    .iter()
                    .filter(|n| n.field.matches(&body))
                    .map(|n| n.note.clone())
                    .collect();

                Outcome::Success {
                    status,
                    body,
                    provenance,
                    notes,
                }
            }
            Err(err) => Outcome::DecodeError {
                status,
                error: err.to_string(),
                body_text: self.body_text.clone(),
            },
        }
    }
}
