use std::str::FromStr;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::Method;
use reqwest::Url;
use reqwest::header::HeaderMap;
use thiserror::Error;

mod parse_rules;

use crate::interpreter::Interpretation;
use crate::parser;
use crate::parser::Global;
use crate::parser::ProbePlan;

// Error messages for parsing URLs
const BASE_URL_ENDS_WITH: &str =
    "The base URL from setup can't end with a /, and each probe URL must start with one";
const PATH_URL_MISSING_SLASH: &str =
    "The URL field in a probe is required to begin with a leading /.";
const NO_PROBES: &str = "A probe plan needs at least one [[probes]] entry.";

pub struct Validator {
    plan: ProbePlan,
    toml_src: String,
    file_name: String,
    base_url_override: Option<String>,
}

/// A plan that is ready to run: every URL resolved, every header parsed.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub base_url: String,
    pub probes: Vec<ValidatedProbe>,
}

#[derive(Debug, Clone)]
pub struct ValidatedProbe {
    pub name: String,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    pub interpretation: Interpretation,
}

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $snippet:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: find_span($snippet, &$self.toml_src),
        }
    };
}

impl Validator {
    pub fn new(plan: &ProbePlan, toml_src: &str, file_name: &str) -> Self {
        Self {
            plan: plan.clone(),
            toml_src: toml_src.into(),
            file_name: file_name.into(),
            base_url_override: None,
        }
    }

    /// Replaces `[setup] base_url` for this run.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url_override = base_url;
        self
    }

    pub fn validate(&self) -> miette::Result<ValidatedPlan, ValidationError> {
        if self.plan.probes.is_empty() {
            return Err(validation_err!("probes", NO_PROBES, self, "probes"));
        }

        let base_url = self
            .base_url_override
            .clone()
            .unwrap_or_else(|| self.plan.setup.base_url.clone());

        let probes = self
            .plan
            .probes
            .iter()
            .map(|probe| self.create_probe(probe, &base_url, &self.plan.global))
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(ValidatedPlan { base_url, probes })
    }

    fn src(&self) -> (String, String) {
        (self.file_name.clone(), self.toml_src.clone())
    }

    fn create_probe(
        &self,
        probe: &parser::Probe,
        base_url: &str,
        global: &Global,
    ) -> Result<ValidatedProbe, ValidationError> {
        let method = parse_method(&probe.method.to_uppercase()).map_err(|e| {
            validation_err!(format!("{} - method", probe.name), e, self, &probe.method)
        })?;

        let url = parse_url(base_url, &probe.url).map_err(|e| match e {
            ParseUrlError::SetupUrlEndsWithSlash => {
                validation_err!("setup.base_url", BASE_URL_ENDS_WITH, self, base_url)
            }

            ParseUrlError::PathUrlMissingSlash => validation_err!(
                format!("{}/url", probe.name),
                PATH_URL_MISSING_SLASH,
                self,
                &probe.url
            ),
            ParseUrlError::ParseIntoUrlFailed(parse_error) => validation_err!(
                format!("{}/url", base_url),
                parse_error.to_string(),
                self,
                base_url
            ),
        })?;

        let src = self.src();

        // Global headers first, then the probe's own. A header set in both
        // places takes the probe's value.
        let mut headers = if let Some(global_value) = &global.headers {
            parse_rules::parse_header_map(global_value, Some(&src))?
        } else {
            HeaderMap::new()
        };

        if let Some(header_value) = &probe.headers {
            let probe_headers = parse_rules::parse_header_map(header_value, Some(&src))?;

            for (key, value) in probe_headers {
                if let Some(key) = key {
                    headers.insert(key, value);
                }
            }
        }

        let interpretation = parse_rules::parse_interpretation(probe, Some(&src))?;

        Ok(ValidatedProbe {
            name: probe.name.clone(),
            method,
            url,
            headers,
            body: probe.body.clone(),
            interpretation,
        })
    }
}

#[derive(Debug, Error)]
enum ParseUrlError {
    #[error("base URL ends with a slash")]
    SetupUrlEndsWithSlash,
    #[error("probe URL does not start with a slash")]
    PathUrlMissingSlash,
    #[error("Failed to parse URL: {0}")]
    ParseIntoUrlFailed(#[from] url::ParseError),
}

fn parse_url(base_url: &str, path_url: &str) -> Result<Url, ParseUrlError> {
    if base_url.ends_with('/') {
        return Err(ParseUrlError::SetupUrlEndsWithSlash);
    }

    if !path_url.starts_with('/') {
        return Err(ParseUrlError::PathUrlMissingSlash);
    }

    let url = Url::parse(&format!("{base_url}{path_url}"))?;

    Ok(url)
}

fn parse_method(method: &str) -> Result<Method, String> {
    let method = Method::from_str(method).map_err(|e| e.to_string())?;

    if !matches!(
        method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::DELETE
            | Method::PATCH
            | Method::HEAD
            | Method::OPTIONS
    ) {
        return Err(format!("Invalid HTTP method: {}", method));
    }

    Ok(method)
}

fn find_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    let pattern = format!("\"{}\"", needle);
    toml_src
        .find(&pattern)
        .map(|start| SourceSpan::new(start.into(), pattern.len()))
}
