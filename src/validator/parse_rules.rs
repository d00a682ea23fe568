use std::collections::HashSet;

use miette::NamedSource;
use miette::SourceSpan;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use toml::Value;

use crate::interpreter::FieldMatch;
use crate::interpreter::FieldNote;
use crate::interpreter::Interpretation;
use crate::interpreter::StatusRule;
use crate::interpreter::Verdict;
use crate::parser;
use crate::validator::ValidationError;

/// Helper function to find the span of a key in the source contents.
fn find_key_span(src: Option<&(String, String)>, key: &str) -> Option<SourceSpan> {
    let (_, content) = src?;
    // Assumes the key is unique and takes its first occurrence.
    let start = content.find(key)?;
    Some(SourceSpan::new(start.into(), key.len()))
}

/// Helper function to find the span of a value in the source contents.
fn find_value_span(src: Option<&(String, String)>, value: &str) -> Option<SourceSpan> {
    let (_, content) = src?;
    let start = content.find(value)?;
    Some(SourceSpan::new(start.into(), value.len()))
}

macro_rules! validation_err {
    ($src:expr, $field:expr, $message:expr, $span_fn:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $message,
            src: $src
                .as_ref()
                .map(|(name, content)| NamedSource::new(name.clone(), content.clone())),
            span: $span_fn,
        }
    };
}

/// Parses a single header key-value pair and adds it to the HeaderMap.
fn parse_single_header(
    header_map: &mut HeaderMap,
    key: &str,
    value: &Value,
    src: Option<&(String, String)>,
) -> Result<(), ValidationError> {
    let v_str = value.as_str().ok_or_else(|| {
        validation_err!(
            src,
            key,
            format!("Header value must be a string, got {value:?}"),
            find_key_span(src, key)
        )
    })?;

    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
        validation_err!(
            src,
            key,
            format!("Invalid header name `{key}`: {e}"),
            find_key_span(src, key)
        )
    })?;

    let h_value = HeaderValue::from_str(v_str).map_err(|e| {
        validation_err!(
            src,
            key,
            format!("Invalid header value for `{key}`: {e}"),
            find_value_span(src, v_str)
        )
    })?;

    header_map.insert(name, h_value);
    Ok(())
}

/// Parses a `headers = { ... }` table into a HeaderMap.
pub fn parse_header_map(
    value: &Value,
    src: Option<&(String, String)>,
) -> Result<HeaderMap, ValidationError> {
    let map = value.as_table().ok_or_else(|| {
        validation_err!(
            src,
            "headers",
            format!("Expected a table for headers, got {value:?}"),
            None
        )
    })?;

    let mut header_map = HeaderMap::new();

    for (k, v) in map {
        parse_single_header(&mut header_map, k, v, src)?;
    }

    Ok(header_map)
}

fn parse_verdict(verdict: &str) -> Option<Verdict> {
    match verdict.to_ascii_lowercase().as_str() {
        "pass" => Some(Verdict::Pass),
        "warn" => Some(Verdict::Warn),
        "fail" => Some(Verdict::Fail),
        _ => None,
    }
}

fn parse_status_rules(
    probe: &parser::Probe,
    src: Option<&(String, String)>,
) -> Result<Vec<StatusRule>, ValidationError> {
    let field = format!("{}/on_status", probe.name);
    let mut seen = HashSet::new();

    probe
        .on_status
        .iter()
        .map(|rule| {
            let code = u16::try_from(rule.code)
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| {
                    validation_err!(
                        src,
                        field,
                        format!("`{}` is not a valid HTTP status code", rule.code),
                        find_value_span(src, &rule.code.to_string())
                    )
                })?;

            if !seen.insert(code) {
                return Err(validation_err!(
                    src,
                    field,
                    format!("status {} is listed more than once", code.as_u16()),
                    find_value_span(src, &rule.code.to_string())
                ));
            }

            let verdict = parse_verdict(&rule.verdict).ok_or_else(|| {
                validation_err!(
                    src,
                    field,
                    format!(
                        "verdict must be one of pass, warn, fail; got `{}`",
                        rule.verdict
                    ),
                    find_value_span(src, &rule.verdict)
                )
            })?;

            Ok(StatusRule {
                code,
                verdict,
                note: rule.note.clone(),
            })
        })
        .collect()
}

fn parse_field_match(
    field: &str,
    pointer: &str,
    equals: &serde_json::Value,
    src: Option<&(String, String)>,
) -> Result<FieldMatch, ValidationError> {
    // An empty pointer addresses the whole document.
    if !pointer.is_empty() && !pointer.starts_with('/') {
        return Err(validation_err!(
            src,
            field,
            format!("JSON pointer `{pointer}` must be empty or start with /"),
            find_value_span(src, pointer)
        ));
    }

    Ok(FieldMatch {
        pointer: pointer.to_string(),
        equals: equals.clone(),
    })
}

/// Collects the status rules, mock flag and notes of a probe.
pub fn parse_interpretation(
    probe: &parser::Probe,
    src: Option<&(String, String)>,
) -> Result<Interpretation, ValidationError> {
    let on_status = parse_status_rules(probe, src)?;

    let mock_flag = probe
        .mock_flag
        .as_ref()
        .map(|flag| {
            parse_field_match(
                &format!("{}/mock_flag", probe.name),
                &flag.pointer,
                &flag.equals,
                src,
            )
        })
        .transpose()?;

    let notes = probe
        .notes
        .iter()
        .map(|n| {
            let field = parse_field_match(
                &format!("{}/notes", probe.name),
                &n.pointer,
                &n.equals,
                src,
            )?;

            Ok(FieldNote {
                field,
                note: n.note.clone(),
            })
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Ok(Interpretation {
        on_status,
        mock_flag,
        notes,
    })
}
