//! Output path and file name templates.
//!
//! A template is plain text with `{author}`, `{title}` and `{time}`
//! placeholders. `{time}` takes an optional strftime format after a colon,
//! e.g. `{time:%Y%m%d}`. Literal braces are written `{{` and `}}`.

use std::{fmt::Write, path::PathBuf, sync::OnceLock};

use chrono::{
    format::{Item, StrftimeItems},
    NaiveDateTime,
};
use regex::{Captures, Regex};

use crate::util;

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("{0} does not take a format")]
    UnexpectedFormat(String),
    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),
    #[error("unmatched brace in {0:?}, write {{{{ or }}}} for a literal brace")]
    UnmatchedBrace(String),
}

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub author: &'a str,
    pub title: &'a str,
    pub time: NaiveDateTime,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{(\w+)(?::([^{}]*))?\}").expect("placeholder regex is valid")
    })
}

fn time_items(format: &str) -> Result<Vec<Item<'_>>, TemplateError> {
    let items = StrftimeItems::new(format).collect::<Vec<_>>();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(TemplateError::InvalidTimeFormat(format.to_string()));
    }
    Ok(items)
}

fn expand(caps: &Captures, vars: &TemplateVars) -> Result<String, TemplateError> {
    let whole = &caps[0];
    if whole == "{{" {
        return Ok("{".into());
    }
    if whole == "}}" {
        return Ok("}".into());
    }

    let name = &caps[1];
    let format = caps.get(2).map(|m| m.as_str());

    match name {
        "author" | "title" => {
            if format.is_some() {
                return Err(TemplateError::UnexpectedFormat(name.into()));
            }
            let value = if name == "author" { vars.author } else { vars.title };
            Ok(util::sanitize_filename(value))
        }
        "time" => {
            let items = time_items(format.unwrap_or(DEFAULT_TIME_FORMAT))?;
            // Offset items like %z fail here, a naive time has no zone.
            let mut out = String::new();
            write!(out, "{}", vars.time.format_with_items(items.into_iter()))
                .map_err(|_| TemplateError::InvalidTimeFormat(whole.into()))?;
            Ok(out)
        }
        other => Err(TemplateError::UnknownPlaceholder(other.into())),
    }
}

fn push_literal(out: &mut String, template: &str, text: &str) -> Result<(), TemplateError> {
    if text.contains(['{', '}']) {
        return Err(TemplateError::UnmatchedBrace(template.into()));
    }
    out.push_str(text);
    Ok(())
}

/// Checks placeholders and time formats by rendering against a fixed sample.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    let sample = TemplateVars {
        author: "",
        title: "",
        time: NaiveDateTime::default(),
    };
    render(template, &sample).map(|_| ())
}

pub fn render(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let m = caps.get(0).expect("group 0 always matches");
        push_literal(&mut out, template, &template[last..m.start()])?;
        out.push_str(&expand(&caps, vars)?);
        last = m.end();
    }
    push_literal(&mut out, template, &template[last..])?;

    Ok(out)
}

/// The fixed part of a path template, before any placeholder. Stale lock
/// files are searched for below this directory.
pub fn base_dir(path_template: &str) -> PathBuf {
    let prefix = path_template.split('{').next().unwrap_or_default();
    let prefix = prefix.trim_end_matches('/');

    if prefix.is_empty() {
        if path_template.starts_with('/') {
            return PathBuf::from("/");
        }
        return PathBuf::from(".");
    }

    util::expand_home(prefix)
}
