//! Renders a [`JobRecord`] into the canonical text that gets embedded.
//!
//! The rendering is a fixed template so that the same record always yields
//! byte-identical content; re-indexing an unchanged corpus depends on it.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RecordError;
use crate::models::{Document, DocumentMetadata, JobRecord};

pub const PLACEHOLDER: &str = "N/A";
pub const MAX_RENDERED_SKILLS: usize = 5;

fn slug_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"))
}

/// Lowercases `title`, collapses every run outside `[a-z0-9]` into one `-`
/// and trims separators from both ends.
pub fn slugify(title: &str) -> String {
    slug_separator()
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// The record's explicit slug when present, otherwise one derived from the title.
pub fn resolve_slug(record: &JobRecord) -> Result<String, RecordError> {
    if let Some(slug) = record.slug.as_deref().map(str::trim) {
        if !slug.is_empty() {
            return Ok(slug.to_string());
        }
    }

    let derived = slugify(&record.title);
    if derived.is_empty() {
        return Err(RecordError::EmptySlug(record.title.clone()));
    }
    Ok(derived)
}

pub fn normalize(record: &JobRecord) -> Result<Document, RecordError> {
    let title = record.title.trim();
    if title.is_empty() {
        return Err(RecordError::MissingTitle);
    }

    if let Some(salary) = &record.salary {
        if salary.min < 0 || salary.max < 0 || salary.min > salary.max {
            return Err(RecordError::InvalidSalary {
                min: salary.min,
                max: salary.max,
            });
        }
    }

    let slug = resolve_slug(record)?;
    let sector = or_placeholder(record.sector.as_deref());

    let skills = join_or_placeholder(
        record
            .required_skills
            .iter()
            .take(MAX_RENDERED_SKILLS)
            .map(String::as_str),
    );
    let education = join_or_placeholder(record.required_education.iter().map(String::as_str));
    let salary = record
        .salary
        .as_ref()
        .map(|salary| format!("{}-{} {}", salary.min, salary.max, salary.currency.trim()))
        .unwrap_or_else(|| PLACEHOLDER.to_string());

    let content = [
        format!("Titre: {title}"),
        format!("Secteur: {sector}"),
        format!("Description: {}", or_placeholder(record.description.as_deref())),
        format!("Missions: {}", or_placeholder(record.missions.as_deref())),
        format!("Compétences: {skills}"),
        format!("Formation: {education}"),
        format!("Salaire: {salary}"),
    ]
    .join("\n");

    Ok(Document {
        content,
        metadata: DocumentMetadata {
            title: title.to_string(),
            sector: sector.to_string(),
            salary_min: record.salary.as_ref().map(|salary| salary.min),
            salary_max: record.salary.as_ref().map(|salary| salary.max),
            slug,
            url: record.url.clone().unwrap_or_default(),
        },
    })
}

fn or_placeholder(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => PLACEHOLDER,
    }
}

fn join_or_placeholder<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        joined
    }
}
