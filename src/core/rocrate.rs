//! Read-only view over a parsed RO-Crate manifest.

use crate::domain::model::{Manifest, TextForm};
use crate::utils::error::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_LISTED_FILES: usize = 10;
const CRATE_CONTEXT: &str = "https://w3id.org/ro/crate/1.1/context";
const CRATE_PROFILE: &str = "https://w3id.org/ro/crate/1.1";
const METADATA_DESCRIPTOR: &str = "ro-crate-metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_entities: usize,
    pub files_count: usize,
    pub people_count: usize,
    pub organizations_count: usize,
    pub has_root_dataset: bool,
    pub entity_types: BTreeMap<String, usize>,
    pub name: Option<String>,
    pub description_length: usize,
    pub keywords_count: usize,
    pub has_license: bool,
    pub has_date_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrateComparison {
    pub left: SummaryStats,
    pub right: SummaryStats,
    pub files_diff: i64,
    pub entities_diff: i64,
    pub people_diff: i64,
}

pub struct RoCrate<'a> {
    document: &'a Value,
    graph: &'a [Value],
}

impl<'a> RoCrate<'a> {
    pub fn new(document: &'a Value) -> Self {
        let graph = document
            .get("@graph")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Self { document, graph }
    }

    pub fn graph(&self) -> &'a [Value] {
        self.graph
    }

    pub fn root_dataset(&self) -> Option<&'a Value> {
        self.graph
            .iter()
            .find(|item| id_of(item) == Some("./") && has_type(item, "Dataset"))
    }

    pub fn files(&self) -> Vec<&'a Value> {
        self.entities_of_type("File")
    }

    pub fn people(&self) -> Vec<&'a Value> {
        self.entities_of_type("Person")
    }

    pub fn organizations(&self) -> Vec<&'a Value> {
        self.entities_of_type("Organization")
    }

    fn entities_of_type(&self, type_name: &str) -> Vec<&'a Value> {
        self.graph
            .iter()
            .filter(|item| has_type(item, type_name))
            .collect()
    }

    pub fn count_entities_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in self.graph {
            for type_name in types_of(item) {
                *counts.entry(type_name.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn summary_stats(&self) -> SummaryStats {
        let root = self.root_dataset();

        SummaryStats {
            total_entities: self.graph.len(),
            files_count: self.files().len(),
            people_count: self.people().len(),
            organizations_count: self.organizations().len(),
            has_root_dataset: root.is_some(),
            entity_types: self.count_entities_by_type(),
            name: root.and_then(|r| str_field(r, "name")).map(str::to_string),
            description_length: root
                .and_then(|r| str_field(r, "description"))
                .map(|d| d.chars().count())
                .unwrap_or(0),
            keywords_count: root.map(|r| keywords(r).len()).unwrap_or(0),
            has_license: root.map(|r| is_present(r.get("license"))).unwrap_or(false),
            has_date_published: root
                .map(|r| is_present(r.get("datePublished")))
                .unwrap_or(false),
        }
    }

    /// Plain-text digest of the root dataset, suitable for a prompt.
    pub fn text_for_llm(&self) -> String {
        let Some(root) = self.root_dataset() else {
            return "No root dataset found in this RO-Crate.".to_string();
        };

        let mut parts = Vec::new();

        if let Some(name) = str_field(root, "name") {
            parts.push(format!("Dataset Name: {}", name));
        }
        if let Some(description) = str_field(root, "description") {
            parts.push(format!("Description: {}", description));
        }
        let keywords = keywords(root);
        if !keywords.is_empty() {
            parts.push(format!("Keywords: {}", keywords.join(", ")));
        }
        if let Some(published) = root.get("datePublished").and_then(display_scalar) {
            parts.push(format!("Published: {}", published));
        }
        if let Some(license) = root.get("license").and_then(|l| l.get("@id")).and_then(Value::as_str) {
            parts.push(format!("License: {}", license));
        }

        let creators = one_or_many(root.get("creator"));
        if !creators.is_empty() {
            let names: Vec<&str> = creators
                .iter()
                .map(|c| str_field(c, "name").unwrap_or("Unknown"))
                .collect();
            parts.push(format!("Creators: {}", names.join(", ")));
        }

        let files = self.files();
        if !files.is_empty() {
            parts.push(format!("Number of files: {}", files.len()));
            parts.push("Files included:".to_string());
            for file in files.iter().take(MAX_LISTED_FILES) {
                let name = str_field(file, "name")
                    .or_else(|| id_of(file))
                    .unwrap_or("Unknown");
                match str_field(file, "description") {
                    Some(description) => parts.push(format!("- {}: {}", name, description)),
                    None => parts.push(format!("- {}", name)),
                }
            }
            if files.len() > MAX_LISTED_FILES {
                parts.push(format!(
                    "... and {} more files",
                    files.len() - MAX_LISTED_FILES
                ));
            }
        }

        parts.join("\n")
    }

    /// Advisory structural lint; an empty list means nothing stood out.
    pub fn validate_structure(&self) -> Vec<String> {
        let mut issues = Vec::new();

        match self.document.get("@context") {
            None => issues.push("Missing @context".to_string()),
            Some(ctx) if ctx.as_str() != Some(CRATE_CONTEXT) => {
                issues.push("Unexpected @context value".to_string())
            }
            Some(_) => {}
        }

        match self.document.get("@graph") {
            None => {
                issues.push("Missing @graph".to_string());
                return issues;
            }
            Some(graph) if !graph.is_array() => {
                issues.push("@graph should be a list".to_string());
                return issues;
            }
            Some(_) => {}
        }

        match self
            .graph
            .iter()
            .find(|item| id_of(item) == Some(METADATA_DESCRIPTOR))
        {
            None => issues.push(format!("Missing {} descriptor", METADATA_DESCRIPTOR)),
            Some(descriptor) => {
                if descriptor.get("@type").and_then(Value::as_str) != Some("CreativeWork") {
                    issues.push("Metadata descriptor should have @type CreativeWork".to_string());
                }
                let conforms_to = descriptor
                    .get("conformsTo")
                    .and_then(|c| c.get("@id"))
                    .and_then(Value::as_str);
                if conforms_to != Some(CRATE_PROFILE) {
                    issues.push("Metadata descriptor should conform to RO-Crate 1.1".to_string());
                }
            }
        }

        if self.root_dataset().is_none() {
            issues.push("Missing root dataset (./ with @type Dataset)".to_string());
        }

        issues
    }
}

pub fn compare(left: &Value, right: &Value) -> CrateComparison {
    let left = RoCrate::new(left).summary_stats();
    let right = RoCrate::new(right).summary_stats();

    CrateComparison {
        files_diff: right.files_count as i64 - left.files_count as i64,
        entities_diff: right.total_entities as i64 - left.total_entities as i64,
        people_diff: right.people_count as i64 - left.people_count as i64,
        left,
        right,
    }
}

impl Manifest {
    pub fn parse(path: impl Into<String>, content: &str) -> serde_json::Result<Self> {
        Ok(Self {
            path: path.into(),
            document: serde_json::from_str(content)?,
        })
    }

    pub fn crate_view(&self) -> RoCrate<'_> {
        RoCrate::new(&self.document)
    }

    pub fn text(&self, form: TextForm) -> Result<String> {
        let text = match form {
            TextForm::Compact => serde_json::to_string(&self.document)?,
            TextForm::Pretty => serde_json::to_string_pretty(&self.document)?,
            TextForm::Summary => self.crate_view().text_for_llm(),
        };
        Ok(text)
    }
}

fn id_of(item: &Value) -> Option<&str> {
    item.get("@id").and_then(Value::as_str)
}

fn types_of(item: &Value) -> Vec<&str> {
    match item.get("@type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn has_type(item: &Value, type_name: &str) -> bool {
    types_of(item).contains(&type_name)
}

fn str_field<'v>(item: &'v Value, key: &str) -> Option<&'v str> {
    item.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn display_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

/// Keywords may be a list or a single comma-separated string.
fn keywords(item: &Value) -> Vec<&str> {
    match item.get("keywords") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}
