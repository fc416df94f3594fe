//! Request validation.
//!
//! Each rule is a named predicate over the request. Every rule that fails
//! contributes one message to the client error, in rule order.

use serde::Deserialize;

pub const FILE_PATHS_REQUIRED: &str = "FilePaths is required.";
pub const FILE_PATHS_BLANK_ENTRY: &str = "FilePaths must not contain empty entries.";

/// Body of `POST /api/zip`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipFileRequest {
    #[serde(default, alias = "FilePaths")]
    pub file_paths: Option<Vec<Option<String>>>,
}

/// A failed validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub rule: &'static str,
    pub message: &'static str,
}

struct Rule {
    name: &'static str,
    message: &'static str,
    holds: fn(&ZipFileRequest) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        name: "file_paths_required",
        message: FILE_PATHS_REQUIRED,
        holds: has_any_path,
    },
    Rule {
        name: "file_paths_no_blank_entries",
        message: FILE_PATHS_BLANK_ENTRY,
        holds: no_partial_blanks,
    },
];

fn is_blank(entry: &Option<String>) -> bool {
    entry.as_deref().is_none_or(|p| p.trim().is_empty())
}

fn has_any_path(request: &ZipFileRequest) -> bool {
    request
        .file_paths
        .as_ref()
        .is_some_and(|paths| !paths.iter().all(is_blank))
}

/// Blank entries mixed with real ones. An all-blank list is the
/// `file_paths_required` rule's concern.
fn no_partial_blanks(request: &ZipFileRequest) -> bool {
    match &request.file_paths {
        Some(paths) => paths.iter().all(is_blank) || !paths.iter().any(is_blank),
        None => true,
    }
}

/// Check every rule; on success return the paths in request order
pub fn validate(request: &ZipFileRequest) -> Result<Vec<String>, Vec<Violation>> {
    let violations: Vec<Violation> = RULES
        .iter()
        .filter(|rule| !(rule.holds)(request))
        .map(|rule| Violation {
            rule: rule.name,
            message: rule.message,
        })
        .collect();

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(request
        .file_paths
        .iter()
        .flatten()
        .flatten()
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(paths: Option<Vec<Option<&str>>>) -> ZipFileRequest {
        ZipFileRequest {
            file_paths: paths.map(|p| p.into_iter().map(|s| s.map(String::from)).collect()),
        }
    }

    fn messages(result: Result<Vec<String>, Vec<Violation>>) -> Vec<&'static str> {
        result.unwrap_err().into_iter().map(|v| v.message).collect()
    }

    #[test]
    fn test_valid_request_keeps_order() {
        let paths = validate(&request(Some(vec![Some("docs/b.txt"), Some("docs/a.txt")]))).unwrap();
        assert_eq!(paths, vec!["docs/b.txt", "docs/a.txt"]);
    }

    #[test]
    fn test_missing_paths() {
        assert_eq!(messages(validate(&request(None))), vec![FILE_PATHS_REQUIRED]);
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(messages(validate(&request(Some(vec![])))), vec![FILE_PATHS_REQUIRED]);
    }

    #[test]
    fn test_all_blank_entries() {
        let result = validate(&request(Some(vec![Some(""), None, Some("   ")])));
        assert_eq!(messages(result), vec![FILE_PATHS_REQUIRED]);
    }

    #[test]
    fn test_some_blank_entries() {
        let result = validate(&request(Some(vec![Some("docs/a.txt"), Some("")])));
        let violations = result.unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "file_paths_no_blank_entries");
        assert_eq!(violations[0].message, FILE_PATHS_BLANK_ENTRY);
    }

    #[test]
    fn test_deserialize_accepts_both_casings() {
        let camel: ZipFileRequest = serde_json::from_str(r#"{"filePaths": ["a"]}"#).unwrap();
        let pascal: ZipFileRequest = serde_json::from_str(r#"{"FilePaths": ["a"]}"#).unwrap();
        let missing: ZipFileRequest = serde_json::from_str("{}").unwrap();

        assert_eq!(camel.file_paths, Some(vec![Some("a".to_string())]));
        assert_eq!(pascal.file_paths, Some(vec![Some("a".to_string())]));
        assert_eq!(missing.file_paths, None);
    }
}
