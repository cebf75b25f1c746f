//! Reader for the INI-style configuration dialect: sections are
//! `[kind "name"]` or bare `[global]`, values may be quoted, repeated keys
//! accumulate, and lines starting with `;` or `#` are comments.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Raw kind token, e.g. `job-exec` or `global`.
    pub kind: String,
    /// Quoted section name; absent for `[global]`-style headers.
    pub name: Option<String>,
    /// 1-based line number of the header, for error breadcrumbs.
    pub line: usize,
    /// Key/value pairs in file order. Repeats are preserved here and
    /// folded into lists by the decoder.
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Error, PartialEq)]
pub enum IniError {
    #[error("line {0}: malformed section header '{1}'")]
    BadHeader(usize, String),
    #[error("line {0}: key outside of any section")]
    OrphanKey(usize),
    #[error("line {0}: expected 'key = value', got '{1}'")]
    BadLine(usize, String),
}

pub fn parse(input: &str) -> Result<Document, IniError> {
    let mut sections: Vec<Section> = Vec::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let header = header
                .strip_suffix(']')
                .ok_or_else(|| IniError::BadHeader(line_no, line.to_string()))?
                .trim();
            let (kind, name) = split_header(header)
                .ok_or_else(|| IniError::BadHeader(line_no, line.to_string()))?;
            sections.push(Section {
                kind,
                name,
                line: line_no,
                values: Vec::new(),
            });
            continue;
        }

        let section = sections.last_mut().ok_or(IniError::OrphanKey(line_no))?;
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| IniError::BadLine(line_no, line.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(IniError::BadLine(line_no, line.to_string()));
        }
        section
            .values
            .push((key.to_string(), unquote(value.trim()).to_string()));
    }

    Ok(Document { sections })
}

/// Splits a header body into kind and optional quoted name:
/// `job-exec "backup"` → (`job-exec`, Some(`backup`)), `global` → (`global`, None).
fn split_header(body: &str) -> Option<(String, Option<String>)> {
    match body.split_once(char::is_whitespace) {
        None => {
            if body.is_empty() {
                None
            } else {
                Some((body.to_string(), None))
            }
        }
        Some((kind, rest)) => {
            let rest = rest.trim();
            let name = rest.strip_prefix('"')?.strip_suffix('"')?;
            if name.is_empty() {
                return None;
            }
            Some((kind.to_string(), Some(name.to_string())))
        }
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_values() {
        let doc = parse(
            r#"
; a comment
# another comment
[global]
save-folder = /var/log/jobs

[job-exec "backup"]
schedule = @daily
command = "tar czf /tmp/b.tgz /data"
"#,
        )
        .unwrap();

        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].kind, "global");
        assert_eq!(doc.sections[0].name, None);
        assert_eq!(
            doc.sections[0].values,
            vec![("save-folder".to_string(), "/var/log/jobs".to_string())]
        );
        assert_eq!(doc.sections[1].kind, "job-exec");
        assert_eq!(doc.sections[1].name.as_deref(), Some("backup"));
        assert_eq!(
            doc.sections[1].values[1],
            ("command".to_string(), "tar czf /tmp/b.tgz /data".to_string())
        );
    }

    #[test]
    fn repeated_keys_are_preserved_in_order() {
        let doc = parse("[job-run \"x\"]\nvolume = /a:/a\nvolume = /b:/b\n").unwrap();
        let values = &doc.sections[0].values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].1, "/a:/a");
        assert_eq!(values[1].1, "/b:/b");
    }

    #[test]
    fn key_outside_section_is_an_error() {
        assert_eq!(parse("a = b\n"), Err(IniError::OrphanKey(1)));
    }

    #[test]
    fn malformed_headers_are_errors() {
        assert!(matches!(parse("[job-exec backup]\n"), Err(IniError::BadHeader(1, _))));
        assert!(matches!(parse("[job-exec \"\"]\n"), Err(IniError::BadHeader(1, _))));
        assert!(matches!(parse("[unterminated\n"), Err(IniError::BadHeader(1, _))));
    }

    #[test]
    fn line_without_equals_is_an_error() {
        assert!(matches!(parse("[global]\nnot a pair\n"), Err(IniError::BadLine(2, _))));
    }
}
