//! Paragraph addressing for paragraph-scoped revisions.
//!
//! Paragraphs are separated by one or more blank lines. Indices are 0-based
//! over non-empty paragraphs.

use crate::errors::AppError;

pub fn split_paragraphs(content: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let blank = line.trim().is_empty();
        if blank {
            if let Some(s) = start.take() {
                paragraphs.push(content[s..end].trim());
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        paragraphs.push(content[s..end].trim());
    }
    paragraphs
}

pub fn paragraph_at(content: &str, index: usize) -> Result<&str, AppError> {
    let paragraphs = split_paragraphs(content);
    paragraphs.get(index).copied().ok_or_else(|| {
        AppError::Validation(format!(
            "paragraph index {index} out of range (document has {} paragraphs)",
            paragraphs.len()
        ))
    })
}

/// Replaces paragraph `index` and re-joins with a single blank line.
pub fn splice_paragraph(content: &str, index: usize, replacement: &str) -> Result<String, AppError> {
    let mut paragraphs = split_paragraphs(content);
    if index >= paragraphs.len() {
        return Err(AppError::Validation(format!(
            "paragraph index {index} out of range (document has {} paragraphs)",
            paragraphs.len()
        )));
    }
    let replacement = replacement.trim();
    paragraphs[index] = replacement;
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_blank_lines() {
        let content = "First para\nstill first.\n\n\nSecond.\r\n   \r\nThird\n";
        assert_eq!(
            split_paragraphs(content),
            vec!["First para\nstill first.", "Second.", "Third"]
        );
    }

    #[test]
    fn test_split_empty_content() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("\n\n  \n").is_empty());
    }

    #[test]
    fn test_splice_replaces_only_target() {
        let content = "One.\n\nTwo.\n\nThree.";
        let spliced = splice_paragraph(content, 1, "  Deux.\n").unwrap();
        assert_eq!(spliced, "One.\n\nDeux.\n\nThree.");
    }

    #[test]
    fn test_out_of_range_is_validation() {
        let err = splice_paragraph("Only one.", 3, "x").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(paragraph_at("Only one.", 1).is_err());
        assert_eq!(paragraph_at("Only one.", 0).unwrap(), "Only one.");
    }
}
