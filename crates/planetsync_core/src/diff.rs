use similar::TextDiff;

/// Unified diff used to preview a patch before it is saved.
pub fn render_diff(document_id: &str, before: &str, after: &str) -> String {
    if before == after {
        return format!("{document_id}: no changes\n");
    }
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{document_id}"), &format!("b/{document_id}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_shows_changed_lines_only() {
        let before = "{{InfoBoxSystem\n| coord = 1 : 2\n}}\n";
        let after = "{{InfoBoxSystem\n| coord = 1.5 : 2\n}}\n";
        let diff = render_diff("Sol", before, after);
        assert!(diff.starts_with("--- a/Sol\n+++ b/Sol\n"));
        assert!(diff.contains("-| coord = 1 : 2\n"));
        assert!(diff.contains("+| coord = 1.5 : 2\n"));
    }

    #[test]
    fn identical_documents_report_no_changes() {
        assert_eq!(render_diff("Sol", "same", "same"), "Sol: no changes\n");
    }
}
