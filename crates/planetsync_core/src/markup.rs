//! Line-oriented field access for system infobox markup.
//!
//! Every pattern is anchored at the start of a line and compiled once. Extraction
//! and patching share the same pattern so a patch always lands on the line that
//! extraction read.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{PlanetError, Result};
use crate::geometry::Point;
use crate::records::parse_number;

pub const SYSTEM_MARKER: &str = "{{InfoBoxSystem";
pub const DISAMBIGUATION_MARKER: &str = "disambiguation";

fn coord_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*\|[ \t]*coord[ \t]*=[ \t]*)([\d.,-]+)([ \t]*:[ \t]*)([\d.,-]+)")
            .expect("coord pattern")
    })
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*\|[ \t]*image[ \t]*=[ \t]*)([^\r\n]*)").expect("image pattern")
    })
}

fn caption_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*\|[ \t]*caption[ \t]*=[ \t]*)([^\r\n]*)")
            .expect("caption pattern")
    })
}

fn redirect_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)#REDIRECT[ \t]*\[\[([^\]\r\n]+)\]\]").expect("redirect pattern")
    })
}

/// Redirect target as a document id (spaces become underscores).
pub fn redirect_target(document: &str) -> Option<String> {
    let captures = redirect_pattern().captures(document)?;
    let target = captures[1].trim();
    if target.is_empty() {
        return None;
    }
    Some(target.replace(' ', "_"))
}

pub fn has_system_marker(document: &str) -> bool {
    document.contains(SYSTEM_MARKER)
}

pub fn is_disambiguation(document: &str) -> bool {
    document.to_lowercase().contains(DISAMBIGUATION_MARKER)
}

/// First `| coord = X : Y` line. `None` when absent or when either number is unreadable.
pub fn extract_coordinates(document: &str) -> Option<Point> {
    let captures = coord_pattern().captures(document)?;
    let x = parse_number(&captures[2]);
    let y = parse_number(&captures[4]);
    if x.is_nan() || y.is_nan() {
        return None;
    }
    Some(Point::new(x, y))
}

pub fn extract_image(document: &str) -> Option<&str> {
    image_pattern()
        .captures(document)
        .and_then(|captures| captures.get(2))
        .map(|value| value.as_str().trim_end())
}

pub fn extract_caption(document: &str) -> Option<&str> {
    caption_pattern()
        .captures(document)
        .and_then(|captures| captures.get(2))
        .map(|value| value.as_str().trim_end())
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldPatch {
    Coordinates(Point),
    Image(String),
    Caption(String),
}

impl FieldPatch {
    fn field_name(&self) -> &'static str {
        match self {
            Self::Coordinates(_) => "coord",
            Self::Image(_) => "image",
            Self::Caption(_) => "caption",
        }
    }
}

/// Replace the value of the first matching key line. Returns `None` when the
/// document has no such line.
pub fn apply_patch(document: &str, patch: &FieldPatch) -> Option<String> {
    match patch {
        FieldPatch::Coordinates(point) => {
            let pattern = coord_pattern();
            pattern.find(document)?;
            let replaced = pattern.replacen(document, 1, |captures: &Captures| {
                format!("{}{}{}{}", &captures[1], point.x, &captures[3], point.y)
            });
            Some(replaced.into_owned())
        }
        FieldPatch::Image(value) => replace_value(image_pattern(), document, value),
        FieldPatch::Caption(value) => replace_value(caption_pattern(), document, value),
    }
}

pub fn patch_coordinates(document: &str, point: Point) -> Option<String> {
    apply_patch(document, &FieldPatch::Coordinates(point))
}

pub fn patch_image(document: &str, image_name: &str) -> Option<String> {
    apply_patch(document, &FieldPatch::Image(image_name.to_string()))
}

pub fn patch_caption(document: &str, caption: &str) -> Option<String> {
    apply_patch(document, &FieldPatch::Caption(caption.to_string()))
}

/// Both fields must exist; nothing is changed unless both can be replaced.
pub fn patch_image_and_caption(
    document_id: &str,
    document: &str,
    image: &str,
    caption: &str,
) -> Result<String> {
    let mut updated = document.to_string();
    for patch in [
        FieldPatch::Image(image.to_string()),
        FieldPatch::Caption(caption.to_string()),
    ] {
        updated = apply_patch(&updated, &patch).ok_or_else(|| PlanetError::MissingField {
            document: document_id.to_string(),
            field: patch.field_name(),
        })?;
    }
    Ok(updated)
}

fn replace_value(pattern: &Regex, document: &str, value: &str) -> Option<String> {
    pattern.find(document)?;
    let replaced = pattern.replacen(document, 1, |captures: &Captures| {
        let prefix = &captures[1];
        if prefix.ends_with([' ', '\t']) {
            format!("{prefix}{value}")
        } else {
            format!("{prefix} {value}")
        }
    });
    Some(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = concat!(
        "{{InfoBoxSystem\n",
        "| name                = Sol\n",
        "| image               = Sol_3067.svg\n",
        "| caption             = Old caption\n",
        "| coord               = 0.004 : -1,250.5{{e}}\n",
        "}}\n",
        "Some prose mentioning | coord = 9 : 9 inline.\n",
        " | coord = 7 : 7\n",
    );

    #[test]
    fn extracts_first_coordinate_line() {
        let point = extract_coordinates(ARTICLE).expect("coord");
        assert_eq!(point, Point::new(0.004, -1250.5));
    }

    #[test]
    fn coordinate_line_may_be_indented() {
        let point = extract_coordinates("  |coord=-3.5:4").expect("coord");
        assert_eq!(point, Point::new(-3.5, 4.0));
    }

    #[test]
    fn unreadable_coordinates_are_absent() {
        assert_eq!(extract_coordinates("| coord = - : ."), None);
        assert_eq!(extract_coordinates("| coordinates = 1 : 2"), None);
        assert_eq!(extract_coordinates("no infobox here"), None);
    }

    #[test]
    fn extracts_image_and_caption() {
        assert_eq!(extract_image(ARTICLE), Some("Sol_3067.svg"));
        assert_eq!(extract_caption(ARTICLE), Some("Old caption"));
        assert_eq!(extract_image("| imagesize = 200"), None);
    }

    #[test]
    fn markers() {
        assert!(has_system_marker(ARTICLE));
        assert!(!has_system_marker("{{InfoBoxPlanet"));
        assert!(is_disambiguation("This is a DisAmbiguation page"));
        assert!(!is_disambiguation(ARTICLE));
    }

    #[test]
    fn redirect_target_uses_underscores() {
        assert_eq!(
            redirect_target("#REDIRECT [[New Avalon (system)]]").as_deref(),
            Some("New_Avalon_(system)")
        );
        assert_eq!(
            redirect_target("#redirect[[Sol]]\n[[Category:Redirects]]").as_deref(),
            Some("Sol")
        );
        assert_eq!(redirect_target(ARTICLE), None);
    }

    #[test]
    fn coordinate_patch_touches_only_first_occurrence() {
        let patched = patch_coordinates(ARTICLE, Point::new(0.0, -1250.25)).expect("patched");
        assert!(patched.contains("| coord               = 0 : -1250.25{{e}}\n"));
        assert!(patched.contains("| coord = 9 : 9 inline."));
        assert!(patched.contains(" | coord = 7 : 7\n"));
        assert_eq!(patched.len() + 4, ARTICLE.len());
    }

    #[test]
    fn coordinate_patch_is_idempotent() {
        let point = Point::new(-12.34, 56.0);
        let once = patch_coordinates(ARTICLE, point).expect("once");
        let twice = patch_coordinates(&once, point).expect("twice");
        assert_eq!(once, twice);
        assert_eq!(extract_coordinates(&once), Some(point));
    }

    #[test]
    fn coordinate_patch_requires_a_coord_line() {
        assert_eq!(patch_coordinates("{{InfoBoxSystem\n}}", Point::new(1.0, 1.0)), None);
    }

    #[test]
    fn image_and_caption_patch_preserves_other_lines() {
        let patched = patch_image_and_caption(
            "Sol",
            ARTICLE,
            "Sol_3151.svg",
            "Sol [[#Nearby_Systems|nearby systems]]",
        )
        .expect("patched");
        assert!(patched.contains("| image               = Sol_3151.svg\n"));
        assert!(patched.contains("| caption             = Sol [[#Nearby_Systems|nearby systems]]\n"));
        assert!(patched.contains("| name                = Sol\n"));
        assert!(patched.ends_with(" | coord = 7 : 7\n"));

        let again = patch_image_and_caption(
            "Sol",
            &patched,
            "Sol_3151.svg",
            "Sol [[#Nearby_Systems|nearby systems]]",
        )
        .expect("again");
        assert_eq!(patched, again);
    }

    #[test]
    fn single_field_patches() {
        let patched = patch_image(ARTICLE, "Sol_3151.svg").expect("image line");
        assert_eq!(extract_image(&patched), Some("Sol_3151.svg"));
        assert_eq!(extract_caption(&patched), Some("Old caption"));

        let patched = patch_caption(ARTICLE, "Sol [[#Nearby_Systems|nearby systems]]")
            .expect("caption line");
        assert_eq!(
            extract_caption(&patched),
            Some("Sol [[#Nearby_Systems|nearby systems]]")
        );
        assert_eq!(patch_image("no infobox here", "x.svg"), None);
    }

    #[test]
    fn replacement_values_are_literal() {
        let patched = apply_patch("| caption =\n", &FieldPatch::Caption("costs $1 or ${x}".to_string()))
            .expect("patched");
        assert_eq!(patched, "| caption = costs $1 or ${x}\n");
    }

    #[test]
    fn missing_caption_fails_without_partial_patch() {
        let document = "{{InfoBoxSystem\n| image = A.svg\n}}";
        let error = patch_image_and_caption("Sol", document, "B.svg", "text").expect_err("fails");
        assert!(matches!(error, PlanetError::MissingField { field: "caption", .. }));
    }
}
