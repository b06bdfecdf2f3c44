//! Built-in vector icons and media-reference helpers.
//!
//! Scene sources refer to icons as `icon:<name>`. The module pass keeps the
//! reference as-is (the preview environment resolves it), while the sandbox pass
//! inlines the markup as a `data:` URI because nothing can be fetched relative to
//! a script string.

/// Built-in icon markup, keyed by name. Kept tiny and stable; these are the only
/// vector assets the sandbox pass can inline.
pub const ICONS: &[(&str, &str)] = &[
    (
        "play",
        "<svg viewBox=\"0 0 24 24\"><path d=\"M8 5v14l11-7z\"/></svg>",
    ),
    (
        "pause",
        "<svg viewBox=\"0 0 24 24\"><path d=\"M6 5h4v14H6zm8 0h4v14h-4z\"/></svg>",
    ),
    (
        "spinner",
        "<svg viewBox=\"0 0 24 24\"><path d=\"M12 2a10 10 0 1 0 10 10h-3a7 7 0 1 1-7-7z\"/></svg>",
    ),
    (
        "warning",
        "<svg viewBox=\"0 0 24 24\"><path d=\"M12 2 1 21h22zm0 6v7m0 2v2\"/></svg>",
    ),
];

const DATA_URI_PREFIX: &str = "data:image/svg+xml,";

/// The `foo` of an `icon:foo` reference, if the source is one.
pub fn icon_ref(source: &str) -> Option<&str> {
    source.strip_prefix("icon:")
}

/// Inline `data:` URI for a built-in icon name.
pub fn inline_icon(name: &str) -> Option<String> {
    ICONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, markup)| format!("{DATA_URI_PREFIX}{markup}"))
}

/// Canonical form of a media source for structural comparison: inlined icon
/// markup folds back to its `icon:<name>` reference; everything else is kept.
pub fn normalize_source(source: &str) -> String {
    if let Some(markup) = source.strip_prefix(DATA_URI_PREFIX) {
        if let Some((name, _)) = ICONS.iter().find(|(_, m)| *m == markup) {
            return format!("icon:{name}");
        }
    }
    source.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_ref_parses() {
        assert_eq!(icon_ref("icon:play"), Some("play"));
        assert_eq!(icon_ref("logo.png"), None);
    }

    #[test]
    fn inline_then_normalize_roundtrips() {
        let inlined = inline_icon("play").unwrap();
        assert!(inlined.starts_with(DATA_URI_PREFIX));
        assert_eq!(normalize_source(&inlined), "icon:play");
    }

    #[test]
    fn unknown_sources_are_untouched() {
        assert_eq!(normalize_source("clip.mp4"), "clip.mp4");
        assert_eq!(inline_icon("nope"), None);
    }
}
