use std::fmt;

/// A stable, filesystem-safe identifier for an application, derived from
/// container metadata and intended to survive version updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppImageId(pub(crate) String);

impl AppImageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop every character outside `[A-Za-z-]`. Idempotent; the result carries
/// no whitespace and no digits.
pub(crate) fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '-')
        .collect()
}

/// Derive an identity from the `.upd_info` section contents, or None when
/// the update information is absent, unrecognized, or malformed.
pub(crate) fn from_update_info(upd_info: &str) -> Option<AppImageId> {
    let fields: Vec<&str> = upd_info.trim().split('|').collect();
    match fields[0] {
        "zsync" => {
            let (host, basename) = split_absolute_url(fields.get(1)?)?;
            let mut base = basename.to_lowercase();
            for suffix in [".zsync", ".appimage"] {
                if let Some(stripped) = base.strip_suffix(suffix) {
                    base = stripped.to_string();
                }
            }
            let raw = format!("{}{}", host.to_lowercase(), base);
            Some(AppImageId(format!("ayy_{}", sanitize(&raw))))
        }
        "gh-releases-zsync" => {
            if fields.len() < 5 {
                return None;
            }
            let raw = format!("{}-{}-{}", fields[1], fields[2], fields[3]).to_lowercase();
            Some(AppImageId(format!("ayy_gh-{}", sanitize(&raw))))
        }
        "pling-v1-zsync" => {
            let product = fields.get(1)?;
            if product.is_empty() {
                return None;
            }
            Some(AppImageId(format!(
                "ayy_pling1z-{}",
                sanitize(&product.to_lowercase())
            )))
        }
        _ => None,
    }
}

/// Derive an identity from a desktop-entry `Name` value: the first segment
/// when split on `-` and `_`.
pub(crate) fn from_desktop_name(name: &str) -> Option<AppImageId> {
    let segment = name.split(['-', '_']).next()?;
    if segment.is_empty() {
        return None;
    }
    Some(AppImageId(format!(
        "ayy_dsk-{}",
        sanitize(&segment.to_lowercase())
    )))
}

/// Last-resort identity from the container's on-disk file name.
pub(crate) fn from_file_name(name: &str) -> AppImageId {
    let mut name = name.to_lowercase();
    if let Some(stripped) = name.strip_suffix(".appimage") {
        name = stripped.to_string();
    }
    AppImageId(sanitize(&name))
}

/// Minimal absolute-URL split: requires a scheme, returns the authority and
/// the final path segment. Good enough for identity derivation, where
/// sanitization collapses scheme, port, and userinfo differences anyway.
fn split_absolute_url(url: &str) -> Option<(&str, &str)> {
    let (_scheme, rest) = url.split_once("://")?;
    let (host, path) = match rest.split_once('/') {
        Some((host, path)) => (host, path),
        None => (rest, ""),
    };
    if host.is_empty() {
        return None;
    }
    let basename = path.rsplit('/').next().unwrap_or("");
    Some((host, basename))
}
