//! Domain ID generation and resolution
//!
//! All IDs use the format: `{8-char-hex}-{kind}-{slug}`
//! Example: `9f31c2ab-project-task-manager`

/// Length of the hex prefix at the start of every generated ID
pub const HEX_PREFIX_LEN: usize = 8;

/// Generate a domain ID from a kind and a human title
///
/// The hex prefix comes from the random tail of a UUIDv7 so that two records
/// created in the same millisecond with the same title still get distinct IDs.
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    let hex_prefix = &uuid[uuid.len() - HEX_PREFIX_LEN..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, kind)
    } else {
        format!("{}-{}-{}", hex_prefix, kind, slug)
    }
}

/// Slugify a title for use in IDs
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Result of matching a typed reference against known IDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceMatch {
    Unique(String),
    Ambiguous(Vec<String>),
    Missing,
}

/// Match a partial reference against full IDs
///
/// An exact ID always wins. Otherwise the reference matches an ID when it is
/// a prefix of the whole ID or a fragment of the slug after the kind segment.
pub fn match_reference<'a, I>(ids: I, reference: &str) -> ReferenceMatch
where
    I: IntoIterator<Item = &'a str>,
{
    let reference = reference.trim();
    if reference.is_empty() {
        return ReferenceMatch::Missing;
    }

    let mut candidates = Vec::new();
    for id in ids {
        if id == reference {
            return ReferenceMatch::Unique(id.to_string());
        }
        if id.starts_with(reference) || slug_of(id).is_some_and(|slug| slug.contains(reference)) {
            candidates.push(id.to_string());
        }
    }
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => ReferenceMatch::Missing,
        1 => ReferenceMatch::Unique(candidates.remove(0)),
        _ => ReferenceMatch::Ambiguous(candidates),
    }
}

/// Slug part of `{hex}-{kind}-{slug}`
fn slug_of(id: &str) -> Option<&str> {
    let (_, rest) = id.split_once('-')?;
    let (_, slug) = rest.split_once('-')?;
    Some(slug)
}
