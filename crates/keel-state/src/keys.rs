//! Key codec — deterministic, sortable keys for every bucket.
//!
//! Sequence numbers are rendered as fixed-width 20-digit decimals so that
//! byte order equals numeric order. Ordered listings on both backends go
//! through [`sort_by_sequence`], which orders by the embedded sequence
//! rather than by raw key bytes.

/// Width of a zero-padded sequence (`u64::MAX` has 20 digits).
pub const SEQUENCE_WIDTH: usize = 20;

/// Separator between stage key components.
pub const STAGE_SEPARATOR: &str = "___";

pub const QUEUE_PREFIX: &str = "queue-";

/// Listing order by the sequence embedded in each key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Plain key order.
    #[default]
    None,
    Ascending,
    Descending,
}

pub fn sequence_to_key(seq: u64) -> String {
    format!("{seq:020}")
}

pub fn queue_key(build_id: u64) -> String {
    format!("{QUEUE_PREFIX}{}", sequence_to_key(build_id))
}

/// Build id of a `queue-{seq}` key.
pub fn parse_queue_key(key: &str) -> Option<u64> {
    key.strip_prefix(QUEUE_PREFIX)?.parse().ok()
}

pub fn stage_key(
    build_id: u64,
    stage: &str,
    namespace: &str,
    controller: &str,
    container: &str,
) -> String {
    [
        sequence_to_key(build_id).as_str(),
        stage,
        namespace,
        controller,
        container,
    ]
    .join(STAGE_SEPARATOR)
}

/// Prefix shared by all stage entries of one build.
pub fn stage_prefix(build_id: u64) -> String {
    format!("{}{STAGE_SEPARATOR}", sequence_to_key(build_id))
}

/// Suffix shared by all stage entries of one container.
pub fn stage_suffix(namespace: &str, controller: &str, container: &str) -> String {
    format!("{STAGE_SEPARATOR}{namespace}{STAGE_SEPARATOR}{controller}{STAGE_SEPARATOR}{container}")
}

/// Infix shared by all stage entries of one controller.
pub fn stage_controller_infix(namespace: &str, controller: &str) -> String {
    format!("{STAGE_SEPARATOR}{namespace}{STAGE_SEPARATOR}{controller}{STAGE_SEPARATOR}")
}

/// Decoded components of a stage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageKey {
    pub build_id: u64,
    pub stage: String,
    pub namespace: String,
    pub controller: String,
    pub container: String,
}

pub fn parse_stage_key(key: &str) -> Option<StageKey> {
    let mut parts = key.split(STAGE_SEPARATOR);
    let build_id = parts.next()?.parse().ok()?;
    let stage = parts.next()?.to_string();
    let namespace = parts.next()?.to_string();
    let controller = parts.next()?.to_string();
    let container = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some(StageKey {
        build_id,
        stage,
        namespace,
        controller,
        container,
    })
}

/// Scope of a time series, e.g. `{ns}/{ctrl}` or `{node}`.
pub fn series_scope(parts: &[&str]) -> String {
    parts.join("/")
}

pub fn series_prefix(scope: &str) -> String {
    format!("{scope}/")
}

pub fn series_key(scope: &str, seq: u64) -> String {
    format!("{scope}/{}", sequence_to_key(seq))
}

/// Scope part of a series key, if the key ends in a sequence.
pub fn scope_of(key: &str) -> Option<&str> {
    let (scope, seq) = key.rsplit_once('/')?;
    is_sequence(seq).then_some(scope)
}

pub fn pod_event_key(namespace: &str, controller: &str) -> String {
    format!("{namespace}-{controller}")
}

fn is_sequence(token: &str) -> bool {
    token.len() == SEQUENCE_WIDTH && token.bytes().all(|b| b.is_ascii_digit())
}

/// The first zero-padded sequence embedded in a key.
///
/// Tokens are delimited by `/`, `-` and `_`, which covers queue, stage and
/// series keys.
pub fn sequence_of(key: &str) -> Option<u64> {
    key.split(['/', '-', '_'])
        .find(|token| is_sequence(token))
        .and_then(|token| token.parse().ok())
}

/// Order items by the sequence embedded in their key, ties broken by key.
pub fn sort_by_sequence<T, F>(items: &mut [T], order: SortOrder, key: F)
where
    F: Fn(&T) -> &str,
{
    match order {
        SortOrder::None => items.sort_by(|a, b| key(a).cmp(key(b))),
        SortOrder::Ascending => items.sort_by(|a, b| {
            (sequence_of(key(a)), key(a)).cmp(&(sequence_of(key(b)), key(b)))
        }),
        SortOrder::Descending => items.sort_by(|a, b| {
            (sequence_of(key(b)), key(b)).cmp(&(sequence_of(key(a)), key(a)))
        }),
    }
}
