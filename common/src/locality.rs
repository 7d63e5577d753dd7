//! Best-effort locality hints derived from input uris.
//!
//! The worker pool schedules a task anywhere, but given a hint it prefers
//! the host the data already lives on.

/// Schemes whose authority component names the host serving the data.
const HOSTED_SCHEMES: [&str; 3] = ["disco://", "dir://", "http://"];

/// Extract the preferred worker host from an input uri.
///
/// Returns the authority component for `disco://`, `dir://` and `http://`
/// uris. Anything else, including bare paths and already-extracted hosts,
/// yields no hint.
pub fn pref_host(uri: &str) -> Option<String> {
    HOSTED_SCHEMES.iter().find_map(|scheme| {
        uri.strip_prefix(*scheme).map(|rest| match rest.split_once('/') {
            Some((authority, _)) => authority.to_string(),
            None => rest.to_string(),
        })
    })
}

/// [`pref_host`] over raw bytes, for inputs that arrive unparsed.
pub fn pref_host_bytes(uri: &[u8]) -> Option<String> {
    std::str::from_utf8(uri).ok().and_then(pref_host)
}
