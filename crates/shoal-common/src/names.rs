//! DNS-SD name grammar: construction and validation of `.local.` names.
//!
//! Names come in two forms. Simple names have no domain tail:
//! `"host"`, `"_http._tcp."` (service names keep their trailing
//! separator), `"printer"`. Full names end in `local.`:
//! `"host.local."`, `"printer._http._tcp.local."`. Everything here is
//! a pure function over `&str`; failed matches return `false`/`None`,
//! never an error.

/// The local domain, as appended to every full name.
const LOCAL_DOMAIN: &str = "local.";

/// Separator-plus-domain tail of a host full name.
const LOCAL_SUFFIX: &str = ".local.";

/// Label sequence between a subtype and its service name.
const SUBTYPE_SEPARATOR: &str = "._sub.";

/// DNS labels are at most 63 bytes.
const MAX_LABEL_LENGTH: usize = 63;

/// 253 bytes for a DNS name, less the bytes reserved for the
/// `.local.` tail.
const MAX_HOST_NAME_LENGTH: usize = 247;

/// Service labels ("_http") are at most 16 bytes, underscore included.
const MAX_SERVICE_LABEL_LENGTH: usize = 16;

/// TXT strings are length-prefixed by a single byte on the wire.
const MAX_TEXT_STRING_LENGTH: usize = 255;

// ── Construction ─────────────────────────────────────────────────────

/// `"host"` → `"host.local."`.
pub fn host_full_name(host: &str) -> String {
    format!("{host}.{LOCAL_DOMAIN}")
}

/// `"host.local."` → `"host"`. `None` if the `.local.` tail is absent.
pub fn host_name_from_full_name(host_full_name: &str) -> Option<&str> {
    host_full_name
        .strip_suffix(LOCAL_SUFFIX)
        .filter(|host| !host.is_empty())
}

/// `"_http._tcp."` → `"_http._tcp.local."`. The service name already
/// carries its trailing separator.
pub fn service_full_name(service: &str) -> String {
    format!("{service}{LOCAL_DOMAIN}")
}

/// `("_http._tcp.", "printers")` → `"printers._sub._http._tcp.local."`.
pub fn service_subtype_full_name(service: &str, subtype: &str) -> String {
    format!("{subtype}{SUBTYPE_SEPARATOR}{service}{LOCAL_DOMAIN}")
}

/// `("myprinter", "_http._tcp.")` → `"myprinter._http._tcp.local."`.
pub fn instance_full_name(instance: &str, service: &str) -> String {
    format!("{instance}.{service}{LOCAL_DOMAIN}")
}

/// Splits an instance full name back into `(instance, service)`.
///
/// Fails unless the input is exactly `label "." service-name "local."`.
pub fn split_instance_full_name(full_name: &str) -> Option<(String, String)> {
    let dot = full_name.find('.')?;
    let instance = &full_name[..dot];
    let service = full_name[dot + 1..].strip_suffix(LOCAL_DOMAIN)?;
    if !is_valid_instance_name(instance) || !is_valid_service_name(service) {
        return None;
    }
    Some((instance.to_string(), service.to_string()))
}

/// Matches `name` against `[subtype "._sub."] service "local."`.
///
/// Returns `Some(None)` for the plain service form and
/// `Some(Some(subtype))` for the subtype form. When a `"._sub."`
/// separator is present but the prefix before it is not a valid
/// subtype, matching restarts from the top of the string as a plain
/// service name rather than failing outright.
pub fn match_service_name<'a>(name: &'a str, service: &str) -> Option<Option<&'a str>> {
    if let Some(sep) = name.find(SUBTYPE_SEPARATOR) {
        let subtype = &name[..sep];
        let rest = &name[sep + SUBTYPE_SEPARATOR.len()..];
        if is_valid_subtype_name(subtype) && matches_plain(rest, service) {
            return Some(Some(subtype));
        }
    }
    matches_plain(name, service).then_some(None)
}

fn matches_plain(name: &str, service: &str) -> bool {
    name.strip_prefix(service)
        .is_some_and(|rest| rest == LOCAL_DOMAIN)
}

// ── Validation ───────────────────────────────────────────────────────

/// At least one label, every label 1-63 bytes, whole string (labels
/// plus separators) no longer than 247 bytes. No trailing separator.
pub fn is_valid_host_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= MAX_HOST_NAME_LENGTH
        && host
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LENGTH)
}

/// Exactly two labels, both with trailing separators: an
/// underscore-prefixed label of 1-16 bytes followed by `"_tcp."` or
/// `"_udp."`.
pub fn is_valid_service_name(service: &str) -> bool {
    let Some(dot) = service.find('.') else {
        return false;
    };
    let first = &service[..dot];
    let rest = &service[dot + 1..];
    first.starts_with('_')
        && first.len() <= MAX_SERVICE_LABEL_LENGTH
        && (rest == "_tcp." || rest == "_udp.")
}

/// Exactly one label, 1-63 bytes.
pub fn is_valid_instance_name(instance: &str) -> bool {
    is_single_label(instance)
}

/// Exactly one label, 1-63 bytes.
pub fn is_valid_subtype_name(subtype: &str) -> bool {
    is_single_label(subtype)
}

fn is_single_label(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_LABEL_LENGTH && !name.contains('.')
}

/// TXT strings fit in 255 bytes, in both string and raw-byte form.
pub fn is_valid_text_string(text: impl AsRef<[u8]>) -> bool {
    text.as_ref().len() <= MAX_TEXT_STRING_LENGTH
}

// ── Alternate host name ──────────────────────────────────────────────

/// Collapses a default `fuchsia-XXXX-XXXX-XXXX` device host name into
/// its upper-cased 12-hex-digit form; any other name passes through
/// unchanged. This is a fallback discovery name, not a general
/// transform.
pub fn alt_host_name(host: &str) -> String {
    const PREFIX: &str = "fuchsia-";
    const PATTERN_LENGTH: usize = 22;

    fn is_hex_block(block: &str) -> bool {
        block.len() == 4 && block.bytes().all(|b| b.is_ascii_hexdigit())
    }

    if host.len() == PATTERN_LENGTH {
        if let Some(tail) = host.strip_prefix(PREFIX) {
            let blocks: Vec<&str> = tail.split('-').collect();
            if blocks.len() == 3 && blocks.iter().all(|block| is_hex_block(block)) {
                return blocks.concat().to_uppercase();
            }
        }
    }
    host.to_string()
}

// ── Tests ────────────────────────────────────────────────────────────
