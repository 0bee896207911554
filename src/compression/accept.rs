//! Accept-Encoding header parsing.
//!
//! Implements the content-coding subset of RFC 9110 §12.5.3: comma-separated
//! codings, optional `;q=` weights in `[0, 1]`, a `*` wildcard covering
//! unlisted codings, and `q=0` as an explicit exclusion. Tokens compare
//! case-insensitively.

/// One content-coding advertised by the client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AcceptedCoding {
    pub coding: String,
    pub weight: f32,
}

/// Parse an `Accept-Encoding` value into its advertised codings.
///
/// Returns `None` for malformed input (bad token, unparsable or out-of-range
/// q-value); callers treat that as "nothing advertised" and fall back to
/// identity rather than failing the request.
pub(crate) fn parse(header: &str) -> Option<Vec<AcceptedCoding>> {
    let mut codings = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let mut pieces = part.split(';');
        let token = pieces.next().unwrap_or_default().trim();
        if token.is_empty() || !is_token(token) {
            return None;
        }

        let mut weight = 1.0f32;
        for param in pieces {
            let (name, value) = param.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("q") {
                weight = parse_qvalue(value.trim())?;
            }
        }

        codings.push(AcceptedCoding {
            coding: token.to_ascii_lowercase(),
            weight,
        });
    }

    Some(codings)
}

/// Whether the advertised set allows `coding` with a non-zero weight.
///
/// An explicit entry always wins over the wildcard.
pub(crate) fn allows(codings: &[AcceptedCoding], coding: &str) -> bool {
    let mut wildcard_allows = false;
    for accepted in codings {
        if accepted.coding == coding {
            return accepted.weight > 0.0;
        }
        if accepted.coding == "*" {
            wildcard_allows = accepted.weight > 0.0;
        }
    }
    wildcard_allows
}

fn parse_qvalue(raw: &str) -> Option<f32> {
    let value: f32 = raw.parse().ok()?;
    (0.0..=1.0).contains(&value).then_some(value)
}

fn is_token(raw: &str) -> bool {
    raw.chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}
