pub const CORRECTION_PREFIX: &str = "Correction: ";

/// A narrator reply split into its optional grammar correction and the
/// story text that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedResponse {
    pub correction: Option<String>,
    pub story: String,
}

fn strip_matching_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

pub fn parse_response(raw: &str) -> ParsedResponse {
    let mut lines = raw.split('\n');
    let first_line = lines.next().unwrap_or_default();

    match first_line.strip_prefix(CORRECTION_PREFIX) {
        Some(rest) => {
            let correction = strip_matching_quotes(rest.trim()).to_string();
            let story = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            ParsedResponse {
                correction: Some(correction),
                story,
            }
        }
        None => ParsedResponse {
            correction: None,
            story: raw.to_string(),
        },
    }
}
