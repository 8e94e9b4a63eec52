//! Persona/Command Parser (spec §4.5, `[C5-ROUTING]`).
//!
//! Grounded on the teacher's slash-command dispatch in `agent::mod` (which
//! already recognized a leading `/command` token before treating the rest
//! as the task body), generalized to the fixed persona table spec.md names.

const PERSONA_TABLE: &[(&str, &str)] = &[
    ("dev", "developer"),
    ("arch", "architect"),
    ("security", "security_analyst"),
    ("test", "tester"),
    ("docs", "technical_writer"),
    ("review", "reviewer"),
    ("perf", "performance_expert"),
];

pub const DEFAULT_PERSONA: &str = "developer";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPersona {
    pub persona: String,
    pub stripped_prompt: String,
    pub slash_command: Option<String>,
}

/// Extracts a leading `/token ...` slash command into a persona tag,
/// stripping the command from the returned prompt. Falls back to
/// `caller_persona` (or [`DEFAULT_PERSONA`]) when there is no recognized
/// command (spec §4.5).
pub fn parse_persona(prompt: &str, caller_persona: Option<&str>) -> ParsedPersona {
    let trimmed = prompt.trim_start();
    if let Some(rest) = trimmed.strip_prefix('/') {
        let (token, remainder) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim_start()),
            None => (rest, ""),
        };
        if let Some((_, persona)) = PERSONA_TABLE.iter().find(|(t, _)| *t == token) {
            return ParsedPersona {
                persona: (*persona).to_string(),
                stripped_prompt: remainder.to_string(),
                slash_command: Some(token.to_string()),
            };
        }
    }
    ParsedPersona {
        persona: caller_persona.unwrap_or(DEFAULT_PERSONA).to_string(),
        stripped_prompt: prompt.to_string(),
        slash_command: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_slash_command_extracts_persona_and_strips_prompt() {
        let parsed = parse_persona("/arch Design a distributed system", None);
        assert_eq!(parsed.persona, "architect");
        assert_eq!(parsed.stripped_prompt, "Design a distributed system");
        assert_eq!(parsed.slash_command.as_deref(), Some("arch"));
    }

    #[test]
    fn unrecognized_slash_token_falls_back_to_caller_persona() {
        let parsed = parse_persona("/unknown do a thing", Some("tester"));
        assert_eq!(parsed.persona, "tester");
        assert_eq!(parsed.stripped_prompt, "/unknown do a thing");
        assert_eq!(parsed.slash_command, None);
    }

    #[test]
    fn no_slash_command_uses_default_persona_when_none_supplied() {
        let parsed = parse_persona("plain prompt", None);
        assert_eq!(parsed.persona, DEFAULT_PERSONA);
        assert_eq!(parsed.stripped_prompt, "plain prompt");
    }

    #[test]
    fn command_with_no_trailing_text_strips_to_empty() {
        let parsed = parse_persona("/dev", None);
        assert_eq!(parsed.persona, "developer");
        assert_eq!(parsed.stripped_prompt, "");
    }

    #[test]
    fn all_table_entries_resolve() {
        for (token, persona) in PERSONA_TABLE {
            let parsed = parse_persona(&format!("/{token} x"), None);
            assert_eq!(&parsed.persona, persona);
        }
    }
}
