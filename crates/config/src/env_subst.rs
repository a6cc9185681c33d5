/// Replace `${ENV_VAR}` placeholders with values from the process
/// environment. Unresolvable or malformed placeholders stay as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find('}') {
            Some(close) => {
                let name = &after_open[..close];
                match lookup(name) {
                    Some(value) if !name.is_empty() => out.push_str(&value),
                    _ => out.push_str(&rest[start..start + close + 3]),
                }
                rest = &rest[start + close + 3..];
            },
            None => {
                // No closing brace; emit the remainder literally.
                out.push_str(&rest[start..]);
                return out;
            },
        }
    }

    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        (name == "COURIER_TEST_TOKEN").then(|| "tok-123".to_string())
    }

    #[test]
    fn replaces_known_variable() {
        assert_eq!(
            substitute_with("token = \"${COURIER_TEST_TOKEN}\"", lookup),
            "token = \"tok-123\""
        );
    }

    #[test]
    fn keeps_unknown_variable_literal() {
        assert_eq!(substitute_with("${NOT_SET_ANYWHERE}", lookup), "${NOT_SET_ANYWHERE}");
    }

    #[test]
    fn keeps_unterminated_placeholder() {
        assert_eq!(substitute_with("prefix ${OPEN", lookup), "prefix ${OPEN");
    }

    #[test]
    fn handles_multiple_placeholders() {
        assert_eq!(
            substitute_with("${COURIER_TEST_TOKEN}/${COURIER_TEST_TOKEN}", lookup),
            "tok-123/tok-123"
        );
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute_with("no placeholders here", lookup), "no placeholders here");
    }
}
