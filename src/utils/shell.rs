//! Shell quoting for commands built from user variables.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for `sh -c`. Plain words pass through unchanged.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap a whole command line (operators included) for a nested `sh -c`.
pub fn escape_command_for_shell(command: &str) -> String {
    format!("'{}'", escape_single_quote_content(command))
}

/// Join remote path segments with exactly one `/` between them.
pub fn join_remote_path(base: &str, segments: &[&str]) -> String {
    let mut path = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(quote_arg("uptime"), "uptime");
        assert_eq!(quote_arg("/srv/app"), "/srv/app");
    }

    #[test]
    fn metacharacters_force_quotes() {
        assert_eq!(quote_arg("a b"), "'a b'");
        assert_eq!(quote_arg("$HOME"), "'$HOME'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(
            escape_command_for_shell("echo 'hi' && ls"),
            "'echo '\\''hi'\\'' && ls'"
        );
    }

    #[test]
    fn quote_args_joins_with_spaces() {
        assert_eq!(quote_args(&["rsync", "-az", "my dir/"]), "rsync -az 'my dir/'");
    }

    #[test]
    fn remote_paths_join_cleanly() {
        assert_eq!(
            join_remote_path("/srv/app/", &["releases", "/2024/"]),
            "/srv/app/releases/2024"
        );
        assert_eq!(join_remote_path("/srv/app", &["", "current"]), "/srv/app/current");
        assert_eq!(join_remote_path("", &[]), "/");
    }
}
