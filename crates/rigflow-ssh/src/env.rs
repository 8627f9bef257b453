//! Environment preamble for remote scripts
//!
//! Scripts run under `env -i`, so nothing leaks in from the remote login
//! shell except what is listed here.

/// Variables forwarded to every script
pub const EXPORT_ENVS: [&str; 6] = [
    "http_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "FTP_PROXY",
    "PATH",
];

/// Resolve the variables exported to a script
///
/// Each name in [`EXPORT_ENVS`] takes the caller's override, then the value in
/// this process. A name unset locally is left for the remote shell to expand
/// (`"$NAME"`). Overrides for other names follow in the order given.
pub fn export_env(overrides: &[(String, String)]) -> Vec<(String, EnvValue)> {
    let lookup = |name: &str| {
        overrides
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    let mut vars: Vec<(String, EnvValue)> = EXPORT_ENVS
        .iter()
        .map(|name| {
            let value = match lookup(name).or_else(|| std::env::var(name).ok()) {
                Some(value) => EnvValue::Literal(value),
                None => EnvValue::Remote,
            };
            (name.to_string(), value)
        })
        .collect();

    for (key, value) in overrides {
        if EXPORT_ENVS.contains(&key.as_str()) {
            continue;
        }
        match vars.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = EnvValue::Literal(value.clone()),
            None => vars.push((key.clone(), EnvValue::Literal(value.clone()))),
        }
    }

    vars
}

/// Value of an exported variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    /// Taken from the remote shell at run time
    Remote,
}

/// Build the `sudo env -i - ... bash -s` invocation used to run a script
pub fn script_command(overrides: &[(String, String)]) -> String {
    let mut cmd = vec!["sudo".to_string(), "env".to_string(), "-i".to_string(), "-".to_string()];

    for (key, value) in export_env(overrides) {
        let value = match value {
            EnvValue::Literal(value) => double_quote(&value),
            EnvValue::Remote => format!("\"${}\"", key),
        };
        cmd.push(format!("{}={}", key, value));
    }

    cmd.extend(
        ["bash", "--norc", "--noprofile", "-x", "-s"]
            .iter()
            .map(|s| s.to_string()),
    );
    cmd.join(" ")
}

/// Quote for a POSIX shell with single quotes
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote for a POSIX shell with double quotes, keeping the text literal
pub fn double_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn ambient() -> Vec<(&'static str, Option<&'static str>)> {
        vec![
            ("http_proxy", Some("http://proxy.local:3128")),
            ("HTTP_PROXY", Some("http://PROXY.local:3128")),
            ("HTTPS_PROXY", Some("https://proxy.local:3129")),
            ("NO_PROXY", Some("localhost,127.0.0.1")),
            ("FTP_PROXY", Some("ftp://proxy.local:21")),
            ("PATH", Some("/usr/local/bin:/usr/bin:/bin")),
        ]
    }

    #[test]
    #[serial]
    fn test_path_override_keeps_other_ambient_values() {
        temp_env::with_vars(ambient(), || {
            let vars = export_env(&[("PATH".to_string(), "/custom/bin".to_string())]);

            assert_eq!(vars.len(), 6);
            for (name, value) in ambient() {
                let expected = if name == "PATH" {
                    "/custom/bin"
                } else {
                    value.unwrap()
                };
                let (_, actual) = vars.iter().find(|(k, _)| k == name).unwrap();
                assert_eq!(actual, &EnvValue::Literal(expected.to_string()), "{}", name);
            }
        });
    }

    #[test]
    #[serial]
    fn test_unset_variable_defers_to_remote_shell() {
        temp_env::with_vars([("FTP_PROXY", None::<&str>)], || {
            let vars = export_env(&[]);
            let (_, ftp) = vars.iter().find(|(k, _)| k == "FTP_PROXY").unwrap();
            assert_eq!(ftp, &EnvValue::Remote);

            let cmd = script_command(&[]);
            assert!(cmd.contains("FTP_PROXY=\"$FTP_PROXY\""));
        });
    }

    #[test]
    #[serial]
    fn test_extra_variables_follow_fixed_set() {
        temp_env::with_vars(ambient(), || {
            let vars = export_env(&[("KUBE_VERSION".to_string(), "1.31.2".to_string())]);
            assert_eq!(vars.len(), 7);
            assert_eq!(vars[6].0, "KUBE_VERSION");
        });
    }

    #[test]
    #[serial]
    fn test_script_command_shape() {
        temp_env::with_vars(ambient(), || {
            let cmd = script_command(&[("GREETING".to_string(), "say \"hi\" $USER".to_string())]);
            assert!(cmd.starts_with("sudo env -i - http_proxy=\"http://proxy.local:3128\""));
            assert!(cmd.contains("GREETING=\"say \\\"hi\\\" \\$USER\""));
            assert!(cmd.ends_with("bash --norc --noprofile -x -s"));
        });
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("hello"), "'hello'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
    }
}
