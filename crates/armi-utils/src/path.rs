use std::{
    env,
    iter::Peekable,
    path::PathBuf,
    str::Chars,
};

use crate::error::{PathError, PathResult};

/// Returns the user's home directory from `$HOME`, falling back to `/root`
/// when it is unset.
pub fn home_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
}

/// Returns `$XDG_CONFIG_HOME`, defaulting to `$HOME/.config`.
pub fn xdg_config_home() -> PathBuf {
    env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Resolves a path string that may contain environment variables.
///
/// Expands `$VAR` and `${VAR}`, resolves a leading `~` to the home directory
/// and makes relative paths absolute against the current working directory.
///
/// # Errors
///
/// * [`PathError::Empty`] if the path is empty
/// * [`PathError::CurrentDir`] if the current directory cannot be determined
/// * [`PathError::MissingEnvVar`] if a referenced variable is undefined
/// * [`PathError::UnclosedVariable`] for a `${` without its `}`
pub fn resolve_path(path: &str) -> PathResult<PathBuf> {
    let path = path.trim();

    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let path_buf = PathBuf::from(expand_variables(path)?);

    if path_buf.is_absolute() {
        Ok(path_buf)
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path_buf))
            .map_err(|err| PathError::CurrentDir { source: err })
    }
}

fn expand_variables(path: &str) -> PathResult<String> {
    let mut result = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                let var_name = consume_braced(&mut chars)?;
                push_env_var(&var_name, &mut result, path)?;
            }
            '$' => {
                let var_name = consume_var_name(&mut chars);
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    push_env_var(&var_name, &mut result, path)?;
                }
            }
            '~' if result.is_empty() => result.push_str(&home_dir().to_string_lossy()),
            _ => result.push(c),
        }
    }

    Ok(result)
}

fn consume_braced(chars: &mut Peekable<Chars>) -> PathResult<String> {
    let mut var_name = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return Ok(var_name);
        }
        var_name.push(c);
    }
    Err(PathError::UnclosedVariable {
        input: format!("${{{var_name}"),
    })
}

fn consume_var_name(chars: &mut Peekable<Chars>) -> String {
    let mut var_name = String::new();
    while let Some(c) = chars.next_if(|c| c.is_alphanumeric() || *c == '_') {
        var_name.push(c);
    }
    var_name
}

fn push_env_var(var_name: &str, result: &mut String, original: &str) -> PathResult<()> {
    match var_name {
        "HOME" => result.push_str(&home_dir().to_string_lossy()),
        "XDG_CONFIG_HOME" => result.push_str(&xdg_config_home().to_string_lossy()),
        _ => {
            let value = env::var(var_name).map_err(|_| {
                PathError::MissingEnvVar {
                    input: original.into(),
                    var: var_name.into(),
                }
            })?;
            result.push_str(&value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_resolve_tilde_and_vars() {
        env::set_var("HOME", "/home/mirror");
        env::set_var("ARMI_TEST_ROOT", "/srv");

        assert_eq!(
            resolve_path("~/arch").unwrap(),
            PathBuf::from("/home/mirror/arch")
        );
        assert_eq!(
            resolve_path("$ARMI_TEST_ROOT/arch").unwrap(),
            PathBuf::from("/srv/arch")
        );
        assert_eq!(
            resolve_path("${ARMI_TEST_ROOT}/arch").unwrap(),
            PathBuf::from("/srv/arch")
        );

        env::remove_var("ARMI_TEST_ROOT");
    }

    #[test]
    fn test_resolve_relative_is_absolute() {
        let resolved = resolve_path("mirror").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("mirror"));
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(resolve_path("  "), Err(PathError::Empty)));
        assert!(matches!(
            resolve_path("${UNCLOSED"),
            Err(PathError::UnclosedVariable { .. })
        ));
        assert!(matches!(
            resolve_path("$ARMI_DEFINITELY_UNSET_VAR/x"),
            Err(PathError::MissingEnvVar { .. })
        ));
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        assert_eq!(expand_variables("/a/$/b").unwrap(), "/a/$/b");
    }
}
