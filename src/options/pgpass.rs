use std::borrow::Cow;
use std::env::var_os;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Try to load a password from the various pgpass file locations.
pub fn load_password(
    host: &str,
    port: u16,
    username: &str,
    database: Option<&str>,
) -> Option<String> {
    if let Some(file) = var_os("PGPASSFILE") {
        if let Some(password) =
            load_password_from_file(PathBuf::from(file), host, port, username, database)
        {
            return Some(password);
        }
    }

    #[cfg(not(target_os = "windows"))]
    let default_file = dirs::home_dir().map(|path| path.join(".pgpass"));
    #[cfg(target_os = "windows")]
    let default_file = dirs::data_dir().map(|path| path.join("postgres").join("pgpass.conf"));

    load_password_from_file(default_file?, host, port, username, database)
}

/// Try to extract a password from a pgpass file.
fn load_password_from_file(
    path: PathBuf,
    host: &str,
    port: u16,
    username: &str,
    database: Option<&str>,
) -> Option<String> {
    let file = File::open(&path).ok()?;

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::PermissionsExt;

        // check file permissions on linux

        let metadata = file.metadata().ok()?;
        let permissions = metadata.permissions();
        let mode = permissions.mode();
        if mode & 0o77 != 0 {
            log::warn!(
                "ignoring {}: permissions not strict enough: {:o}",
                path.to_string_lossy(),
                mode
            );
            return None;
        }
    }

    let reader = BufReader::new(file);
    load_password_from_reader(reader, host, port, username, database)
}

fn load_password_from_reader(
    mut reader: impl BufRead,
    host: &str,
    port: u16,
    username: &str,
    database: Option<&str>,
) -> Option<String> {
    let mut line = String::new();

    fn trim_newline(s: &mut String) {
        if s.ends_with('\n') {
            s.pop();
            if s.ends_with('\r') {
                s.pop();
            }
        }
    }

    while let Ok(n) = reader.read_line(&mut line) {
        if n == 0 {
            break;
        }

        if line.starts_with('#') {
            // comment, do nothing
        } else {
            trim_newline(&mut line);

            if let Some(password) = load_password_from_line(&line, host, port, username, database)
            {
                return Some(password);
            }
        }

        line.clear();
    }

    None
}

/// Check all fields & extract the password from a single line.
fn load_password_from_line(
    mut line: &str,
    host: &str,
    port: u16,
    username: &str,
    database: Option<&str>,
) -> Option<String> {
    let whole_line = line;

    // Pgpass line ordering: hostname:port:database:username:password
    // See: https://www.postgresql.org/docs/current/libpq-pgpass.html
    match line.trim_start().chars().next() {
        None | Some('#') => None,
        _ => {
            matches_next_field(whole_line, &mut line, host)?;
            matches_next_field(whole_line, &mut line, &port.to_string())?;
            matches_next_field(whole_line, &mut line, database.unwrap_or_default())?;
            matches_next_field(whole_line, &mut line, username)?;

            Some(find_next_field(&mut line)?.into_owned())
        }
    }
}

/// Check if the next field matches the provided value.
fn matches_next_field(whole_line: &str, line: &mut &str, value: &str) -> Option<()> {
    let field = find_next_field(line);
    match field {
        Some(field) => {
            if field == "*" || field == value {
                Some(())
            } else {
                None
            }
        }
        None => {
            log::warn!("malformed line in pgpass file: {}", whole_line);
            None
        }
    }
}

/// Extract the next value from a line in a pgpass file.
///
/// `line` will get updated to point behind the field and delimiter.
fn find_next_field<'a>(line: &mut &'a str) -> Option<Cow<'a, str>> {
    let mut escaping = false;
    let mut escaped_anything = false;
    let mut last_added = 0;
    let mut result = String::new();

    let mut chars = line.char_indices();

    for (idx, c) in &mut chars {
        if c == ':' && !escaping {
            let (field, rest) = line.split_at(idx);
            *line = &rest[1..];

            return if escaped_anything {
                result.push_str(&field[last_added..]);
                Some(Cow::Owned(result))
            } else {
                Some(Cow::Borrowed(field))
            };
        } else if c == '\\' {
            if escaping {
                escaping = false;
                result.push('\\');
            } else {
                escaping = true;
                escaped_anything = true;
                result.push_str(&line[last_added..idx]);
                last_added = idx + c.len_utf8() + 1;
            }
        } else if escaping {
            escaping = false;
            result.push(c);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{find_next_field, load_password_from_line, load_password_from_reader};
    use std::borrow::Cow;

    #[test]
    fn it_finds_next_field() {
        let mut line = "a:b:c";
        assert_eq!(find_next_field(&mut line), Some(Cow::Borrowed("a")));
        assert_eq!(line, "b:c");

        let mut line = "a\\:b:c";
        assert_eq!(
            find_next_field(&mut line),
            Some(Cow::Owned("a:b".to_owned()))
        );
        assert_eq!(line, "c");

        let mut line = "nofieldterminator";
        assert_eq!(find_next_field(&mut line), None);
    }

    #[test]
    fn it_matches_lines() {
        let line = "localhost:5432:mydb:user:secret";

        assert_eq!(
            load_password_from_line(line, "localhost", 5432, "user", Some("mydb")),
            Some("secret".to_owned())
        );

        // wildcards
        let line = "*:*:*:user:secret";
        assert_eq!(
            load_password_from_line(line, "anything", 5433, "user", Some("db")),
            Some("secret".to_owned())
        );

        // mismatched user
        let line = "localhost:5432:mydb:other:secret";
        assert_eq!(
            load_password_from_line(line, "localhost", 5432, "user", Some("mydb")),
            None
        );
    }

    #[test]
    fn it_scans_a_whole_file() {
        let file = b"\
# a comment line
badhost:*:*:*:nope
localhost:5432:*:postgres:correct
" as &[u8];

        assert_eq!(
            load_password_from_reader(file, "localhost", 5432, "postgres", None),
            Some("correct".to_owned())
        );

        assert_eq!(
            load_password_from_reader(file, "elsewhere", 5432, "postgres", None),
            None
        );
    }
}
