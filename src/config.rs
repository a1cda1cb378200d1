//! Configuration: server credentials and file locations.
//!
//! Credentials live in a small TOML file:
//!
//! ```toml
//! [server]
//! host = "imap.example.com"
//! username = "me@example.com"
//! password = "hunter2"
//! port = 993        # optional
//! use_ssl = true    # optional
//! ```
//!
//! The file holds a password, so reading one that other users can access logs
//! a warning. When the file is missing a template is written for the user to
//! fill in.

use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Default IMAPS port.
pub const DEFAULT_PORT: u16 = 993;

/// File name of the credentials file inside the configuration directory.
pub const CREDENTIALS_FILE_NAME: &str = "credentials.toml";

/// Environment variable pointing at a snap's private data directory.
pub const SNAP_DATA_VAR: &str = "SNAP_USER_DATA";

const TEMPLATE: &str = r#"# mailsift server credentials.
# Fill in the values below and run mailsift again.

[server]
host = "imap.gmail.com"
username = ""
password = ""
# port = 993
# use_ssl = true
"#;

/// How to reach and log in to the mail server.
#[derive(Debug)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: SecretString,
    pub port: u16,
    pub use_ssl: bool,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    server: Option<ServerSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

impl Credentials {
    /// Parse credentials from TOML text. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: CredentialsFile = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        let server = file.server.ok_or(ConfigError::MissingKey("server"))?;

        Ok(Self {
            host: required(server.host, "host")?,
            username: required(server.username, "username")?,
            password: SecretString::from(required(server.password, "password")?),
            port: server.port.unwrap_or(DEFAULT_PORT),
            use_ssl: server.use_ssl.unwrap_or(true),
        })
    }
}

/// An empty value counts as missing.
fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingKey(key))
}

/// Read the credentials file at `path`.
pub fn load_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(mode) = insecure_mode(path)? {
        warn!(
            path = %path.display(),
            mode = %format!("{mode:o}"),
            "Credentials file is accessible by other users; run: chmod go-rwx {}",
            path.display()
        );
    }
    Credentials::parse(&text, path)
}

/// Permission bits that let anyone but the owner in, if any are set.
#[cfg(unix)]
pub fn insecure_mode(path: &Path) -> Result<Option<u32>, ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    Ok((mode & 0o077 != 0).then_some(mode))
}

#[cfg(not(unix))]
pub fn insecure_mode(_path: &Path) -> Result<Option<u32>, ConfigError> {
    Ok(None)
}

/// Write a credentials template to `path`, readable by the owner only.
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(TEMPLATE.as_bytes())?;
    info!(path = %path.display(), "Wrote credentials template");
    Ok(())
}

// ── Locations ───────────────────────────────────────────────────────

/// Configuration directory given the snap data directory and home directory.
///
/// Inside a snap the private data directory wins; otherwise it is
/// `~/.config/mailsift`.
pub fn config_dir_from(snap_data: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    match snap_data {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => home.map(|home| home.join(".config").join("mailsift")),
    }
}

/// Configuration directory for this process.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    config_dir_from(std::env::var_os(SNAP_DATA_VAR), dirs::home_dir())
        .ok_or(ConfigError::NoHomeDirectory)
}

/// Default credentials file location.
pub fn default_credentials_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CREDENTIALS_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn parse(text: &str) -> Result<Credentials, ConfigError> {
        Credentials::parse(text, Path::new("credentials.toml"))
    }

    #[test]
    fn parses_full_file() {
        let creds = parse(
            r#"
            [server]
            host = "imap.example.com"
            username = "me"
            password = "secret"
            port = 1993
            use_ssl = false
            "#,
        )
        .unwrap();
        assert_eq!(creds.host, "imap.example.com");
        assert_eq!(creds.username, "me");
        assert_eq!(creds.password.expose_secret(), "secret");
        assert_eq!(creds.port, 1993);
        assert!(!creds.use_ssl);
    }

    #[test]
    fn port_and_ssl_default() {
        let creds = parse("[server]\nhost = \"h\"\nusername = \"u\"\npassword = \"p\"\n").unwrap();
        assert_eq!(creds.port, DEFAULT_PORT);
        assert!(creds.use_ssl);
    }

    #[test]
    fn missing_and_empty_keys() {
        assert!(matches!(parse(""), Err(ConfigError::MissingKey("server"))));
        assert!(matches!(
            parse("[server]\nusername = \"u\"\npassword = \"p\"\n"),
            Err(ConfigError::MissingKey("host"))
        ));
        assert!(matches!(
            parse("[server]\nhost = \"h\"\nusername = \"u\"\npassword = \"\"\n"),
            Err(ConfigError::MissingKey("password"))
        ));
    }

    #[test]
    fn template_needs_editing() {
        assert!(matches!(parse(TEMPLATE), Err(ConfigError::MissingKey("username"))));
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = parse("[server]\nhost = \"h\"\nusername = \"u\"\npassword = \"hunter2\"\n").unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CREDENTIALS_FILE_NAME);
        assert!(matches!(load_credentials(&path), Err(ConfigError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn template_is_private_and_permissions_are_checked() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join(CREDENTIALS_FILE_NAME);
        write_template(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(insecure_mode(&path).unwrap(), None);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(insecure_mode(&path).unwrap(), Some(0o644));
    }

    #[cfg(unix)]
    #[test]
    fn readable_file_still_loads() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CREDENTIALS_FILE_NAME);
        fs::write(&path, "[server]\nhost = \"h\"\nusername = \"u\"\npassword = \"p\"\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(load_credentials(&path).unwrap().host, "h");
    }

    #[test]
    fn config_dir_prefers_snap_data() {
        let home = Some(PathBuf::from("/home/me"));
        assert_eq!(
            config_dir_from(Some("/snap/data".into()), home.clone()),
            Some(PathBuf::from("/snap/data"))
        );
        assert_eq!(
            config_dir_from(None, home.clone()),
            Some(PathBuf::from("/home/me/.config/mailsift"))
        );
        assert_eq!(
            config_dir_from(Some(OsString::new()), home),
            Some(PathBuf::from("/home/me/.config/mailsift"))
        );
        assert_eq!(config_dir_from(None, None), None);
    }
}
