// src/service/unit.rs

//! edenfs unit template, instance naming and per-instance environment
//!
//! The template `fb-edenfs@.service` is installed once into the user unit
//! directory. Instances are named after the eden state directory, escaped
//! the way `systemd-escape --path` does, so `%f` inside the template
//! expands back to the directory. Per-instance settings (the daemon
//! executable and extra arguments) live in `<eden_dir>/systemd.conf`,
//! loaded through `EnvironmentFile=`.

use crate::fsutil::write_atomic;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the unit template
pub const TEMPLATE_UNIT_NAME: &str = "fb-edenfs@.service";

/// Per-instance environment file inside the eden state directory
pub const ENVIRONMENT_FILE_NAME: &str = "systemd.conf";

const EXECUTABLE_VAR: &str = "EDENFS_EXECUTABLE_PATH";
const EXTRA_ARGUMENTS_VAR: &str = "EDENFS_EXTRA_ARGUMENTS";

/// Contents of the unit template
pub fn template_contents() -> String {
    format!(
        "# Generated by eden. Local changes are overwritten by `eden start`.\n\
         [Unit]\n\
         Description=EdenFS virtual filesystem daemon for %f\n\
         \n\
         [Service]\n\
         Type=notify\n\
         NotifyAccess=main\n\
         EnvironmentFile=%f/{env_file}\n\
         ExecStart=/usr/bin/env ${{{exe}}} --edenDir %f --foreground --experimentalSystemd ${extra}\n\
         KillSignal=SIGTERM\n\
         TimeoutStartSec=60\n\
         Restart=no\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        env_file = ENVIRONMENT_FILE_NAME,
        exe = EXECUTABLE_VAR,
        extra = EXTRA_ARGUMENTS_VAR,
    )
}

/// Escape a path as a unit instance name (`systemd-escape --path`)
///
/// Redundant slashes and `.` components are dropped, `/` becomes `-`, a
/// leading `.` and every byte outside `[A-Za-z0-9:_.]` become `\xNN`. The
/// root directory escapes to `-`.
pub fn escape_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    let components: Vec<&str> = text
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    if components.is_empty() {
        return "-".to_string();
    }

    let joined = components.join("/");
    let mut escaped = String::with_capacity(joined.len());
    for (i, byte) in joined.bytes().enumerate() {
        match byte {
            b'/' => escaped.push('-'),
            b'.' if i == 0 => escaped.push_str("\\x2e"),
            b if b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'.' => {
                escaped.push(b as char)
            }
            b => {
                let _ = write!(escaped, "\\x{:02x}", b);
            }
        }
    }
    escaped
}

/// Reverse of [`escape_path`]: the absolute path `%f` expands to
pub fn unescape_path(instance: &str) -> Result<PathBuf> {
    if instance == "-" {
        return Ok(PathBuf::from("/"));
    }

    let bytes = instance.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(b'/');

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' => {
                out.push(b'/');
                i += 1;
            }
            b'\\' => {
                let hex = instance
                    .get(i + 2..i + 4)
                    .filter(|_| bytes.get(i + 1) == Some(&b'x'))
                    .ok_or_else(|| {
                        Error::ParseError(format!("bad escape in unit instance: {}", instance))
                    })?;
                let value = u8::from_str_radix(hex, 16).map_err(|_| {
                    Error::ParseError(format!("bad escape in unit instance: {}", instance))
                })?;
                out.push(value);
                i += 4;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out)
        .map(PathBuf::from)
        .map_err(|_| Error::ParseError(format!("unit instance is not UTF-8: {}", instance)))
}

/// The unit instance for one eden state directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdenFsUnit {
    eden_dir: PathBuf,
    instance: String,
}

impl EdenFsUnit {
    /// Unit for `eden_dir`, which must be absolute
    pub fn for_eden_dir(eden_dir: &Path) -> Result<Self> {
        if !eden_dir.is_absolute() {
            return Err(Error::ConfigError(format!(
                "eden directory must be absolute: {}",
                eden_dir.display()
            )));
        }
        let instance = escape_path(eden_dir);
        // systemd hands the daemon the unescaped instance as `%f`
        if unescape_path(&instance)? != eden_dir {
            return Err(Error::ConfigError(format!(
                "eden directory cannot be named as a unit instance: {}",
                eden_dir.display()
            )));
        }
        Ok(Self {
            eden_dir: eden_dir.to_path_buf(),
            instance,
        })
    }

    /// Escaped instance name
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Full unit name, e.g. `fb-edenfs@home-user-.eden.service`
    pub fn unit_name(&self) -> String {
        format!("fb-edenfs@{}.service", self.instance)
    }

    /// The eden state directory
    pub fn eden_dir(&self) -> &Path {
        &self.eden_dir
    }

    /// Path of the per-instance environment file
    pub fn environment_file(&self) -> PathBuf {
        self.eden_dir.join(ENVIRONMENT_FILE_NAME)
    }

    /// Install the template and write this instance's environment
    ///
    /// Returns true if the template changed, i.e. the service manager must
    /// reload its unit files.
    pub fn install(&self, unit_dir: &Path, environment: &UnitEnvironment) -> Result<bool> {
        fs::create_dir_all(unit_dir)?;
        let template_path = unit_dir.join(TEMPLATE_UNIT_NAME);
        let contents = template_contents();

        let changed = match fs::read_to_string(&template_path) {
            Ok(existing) => existing != contents,
            Err(_) => true,
        };
        if changed {
            write_atomic(&template_path, contents.as_bytes())?;
            info!("Installed unit template {}", template_path.display());
        }

        let rendered = environment.render()?;
        fs::create_dir_all(&self.eden_dir)?;
        let env_path = self.environment_file();
        let current = fs::read_to_string(&env_path)
            .ok()
            .and_then(|text| UnitEnvironment::parse(&text).ok());
        if current.as_ref() != Some(environment) {
            write_atomic(&env_path, rendered.as_bytes())?;
            debug!("Wrote unit environment {}", env_path.display());
        }

        Ok(changed)
    }
}

/// Settings passed to an instance through its environment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEnvironment {
    /// Daemon executable
    pub executable: PathBuf,
    /// Extra daemon arguments
    pub extra_args: Vec<String>,
}

impl UnitEnvironment {
    /// Render the environment file
    ///
    /// Arguments are word-split by systemd, so they may not contain
    /// whitespace.
    pub fn render(&self) -> Result<String> {
        if let Some(arg) = self
            .extra_args
            .iter()
            .find(|a| a.is_empty() || a.chars().any(char::is_whitespace))
        {
            return Err(Error::ConfigError(format!(
                "daemon argument cannot be passed through systemd: {:?}",
                arg
            )));
        }

        Ok(format!(
            "{}={}\n{}={}\n",
            EXECUTABLE_VAR,
            quote(&self.executable.to_string_lossy()),
            EXTRA_ARGUMENTS_VAR,
            quote(&self.extra_args.join(" ")),
        ))
    }

    /// Parse an environment file written by [`UnitEnvironment::render`]
    pub fn parse(content: &str) -> Result<Self> {
        let mut executable = None;
        let mut extra_args = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::ParseError(format!("bad environment line: {}", line)))?;
            let value = unquote(value);
            match key {
                EXECUTABLE_VAR => executable = Some(PathBuf::from(value)),
                EXTRA_ARGUMENTS_VAR => {
                    extra_args = value.split_whitespace().map(str::to_string).collect()
                }
                _ => {}
            }
        }

        Ok(Self {
            executable: executable.ok_or_else(|| {
                Error::ParseError(format!("{} missing from environment file", EXECUTABLE_VAR))
            })?,
            extra_args,
        })
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_path_matches_systemd_escape() {
        assert_eq!(escape_path(Path::new("/")), "-");
        assert_eq!(escape_path(Path::new("/home/user/.eden")), "home-user-.eden");
        assert_eq!(escape_path(Path::new("//tmp//a-b/./c/")), "tmp-a\\x2db-c");
        assert_eq!(escape_path(Path::new("/.hidden")), "\\x2ehidden");
        assert_eq!(escape_path(Path::new("/with space")), "with\\x20space");
        assert_eq!(escape_path(Path::new("/a:b_c.d")), "a:b_c.d");
    }

    #[test]
    fn test_unescape_round_trip() {
        for path in ["/", "/home/user/.eden", "/tmp/a-b/c", "/with space/x\\y"] {
            let escaped = escape_path(Path::new(path));
            assert_eq!(unescape_path(&escaped).unwrap(), PathBuf::from(path));
        }
        assert!(unescape_path("bad\\q").is_err());
        assert!(unescape_path("bad\\x").is_err());
    }

    #[test]
    fn test_unit_requires_reversible_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let not_utf8 = Path::new(OsStr::from_bytes(b"/tmp/\xffeden"));
        assert!(matches!(EdenFsUnit::for_eden_dir(not_utf8), Err(Error::ConfigError(_))));
        assert!(EdenFsUnit::for_eden_dir(Path::new("/tmp//eden/")).is_ok());
    }

    #[test]
    fn test_unit_name() {
        let unit = EdenFsUnit::for_eden_dir(Path::new("/var/eden")).unwrap();
        assert_eq!(unit.instance(), "var-eden");
        assert_eq!(unit.unit_name(), "fb-edenfs@var-eden.service");
        assert_eq!(unit.environment_file(), PathBuf::from("/var/eden/systemd.conf"));
    }

    #[test]
    fn test_template_contents() {
        let template = template_contents();
        assert!(template.contains("Type=notify"));
        assert!(template.contains("EnvironmentFile=%f/systemd.conf"));
        assert!(template.contains(
            "ExecStart=/usr/bin/env ${EDENFS_EXECUTABLE_PATH} --edenDir %f --foreground --experimentalSystemd $EDENFS_EXTRA_ARGUMENTS"
        ));
    }

    #[test]
    fn test_environment_round_trip() {
        let env = UnitEnvironment {
            executable: PathBuf::from("/opt/eden \"beta\"/edenfs"),
            extra_args: vec!["--allowRoot".to_string()],
        };
        let rendered = env.render().unwrap();
        assert!(rendered.starts_with("EDENFS_EXECUTABLE_PATH=\"/opt/eden \\\"beta\\\"/edenfs\"\n"));
        assert_eq!(UnitEnvironment::parse(&rendered).unwrap(), env);
    }

    #[test]
    fn test_environment_rejects_whitespace_arguments() {
        let env = UnitEnvironment {
            executable: PathBuf::from("/usr/bin/edenfs"),
            extra_args: vec!["--name=a b".to_string()],
        };
        assert!(env.render().is_err());
    }

    #[test]
    fn test_install_writes_template_once() {
        let temp_dir = TempDir::new().unwrap();
        let unit_dir = temp_dir.path().join("units");
        let eden_dir = temp_dir.path().join("eden");
        let unit = EdenFsUnit::for_eden_dir(&eden_dir).unwrap();
        let env = UnitEnvironment {
            executable: PathBuf::from("/usr/bin/edenfs"),
            extra_args: vec![],
        };

        assert!(unit.install(&unit_dir, &env).unwrap());
        assert!(!unit.install(&unit_dir, &env).unwrap());
        assert!(unit_dir.join(TEMPLATE_UNIT_NAME).exists());

        let written = fs::read_to_string(unit.environment_file()).unwrap();
        assert_eq!(UnitEnvironment::parse(&written).unwrap(), env);
        let names: Vec<_> = fs::read_dir(&unit_dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, [TEMPLATE_UNIT_NAME]);

        let changed = UnitEnvironment {
            extra_args: vec!["--allowRoot".to_string()],
            ..env
        };
        assert!(!unit.install(&unit_dir, &changed).unwrap());
        let written = fs::read_to_string(unit.environment_file()).unwrap();
        assert_eq!(UnitEnvironment::parse(&written).unwrap(), changed);
    }
}
