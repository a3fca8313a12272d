// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

/// UUID of the `replace_trunk_with_branch` fixture repository
pub const FIXTURE_UUID: &str = "5b65bade-98f3-4993-a01f-b7a6710da339";

/// How long to wait for daemon output before failing
pub const OUTPUT_TIMEOUT: Duration = Duration::from_secs(30);

/// `file://` URL of a dump under `tests/fixtures`
pub fn fixture_url(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name);
    url::Url::from_file_path(&path).unwrap().to_string()
}

/// Write an author map into `dir`
pub fn write_authors(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("authors");
    std::fs::write(&path, content).unwrap();
    path
}

/// Write an executable shell script
pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Forward lines of a child's output to a channel
pub fn line_reader<R: Read + Send + 'static>(stream: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Collect lines until one equals `expected`
///
/// Panics when the stream ends or `timeout` passes first.
pub fn read_until(lines: &Receiver<String>, expected: &str, timeout: Duration) -> Vec<String> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match lines.recv_timeout(remaining) {
            Ok(line) => {
                let done = line == expected;
                seen.push(line);
                if done {
                    return seen;
                }
            }
            Err(e) => panic!("did not see {:?} ({}); output so far: {:?}", expected, e, seen),
        }
    }
}

/// Fake `systemctl --user` for one eden directory
///
/// `start` launches the daemon named in `<eden_dir>/systemd.conf` the way
/// the unit template does and waits for it to take the lock; `show`
/// reports `active`/`running` while that process is alive.
pub fn fake_systemctl(dir: &Path, eden_dir: &Path) -> PathBuf {
    let path = dir.join("systemctl");
    let state = dir.join("systemctl-state");
    std::fs::create_dir_all(&state).unwrap();

    let body = format!(
        r#"state="{state}"
eden_dir="{eden_dir}"
[ "$1" = "--user" ] && shift
command="$1"
shift
echo "$command $*" >> "$state/calls"

alive() {{
    [ -f "$state/pid" ] && kill -0 "$(cat "$state/pid")" 2>/dev/null
}}

case "$command" in
daemon-reload)
    ;;
start)
    . "$eden_dir/systemd.conf"
    "$EDENFS_EXECUTABLE_PATH" --edenDir "$eden_dir" --foreground --experimentalSystemd $EDENFS_EXTRA_ARGUMENTS \
        </dev/null >"$state/daemon.log" 2>&1 &
    echo $! > "$state/pid"
    tries=0
    while [ ! -s "$eden_dir/lock" ]; do
        alive || exit 1
        tries=$((tries + 1))
        [ "$tries" -gt 200 ] && exit 1
        sleep 0.05
    done
    ;;
stop)
    if alive; then
        pid="$(cat "$state/pid")"
        kill "$pid"
        while kill -0 "$pid" 2>/dev/null; do sleep 0.05; done
    fi
    rm -f "$state/pid"
    ;;
show)
    case "$1" in
    --property=ActiveState) if alive; then echo active; else echo inactive; fi ;;
    --property=SubState) if alive; then echo running; else echo dead; fi ;;
    *) exit 1 ;;
    esac
    ;;
*)
    echo "unknown command $command" >&2
    exit 1
    ;;
esac"#,
        state = state.display(),
        eden_dir = eden_dir.display(),
    );
    write_script(&path, &body);
    path
}

/// Sends SIGTERM to the daemon holding an eden directory when dropped
pub struct DaemonGuard {
    eden_dir: PathBuf,
}

impl DaemonGuard {
    pub fn new(eden_dir: &Path) -> Self {
        Self {
            eden_dir: eden_dir.to_path_buf(),
        }
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let Some(pid) = eden::launcher::running_pid(&self.eden_dir) else {
            return;
        };
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);

        // Daemons started with --ignoreStop outlive SIGTERM
        let deadline = Instant::now() + Duration::from_secs(5);
        while eden::launcher::running_pid(&self.eden_dir).is_some() {
            if Instant::now() >= deadline {
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
