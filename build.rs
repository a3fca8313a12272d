// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: eden state directory
fn config_dir_arg() -> Arg {
    Arg::new("config_dir")
        .long("config-dir")
        .value_name("DIR")
        .global(true)
        .help("Eden state directory (default: ~/.eden)")
}

fn build_cli() -> Command {
    Command::new("eden")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Eden Contributors")
        .about("Manage the edenfs daemon")
        .subcommand_required(false)
        .arg(config_dir_arg())
        .subcommand(
            Command::new("start")
                .about("Start the edenfs daemon")
                .arg(
                    Arg::new("foreground")
                        .long("foreground")
                        .action(ArgAction::SetTrue)
                        .help("Run edenfs attached to this terminal and wait for it to exit"),
                )
                .arg(
                    Arg::new("allow_root")
                        .long("allowRoot")
                        .action(ArgAction::SetTrue)
                        .help("Allow edenfs to run as root without sudo"),
                )
                .arg(
                    Arg::new("daemon_binary")
                        .long("daemon-binary")
                        .value_name("PATH")
                        .help("edenfs executable to run"),
                )
                .arg(
                    Arg::new("daemon_args")
                        .num_args(0..)
                        .last(true)
                        .help("Arguments passed through to edenfs (after --)"),
                ),
        )
        .subcommand(
            Command::new("stop").about("Stop the edenfs daemon").arg(
                Arg::new("timeout")
                    .long("timeout")
                    .default_value("15")
                    .help("Seconds to wait before killing the daemon"),
            ),
        )
        .subcommand(Command::new("status").about("Check whether edenfs is running"))
        .subcommand(
            Command::new("debug")
                .about("Debugging helpers")
                .subcommand(
                    Command::new("unit-name")
                        .about("Print the systemd unit name for the state directory"),
                )
                .subcommand(
                    Command::new("getattr")
                        .about("Print NFSv3 attributes of a file as JSON")
                        .arg(Arg::new("path").required(true).help("File to inspect")),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("eden.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
