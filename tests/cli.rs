// Drives the built binary end to end: it packs a shell script, then the
// packed artifact restores the script over itself and execs it.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SELFPACK: &str = env!("CARGO_BIN_EXE_selfpack");

const SCRIPT: &str = "#!/bin/sh\necho \"hello from payload $#\"\n";

fn run<P: AsRef<Path>>(program: P, args: &[&str]) -> Output {
    Command::new(program.as_ref())
        .args(args)
        .output()
        .unwrap()
}

fn write_script(dir: &Path) -> PathBuf {
    let path = dir.join("hello.sh");
    fs::write(&path, SCRIPT).unwrap();
    fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn no_arguments_prints_usage() {
    let output = run(SELFPACK, &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("USAGE"), "{}", stdout);
}

#[test]
fn missing_target_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("absent");
    let output = run(SELFPACK, &[target.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
    assert!(!dir.path().join("absent.packed").exists());
}

#[test]
fn packs_and_runs_a_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());

    let output = run(SELFPACK, &[script.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("packed to"));

    let packed = dir.path().join("hello.sh.packed");
    let image = fs::read(&packed).unwrap();
    let stub_len = fs::metadata(SELFPACK).unwrap().len() as usize;
    assert_eq!(&image[image.len() - 8..], b"LALALALA");
    assert_eq!(&image[..stub_len], fs::read(SELFPACK).unwrap().as_slice());

    // arguments are not forwarded, so the script sees $# == 0
    let output = run(&packed, &["ignored", "args"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello from payload 0\n");

    // the artifact has been replaced by the original program
    assert_eq!(fs::read_to_string(&packed).unwrap(), SCRIPT);
    let output = run(&packed, &[]);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello from payload 0\n");
}

#[test]
fn output_flag_overrides_the_destination() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let destination = dir.path().join("custom");

    let output = run(SELFPACK, &["-o", destination.to_str().unwrap(), script.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(destination.exists());
    assert!(!dir.path().join("hello.sh.packed").exists());
}

#[test]
fn corrupt_payload_fails_with_one_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());

    let output = run(SELFPACK, &[script.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    // clobber the compressed stream's header, right after the stub
    let packed = dir.path().join("hello.sh.packed");
    let mut image = fs::read(&packed).unwrap();
    let stub_len = fs::metadata(SELFPACK).unwrap().len() as usize;
    image[stub_len..stub_len + 4].copy_from_slice(&[0u8; 4]);
    fs::write(&packed, &image).unwrap();

    let output = Command::new(&packed).env_remove("RUST_LOG").output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_eq!(lines.len(), 1, "{}", stderr);
    assert!(lines[0].contains("ERROR"), "{}", stderr);
    assert!(lines[0].contains("decompression failed"), "{}", stderr);

    // nothing was restored over the artifact
    assert_eq!(fs::read(&packed).unwrap(), image);
}

#[test]
fn fatal_errors_still_print_when_logging_is_off() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("absent");
    let output = Command::new(SELFPACK)
        .arg(&target)
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stderr.lines().count(), 1, "{}", stderr);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}
