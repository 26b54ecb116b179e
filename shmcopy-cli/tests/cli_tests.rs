// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end tests driving the `shmcopy` binary as separate processes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use shmcopy_core::{Channel, ChannelName, ChannelOptions};
use tempfile::TempDir;

fn shmcopy() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shmcopy"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn unique_channel() -> String {
    format!("cli-{}", uuid::Uuid::new_v4().simple())
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len + 16);
    while data.len() < len {
        data.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    }
    data.truncate(len);
    data
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Start two `copy` processes on the same channel and wait for both.
fn run_pair(source: &Path, dest: &Path, channel: &str, extra: &[&str]) -> (Output, Output) {
    let spawn = || {
        shmcopy()
            .args(extra)
            .arg("copy")
            .arg(source)
            .arg(dest)
            .arg(channel)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn shmcopy")
    };

    let first = spawn();
    let second = spawn();
    (
        first.wait_with_output().expect("first process"),
        second.wait_with_output().expect("second process"),
    )
}

#[test]
fn test_two_processes_copy_file() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.bin");
    let dest = dir.path().join("output.bin");
    let data = random_bytes(1024);
    fs::write(&source, &data).unwrap();

    let channel = unique_channel();
    let (first, second) = run_pair(&source, &dest, &channel, &["--capacity", "100"]);

    assert!(first.status.success(), "first failed: {}", stderr(&first));
    assert!(second.status.success(), "second failed: {}", stderr(&second));
    assert_eq!(fs::read(&dest).unwrap(), data);

    let name = ChannelName::new(channel).unwrap();
    assert!(!Channel::exists(&name).unwrap());
}

#[test]
fn test_two_processes_copy_empty_file() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("empty.bin");
    let dest = dir.path().join("copy.bin");
    fs::write(&source, b"").unwrap();

    let (first, second) = run_pair(&source, &dest, &unique_channel(), &[]);

    assert!(first.status.success(), "first failed: {}", stderr(&first));
    assert!(second.status.success(), "second failed: {}", stderr(&second));
    assert_eq!(fs::read(&dest).unwrap(), b"");
}

#[test]
fn test_missing_source_fails_both_sides() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("nonexistent.bin");
    let dest = dir.path().join("output.bin");

    let channel = unique_channel();
    let (first, second) = run_pair(&source, &dest, &channel, &["--timeout-ms", "2000"]);

    assert!(!first.status.success());
    assert!(!second.status.success());
    assert!(stderr(&first).contains("Error:"));

    let name = ChannelName::new(channel).unwrap();
    let _ = Channel::remove(&name);
}

#[test]
fn test_third_process_rejected() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.bin");
    fs::write(&source, b"payload").unwrap();

    let channel = unique_channel();
    let name = ChannelName::new(channel.clone()).unwrap();
    let producer = Channel::attach(&name, ChannelOptions::default()).unwrap();
    let consumer = Channel::attach(&name, ChannelOptions::default()).unwrap();

    let output = shmcopy()
        .arg("copy")
        .arg(&source)
        .arg(dir.path().join("output.bin"))
        .arg(&channel)
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("already has a producer and a consumer"),
        "unexpected stderr: {}",
        stderr(&output)
    );
    assert_eq!(producer.process_count().unwrap(), 2);

    drop(consumer);
    drop(producer);
    let _ = Channel::remove(&name);
}

#[test]
fn test_identical_paths_short_circuit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("same.txt");
    fs::write(&path, b"unchanged").unwrap();

    let channel = unique_channel();
    let output = shmcopy()
        .arg("copy")
        .arg(&path)
        .arg(&path)
        .arg(&channel)
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(fs::read(&path).unwrap(), b"unchanged");
    assert!(!Channel::exists(&ChannelName::new(channel).unwrap()).unwrap());
}

#[test]
fn test_local_copy() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.bin");
    let dest = dir.path().join("output.bin");
    let data = random_bytes(300 * 1024 + 7);
    fs::write(&source, &data).unwrap();

    let output = shmcopy().arg("copy").arg(&source).arg(&dest).output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn test_clean_removes_stale_channel() {
    let channel = unique_channel();
    let name = ChannelName::new(channel.clone()).unwrap();

    // A handle that is forgotten never detaches, like a crashed process.
    let stale = Channel::attach(&name, ChannelOptions::default()).unwrap();
    std::mem::forget(stale);
    assert!(Channel::exists(&name).unwrap());

    let output = shmcopy().arg("clean").arg(&channel).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(!Channel::exists(&name).unwrap());

    // Cleaning again is not an error.
    let output = shmcopy().arg("clean").arg(&channel).output().unwrap();
    assert!(output.status.success());
}

#[test]
fn test_invalid_channel_name_rejected() {
    let output = shmcopy().arg("clean").arg("bad/name").output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid field value"));
}
