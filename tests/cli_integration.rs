use std::path::Path;
use std::process::Command;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rezip::archive::asar;
use rezip::container::ContainerWriter;
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_rezip").to_string()
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; len];
    rng.fill(&mut out[..]);
    out
}

fn write_installer(path: &Path, asar_files: &[(&str, &[u8])]) {
    let archive = asar::build(asar_files);
    let mut w = ContainerWriter::new(Vec::new());
    w.add_file("app.asar", &archive, true, 0o100644 << 16).unwrap();
    w.add_file("launcher.sh", b"#!/bin/sh\nexec app\n", true, 0o100755 << 16)
        .unwrap();
    std::fs::write(path, w.finish().unwrap()).unwrap();
}

#[test]
fn cli_optimize_then_compare() {
    let dir = tempdir().unwrap();
    let f1 = random_bytes(20_000, 1);
    let f2 = random_bytes(20_000, 2);
    let mut f2_changed = f2.clone();
    f2_changed[5_000..6_000].fill(0x11);

    let old = dir.path().join("app-1.0.zip");
    let new = dir.path().join("app-1.1.zip");
    write_installer(&old, &[("f1.bin", &f1), ("f2.bin", &f2)]);
    write_installer(&new, &[("f1.bin", &f1), ("f2.bin", &f2_changed)]);

    let old_opt = dir.path().join("app-1.0.opt.zip");
    let new_opt = dir.path().join("app-1.1.opt.zip");
    for (input, output) in [(&old, &old_opt), (&new, &new_opt)] {
        let st = Command::new(bin())
            .arg("optimize")
            .arg(input)
            .arg(output)
            .status()
            .unwrap();
        assert!(st.success());
        assert!(output.exists());
    }

    let out = Command::new(bin())
        .arg("compare")
        .arg(&old_opt)
        .arg(&new_opt)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("must download"), "stdout: {stdout}");
}

#[test]
fn cli_compare_json_output() {
    let dir = tempdir().unwrap();
    let data = random_bytes(10_000, 3);
    let mut changed = data.clone();
    changed[100..200].fill(0);

    let old = dir.path().join("old.zip");
    let new = dir.path().join("new.zip");
    write_installer(&old, &[("f.bin", &data)]);
    write_installer(&new, &[("f.bin", &changed)]);

    let out = Command::new(bin())
        .args(["--json", "compare"])
        .arg(&old)
        .arg(&new)
        .output()
        .unwrap();
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["command"], "compare");
    assert!(json["download_size"].as_u64().unwrap() > 0);
    assert!(json["new_size"].as_u64().unwrap() > 0);
    assert!(json["files"].is_array());
}

#[test]
fn cli_optimize_json_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    let output = dir.path().join("out.zip");
    write_installer(&input, &[("f.bin", &random_bytes(5_000, 4))]);

    let out = Command::new(bin())
        .args(["--json", "optimize"])
        .arg(&input)
        .arg(&output)
        .output()
        .unwrap();
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["command"], "optimize");
    assert!(json["output_size"].as_u64().unwrap() > 0);
}

#[test]
fn cli_optimize_rejects_same_path() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    write_installer(&input, &[("f.bin", b"data")]);

    let out = Command::new(bin())
        .arg("optimize")
        .arg(&input)
        .arg(&input)
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid invocation"), "stderr: {stderr}");
}

#[test]
fn cli_optimize_writes_blockmap() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    let output = dir.path().join("out.zip");
    let blockmap = dir.path().join("out.blockmap");
    write_installer(&input, &[("f.bin", &random_bytes(5_000, 5))]);

    let st = Command::new(bin())
        .arg("optimize")
        .arg(&input)
        .arg(&output)
        .arg("--blockmap")
        .arg(&blockmap)
        .status()
        .unwrap();
    assert!(st.success());
    assert!(blockmap.exists());
}

#[test]
fn cli_missing_file_fails_cleanly() {
    let out = Command::new(bin())
        .args(["compare", "/nonexistent/a.zip", "/nonexistent/b.zip"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("rezip: compare:"), "stderr: {stderr}");
}

#[test]
fn cli_no_args_shows_help() {
    let out = Command::new(bin()).output().unwrap();
    assert!(!out.status.success());
}
