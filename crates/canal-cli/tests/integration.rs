//! Integration tests for canal-cli.
//!
//! The binary is invoked on the bundled topologies and on temporary files.

use std::path::PathBuf;
use std::process::Command;

/// Helper to get the path to the `canal` binary built by cargo.
fn canal_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_canal"))
}

fn topology(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("topologies").join(name)
}

// ---------------------------------------------------------------------------
// canal drivers
// ---------------------------------------------------------------------------

#[test]
fn cli_drivers_lists_builtin_drivers() {
    let output = canal_bin().arg("drivers").output().expect("failed to run canal drivers");
    assert!(output.status.success(), "canal drivers failed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available Drivers"));
    for driver in ["host", "dai", "volume", "mixer", "demux", "codec", "meter"] {
        assert!(stdout.contains(driver), "driver listing should contain '{driver}'");
    }
}

#[test]
fn cli_drivers_detail_shows_settings() {
    let output = canal_bin()
        .args(["drivers", "volume"])
        .output()
        .expect("failed to run canal drivers volume");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Settings"));
    assert!(stdout.contains("gain_db"));
    assert!(stdout.contains("ramp_ms"));
}

#[test]
fn cli_drivers_unknown_fails() {
    let output = canal_bin()
        .args(["drivers", "flanger"])
        .output()
        .expect("failed to run canal drivers flanger");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown driver"));
}

// ---------------------------------------------------------------------------
// canal validate
// ---------------------------------------------------------------------------

#[test]
fn cli_validate_bundled_topologies() {
    let output = canal_bin()
        .arg("validate")
        .arg("--build")
        .arg(topology("playback.toml"))
        .arg(topology("mixing.toml"))
        .arg(topology("grouped.toml"))
        .output()
        .expect("failed to run canal validate");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "validate failed: {stderr}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches(": ok").count(), 3);
    assert!(stdout.contains("3:dai@core1"), "shared dai shown with its core:\n{stdout}");
    assert!(stdout.contains("dai group 0: 2, 13"));
    assert!(stdout.contains("built: 6 component(s), 3 endpoint(s)"));
}

#[test]
fn cli_validate_reports_bad_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"
[[components]]
id = 1
type = "host"
pipeline = 1

[[buffers]]
id = 1
source = 1
sink = 2

[[pipelines]]
id = 1
scheduling = 1
"#,
    )
    .unwrap();

    let output = canal_bin().arg("validate").arg(&path).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("buffer 1 refers to unknown component 2"), "got: {stderr}");
}

// ---------------------------------------------------------------------------
// canal run
// ---------------------------------------------------------------------------

#[test]
fn cli_run_single_core_mix() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.json");
    let output = canal_bin()
        .arg("run")
        .arg(topology("mixing.toml"))
        .args(["--periods", "20", "--amplitude", "0.25", "--json"])
        .arg(&report)
        .output()
        .expect("failed to run canal run");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "run failed: {stderr}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Running"));
    assert!(stdout.contains("Tick errors:  0"));
    assert!(stdout.contains("Xruns:        none"), "{stdout}");

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["periods"], 20);
    let endpoints = json["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 3);
    let dai = endpoints.iter().find(|e| e["component"] == 6).unwrap();
    assert_eq!(dai["role"], "drain");
    // 20 periods of 48 stereo S32 frames
    assert_eq!(dai["bytes"], 20 * 48 * 2 * 4);
}

#[test]
fn cli_run_starved_reports_xruns() {
    let output = canal_bin()
        .arg("run")
        .arg(topology("mixing.toml"))
        .args(["--periods", "10", "--starve-after", "5"])
        .output()
        .expect("failed to run canal run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("comp6:"), "dai underruns once the hosts stop:\n{stdout}");
    assert!(stdout.contains("underrun(s)"));
}

#[test]
fn cli_run_two_cores() {
    let output = canal_bin()
        .arg("run")
        .arg(topology("playback.toml"))
        .args(["--periods", "50", "--signal", "ramp"])
        .output()
        .expect("failed to run canal run");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "run failed: {stderr}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("2 core(s)"));
}

#[test]
fn cli_run_missing_file_fails() {
    let output = canal_bin()
        .args(["run", "/nonexistent/topology.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read file"));
}
