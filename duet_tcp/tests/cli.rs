use assert_cmd::prelude::*;
use duet::{
    reveal::AttributionShares, rules::AttributionRule, simulate_attribution, Conversion, Event,
    Touchpoint, TouchpointKind,
};
use predicates::prelude::*;
use std::{
    net::TcpListener,
    path::Path,
    process::{Command, Output, Stdio},
    thread,
    time::Duration,
};
use tempfile::TempDir;

const CRATE_BIN: &str = "duet";

fn write_json(dir: &TempDir, name: &str, value: &impl serde::Serialize) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
    path.display().to_string()
}

fn shares() -> (AttributionShares, AttributionShares) {
    let rule: AttributionRule = "last_touch_1d".parse().unwrap();
    let touchpoints = vec![Touchpoint::new(42, 100, 1, TouchpointKind::View)];
    let conversions = vec![Conversion::new(1, 200, 1), Conversion::new(2, 200, 2)];
    simulate_attribution(rule, &touchpoints, &conversions).unwrap()
}

fn new_command() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin(CRATE_BIN)?;
    cmd.env_remove("DUET_ROLE")
        .env_remove("DUET_RULE")
        .env_remove("DUET_ADDRESS");
    Ok(cmd)
}

#[test]
fn input_file_doesnt_exist() -> Result<(), Box<dyn std::error::Error>> {
    new_command()?
        .args(["run", "--role", "partner", "--touchpoints", "1"])
        .args(["--conversions", "1", "--input", "does/not/exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read file"));

    Ok(())
}

#[test]
fn invalid_rule() -> Result<(), Box<dyn std::error::Error>> {
    new_command()?
        .args(["run", "--role", "publisher", "--rule", "first_click_1d"])
        .args(["--input", "events.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "unknown attribution rule `first_click_1d`",
        ));

    Ok(())
}

#[test]
fn publisher_without_rule() -> Result<(), Box<dyn std::error::Error>> {
    new_command()?
        .args(["run", "--role", "publisher", "--touchpoints", "1"])
        .args(["--conversions", "1", "--input", "events.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "the publisher must specify an attribution rule",
        ));

    Ok(())
}

#[test]
fn reveal_deferred_shares() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (publisher, partner) = shares();
    let publisher = write_json(&dir, "publisher.json", &publisher);
    let partner = write_json(&dir, "partner.json", &partner);

    new_command()?
        .args(["reveal", &partner, &publisher])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""touchpoint_id": 42"#))
        .stdout(predicate::str::contains(r#""status": "unattributed""#));

    new_command()?
        .args(["reveal", &publisher, &publisher])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Both files contain the shares of the publisher",
        ));

    Ok(())
}

fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn run_partner(address: &str, input: &str) -> Result<Output, Box<dyn std::error::Error>> {
    // The publisher might not be listening yet.
    for _ in 0..50 {
        let output = new_command()?
            .args(["run", "--role", "partner", "--address", address])
            .args(["--touchpoints", "2", "--conversions", "2", "--input", input])
            .output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || !stderr.contains("connection error") {
            return Ok(output);
        }
        thread::sleep(Duration::from_millis(100));
    }
    Err("the partner could not connect to the publisher".into())
}

#[test]
fn integration_test_session() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let touchpoints: Vec<Event> = vec![
        Touchpoint::new(5, 1_000, 1, TouchpointKind::Click).into(),
        Touchpoint::new(6, 1_100, 1, TouchpointKind::View).into(),
    ];
    let conversions: Vec<Event> = vec![
        Conversion::new(1, 2_000, 1).into(),
        Conversion::new(2, 2_000, 3).into(),
    ];
    let touchpoints = write_json(&dir, "touchpoints.json", &touchpoints);
    let conversions = write_json(&dir, "conversions.json", &conversions);
    let results = dir.path().join("results.json");
    let address = free_address();

    let publisher = new_command()?
        .args(["run", "--role", "publisher", "--rule", "last_click_1d"])
        .args(["--address", &address, "--touchpoints", "2", "--conversions", "2"])
        .args(["--input", &touchpoints])
        .arg("--output")
        .arg(&results)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let partner = run_partner(&address, &conversions)?;
    let publisher = publisher.wait_with_output()?;

    assert!(
        partner.status.success(),
        "{}",
        String::from_utf8_lossy(&partner.stderr)
    );
    assert!(
        publisher.status.success(),
        "{}",
        String::from_utf8_lossy(&publisher.stderr)
    );

    let expected = r#"[{"status":"attributed","touchpoint_id":5},{"status":"unattributed"}]"#;
    let partner: serde_json::Value = serde_json::from_slice(&partner.stdout)?;
    let publisher: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&results)?)?;
    assert_eq!(partner, serde_json::from_str::<serde_json::Value>(expected)?);
    assert_eq!(publisher, partner);
    assert!(Path::new(&results).exists());

    Ok(())
}
