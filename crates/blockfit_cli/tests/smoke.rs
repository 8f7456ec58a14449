use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::tempdir;

/// Two 4x4x4 blocks sharing the face `x = 1`, as an ascii plot3d file.
fn write_grid(path: &Path) -> std::io::Result<()> {
    let mut text = String::from("2\n4 4 4 4 4 4\n");
    for offset in [0.0, 1.0] {
        for d in 0..3 {
            for k in 0..4 {
                for j in 0..4 {
                    for i in 0..4 {
                        let value = match d {
                            0 => offset + i as f64 / 3.0,
                            1 => j as f64 / 3.0,
                            _ => k as f64 / 3.0,
                        };
                        text.push_str(&format!("{value}\n"));
                    }
                }
            }
        }
    }
    std::fs::write(path, text)
}

#[test]
fn fits_a_two_block_grid() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let grid = dir.path().join("blocks.xyz");
    let connectivity = dir.path().join("blocks.con");
    let report = dir.path().join("report.json");
    write_grid(&grid)?;

    let mut cmd = cargo_bin_cmd!("blockfit");
    cmd.arg("--quiet")
        .arg("fit")
        .arg(&grid)
        .arg("--connectivity")
        .arg(&connectivity)
        .arg("--report")
        .arg(&report);
    cmd.assert().success();

    let json = std::fs::read_to_string(&report)?;
    assert!(json.contains("\"design_groups\": 4"), "report: {json}");
    assert!(json.contains("\"control_points\": 112"), "report: {json}");
    assert!(dir.path().join("blocks.bvol").exists());
    let saved = std::fs::read_to_string(&connectivity)?;
    assert!(saved.contains("nodes 12"), "connectivity: {saved}");

    let mut project = cargo_bin_cmd!("blockfit");
    project
        .arg("-q")
        .arg("project")
        .arg(dir.path().join("blocks.bvol"))
        .arg("--point")
        .arg("1.5,0.5,0.5");
    let output = project.assert().success().get_output().stdout.clone();
    let line = String::from_utf8(output)?;
    assert!(line.contains("\"volume\":1"), "projection: {line}");
    Ok(())
}

#[test]
fn missing_grid_fails_with_context() {
    let dir = tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("blockfit");
    cmd.arg("connect").arg(dir.path().join("absent.xyz"));
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("failed to load grid"), "stderr: {stderr}");
}
