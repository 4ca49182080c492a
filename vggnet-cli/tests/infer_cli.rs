use std::{error::Error, fs, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::{TempDir, tempdir};
use vggnet_utils::dataset::{IMAGE_FLOATS, NETWORK_BYTES, encode_f32};

/// Writes `count` patterned images, their labels and a network blob of
/// `network_bytes` zero bytes into a fresh directory.
fn fixture(count: usize, labels: &[i32], network_bytes: usize) -> Result<TempDir, Box<dyn Error>> {
    let dir = tempdir()?;
    let images: Vec<f32> = (0..count * IMAGE_FLOATS).map(|i| (i % 7) as f32).collect();
    fs::write(dir.path().join("cifar10_image.bin"), encode_f32(&images))?;
    let labels: Vec<u8> = labels.iter().flat_map(|label| label.to_le_bytes()).collect();
    fs::write(dir.path().join("cifar10_label.bin"), labels)?;
    fs::write(dir.path().join("network.bin"), vec![0u8; network_bytes])?;
    Ok(dir)
}

fn host_run(dir: &Path, num_images: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("vggnet-cli");
    cmd.current_dir(dir)
        .arg(num_images)
        .arg("result.out")
        .arg("--backend")
        .arg("host")
        .arg("--batch-size")
        .arg("2");
    cmd
}

#[test]
fn help_lists_the_backend_flag() -> Result<(), Box<dyn Error>> {
    let output = cargo_bin_cmd!("vggnet-cli").arg("--help").output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--backend"), "{stdout}");
    assert!(stdout.contains("--compare"), "{stdout}");
    Ok(())
}

#[test]
fn truncated_network_file_aborts_the_run() -> Result<(), Box<dyn Error>> {
    let dir = fixture(1, &[0], 8)?;
    let output = host_run(dir.path(), "1").output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!("{NETWORK_BYTES} bytes are expected, but 8 bytes are read")),
        "{stderr}"
    );
    assert!(!dir.path().join("result.out").exists());
    Ok(())
}

#[test]
fn asking_for_more_images_than_stored_fails() -> Result<(), Box<dyn Error>> {
    let dir = fixture(1, &[0], 8)?;
    let output = host_run(dir.path(), "2").output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read images"), "{stderr}");
    Ok(())
}

#[test]
fn zero_batch_size_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = fixture(1, &[0], 8)?;
    let output = cargo_bin_cmd!("vggnet-cli")
        .current_dir(dir.path())
        .args(["1", "--backend", "host", "--batch-size", "0"])
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("batch_size must be greater than zero"), "{stderr}");
    Ok(())
}

/// A zero network produces equal logits, so every image lands on class 0
/// with confidence 1/10.
#[test]
fn host_run_writes_report_json_and_compares() -> Result<(), Box<dyn Error>> {
    let dir = fixture(3, &[0, 0, 5], NETWORK_BYTES)?;
    let json_path = dir.path().join("predictions.json");
    let reference = dir.path().join("reference.out");
    fs::write(
        &reference,
        "Image 0000: airplane 0.100000\n\
         Image 0001: airplane 0.100000\n\
         Image 0002: airplane 0.100030\n\
         Accuracy: 0.666667\n",
    )?;

    let output = host_run(dir.path(), "3")
        .arg("--json")
        .arg(&json_path)
        .arg("--compare")
        .arg(&reference)
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Elapsed time:"));

    let report = fs::read_to_string(dir.path().join("result.out"))?;
    assert_eq!(
        report,
        "Image 0000: airplane 0.100000\n\
         Image 0001: airplane 0.100000\n\
         Image 0002: airplane 0.100000\n\
         Accuracy: 0.666667\n"
    );

    let records: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
    let records = records.as_array().ok_or("expected a JSON array")?;
    assert_eq!(records.len(), 3);
    assert_eq!(records[2]["class"], "airplane");
    assert_eq!(records[2]["expected"], 5);

    fs::write(&reference, "Image 0000: cat 0.100000\n")?;
    let output = host_run(dir.path(), "1")
        .arg("--compare")
        .arg(&reference)
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1 of 1 label(s) differ"), "{stderr}");
    Ok(())
}
