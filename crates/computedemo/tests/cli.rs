use std::fs;
use std::process::{Command, Output};

use tempfile::TempDir;

fn computedemo(config_dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_computedemo"))
        .env("COMPUTEDEMO_CONFIG_DIR", config_dir)
        .env("RUST_LOG", "error")
        .args(args)
        .output()
        .expect("failed to run computedemo")
}

#[test]
fn list_names_every_demo() {
    let root = TempDir::new().unwrap();
    let output = computedemo(root.path(), &["list"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["life", "mandelbrot", "waves", "raytrace"] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }
}

#[test]
fn check_links_every_program() {
    let root = TempDir::new().unwrap();
    let output = computedemo(root.path(), &["--tile", "8", "check"]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stdout)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("compute 8x8x1"));
    assert!(!stdout.contains("FAIL"));
}

#[test]
fn simulate_blinker_writes_a_png() {
    let root = TempDir::new().unwrap();
    let png = root.path().join("out/blinker.png");
    let output = computedemo(
        root.path(),
        &[
            "simulate",
            "life",
            "--pattern",
            "blinker",
            "--size",
            "8x8",
            "--interval",
            "100ms",
            "--fps",
            "10",
            "--frames",
            "4",
            "--output",
            png.to_str().unwrap(),
        ],
    );
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("4 frames, generation 3"), "{stdout}");
    assert!(png.exists());
}

#[test]
fn config_file_in_the_config_dir_is_honoured() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("config.toml"), "[mandelbrot]\nmax_iterations = 32\n").unwrap();

    let output = computedemo(
        root.path(),
        &["simulate", "mandelbrot", "--size", "16x12", "--frames", "2"],
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mandelbrot: 2 frames"));
}

#[test]
fn invalid_config_fails_with_a_diagnostic() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("config.toml"), "[dispatch]\ntile = 99\n").unwrap();

    let output = computedemo(root.path(), &["list"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dispatch.tile"), "{stderr}");
}

#[test]
fn check_prints_the_source_of_a_broken_kernel() {
    let root = TempDir::new().unwrap();
    let kernel = root.path().join("broken.comp");
    fs::write(
        &kernel,
        "#version 450\n\
         // first line of the broken kernel\n\
         layout(local_size_x = 16, local_size_y = 16) in;\n\
         void main() {\n\
             float value = max(1.0, ;\n\
         }\n",
    )
    .unwrap();

    let output = computedemo(root.path(), &["check", "--kernel", kernel.to_str().unwrap()]);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAIL  broken.comp"), "{stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("2 | // first line of the broken kernel"),
        "{stderr}"
    );
    assert!(stderr.contains("5 | float value = max(1.0, ;"), "{stderr}");
}

#[test]
fn simulate_rejects_a_zero_interval() {
    let root = TempDir::new().unwrap();
    let output = computedemo(
        root.path(),
        &["simulate", "life", "--interval", "0s", "--frames", "2"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--interval must be greater than zero"), "{stderr}");
}
