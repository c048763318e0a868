use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use veckern::storage;

/// Helper to get the path to a shipped scenario.
fn scenario_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name)
}

/// Helper to get the vk binary path.
fn vk_bin() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_BIN_EXE_vk"));
    // Fallback for test environments
    if !path.exists() {
        path = PathBuf::from("target/debug/vk");
    }
    path
}

fn vk(args: &[&str]) -> Output {
    Command::new(vk_bin())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run vk")
}

fn stdout(o: &Output) -> String {
    String::from_utf8_lossy(&o.stdout).into_owned()
}

fn stderr(o: &Output) -> String {
    String::from_utf8_lossy(&o.stderr).into_owned()
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ================================================================
// run command
// ================================================================

mod run {
    use super::*;

    #[test]
    fn edge_scenario_text_table() {
        let path = scenario_path("edge_conv_pad1.yaml");
        let out = vk(&["run", path.to_str().unwrap()]);
        assert!(out.status.success(), "{}", stderr(&out));
        let text = stdout(&out);
        assert!(text.contains("Implementation"));
        assert!(text.contains("Max Abs Error"));
        assert!(text.contains("e32m8"));
        assert!(text.contains("5 passed, 0 warned, 0 failed, 0 skipped"));
    }

    #[test]
    fn json_report_parses() {
        let path = scenario_path("batchnorm_tiled.yaml");
        let out = vk(&["run", path.to_str().unwrap(), "--format", "json"]);
        assert!(out.status.success(), "{}", stderr(&out));
        let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
        assert_eq!(json["op"], "batch_norm");
        assert_eq!(json["rows"].as_array().unwrap().len(), 10);
        assert_eq!(json["oracle"], "reference");
    }

    #[test]
    fn failing_row_exits_1() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.yaml",
            "name: bad\nop: conv2d3x3\ninputs:\n  X: { shape: [1, 1, 4, 4], sequence: {} }\n  W: { shape: [1, 1, 2, 2], values: [1, 1, 1, 1] }\nvariants: [scalar]\n",
        );
        let out = vk(&["run", path.to_str().unwrap()]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stdout(&out).contains("FAIL"));
        assert!(stderr(&out).contains("error: 1 of 1 row(s) failed"));
    }

    #[test]
    fn invalid_scenario_is_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.yaml", "name: bad\nop: gelu\ninputs:\n  X: { shape: [2], values: [1, 2] }\n");
        let out = vk(&["run", path.to_str().unwrap()]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).contains("SCN-002"));
    }

    #[test]
    fn dump_writes_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = scenario_path("edge_conv_pad1.yaml");
        let out = vk(&["run", path.to_str().unwrap(), "--dump", dir.path().to_str().unwrap()]);
        assert!(out.status.success(), "{}", stderr(&out));
        let reference = storage::read_f32(&dir.path().join("edge_conv_pad1_reference.bin"), Some(16)).unwrap();
        let e32m4 = storage::read_f32(&dir.path().join("edge_conv_pad1_e32m4.bin"), Some(16)).unwrap();
        assert_eq!(reference, e32m4);
    }

    #[test]
    fn verbose_logs_to_stderr() {
        let path = scenario_path("leaky_relu_tail.yaml");
        let out = vk(&["-v", "run", path.to_str().unwrap()]);
        assert!(out.status.success());
        assert!(stderr(&out).contains("native dispatch"));
        assert!(!stdout(&out).contains("native dispatch"));
    }

    #[test]
    fn missing_scenario_file() {
        let out = vk(&["run", "/nonexistent/scenario.yaml"]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).starts_with("error:"));
    }
}

// ================================================================
// compare command
// ================================================================

mod compare {
    use super::*;

    #[test]
    fn missing_variant_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let data = [1.0_f32, -2.0, 3.5, 0.25];
        let reference = dir.path().join("ref.bin");
        storage::write_f32(&reference, &data).unwrap();
        storage::write_f32(&dir.path().join("relu_scalar.bin"), &data).unwrap();
        storage::write_f32(&dir.path().join("relu_e32m2.bin"), &[1.0, -2.0, 3.5, 0.2505]).unwrap();

        let out = vk(&[
            "compare",
            reference.to_str().unwrap(),
            "--dir",
            dir.path().to_str().unwrap(),
            "--name",
            "relu",
            "--variants",
            "scalar,e32m2,e32m8",
            "--format",
            "json",
        ]);
        assert!(out.status.success(), "{}", stderr(&out));
        let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
        let verdicts: Vec<&str> = json["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["verdict"].as_str().unwrap())
            .collect();
        assert_eq!(verdicts, vec!["PASS", "WARN", "SKIPPED"]);
    }

    #[test]
    fn wrong_length_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.bin");
        storage::write_f32(&reference, &[1.0, 2.0]).unwrap();
        storage::write_f32(&dir.path().join("out_scalar.bin"), &[1.0]).unwrap();
        let out = vk(&[
            "compare",
            reference.to_str().unwrap(),
            "--dir",
            dir.path().to_str().unwrap(),
            "--name",
            "out",
            "--variants",
            "scalar",
        ]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stdout(&out).contains("FAIL"));
    }

    #[test]
    fn unknown_variant_tag_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.bin");
        storage::write_f32(&reference, &[1.0]).unwrap();
        let out = vk(&[
            "compare",
            reference.to_str().unwrap(),
            "--dir",
            dir.path().to_str().unwrap(),
            "--name",
            "x",
            "--variants",
            "e32m3",
        ]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).contains("e32m3"));
    }
}

// ================================================================
// validate command
// ================================================================

mod validate {
    use super::*;

    #[test]
    fn shipped_scenario_is_valid() {
        let path = scenario_path("scatter_add.yaml");
        let out = vk(&["validate", path.to_str().unwrap()]);
        assert!(out.status.success(), "{}", stdout(&out));
        assert!(stdout(&out).contains("Scenario is valid."));
    }

    #[test]
    fn errors_are_listed_and_exit_1() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.yaml",
            "name: ''\nop: relu\ninputs:\n  X: { shape: [3], values: [1, 2] }\n",
        );
        let out = vk(&["validate", path.to_str().unwrap()]);
        assert_eq!(out.status.code(), Some(1));
        let text = stdout(&out);
        assert!(text.contains("[ERROR] SCN-001"));
        assert!(text.contains("[ERROR] SCN-005"));
    }
}

// ================================================================
// variants command
// ================================================================

mod variants {
    use super::*;

    #[test]
    fn lists_every_op() {
        let out = vk(&["variants"]);
        assert!(out.status.success());
        let text = stdout(&out);
        assert_eq!(text.lines().count(), 17);
        let matmul = text.lines().find(|l| l.starts_with("mat_mul")).unwrap();
        assert!(matmul.contains("tiled_e32m8"));
        let relu = text.lines().find(|l| l.starts_with("relu")).unwrap();
        assert!(relu.contains("tiled_e32m8"));
        let softmax = text.lines().find(|l| l.starts_with("softmax")).unwrap();
        assert!(!softmax.contains("tiled"));
    }

    #[test]
    fn single_op() {
        let out = vk(&["variants", "batch_norm"]);
        assert!(out.status.success());
        assert_eq!(stdout(&out).lines().count(), 1);
        assert!(stdout(&out).contains("scalar, e32m1, e32m2, e32m4, e32m8, tiled_scalar"));
    }

    #[test]
    fn unknown_op_fails() {
        let out = vk(&["variants", "gelu"]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).contains("unknown op 'gelu'"));
    }
}
