use std::path::Path;
use std::process::{Command, Output};

use isq_harness::compare::SpecComparison;
use isq_harness::types::Isq;
use serde_json::{json, Value};
use tempfile::tempdir;

fn isq() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_isq"));
    for var in [
        "ISQ_STAGE1_API_KEY",
        "ISQ_STAGE2_API_KEY",
        "ISQ_STAGE3_API_KEY",
        "ISQ_API_BASE_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn write(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn run_ok(cmd: &mut Command) -> Output {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stage1_json(primary: &[(&str, &[&str])], secondary: &[(&str, &[&str])]) -> Value {
    let specs = |list: &[(&str, &[&str])]| -> Vec<Value> {
        list.iter()
            .map(|(name, options)| json!({"spec_name": name, "options": options}))
            .collect()
    };
    json!({"seller_specs": [{
        "pmcat_name": "Stainless Steel Sheets",
        "pmcat_id": "P1",
        "mcats": [{
            "mcat_name": "SS 304 Sheet",
            "mcat_id": "M1",
            "primary_specs": specs(primary),
            "secondary_specs": specs(secondary),
            "tertiary_specs": []
        }]
    }]})
}

fn stage2_json() -> Value {
    json!({
        "config": {"name": "Grade", "options": ["304", "316", "304L"]},
        "keys": [
            {"name": "Thickness", "options": ["2mm"]},
            {"name": "Width", "options": ["1250 mm", "1500 mm"]},
            {"name": "Finish", "options": ["2B", "BA"]}
        ]
    })
}

#[test]
fn reconcile_selects_primary_then_secondary() {
    let dir = tempdir().unwrap();
    let s1 = dir.path().join("stage1.json");
    let s2 = dir.path().join("stage2.json");
    let out = dir.path().join("buyers.json");
    write(
        &s1,
        &stage1_json(&[("Grade", &["304", "316"])], &[("Thickness", &["1mm", "2mm"])]),
    );
    write(&s2, &stage2_json());

    run_ok(
        isq()
            .arg("reconcile")
            .arg("--stage1")
            .arg(&s1)
            .arg("--stage2")
            .arg(&s2)
            .arg("--out")
            .arg(&out),
    );

    let buyers: Vec<Isq> = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(
        buyers,
        vec![
            Isq::new("Grade", ["304", "316", "304L"]),
            Isq::new("Thickness", ["2mm", "1mm"]),
        ]
    );
}

#[test]
fn reconcile_no_pad_keeps_a_short_list() {
    let dir = tempdir().unwrap();
    let s1 = dir.path().join("stage1.json");
    let s2 = dir.path().join("stage2.json");
    let out = dir.path().join("buyers.json");
    write(&s1, &stage1_json(&[("Brand", &["Tata", "Jindal"])], &[]));
    write(&s2, &stage2_json());

    run_ok(
        isq()
            .arg("reconcile")
            .arg("--stage1")
            .arg(&s1)
            .arg("--stage2")
            .arg(&s2)
            .arg("--out")
            .arg(&out)
            .arg("--no-pad"),
    );

    let buyers: Vec<Isq> = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert!(buyers.is_empty());
}

#[test]
fn compare_writes_the_comparison() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    let out = dir.path().join("cmp.json");
    write(
        &a,
        &stage1_json(&[("Sheet Thickness", &["1 mm"]), ("Grade", &["304"])], &[]),
    );
    write(&b, &stage1_json(&[("Thk", &["1 mm"])], &[("Finish", &["2B"])]));

    run_ok(
        isq()
            .arg("compare")
            .arg("--a")
            .arg(&a)
            .arg("--b")
            .arg(&b)
            .arg("--out")
            .arg(&out),
    );

    let cmp: SpecComparison =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(cmp.common, vec!["Sheet Thickness"]);
    assert_eq!(cmp.unique_to_a, vec!["Grade"]);
    assert_eq!(cmp.unique_to_b, vec!["Finish"]);
}

#[test]
fn export_writes_three_sheets_and_json() {
    let dir = tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    let out_dir = dir.path().join("export");
    write(
        &session_path,
        &json!({
            "id": "isq-20240305-140709-000",
            "created_at": "2024-03-05T14:07:09Z",
            "request": {
                "pmcat": {"name": "Stainless Steel Sheets", "id": "P1"},
                "mcats": [{"name": "SS 304 Sheet", "id": "M1"}],
                "urls": ["https://seller.example/a"]
            },
            "stage1": stage1_json(&[("Grade", &["304", "316"])], &[("Thickness", &["1mm", "2mm"])]),
            "stage2": stage2_json(),
            "stage2_source": "model:first",
            "evidence": [{"url": "https://seller.example/a", "chars": 120, "specs": [
                {"name": "Material Grade", "options": ["304", "316"]}
            ]}],
            "buyers": [
                {"name": "Grade", "options": ["304", "316", "304L"]},
                {"name": "Thickness", "options": ["2mm", "1mm"]}
            ]
        }),
    );

    let output = run_ok(
        isq()
            .arg("export")
            .arg("--session")
            .arg(&session_path)
            .arg("--out-dir")
            .arg(&out_dir),
    );

    let stem = "isq_stainless-steel-sheets_20240305-140709";
    let printed = String::from_utf8_lossy(&output.stdout);
    assert_eq!(printed.lines().count(), 4);

    let master = std::fs::read_to_string(out_dir.join(format!("{stem}_master-spec-list.csv"))).unwrap();
    assert!(master.starts_with("PMCAT,PMCAT ID,MCAT,MCAT ID,Tier,Specification,Options"));
    assert!(master.contains("Primary,Grade,304; 316"));

    let evidence =
        std::fs::read_to_string(out_dir.join(format!("{stem}_website-evidence.csv"))).unwrap();
    assert!(evidence.contains("https://seller.example/a,120,Material Grade,304; 316"));

    let final_isqs = std::fs::read_to_string(out_dir.join(format!("{stem}_final-isqs.csv"))).unwrap();
    let roles: Vec<&str> = final_isqs
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(roles, vec!["Config", "Key", "Key", "Key", "Buyer", "Buyer"]);

    let bundle: Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join(format!("{stem}.json"))).unwrap())
            .unwrap();
    assert_eq!(bundle["pmcat"]["name"], "Stainless Steel Sheets");
    assert_eq!(bundle["isqs"]["buyers"].as_array().unwrap().len(), 2);
}

#[test]
fn patterns_lists_the_heuristic_table() {
    let output = run_ok(isq().arg("patterns"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let labels: Vec<&str> = stdout
        .lines()
        .filter_map(|l| l.split('\t').next())
        .collect();
    assert_eq!(labels.len(), 10);
    assert_eq!(labels[0], "Material Grade");
    assert!(labels.contains(&"Thickness"));
}

#[test]
fn run_without_api_keys_fails_with_config_error() {
    let dir = tempdir().unwrap();
    let request = dir.path().join("request.json");
    let out = dir.path().join("session.json");
    write(
        &request,
        &json!({
            "pmcat": {"name": "Stainless Steel Sheets", "id": "P1"},
            "mcats": [{"name": "SS 304 Sheet", "id": "M1"}]
        }),
    );

    let output = isq()
        .arg("run")
        .arg("--request")
        .arg(&request)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ISQ_STAGE1_API_KEY"), "stderr: {stderr}");
    assert!(!out.exists());
}
