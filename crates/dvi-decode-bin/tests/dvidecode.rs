use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

/// A one-page DVI file containing a single 10pt by 20pt rule.
fn rule_dvi() -> Vec<u8> {
    let mut b: Vec<u8> = vec![247, 2];
    let int = |b: &mut Vec<u8>, v: i32| b.extend(v.to_be_bytes());
    int(&mut b, 25400000);
    int(&mut b, 473628672);
    int(&mut b, 1000);
    b.push(0);
    let bop = b.len() as i32;
    b.push(139);
    for _ in 0..10 {
        int(&mut b, 0);
    }
    int(&mut b, -1);
    b.push(132); // set_rule
    int(&mut b, 655360);
    int(&mut b, 1310720);
    b.push(140); // eop
    let post = b.len() as i32;
    b.push(248);
    int(&mut b, bop);
    int(&mut b, 25400000);
    int(&mut b, 473628672);
    int(&mut b, 1000);
    int(&mut b, 0x0FFFFFFF);
    int(&mut b, 0x0FFFFFFF);
    b.extend(100u16.to_be_bytes());
    b.extend(1u16.to_be_bytes());
    b.push(249);
    int(&mut b, post);
    b.push(2);
    b.extend([223; 4]);
    b
}

fn write_dvi(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("input.dvi");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&rule_dvi()).unwrap();
    path
}

#[test]
fn decode_writes_the_document_as_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_dvi(&dir);

    let mut cmd = Command::cargo_bin("dvidecode").unwrap();
    cmd.args(["decode", "--dpi", "72", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""width": 20"#))
        .stdout(predicate::str::contains(r#""height": 10"#))
        .stdout(predicate::str::contains(r#""y": -10"#));
}

#[test]
fn decode_writes_to_an_output_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_dvi(&dir);
    let output = dir.path().join("document.json");

    let mut cmd = Command::cargo_bin("dvidecode").unwrap();
    cmd.args([
        "decode",
        "--dpi",
        "72",
        "--output",
        output.to_str().unwrap(),
        path.to_str().unwrap(),
    ]);
    cmd.assert().success();

    let json = std::fs::read_to_string(&output).unwrap();
    let document: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(document["pages"][0]["rules"][0]["width"], 20);
}

#[test]
fn inspect_summarizes_each_page() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_dvi(&dir);

    let mut cmd = Command::cargo_bin("dvidecode").unwrap();
    cmd.args(["inspect", "--dpi", "72", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0 fonts"))
        .stdout(predicate::str::contains(
            "page 1: 0 glyphs, 1 rules, 0 images",
        ));
}

#[test]
fn missing_input_file_is_an_error() {
    let mut cmd = Command::cargo_bin("dvidecode").unwrap();
    cmd.args(["decode", "no-such-file.dvi"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn invalid_dvi_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("garbage.dvi");
    std::fs::write(&path, b"this is not a dvi file at all, not even close....").unwrap();

    let mut cmd = Command::cargo_bin("dvidecode").unwrap();
    cmd.args(["decode", path.to_str().unwrap()]);
    cmd.assert().failure();
}