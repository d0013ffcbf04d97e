use std::{fs, io::Write, path::Path};

use assert_cmd::Command as AssertCmd;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::{NamedTempFile, TempDir};

fn tsbs() -> AssertCmd {
    let mut cmd = AssertCmd::cargo_bin("tsbs").unwrap();
    cmd.env_remove("LOG_FILTER")
        .timeout(std::time::Duration::from_secs(30));
    cmd
}

fn generate(out: &Path, query_type: &str, queries: u64, seed: u64) {
    tsbs()
        .args(["generate-queries", "--query-type", query_type, "--scale", "10"])
        .args(["--queries", &queries.to_string(), "--seed", &seed.to_string()])
        .arg("--file")
        .arg(out)
        .assert()
        .success();
}

fn points_file(lines: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(lines.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test_log::test]
fn generated_corpus_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.jsonl");
    let second = dir.path().join("second.jsonl");
    generate(&first, "single-groupby-5-8-1", 25, 123);
    generate(&second, "single-groupby-5-8-1", 25, 123);

    let first = fs::read_to_string(first).unwrap();
    let second = fs::read_to_string(second).unwrap();
    assert_eq!(first, second);

    let lines: Vec<&str> = first.lines().collect();
    assert_eq!(25, lines.len());
    for (i, line) in lines.iter().enumerate() {
        let query: Value = serde_json::from_str(line).unwrap();
        assert_eq!(i as u64, query["id"].as_u64().unwrap());
        assert_eq!("GET", query["request"]["method"]);
        assert!(
            query["request"]["path"]
                .as_str()
                .unwrap()
                .starts_with("/api/v1/query_range?")
        );
    }
}

#[test_log::test]
fn corpus_goes_to_stdout_without_file() {
    let output = tsbs()
        .args(["generate-queries", "--query-type", "lastpoint", "--queries", "3"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let output = String::from_utf8(output).unwrap();
    assert_eq!(3, output.lines().count());
    assert!(output.contains("Prometheus last row per host"));
}

#[test_log::test]
fn unknown_query_type_fails() {
    let output = tsbs()
        .args(["generate-queries", "--query-type", "no-such-query"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).unwrap();
    assert!(stderr.contains("unknown query type 'no-such-query'"), "{stderr}");
}

#[test_log::test]
fn too_many_hosts_fails() {
    tsbs()
        .args(["generate-queries", "--query-type", "cpu-max-all-8", "--scale", "4"])
        .assert()
        .failure()
        .code(1);
}

#[test_log::test]
fn dry_run_load_counts_points() {
    let input = points_file(
        "cpu,hostname=host_0 usage_user=1,usage_system=2 1451606400000000000\n\
         cpu,hostname=host_1 usage_user=3,usage_system=4 1451606400000000000\n\
         cpu,hostname=host_0 usage_user=5,usage_system=6 1451606410000000000\n",
    );
    let output = tsbs()
        .args(["load", "--do-load", "false", "--reporting-period", "0s"])
        .args(["--batch-size", "2", "--workers", "2", "--hash-workers"])
        .arg("--file")
        .arg(input.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("loaded 6 metrics in"), "{stdout}");
    assert!(stdout.contains("loaded 3 rows in"), "{stdout}");
}

#[test_log::test]
fn malformed_points_fail_the_load() {
    let input = points_file("cpu,hostname=host_0 usage_user=1 1\ncpu,hostname=host_0 usage_user=1\n");
    let output = tsbs()
        .args(["load", "--do-load", "false", "--reporting-period", "0s"])
        .arg("--file")
        .arg(input.path())
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).unwrap();
    assert!(
        stderr.contains("parse error on line 2: line does not have 3 tuples, has 2"),
        "{stderr}"
    );
}

#[test_log::test]
fn load_writes_to_remote_write_endpoint() {
    let mut server = mockito::Server::new();
    let ready = server.mock("GET", "/-/ready").with_status(200).create();
    let write = server
        .mock("POST", "/api/v1/write")
        .match_header("Content-Encoding", "snappy")
        .with_status(204)
        .expect(2)
        .create();

    let input = points_file(
        "cpu,hostname=host_0 usage_user=1 1451606400000000000\n\
         cpu,hostname=host_1 usage_user=2 1451606400000000000\n\
         cpu,hostname=host_2 usage_user=3 1451606400000000000\n",
    );
    tsbs()
        .args(["load", "--batch-size", "2", "--reporting-period", "0s"])
        .args(["--url", &server.url()])
        .arg("--file")
        .arg(input.path())
        .assert()
        .success();

    ready.assert();
    write.assert();
}

#[test_log::test]
fn run_queries_against_endpoint() {
    let mut server = mockito::Server::new();
    let query = server
        .mock("GET", "/api/v1/query")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
        .expect(4)
        .create();

    let dir = TempDir::new().unwrap();
    let corpus = dir.path().join("lastpoint.jsonl");
    generate(&corpus, "lastpoint", 4, 1);

    let output = tsbs()
        .args(["run-queries", "--workers", "2", "--print-interval", "0"])
        .args(["--urls", &server.url()])
        .arg("--file")
        .arg(&corpus)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(
        stdout.starts_with("run complete after 4 queries with 2 workers"),
        "{stdout}"
    );
    assert!(stdout.contains("Prometheus last row per host"), "{stdout}");
    query.assert();
}

#[test_log::test]
fn failed_queries_do_not_fail_the_run() {
    let mut server = mockito::Server::new();
    let _query = server
        .mock("GET", "/api/v1/query")
        .match_query(mockito::Matcher::Any)
        .with_status(500)
        .create();

    let dir = TempDir::new().unwrap();
    let corpus = dir.path().join("lastpoint.jsonl");
    generate(&corpus, "lastpoint", 3, 1);

    let output = tsbs()
        .args(["run-queries", "--print-interval", "0"])
        .args(["--urls", &server.url()])
        .arg("--file")
        .arg(&corpus)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("failures: 3"), "{stdout}");
}
