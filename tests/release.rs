use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread::{self, JoinHandle};

use shipline::artifact::{Artifact, OsArch};
use shipline::context::Context;
use shipline::modules::github::GitHubClient;
use shipline::modules::release::ArtifactRelease;
use shipline::registry::Module;
use tempfile::tempdir;

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Answers one connection per canned `(status, body)` pair and hands back
/// the requests it saw.
fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap().to_string();
            let path = parts.next().unwrap().to_string();

            let mut headers = HashMap::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                let (name, value) = line.split_once(':').unwrap();
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }

            let length: usize = headers
                .get("content-length")
                .map(|value| value.parse().unwrap())
                .unwrap_or(0);
            let mut request_body = vec![0; length];
            reader.read_exact(&mut request_body).unwrap();

            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();

            seen.push(Recorded {
                method,
                path,
                headers,
                body: request_body,
            });
        }
        seen
    });

    (base, handle)
}

fn client(base: &str) -> GitHubClient {
    let http = reqwest::blocking::Client::builder().no_proxy().build().unwrap();
    GitHubClient::new(http, base, "secret", "acme", "demo")
}

fn context(dir: &Path) -> Context {
    let mut ctx = Context::new();
    ctx.project_name = "demo".into();
    ctx.version = "1.2.0".into();
    ctx.git.tag = "1.2.0".into();

    let notes = dir.join("CHANGELOG.md");
    fs::write(&notes, "## [1.2.0]\n\n- shiny\n").unwrap();
    ctx.artifacts.add(Artifact::new("changelog", "CHANGELOG.md", notes));

    let archive = dir.join("demo-1.2.0-linux-amd64.zip");
    fs::write(&archive, "zip-bytes").unwrap();
    ctx.artifacts.add(
        Artifact::new("archive", "demo-1.2.0-linux-amd64.zip", archive)
            .with_target(&OsArch::new("linux", "amd64")),
    );
    ctx
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[test]
fn new_release_is_created_and_assets_uploaded() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    let (base, server) = serve(vec![
        (404, r#"{"message":"Not Found"}"#),
        (201, r#"{"id":42,"body":""}"#),
        (201, r#"{"id":1}"#),
    ]);

    let release = ArtifactRelease {
        owner: "acme".into(),
        name: "demo".into(),
        release_name: "{{ProjectName}} {{Version}}".into(),
        ..ArtifactRelease::default()
    };
    release.publish_with(&ctx, &client(&base)).unwrap();

    let requests = server.join().unwrap();
    let calls: Vec<(&str, &str)> = requests
        .iter()
        .map(|r| (r.method.as_str(), r.path.as_str()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("GET", "/api/v3/repos/acme/demo/releases/tags/1.2.0"),
            ("POST", "/api/v3/repos/acme/demo/releases"),
            (
                "POST",
                "/api/uploads/repos/acme/demo/releases/42/assets?name=demo-1.2.0-linux-amd64.zip"
            ),
        ]
    );
    assert!(
        requests
            .iter()
            .all(|r| r.headers.get("authorization").map(String::as_str) == Some("Bearer secret"))
    );

    let created = json(&requests[1].body);
    assert_eq!(created["name"], "demo 1.2.0");
    assert_eq!(created["tag_name"], "1.2.0");
    assert_eq!(created["body"], "## [1.2.0]\n\n- shiny\n");
    assert_eq!(created["draft"], false);
    assert_eq!(created["prerelease"], false);

    assert_eq!(
        requests[2].headers.get("content-type").map(String::as_str),
        Some("application/octet-stream")
    );
    assert_eq!(requests[2].body, b"zip-bytes");
}

#[test]
fn existing_release_keeps_its_notes() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    let (base, server) = serve(vec![
        (200, r#"{"id":7,"body":"hand written"}"#),
        (200, r#"{"id":7}"#),
    ]);

    let release = ArtifactRelease {
        owner: "acme".into(),
        name: "demo".into(),
        builds: Vec::new(),
        ..ArtifactRelease::default()
    };
    release.publish_with(&ctx, &client(&base)).unwrap();

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, "PATCH");
    assert_eq!(requests[1].path, "/api/v3/repos/acme/demo/releases/7");
    let edited = json(&requests[1].body);
    assert_eq!(edited["body"], "hand written");
    assert_eq!(edited["name"], "1.2.0");
}

#[test]
fn api_errors_are_reported() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    let (base, server) = serve(vec![
        (404, r#"{"message":"Not Found"}"#),
        (422, r#"{"message":"Validation Failed"}"#),
    ]);

    let release = ArtifactRelease {
        owner: "acme".into(),
        name: "demo".into(),
        ..ArtifactRelease::default()
    };
    let err = release.publish_with(&ctx, &client(&base)).unwrap_err();
    server.join().unwrap();

    assert_eq!(err.to_string(), "creating release 1.2.0");
    assert!(format!("{err:#}").contains("HTTP 422"), "{err:#}");
}

#[test]
fn release_notes_must_be_unique() {
    let temp = tempdir().unwrap();
    let mut ctx = context(temp.path());
    let release = ArtifactRelease {
        owner: "acme".into(),
        name: "demo".into(),
        release_notes: "notes".into(),
        ..ArtifactRelease::default()
    };

    let err = release.run(&mut ctx).unwrap_err();
    assert_eq!(err.to_string(), "release notes not found");

    ctx.artifacts
        .add(Artifact::new("notes", "a.md", temp.path().join("CHANGELOG.md")));
    ctx.artifacts
        .add(Artifact::new("notes", "b.md", temp.path().join("CHANGELOG.md")));
    let err = release.run(&mut ctx).unwrap_err();
    assert_eq!(err.to_string(), "multiple release notes found");
}

#[test]
fn repository_is_required() {
    let temp = tempdir().unwrap();
    let mut ctx = context(temp.path());

    let err = ArtifactRelease::default().run(&mut ctx).unwrap_err();

    assert!(err.to_string().starts_with("release repository is not set"), "{err}");
}
