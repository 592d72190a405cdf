use assert_cmd::Command;
use predicates::prelude::*;

fn sitedeck() -> Command {
    let mut cmd = Command::cargo_bin("sitedeck").expect("sitedeck binary");
    // Force the in-memory backends regardless of the host environment.
    cmd.env_remove("SITEDECK_STORE_PROJECT")
        .env_remove("SITEDECK_SCREENSHOT_URL")
        .env_remove("OPENAI_API_KEY")
        .env("SITEDECK_CAPTURE_ATTEMPTS", "1")
        .env("SITEDECK_CAPTURE_RETRY_DELAY_MS", "1");
    cmd
}

#[test]
fn list_is_empty_with_the_memory_store() {
    sitedeck()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 site(s)"));
}

#[test]
fn add_catalogs_a_site_with_local_fallbacks() {
    sitedeck()
        .args(["add", "example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added 1 site(s), 0 failed"));
}

#[test]
fn add_fails_when_every_url_is_malformed() {
    sitedeck()
        .args(["add", "exa mple.com"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stderr(predicate::str::contains("no site could be added"));
}
