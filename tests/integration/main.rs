//! Integration tests for pack

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// pack with its home under `home` and no ambient CI or color settings
    fn pack(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("pack");
        cmd.env("PACK_HOME", home.path())
            .env_remove("PACK_PULL_POLICY")
            .env_remove("PACK_BUILDER")
            .env_remove("RUST_LOG")
            .arg("--no-color");
        cmd
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Cloud Native Buildpacks"))
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("trust-builder").not());
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pack"));
    }

    #[test]
    fn config_path_follows_pack_home() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(home.path().join("config.toml").display().to_string()));
    }

    #[test]
    fn trusted_builders_add_and_list() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["config", "trusted-builders", "add", "example.com/corp/builder:base"])
            .assert()
            .success();
        pack(&home)
            .args(["config", "trusted-builders", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("example.com/corp/builder:base"))
            .stdout(predicate::str::contains("paketobuildpacks/*"));

        let written = std::fs::read_to_string(home.path().join("config.toml")).unwrap();
        assert!(written.contains("[[trusted-builders]]"));
    }

    #[test]
    fn deprecated_trust_builder_writes_the_same_config() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["trust-builder", "example.com/corp/builder:base"])
            .assert()
            .success();
        pack(&home)
            .args(["untrust-builder", "example.com/corp/builder:base"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no longer trusted"));
    }

    #[test]
    fn experimental_toggle_persists() {
        let home = TempDir::new().unwrap();
        pack(&home).args(["config", "experimental", "true"]).assert().success();
        pack(&home)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("experimental = true"));
    }

    #[test]
    fn invalid_pull_policy_exits_with_usage_code() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["config", "pull-policy", "sometimes"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("ERROR:"));
    }

    #[test]
    fn missing_default_builder_suggests_builders() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["config", "default-builder"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Suggested builders"));
    }

    #[test]
    fn build_rejects_cache_image_without_publish() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["build", "my-app", "--builder", "example/builder", "--cache-image", "example/cache"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("publish"));
    }

    #[test]
    fn build_interactive_requires_experimental() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["build", "my-app", "--builder", "example/builder", "--interactive"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("experimental"));
    }

    #[test]
    fn manifest_exists_fails_for_unknown_list() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["manifest", "exists", "example.com/app:multi"])
            .assert()
            .failure();
    }

    #[test]
    fn completion_prints_a_script() {
        let home = TempDir::new().unwrap();
        pack(&home)
            .args(["completion", "--shell", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pack"));
    }
}
