//! Integration tests for Pullship

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn pullship() -> Command {
        let mut cmd = cargo_bin_cmd!("pullship");
        cmd.env_remove("PULLSHIP_CONFIG");
        cmd
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        pullship()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("pull-based continuous deployment"));
    }

    #[test]
    fn version_displays() {
        pullship()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pullship"));
    }

    #[test]
    fn config_path() {
        pullship()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_path_honours_flag() {
        pullship()
            .args(["--config", "/tmp/elsewhere/pullship.toml", "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/tmp/elsewhere/pullship.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        pullship()
            .arg("--config")
            .arg(dir.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[repository]"))
            .stdout(predicate::str::contains("interval_secs = 10"));
    }

    #[test]
    fn config_show_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[repository]\nowner = \"acme\"\nname = \"app\"\nartifact = \"app.tar.gz\"\n",
        );
        pullship()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("owner = \"acme\""));
    }

    #[test]
    fn config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");
        pullship()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.exists());
    }

    #[test]
    fn invalid_provider_in_config_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[repository]\nprovider = \"gitlab\"\n");
        pullship()
            .arg("--config")
            .arg(&path)
            .args(["assets", "--once"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn missing_repository_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        pullship()
            .arg("--config")
            .arg(dir.path().join("missing.toml"))
            .args(["assets", "--once"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("repository.owner"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn server_without_command_fails() {
        let dir = TempDir::new().unwrap();
        pullship()
            .arg("--config")
            .arg(dir.path().join("missing.toml"))
            .args(["server", "--once", "-r", "acme/app", "-a", "app.tar.gz"])
            .env("XDG_CACHE_HOME", dir.path())
            .env("HOME", dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("server.command"));
    }

    #[test]
    fn unknown_provider_flag_is_rejected() {
        pullship()
            .args(["assets", "--provider", "gitlab"])
            .assert()
            .failure();
    }
}
