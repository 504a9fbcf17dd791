use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::{prepare_output, Stage, StageContext};
use crate::config::{BuildConfig, SigningMaterial};
use crate::process::{ensure_exists, Cmd};

/// Signs the package with apksigner into `outputs/`.
///
/// Key material is copied into the build's signing directory first, while
/// holding the toolchain-wide key-copy lock. Passwords reach apksigner via
/// `file:` arguments and never appear on the command line.
pub struct Sign;

impl Stage for Sign {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn label(&self) -> &'static str {
        "Signing APK..."
    }

    fn progress(&self) -> u8 {
        90
    }

    fn enabled(&self, config: &BuildConfig) -> bool {
        config.sign_enabled
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let config = ctx.config;
        let layout = ctx.layout;
        let input = ctx.current_package()?;
        let material = config
            .signing
            .material()
            .context("signing material is incomplete")?;

        let output = layout.signed_package();
        prepare_output(&output)?;
        fs::create_dir_all(&layout.signing_dir)
            .with_context(|| format!("creating directory '{}'", layout.signing_dir.display()))?;

        let mut cmd = Cmd::new(&ctx.toolchain.apksigner)
            .arg("sign")
            .args(["--min-sdk-version", &config.min_sdk.to_string()])
            .arg("--out")
            .arg_path(&output);

        let mut secrets = SecretFiles::default();
        {
            let _lock = KeyCopyLock::acquire(&ctx.toolchain.key_lock_path())?;
            match material {
                SigningMaterial::Keystore {
                    path,
                    alias,
                    store_password,
                    key_password,
                } => {
                    let keystore = copy_key(path, &layout.signing_dir)?;
                    let store_pass =
                        secrets.write(layout.signing_dir.join("store-pass.txt"), store_password)?;
                    cmd = cmd
                        .arg("--ks")
                        .arg_path(&keystore)
                        .args(["--ks-key-alias", alias])
                        .arg("--ks-pass")
                        .arg(password_arg(&store_pass));
                    if let Some(key_password) = key_password {
                        let key_pass =
                            secrets.write(layout.signing_dir.join("key-pass.txt"), key_password)?;
                        cmd = cmd.arg("--key-pass").arg(password_arg(&key_pass));
                    }
                }
                SigningMaterial::KeyWithCert { key, cert } => {
                    let key = copy_key(key, &layout.signing_dir)?;
                    let cert = copy_key(cert, &layout.signing_dir)?;
                    cmd = cmd.arg("--key").arg_path(&key).arg("--cert").arg_path(&cert);
                }
            }
        }

        let result = ctx.run(cmd.arg_path(&input).error_msg("apksigner failed"));
        drop(secrets);
        result?;

        ensure_exists(&output, "Signed package")?;
        ctx.package = Some(output.clone());
        Ok(vec![output])
    }
}

/// Exclusive lock serialising key copies across builders and processes.
/// Released when dropped.
struct KeyCopyLock {
    file: File,
}

impl KeyCopyLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Never unlink the lock file: a second process could then lock a
        // fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        debug!(path = %path.display(), "key-copy lock acquired");
        Ok(Self { file })
    }
}

impl Drop for KeyCopyLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn copy_key(source: &Path, signing_dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .with_context(|| format!("key path has no file name: {}", source.display()))?;
    let target = signing_dir.join(name);
    fs::copy(source, &target)
        .with_context(|| format!("copying '{}' to '{}'", source.display(), target.display()))?;
    Ok(target)
}

/// Password files handed to apksigner. Every registered file is removed
/// when dropped, including after a partial write.
#[derive(Default)]
struct SecretFiles {
    paths: Vec<PathBuf>,
}

impl SecretFiles {
    fn write(&mut self, path: PathBuf, secret: &str) -> Result<PathBuf> {
        self.paths.push(path.clone());
        fs::write(&path, secret).with_context(|| format!("writing '{}'", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("restricting '{}'", path.display()))?;
        }
        Ok(path)
    }
}

impl Drop for SecretFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}

fn password_arg(path: &Path) -> String {
    format!("file:{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Keystore;
    use crate::testutil::Fixture;

    #[test]
    fn signs_with_key_and_certificate() {
        let fixture = Fixture::new();
        fixture.run_through_packaging().unwrap();
        let input = fixture.package().unwrap();

        let artifacts = fixture.run_stage(&Sign).unwrap();
        let layout = fixture.config.layout();
        assert_eq!(artifacts, vec![layout.signed_package()]);
        assert_eq!(
            layout.signed_package().file_name(),
            input.file_name(),
            "final package keeps its name"
        );

        let args = fixture.invoker.calls().pop().unwrap().args_lossy();
        assert_eq!(args[0], "sign");
        let key = args.iter().position(|a| a == "--key").unwrap();
        assert!(args[key + 1].starts_with(&*layout.signing_dir.to_string_lossy()));
        assert!(layout.signing_dir.join("testkey.pk8").is_file());
        assert_eq!(args.last().unwrap(), &input.to_string_lossy());
    }

    #[test]
    fn keystore_passwords_go_through_files() {
        let mut fixture = Fixture::new();
        let keystore = fixture.root().join("keys/release.jks");
        fs::write(&keystore, "ks").unwrap();
        fixture.config.signing.use_keystore = true;
        fixture.config.signing.keystore = Keystore {
            path: Some(keystore),
            alias: Some("release".into()),
            store_password: Some("hunter2".into()),
            key_password: Some("hunter3".into()),
        };
        fixture.run_through_packaging().unwrap();
        fixture.run_stage(&Sign).unwrap();

        let call = fixture.invoker.calls().pop().unwrap();
        let line = call.command_line();
        assert!(!line.contains("hunter2"));
        assert!(line.contains("--ks-key-alias release"));
        let args = call.args_lossy();
        let pass = args.iter().position(|a| a == "--ks-pass").unwrap();
        assert!(args[pass + 1].starts_with("file:"));
        assert!(args.contains(&"--key-pass".to_string()));

        let layout = fixture.config.layout();
        assert!(!layout.signing_dir.join("store-pass.txt").exists());
    }

    #[test]
    fn password_files_are_removed_when_signing_setup_fails() {
        let mut fixture = Fixture::new();
        let keystore = fixture.root().join("keys/release.jks");
        fs::write(&keystore, "ks").unwrap();
        fixture.config.signing.use_keystore = true;
        fixture.config.signing.keystore = Keystore {
            path: Some(keystore),
            alias: Some("release".into()),
            store_password: Some("hunter2".into()),
            key_password: Some("hunter3".into()),
        };
        fixture.run_through_packaging().unwrap();
        let layout = fixture.config.layout();
        // a directory in the way makes the second password write fail
        fs::create_dir_all(layout.signing_dir.join("key-pass.txt")).unwrap();

        let err = fixture.run_stage(&Sign).unwrap_err();
        assert!(format!("{err:#}").contains("key-pass.txt"));
        assert!(!layout.signing_dir.join("store-pass.txt").exists());
        assert!(!fixture
            .invoker
            .calls()
            .iter()
            .any(|call| call.tool_name() == "apksigner"));
    }

    #[test]
    fn incomplete_material_fails() {
        let mut fixture = Fixture::new();
        fixture.run_through_packaging().unwrap();
        fixture.config.signing.key_with_cert.key_path = None;
        let err = fixture.run_stage(&Sign).unwrap_err();
        assert_eq!(err.to_string(), "signing material is incomplete");
    }

    #[test]
    fn lock_can_be_reacquired_after_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("home/.signing.lock");
        drop(KeyCopyLock::acquire(&path).unwrap());
        let _again = KeyCopyLock::acquire(&path).unwrap();
        assert!(path.is_file());
    }
}
