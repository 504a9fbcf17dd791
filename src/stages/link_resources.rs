use anyhow::{bail, Result};
use std::path::PathBuf;

use super::{collect_files, prepare_output, Stage, StageContext};
use crate::config::DEFAULT_PACKAGE_ID;
use crate::process::{ensure_exists, Cmd};

/// Links compiled resources and the manifest into the base archive
/// (`resources.ap_`) and generates `R.java` under `gen/`.
pub struct LinkResources;

impl Stage for LinkResources {
    fn name(&self) -> &'static str {
        "link-resources"
    }

    fn label(&self) -> &'static str {
        "Linking resources with aapt2..."
    }

    fn progress(&self) -> u8 {
        30
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let config = ctx.config;
        let layout = ctx.layout;
        ensure_exists(&layout.compiled_res, "Compiled resources archive")?;
        ensure_exists(&config.manifest_path, "AndroidManifest.xml")?;
        ensure_exists(&config.android_jar, "android.jar")?;
        prepare_output(&layout.base_archive)?;

        let mut cmd = Cmd::new(&ctx.toolchain.aapt2)
            .arg("link")
            .arg("-I")
            .arg_path(&config.android_jar)
            .arg("--manifest")
            .arg_path(&config.manifest_path)
            .arg("--java")
            .arg_path(&layout.gen_dir)
            .arg("-o")
            .arg_path(&layout.base_archive)
            .arg("--auto-add-overlay")
            .args(["--min-sdk-version", &config.min_sdk.to_string()])
            .args(["--target-sdk-version", &config.target_sdk.to_string()])
            .args(["--version-code", &config.version_code.to_string()])
            .args(["--version-name", &config.version_name])
            .args(["--rename-manifest-package", &config.app_package]);
        if config.package_id != DEFAULT_PACKAGE_ID {
            cmd = cmd
                .args(["--package-id", &format!("0x{:02x}", config.package_id)])
                .arg("--allow-reserved-package-id");
        }
        if config.shrink_enabled {
            cmd = cmd.arg("--proguard").arg_path(&layout.aapt_rules);
        }
        if config.debug_mode {
            cmd = cmd.arg("--debug-mode");
        }
        let cmd = cmd
            .arg_path(&layout.compiled_res)
            .error_msg("aapt2 link failed");
        ctx.run(cmd)?;

        ensure_exists(&layout.base_archive, "Linked resources archive")?;
        let generated = collect_files(&layout.gen_dir, "java")?;
        if generated.is_empty() {
            bail!(
                "aapt2 link did not generate R.java under {}",
                layout.gen_dir.display()
            );
        }

        let mut artifacts = vec![layout.base_archive.clone()];
        artifacts.extend(generated);
        if config.shrink_enabled && layout.aapt_rules.is_file() {
            artifacts.push(layout.aapt_rules.clone());
        }
        Ok(artifacts)
    }
}
