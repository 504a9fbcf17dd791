use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{add_tree, collect_files, prepare_output, Stage, StageContext};
use crate::process::{ensure_exists, Cmd};

/// Converts class files to dex with d8, or with r8 when shrinking.
///
/// Classes are bundled into `classes.jar` first; dependency jars and the
/// desugared JDK library are dexed as program inputs alongside it.
pub struct ConvertBytecode;

impl Stage for ConvertBytecode {
    fn name(&self) -> &'static str {
        "convert-bytecode"
    }

    fn label(&self) -> &'static str {
        "Converting to DEX format..."
    }

    fn progress(&self) -> u8 {
        50
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let config = ctx.config;
        let layout = ctx.layout;
        ensure_exists(&layout.classes_dir, "Classes directory")?;
        bundle_classes(&layout.classes_dir, &layout.classes_jar)?;

        if layout.dex_dir.exists() {
            fs::remove_dir_all(&layout.dex_dir)
                .with_context(|| format!("removing '{}'", layout.dex_dir.display()))?;
        }
        fs::create_dir_all(&layout.dex_dir)
            .with_context(|| format!("creating directory '{}'", layout.dex_dir.display()))?;

        let (program, tool) = if config.shrink_enabled {
            (&ctx.toolchain.r8, "r8")
        } else {
            (&ctx.toolchain.d8, "d8")
        };
        let mut cmd = Cmd::new(program)
            .arg("--output")
            .arg_path(&layout.dex_dir)
            .args(["--min-api", &config.min_sdk.to_string()])
            .arg(if config.debug_mode { "--debug" } else { "--release" })
            .arg("--lib")
            .arg_path(&config.android_jar);
        if config.shrink_enabled {
            cmd = cmd.opt_path("--pg-conf", config.proguard_rules_path.as_deref());
            if layout.aapt_rules.is_file() {
                cmd = cmd.arg("--pg-conf").arg_path(&layout.aapt_rules);
            }
        }
        for jar in &config.classpath {
            cmd = cmd.arg_path(jar);
        }
        if let Some(desugar) = &config.desugar_jdk_libs_path {
            cmd = cmd.arg_path(desugar);
        }
        let cmd = cmd
            .arg_path(&layout.classes_jar)
            .error_msg(format!("{tool} failed"));
        ctx.run(cmd)?;

        ensure_exists(&layout.dex_dir.join("classes.dex"), "classes.dex")?;
        collect_files(&layout.dex_dir, "dex")
    }
}

fn bundle_classes(classes_dir: &Path, jar: &Path) -> Result<()> {
    prepare_output(jar)?;
    let file = File::create(jar).with_context(|| format!("creating '{}'", jar.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    add_tree(&mut writer, classes_dir, "", options)?;
    writer
        .finish()
        .with_context(|| format!("finishing '{}'", jar.display()))?;
    Ok(())
}
