use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{add_file, add_tree, collect_files, prepare_output, Stage, StageContext};
use crate::process::ensure_exists;

/// Builds the unsigned package in-process.
///
/// The linked base archive already carries the manifest and compiled
/// resources; dex files, assets and native libraries are appended to a copy
/// of it. Native libraries are stored uncompressed so the platform can map
/// them directly.
pub struct PackageResources;

impl Stage for PackageResources {
    fn name(&self) -> &'static str {
        "package-resources"
    }

    fn label(&self) -> &'static str {
        "Packaging APK..."
    }

    fn progress(&self) -> u8 {
        60
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let config = ctx.config;
        let layout = ctx.layout;
        ensure_exists(&layout.base_archive, "Linked resources archive")?;
        let dex_files = collect_files(&layout.dex_dir, "dex")?;
        if dex_files.is_empty() {
            bail!("No dex files found in {}", layout.dex_dir.display());
        }

        let package = layout.unsigned_package();
        prepare_output(&package)?;
        fs::copy(&layout.base_archive, &package).with_context(|| {
            format!(
                "copying '{}' to '{}'",
                layout.base_archive.display(),
                package.display()
            )
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&package)
            .with_context(|| format!("opening '{}'", package.display()))?;
        let mut writer = ZipWriter::new_append(file)
            .with_context(|| format!("reading archive '{}'", package.display()))?;

        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for dex in &dex_files {
            let name = dex
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("dex file without a name")?;
            add_file(&mut writer, dex, &name, deflated)?;
        }
        if let Some(assets) = &config.assets_dir {
            let added = add_tree(&mut writer, assets, "assets/", deflated)?;
            debug!(count = added, "packaged assets");
        }
        if let Some(libs) = &config.native_libs_dir {
            let added = add_tree(&mut writer, libs, "lib/", stored)?;
            debug!(count = added, "packaged native libraries");
        }
        writer
            .finish()
            .with_context(|| format!("finishing '{}'", package.display()))?;

        ctx.package = Some(package.clone());
        Ok(vec![package])
    }
}
